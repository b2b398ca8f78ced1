//! OSC traffic monitor for debugging and development
//!
//! Subscribes to a console's change notifications and prints every message
//! it sends, colour coded by parameter type.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use colored::*;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::discovery::DeviceInfo;
use crate::osc::{format_args, InboundMessage, Transport, UdpTransport};

/// Rough parameter family of an address, used for colouring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageCategory {
    Level,
    Mute,
    Pan,
    Name,
    Meter,
    Info,
    Other,
}

impl MessageCategory {
    pub fn of(address: &str) -> Self {
        if address.starts_with("/meters") {
            return MessageCategory::Meter;
        }
        if address == "/xinfo" || address == "/status" || address == "/info" {
            return MessageCategory::Info;
        }
        match address.rsplit('/').next().unwrap_or_default() {
            "fader" => MessageCategory::Level,
            "on" => MessageCategory::Mute,
            "pan" => MessageCategory::Pan,
            "name" => MessageCategory::Name,
            _ => MessageCategory::Other,
        }
    }

    fn paint(self, text: &str) -> ColoredString {
        match self {
            MessageCategory::Level => text.bright_cyan(),
            MessageCategory::Mute => text.bright_yellow(),
            MessageCategory::Pan => text.bright_green(),
            MessageCategory::Name => text.bright_magenta(),
            MessageCategory::Meter => text.bright_black(),
            MessageCategory::Info => text.bright_blue(),
            MessageCategory::Other => text.normal(),
        }
    }
}

/// Print console traffic until Ctrl+C
pub async fn run_monitor(host: &str, port: u16, renew_every: Duration) -> Result<()> {
    println!("{}", "=== OSC Monitor ===".bold().cyan());
    println!("Console: {}:{}", host.bright_white(), port);
    println!("Press Ctrl+C to exit\n");

    let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel();
    let transport = UdpTransport::connect(host, port, inbound_tx)
        .await
        .with_context(|| format!("Failed to open OSC socket to {}:{}", host, port))?;

    transport
        .send("/xinfo", Vec::new())
        .context("Failed to query console info")?;

    println!("{}", "Format: [timestamp] ADDRESS | ARGS".dimmed());
    println!("{}\n", "─".repeat(80).dimmed());

    let start = Instant::now();
    let mut renew = interval(renew_every);
    renew.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut shown: u64 = 0;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            Some(message) = inbound_rx.recv() => {
                print_message(start.elapsed(), &message);
                shown += 1;
            }
            _ = renew.tick() => {
                if let Err(e) = transport.send("/xremote", Vec::new()) {
                    debug!("Failed to renew /xremote: {}", e);
                }
            }
            _ = &mut shutdown => break,
        }
    }

    info!("Monitor stopped after {} messages", shown);
    println!("\n{}", "Monitor stopped".yellow());
    Ok(())
}

fn print_message(elapsed: Duration, message: &InboundMessage) {
    let category = MessageCategory::of(&message.address);
    println!(
        "[{:08}ms] {:32} | {}",
        elapsed.as_millis().to_string().dimmed(),
        category.paint(&message.address),
        format_args(&message.args)
    );
}

/// Print discovery results as a table
pub fn print_devices(devices: &[DeviceInfo]) {
    println!("\n{}", "=== Consoles on the network ===".bold().cyan());

    if devices.is_empty() {
        println!("  {}", "No consoles answered".dimmed());
        println!();
        return;
    }

    for device in devices {
        println!(
            "  {} {:15} {} {}",
            "[X32]".green(),
            device.address.to_string().bright_white(),
            device.display_name.yellow(),
            format!("{} fw {}", device.model, device.firmware).dimmed()
        );
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(MessageCategory::of("/ch/01/mix/fader"), MessageCategory::Level);
        assert_eq!(MessageCategory::of("/dca/1/fader"), MessageCategory::Level);
        assert_eq!(MessageCategory::of("/bus/02/mix/on"), MessageCategory::Mute);
        assert_eq!(MessageCategory::of("/ch/05/mix/pan"), MessageCategory::Pan);
        assert_eq!(MessageCategory::of("/ch/05/config/name"), MessageCategory::Name);
        assert_eq!(MessageCategory::of("/meters/1"), MessageCategory::Meter);
        assert_eq!(MessageCategory::of("/xinfo"), MessageCategory::Info);
        assert_eq!(MessageCategory::of("/-stat/tape/state"), MessageCategory::Other);
    }

    #[test]
    fn test_print_devices_empty() {
        // Just ensure printing doesn't panic
        print_devices(&[]);
    }
}
