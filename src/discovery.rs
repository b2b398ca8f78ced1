//! Console discovery on the local network
//!
//! X32-family consoles answer a broadcast `/xinfo` query with
//! `ip, name, model, firmware` string arguments. Replies land in a
//! [`DeviceRegistry`] that forgets consoles it has not heard from within
//! the TTL.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rosc::decoder;
use serde::Serialize;
use tokio::net::UdpSocket;
use tracing::{debug, info, trace};

use crate::osc::{encode_message, flatten_packet, InboundMessage, X32_OSC_PORT};

/// How long a console stays listed after its last reply
pub const DEFAULT_DEVICE_TTL: Duration = Duration::from_secs(60);

/// A console that answered discovery
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub address: IpAddr,
    pub display_name: String,
    pub model: String,
    pub firmware: String,
    #[serde(skip)]
    pub last_seen: Instant,
}

impl DeviceInfo {
    /// Parse an `/xinfo` reply received from `from`
    pub fn from_xinfo(from: IpAddr, message: &InboundMessage, now: Instant) -> Option<Self> {
        if message.address != "/xinfo" {
            return None;
        }
        let field = |i: usize| {
            message
                .args
                .get(i)
                .and_then(|a| a.as_str())
                .map(str::to_string)
        };

        // The console reports its own idea of its IP first; trust the socket
        Some(Self {
            address: from,
            display_name: field(1)?,
            model: field(2).unwrap_or_default(),
            firmware: field(3).unwrap_or_default(),
            last_seen: now,
        })
    }
}

/// Recently seen consoles keyed by network address
#[derive(Debug)]
pub struct DeviceRegistry {
    ttl: Duration,
    devices: HashMap<IpAddr, DeviceInfo>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_DEVICE_TTL)
    }
}

impl DeviceRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            devices: HashMap::new(),
        }
    }

    /// Record a reply. Stale entries are pruned first, on every datagram.
    pub fn observe(&mut self, device: DeviceInfo) {
        self.prune(device.last_seen);
        if !self.devices.contains_key(&device.address) {
            info!(
                "🔎 Found {} ({} {}) at {}",
                device.display_name, device.model, device.firmware, device.address
            );
        }
        self.devices.insert(device.address, device);
    }

    /// Drop entries older than the TTL. Returns how many were removed.
    pub fn prune(&mut self, now: Instant) -> usize {
        let ttl = self.ttl;
        let before = self.devices.len();
        self.devices.retain(|address, device| {
            let fresh = now.saturating_duration_since(device.last_seen) <= ttl;
            if !fresh {
                debug!(%address, name = %device.display_name, "Device expired");
            }
            fresh
        });
        before - self.devices.len()
    }

    /// Known consoles ordered by address
    pub fn list(&self) -> Vec<DeviceInfo> {
        let mut devices: Vec<DeviceInfo> = self.devices.values().cloned().collect();
        devices.sort_by_key(|d| d.address);
        devices
    }

    pub fn get(&self, address: &IpAddr) -> Option<&DeviceInfo> {
        self.devices.get(address)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// Broadcast `/xinfo` and collect replies for `wait`
pub async fn discover(
    registry: &mut DeviceRegistry,
    broadcast: IpAddr,
    wait: Duration,
) -> Result<Vec<DeviceInfo>> {
    let socket = UdpSocket::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0))
        .await
        .context("Failed to bind discovery socket")?;
    socket
        .set_broadcast(true)
        .context("Failed to enable broadcast")?;

    let query = encode_message("/xinfo", Vec::new())?;
    let target = SocketAddr::new(broadcast, X32_OSC_PORT);
    socket
        .send_to(&query, target)
        .await
        .with_context(|| format!("Failed to send discovery query to {}", target))?;
    debug!(%target, "Discovery query sent");

    let deadline = tokio::time::Instant::now() + wait;
    let mut buf = vec![0u8; 4096];
    loop {
        let received = tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await;
        let (size, peer) = match received {
            Err(_) => break,
            Ok(Err(e)) => {
                trace!("Discovery receive error: {}", e);
                continue;
            }
            Ok(Ok(r)) => r,
        };

        let Ok((_, packet)) = decoder::decode_udp(&buf[..size]) else {
            trace!(%peer, "Ignoring undecodable discovery reply");
            continue;
        };
        for message in flatten_packet(packet) {
            if let Some(device) = DeviceInfo::from_xinfo(peer.ip(), &message, Instant::now()) {
                registry.observe(device);
            }
        }
    }

    Ok(registry.list())
}
