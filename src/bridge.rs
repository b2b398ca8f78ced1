//! Connection supervisor
//!
//! Owns the current session. Each connection attempt builds a transport and
//! a brand-new session; losing the console, or a config reload, throws both
//! away. While connected it keeps the console's change notifications alive
//! with `/xremote` and watches for silence with an `/xinfo` heartbeat.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::osc::{ConsoleTransport, InboundMessage, Transport, UdpTransport};
use crate::session::{SessionActor, SessionEvent, SessionHandle};

/// Console link state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// First attempt in progress
    Connecting,
    /// The console has answered on this session
    Connected,
    Disconnected,
    /// Waiting before the next attempt
    Reconnecting { attempt: usize },
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Connecting => f.write_str("connecting"),
            ConnectionStatus::Connected => f.write_str("connected"),
            ConnectionStatus::Disconnected => f.write_str("disconnected"),
            ConnectionStatus::Reconnecting { attempt } => {
                write!(f, "reconnecting (attempt {})", attempt)
            }
        }
    }
}

/// Exponential backoff between connection attempts
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    attempt: usize,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            attempt: 0,
        }
    }

    /// Delay before the next attempt: initial, doubling, capped at max
    pub fn next_delay(&mut self) -> Duration {
        let shift = self.attempt.min(16) as u32;
        self.attempt += 1;
        self.initial
            .checked_mul(1u32 << shift)
            .unwrap_or(self.max)
            .min(self.max)
    }

    pub fn attempt(&self) -> usize {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

enum BridgeCommand {
    Reload(Box<AppConfig>),
    Shutdown,
}

/// Why a connected session ended
enum SessionExit {
    Lost(String),
    Reload(Box<AppConfig>),
    Shutdown,
}

/// Control side of a running bridge
#[derive(Clone)]
pub struct BridgeHandle {
    cmd_tx: mpsc::UnboundedSender<BridgeCommand>,
    status_rx: watch::Receiver<ConnectionStatus>,
    session_rx: watch::Receiver<Option<SessionHandle>>,
}

impl BridgeHandle {
    /// Replace the session with one built from `config`
    pub fn reload(&self, config: AppConfig) {
        let _ = self.cmd_tx.send(BridgeCommand::Reload(Box::new(config)));
    }

    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(BridgeCommand::Shutdown);
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status_rx.borrow().clone()
    }

    /// Watch status transitions
    pub fn status_changes(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    /// The live session, if any
    pub fn session(&self) -> Option<SessionHandle> {
        self.session_rx.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        !self.cmd_tx.is_closed()
    }
}

pub struct Bridge {
    config: AppConfig,
    dry_run: bool,
    cmd_rx: mpsc::UnboundedReceiver<BridgeCommand>,
    status_tx: watch::Sender<ConnectionStatus>,
    session_tx: watch::Sender<Option<SessionHandle>>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
}

impl Bridge {
    /// Start supervising the console described by `config`.
    ///
    /// Session events from every session the bridge creates come out of the
    /// returned receiver. With `dry_run` nothing touches the network.
    pub fn spawn(
        config: AppConfig,
        dry_run: bool,
    ) -> (BridgeHandle, mpsc::UnboundedReceiver<SessionEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connecting);
        let (session_tx, session_rx) = watch::channel(None);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let bridge = Bridge {
            config,
            dry_run,
            cmd_rx,
            status_tx,
            session_tx,
            event_tx,
        };
        tokio::spawn(bridge.run());

        (
            BridgeHandle {
                cmd_tx,
                status_rx,
                session_rx,
            },
            event_rx,
        )
    }

    async fn run(mut self) {
        let conn = &self.config.connection;
        let mut backoff = Backoff::new(
            Duration::from_millis(conn.reconnect_initial_ms),
            Duration::from_millis(conn.reconnect_max_ms),
        );

        loop {
            let exit = match self.connect(&mut backoff).await {
                Ok(exit) => exit,
                Err(e) => SessionExit::Lost(format!("{:#}", e)),
            };
            self.session_tx.send_replace(None);

            match exit {
                SessionExit::Shutdown => break,
                SessionExit::Reload(config) => {
                    info!("🔄 Config changed, rebuilding session");
                    backoff = Backoff::new(
                        Duration::from_millis(config.connection.reconnect_initial_ms),
                        Duration::from_millis(config.connection.reconnect_max_ms),
                    );
                    self.config = *config;
                }
                SessionExit::Lost(reason) => {
                    let delay = backoff.next_delay();
                    let attempt = backoff.attempt();
                    warn!("Console connection lost: {}", reason);
                    debug!("⏳ Console reconnect #{} in {:?}", attempt, delay);
                    self.set_status(ConnectionStatus::Reconnecting { attempt });

                    // Commands still apply while waiting
                    tokio::select! {
                        _ = sleep(delay) => {}
                        cmd = self.cmd_rx.recv() => match cmd {
                            Some(BridgeCommand::Reload(config)) => self.config = *config,
                            Some(BridgeCommand::Shutdown) | None => break,
                        },
                    }
                }
            }
        }

        self.set_status(ConnectionStatus::Disconnected);
        info!("Bridge stopped");
    }

    /// One transport + session lifetime
    async fn connect(&mut self, backoff: &mut Backoff) -> Result<SessionExit> {
        let console = &self.config.console;
        let conn = self.config.connection.clone();
        let (wire_tx, mut wire_rx) = mpsc::unbounded_channel::<InboundMessage>();

        let transport: Arc<dyn Transport> = if self.dry_run {
            Arc::new(ConsoleTransport::new(format!("{}:{}", console.host, console.port)))
        } else {
            info!("🎛️  Connecting to console at {}:{}", console.host, console.port);
            let udp = UdpTransport::connect(&console.host, console.port, wire_tx.clone())
                .await
                .with_context(|| format!("Failed to open OSC socket to {}", console.host))?;
            Arc::new(udp)
        };

        let (session_in_tx, session_in_rx) = mpsc::unbounded_channel();
        let (session, mut events) =
            SessionActor::spawn(self.config.session_config(), transport.clone(), session_in_rx);
        self.session_tx.send_replace(Some(session.clone()));

        let mut xremote = interval(Duration::from_millis(conn.xremote_interval_ms));
        let mut heartbeat = interval(Duration::from_millis(conn.heartbeat_ms));
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let resync_every = self.config.loads.resync_interval_ms;
        let mut resync = interval(Duration::from_millis(resync_every.max(1)));
        resync.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let heartbeat_timeout = Duration::from_millis(conn.heartbeat_timeout_ms);
        let mut last_heard = Instant::now();
        let mut connected = false;

        if self.dry_run {
            self.set_status(ConnectionStatus::Connected);
            connected = true;
        }

        let exit = loop {
            tokio::select! {
                msg = wire_rx.recv() => {
                    let Some(msg) = msg else {
                        break SessionExit::Lost("receiver stopped".to_string());
                    };
                    last_heard = Instant::now();
                    if !connected {
                        connected = true;
                        backoff.reset();
                        info!("✅ Console answered");
                        self.set_status(ConnectionStatus::Connected);
                    }
                    // Heartbeat replies are not parameter changes
                    if msg.address != "/xinfo" {
                        let _ = session_in_tx.send(msg);
                    }
                }
                _ = xremote.tick(), if !self.dry_run => {
                    if let Err(e) = transport.send("/xremote", Vec::new()) {
                        debug!("Failed to renew /xremote: {}", e);
                    }
                }
                _ = heartbeat.tick(), if !self.dry_run => {
                    if last_heard.elapsed() > heartbeat_timeout {
                        break SessionExit::Lost(format!(
                            "no reply for {:?}",
                            last_heard.elapsed()
                        ));
                    }
                    if let Err(e) = transport.send("/xinfo", Vec::new()) {
                        debug!("Heartbeat send failed: {}", e);
                    }
                }
                _ = resync.tick(), if resync_every > 0 && connected => {
                    let session = session.clone();
                    tokio::spawn(async move {
                        let loaded = session.resync().await;
                        if loaded > 0 {
                            debug!(loaded, "Resync loaded values");
                        }
                    });
                }
                event = events.recv() => match event {
                    Some(event) => {
                        let _ = self.event_tx.send(event);
                    }
                    None => break SessionExit::Lost("session stopped".to_string()),
                },
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(BridgeCommand::Reload(config)) => break SessionExit::Reload(config),
                    Some(BridgeCommand::Shutdown) | None => break SessionExit::Shutdown,
                },
            }
        };

        session.shutdown();
        // Deliver what the session flushed on the way out
        while let Some(event) = events.recv().await {
            let _ = self.event_tx.send(event);
        }
        if connected {
            self.set_status(ConnectionStatus::Disconnected);
        }
        Ok(exit)
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            debug!("Console status: {:?} → {:?}", current, status);
            *current = status;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rosc::{decoder, encoder, OscMessage, OscPacket, OscType};
    use tokio::net::UdpSocket;

    #[test]
    fn test_backoff_doubles_to_cap() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
        let delays: Vec<u64> = (0..8).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30, 30]);
        assert_eq!(backoff.attempt(), 8);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_backoff_survives_many_attempts() {
        let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(30));
        for _ in 0..100 {
            assert!(backoff.next_delay() <= Duration::from_secs(30));
        }
    }

    fn fast_config(port: u16) -> AppConfig {
        let mut config = AppConfig::for_host("127.0.0.1");
        config.console.port = port;
        config.connection.xremote_interval_ms = 100;
        config.connection.heartbeat_ms = 50;
        config.connection.heartbeat_timeout_ms = 500;
        config.connection.reconnect_initial_ms = 50;
        config.connection.reconnect_max_ms = 100;
        config
    }

    async fn recv_message(socket: &UdpSocket) -> (OscMessage, std::net::SocketAddr) {
        let mut buf = [0u8; 1024];
        loop {
            let (n, from) = socket.recv_from(&mut buf).await.unwrap();
            if let Ok((_, OscPacket::Message(msg))) = decoder::decode_udp(&buf[..n]) {
                return (msg, from);
            }
        }
    }

    #[tokio::test]
    async fn test_connects_when_console_answers() {
        let console = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = console.local_addr().unwrap().port();
        let (bridge, _events) = Bridge::spawn(fast_config(port), false);

        let mut seen_xremote = false;
        let mut client = None;
        while !seen_xremote || client.is_none() {
            let (msg, from) = tokio::time::timeout(Duration::from_secs(2), recv_message(&console))
                .await
                .unwrap();
            match msg.addr.as_str() {
                "/xremote" => seen_xremote = true,
                "/xinfo" => client = Some(from),
                _ => {}
            }
        }

        let reply = encoder::encode(&OscPacket::Message(OscMessage {
            addr: "/xinfo".into(),
            args: vec![
                OscType::String("127.0.0.1".into()),
                OscType::String("Test".into()),
                OscType::String("X32".into()),
                OscType::String("4.06".into()),
            ],
        }))
        .unwrap();
        console.send_to(&reply, client.unwrap()).await.unwrap();

        let mut status = bridge.status_changes();
        tokio::time::timeout(
            Duration::from_secs(2),
            status.wait_for(|s| *s == ConnectionStatus::Connected),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(bridge.session().is_some());

        bridge.shutdown();
    }

    #[tokio::test]
    async fn test_silent_console_triggers_reconnect() {
        let console = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = console.local_addr().unwrap().port();
        let (bridge, _events) = Bridge::spawn(fast_config(port), false);

        let mut status = bridge.status_changes();
        tokio::time::timeout(
            Duration::from_secs(3),
            status.wait_for(|s| matches!(s, ConnectionStatus::Reconnecting { .. })),
        )
        .await
        .unwrap()
        .unwrap();

        bridge.shutdown();
    }

    #[tokio::test]
    async fn test_stopped_session_is_rebuilt() {
        let mut config = AppConfig::for_host("x32.invalid");
        config.connection.reconnect_initial_ms = 20;
        config.connection.reconnect_max_ms = 40;
        let (bridge, mut events) = Bridge::spawn(config, true);

        let mut status = bridge.status_changes();
        status
            .wait_for(|s| *s == ConnectionStatus::Connected)
            .await
            .unwrap();
        let first = bridge.session().unwrap();
        first.shutdown();

        let second = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Some(session) = bridge.session().filter(SessionHandle::is_alive) {
                    if !first.is_alive() {
                        return session;
                    }
                }
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        // The replacement is wired to the bridge's event stream
        second.set_local("/ch/02/mix/on", vec![crate::osc::OscArg::Int(1)]);
        let event = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                match events.recv().await {
                    Some(SessionEvent::ValueChanged { address, .. }) => break address,
                    Some(_) => continue,
                    None => panic!("bridge event stream closed"),
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(event, "/ch/02/mix/on");
        assert_eq!(bridge.status(), ConnectionStatus::Connected);

        bridge.shutdown();
    }

    #[tokio::test]
    async fn test_dry_run_session_and_reload() {
        let (bridge, mut events) = Bridge::spawn(AppConfig::for_host("x32.invalid"), true);

        let mut status = bridge.status_changes();
        status
            .wait_for(|s| *s == ConnectionStatus::Connected)
            .await
            .unwrap();
        let first = bridge.session().unwrap();
        first.set_local("/ch/01/mix/fader", vec![crate::osc::OscArg::Float(0.5)]);
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap();
        assert!(matches!(event, Some(SessionEvent::ValueChanged { .. })));

        bridge.reload(AppConfig::for_host("x32.invalid"));
        tokio::time::timeout(Duration::from_secs(1), async {
            while first.is_alive() {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        // The replacement session starts empty
        let mut session = None;
        for _ in 0..100 {
            session = bridge.session();
            if session.is_some() {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        let second = session.unwrap();
        assert_eq!(second.get("/ch/01/mix/fader").await, None);

        bridge.shutdown();
    }
}
