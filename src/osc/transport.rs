//! UDP transport to the console
//!
//! Sends are fire-and-forget datagrams. A background task decodes every
//! inbound datagram and forwards each contained message on a channel.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rosc::{decoder, encoder, OscMessage, OscPacket, OscType};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::{InboundMessage, OscArg};

/// Port the X32 family listens on for OSC
pub const X32_OSC_PORT: u16 = 10023;

/// Channel the receive task feeds
pub type InboundSender = mpsc::UnboundedSender<InboundMessage>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode OSC packet: {0}")]
    Encode(#[from] rosc::OscError),
    #[error("could not resolve console address '{0}'")]
    Resolve(String),
}

/// Outbound side of the wire
///
/// Implementations must not block: the session actor calls `send` inline.
pub trait Transport: Send + Sync {
    fn send(&self, address: &str, args: Vec<OscArg>) -> Result<(), TransportError>;
}

/// OSC-over-UDP transport bound to one console
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    remote: SocketAddr,
    sent: AtomicU64,
    rx_task: JoinHandle<()>,
}

impl UdpTransport {
    /// Bind an ephemeral local port and start forwarding console traffic
    pub async fn connect(
        host: &str,
        port: u16,
        inbound: InboundSender,
    ) -> Result<Self, TransportError> {
        let remote = tokio::net::lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| TransportError::Resolve(format!("{}:{}", host, port)))?;

        let socket = Arc::new(UdpSocket::bind("0.0.0.0:0").await?);
        debug!(local = ?socket.local_addr().ok(), %remote, "OSC socket bound");

        let rx_task = tokio::spawn(Self::receive_loop(socket.clone(), remote, inbound));

        Ok(Self {
            socket,
            remote,
            sent: AtomicU64::new(0),
            rx_task,
        })
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    /// Number of datagrams handed to the socket so far
    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    async fn receive_loop(socket: Arc<UdpSocket>, remote: SocketAddr, inbound: InboundSender) {
        let mut buf = vec![0u8; 65536];
        loop {
            let (size, peer) = match socket.recv_from(&mut buf).await {
                Ok(r) => r,
                Err(e) => {
                    // ICMP port-unreachable surfaces here while the console is down
                    trace!("OSC receive error: {}", e);
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                    continue;
                }
            };
            if peer.ip() != remote.ip() {
                trace!(%peer, "Ignoring datagram from unexpected peer");
                continue;
            }
            match decoder::decode_udp(&buf[..size]) {
                Ok((_, packet)) => {
                    for message in flatten_packet(packet) {
                        if inbound.send(message).is_err() {
                            debug!("Inbound channel closed, stopping OSC receiver");
                            return;
                        }
                    }
                }
                Err(e) => warn!("Failed to decode OSC packet from {}: {}", peer, e),
            }
        }
    }
}

impl Transport for UdpTransport {
    fn send(&self, address: &str, args: Vec<OscArg>) -> Result<(), TransportError> {
        let buf = encode_message(address, args)?;
        self.socket.try_send_to(&buf, self.remote)?;
        self.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.rx_task.abort();
    }
}

pub(crate) fn encode_message(address: &str, args: Vec<OscArg>) -> Result<Vec<u8>, TransportError> {
    let packet = OscPacket::Message(OscMessage {
        addr: address.to_string(),
        args: args.into_iter().map(OscType::from).collect(),
    });
    Ok(encoder::encode(&packet)?)
}

/// Unpack a packet (bundles nest) into plain messages, dropping argument
/// kinds the console never sends.
pub(crate) fn flatten_packet(packet: OscPacket) -> Vec<InboundMessage> {
    match packet {
        OscPacket::Message(msg) => {
            let mut args = Vec::with_capacity(msg.args.len());
            for arg in msg.args {
                match OscArg::try_from(arg) {
                    Ok(a) => args.push(a),
                    Err(other) => {
                        warn!(address = %msg.addr, "Dropping unsupported OSC argument {:?}", other)
                    }
                }
            }
            vec![InboundMessage::new(msg.addr, args)]
        }
        OscPacket::Bundle(bundle) => bundle.content.into_iter().flat_map(flatten_packet).collect(),
    }
}
