//! OSC wire types and transports
//!
//! The console speaks OSC over UDP. Everything above this module sees a
//! message as an opaque address string plus an ordered list of [`OscArg`]s.

mod console;
mod transport;

pub use console::ConsoleTransport;
pub use transport::{InboundSender, Transport, TransportError, UdpTransport, X32_OSC_PORT};
pub(crate) use transport::{encode_message, flatten_packet};

use rosc::OscType;
use serde::{Deserialize, Serialize};

/// A single typed wire argument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum OscArg {
    Int(i32),
    Float(f32),
    String(String),
    #[serde(with = "serde_bytes")]
    Blob(Vec<u8>),
}

impl OscArg {
    /// Numeric view of the argument (ints are widened)
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            OscArg::Float(f) => Some(*f),
            OscArg::Int(i) => Some(*i as f32),
            _ => None,
        }
    }

    /// Integer view of the argument (floats are truncated)
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            OscArg::Int(i) => Some(*i),
            OscArg::Float(f) => Some(*f as i32),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            OscArg::String(s) => Some(s),
            _ => None,
        }
    }
}

impl std::fmt::Display for OscArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OscArg::Int(i) => write!(f, "i:{}", i),
            OscArg::Float(v) => write!(f, "f:{:.4}", v),
            OscArg::String(s) => write!(f, "s:{:?}", s),
            OscArg::Blob(b) => write!(f, "b:[{} bytes]", b.len()),
        }
    }
}

impl From<OscArg> for OscType {
    fn from(arg: OscArg) -> Self {
        match arg {
            OscArg::Int(i) => OscType::Int(i),
            OscArg::Float(f) => OscType::Float(f),
            OscArg::String(s) => OscType::String(s),
            OscArg::Blob(b) => OscType::Blob(b),
        }
    }
}

impl TryFrom<OscType> for OscArg {
    type Error = OscType;

    /// Only the four argument kinds the console emits are accepted; anything
    /// else is handed back to the caller.
    fn try_from(value: OscType) -> Result<Self, Self::Error> {
        match value {
            OscType::Int(i) => Ok(OscArg::Int(i)),
            OscType::Float(f) => Ok(OscArg::Float(f)),
            OscType::String(s) => Ok(OscArg::String(s)),
            OscType::Blob(b) => Ok(OscArg::Blob(b)),
            other => Err(other),
        }
    }
}

/// A change notification (or query reply) received from the console
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub address: String,
    pub args: Vec<OscArg>,
}

impl InboundMessage {
    pub fn new(address: impl Into<String>, args: Vec<OscArg>) -> Self {
        Self {
            address: address.into(),
            args,
        }
    }
}

/// Render an argument list for logs and the monitor
pub fn format_args(args: &[OscArg]) -> String {
    if args.is_empty() {
        return "(query)".to_string();
    }
    args.iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}
