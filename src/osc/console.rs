//! Console transport - logs every outbound message instead of sending it
//!
//! Useful for:
//! - Trying out actions and fades without a console on the network
//! - Debugging the order and spacing of fade steps

use parking_lot::Mutex;
use std::time::Instant;
use tracing::{debug, info};

use super::{format_args, OscArg, Transport, TransportError};

/// Dry-run transport
pub struct ConsoleTransport {
    name: String,
    started: Instant,
    /// Messages "sent" so far
    sent: Mutex<u64>,
}

impl ConsoleTransport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            started: Instant::now(),
            sent: Mutex::new(0),
        }
    }

    pub fn sent_count(&self) -> u64 {
        *self.sent.lock()
    }
}

impl Transport for ConsoleTransport {
    fn send(&self, address: &str, args: Vec<OscArg>) -> Result<(), TransportError> {
        let count = {
            let mut sent = self.sent.lock();
            *sent += 1;
            *sent
        };

        info!(
            "📤 [+{:>6}ms] '{}' → {} {} [#{}]",
            self.started.elapsed().as_millis(),
            self.name,
            address,
            format_args(&args),
            count
        );
        debug!(transport = %self.name, address, args = ?args, "ConsoleTransport send");

        Ok(())
    }
}
