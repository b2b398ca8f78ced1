//! Load coordination - "fetch the current value of X" without flooding
//!
//! Two halves:
//! - [`InFlightRequests`] lives inside the session actor and guarantees at
//!   most one outstanding query per address. Each entry holds a one-shot
//!   resolver fired by the change router when the value arrives.
//! - [`LoadQueue`] is the admission side: a FIFO semaphore caps concurrent
//!   load units and every unit races a timeout.
//!
//! Entries carry a [`LoadToken`] so a timed-out unit only ever removes the
//! entry it registered itself.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{oneshot, Semaphore};
use tracing::trace;

/// Default number of load units allowed to run at once
pub const DEFAULT_LOAD_CONCURRENCY: usize = 20;
/// Default per-unit timeout
pub const DEFAULT_LOAD_TIMEOUT_MS: u64 = 500;

/// Identifies one registration in [`InFlightRequests`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoadToken(u64);

/// Hands out unique tokens; shared by every clone of a session handle
#[derive(Debug, Default)]
pub struct LoadTokens(AtomicU64);

impl LoadTokens {
    pub fn next(&self) -> LoadToken {
        LoadToken(self.0.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// How an `ensure_loaded` call finished. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Empty address, nothing to do
    Skipped,
    /// Another unit is already waiting on this address
    AlreadyPending,
    /// The cache already holds a value
    AlreadyKnown,
    /// The console answered; the value is now cached
    Loaded,
    /// No answer within the unit timeout
    TimedOut,
    /// The session went away before the load finished
    SessionClosed,
}

/// Actor's answer to a load request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginLoad {
    AlreadyPending,
    AlreadyKnown,
    /// Query sent; the resolver will fire on arrival
    Waiting,
}

struct PendingLoad {
    token: LoadToken,
    resolver: oneshot::Sender<()>,
}

/// At most one pending resolver per address
#[derive(Default)]
pub struct InFlightRequests {
    pending: HashMap<String, PendingLoad>,
}

impl InFlightRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pending(&self, address: &str) -> bool {
        self.pending.contains_key(address)
    }

    /// Register a resolver. Returns `false` (and drops `resolver`) if the
    /// address already has one.
    pub fn register(
        &mut self,
        address: &str,
        token: LoadToken,
        resolver: oneshot::Sender<()>,
    ) -> bool {
        if self.pending.contains_key(address) {
            return false;
        }
        self.pending
            .insert(address.to_string(), PendingLoad { token, resolver });
        true
    }

    /// Fire and remove the resolver for `address`. Returns whether one existed.
    pub fn resolve(&mut self, address: &str) -> bool {
        match self.pending.remove(address) {
            Some(load) => {
                // The waiter may have timed out already; that's fine
                let _ = load.resolver.send(());
                trace!(address, "Load resolved");
                true
            }
            None => false,
        }
    }

    /// Remove the entry for `address` only if it still belongs to `token`
    pub fn cancel(&mut self, address: &str, token: LoadToken) -> bool {
        match self.pending.get(address) {
            Some(load) if load.token == token => {
                self.pending.remove(address);
                true
            }
            _ => false,
        }
    }

    /// Drop every resolver; waiters observe a closed channel
    pub fn clear(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LoadQueueError {
    #[error("load unit timed out after {0:?}")]
    TimedOut(Duration),
    #[error("load queue closed")]
    Closed,
}

/// Bounded-concurrency queue with a per-unit timeout
#[derive(Clone)]
pub struct LoadQueue {
    permits: Arc<Semaphore>,
    concurrency: usize,
    unit_timeout: Duration,
}

impl LoadQueue {
    pub fn new(concurrency: usize, unit_timeout: Duration) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            permits: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            unit_timeout,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn unit_timeout(&self) -> Duration {
        self.unit_timeout
    }

    /// Units currently holding a permit
    pub fn running(&self) -> usize {
        self.concurrency - self.permits.available_permits()
    }

    /// Wait for a free slot (FIFO), then run `unit` against the timeout.
    /// The timeout starts once the unit is admitted.
    pub async fn run<F, T>(&self, unit: F) -> Result<T, LoadQueueError>
    where
        F: Future<Output = T>,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| LoadQueueError::Closed)?;

        tokio::time::timeout(self.unit_timeout, unit)
            .await
            .map_err(|_| LoadQueueError::TimedOut(self.unit_timeout))
    }

    /// Refuse new units and fail the ones still waiting for a slot
    pub fn close(&self) {
        self.permits.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_register_rejects_duplicate() {
        let tokens = LoadTokens::default();
        let mut inflight = InFlightRequests::new();

        let (tx1, _rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        assert!(inflight.register("/ch/01/mix/fader", tokens.next(), tx1));
        assert!(!inflight.register("/ch/01/mix/fader", tokens.next(), tx2));
        assert_eq!(inflight.len(), 1);

        // The rejected resolver was dropped
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn test_resolve_fires_once() {
        let tokens = LoadTokens::default();
        let mut inflight = InFlightRequests::new();
        let (tx, mut rx) = oneshot::channel();
        inflight.register("/a", tokens.next(), tx);

        assert!(inflight.resolve("/a"));
        assert_eq!(rx.try_recv(), Ok(()));
        assert!(!inflight.resolve("/a"));
        assert!(!inflight.is_pending("/a"));
    }

    #[test]
    fn test_cancel_requires_matching_token() {
        let tokens = LoadTokens::default();
        let mut inflight = InFlightRequests::new();
        let stale = tokens.next();
        let current = tokens.next();
        let (tx, _rx) = oneshot::channel();
        inflight.register("/a", current, tx);

        assert!(!inflight.cancel("/a", stale));
        assert!(inflight.is_pending("/a"));
        assert!(inflight.cancel("/a", current));
        assert!(inflight.is_empty());
    }

    #[test]
    fn test_clear_closes_waiters() {
        let tokens = LoadTokens::default();
        let mut inflight = InFlightRequests::new();
        let (tx, mut rx) = oneshot::channel::<()>();
        inflight.register("/a", tokens.next(), tx);

        assert_eq!(inflight.clear(), 1);
        assert!(matches!(
            rx.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_times_out_unit() {
        let queue = LoadQueue::new(2, Duration::from_millis(500));
        let result = queue.run(std::future::pending::<()>()).await;
        assert_eq!(
            result,
            Err(LoadQueueError::TimedOut(Duration::from_millis(500)))
        );
        assert_eq!(queue.running(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_caps_concurrency() {
        let queue = LoadQueue::new(20, Duration::from_millis(500));
        let peak = Arc::new(AtomicUsize::new(0));
        let active = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..50 {
            let queue = queue.clone();
            let peak = peak.clone();
            let active = active.clone();
            tasks.push(tokio::spawn(async move {
                queue
                    .run(async {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap(), Ok(()));
        }
        assert_eq!(peak.load(Ordering::SeqCst), 20);
    }

    #[tokio::test]
    async fn test_closed_queue_rejects() {
        let queue = LoadQueue::new(1, Duration::from_millis(500));
        queue.close();
        assert_eq!(queue.run(async {}).await, Err(LoadQueueError::Closed));
    }
}
