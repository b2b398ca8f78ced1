//! SessionHandle - public API for the SessionActor
//!
//! Fire-and-forget methods for the hot path (sends, fades, subscriptions),
//! async methods with oneshot channels for anything that reads state.
//! Loads additionally pass through the shared [`LoadQueue`].

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::commands::{FadeOrigin, SessionCommand, SessionStats};
use crate::load::{BeginLoad, LoadOutcome, LoadQueue, LoadQueueError, LoadToken, LoadTokens};
use crate::osc::OscArg;
use crate::state::{FeedbackId, FeedbackKind, ValueTuple};
use crate::transitions::ValueEncoding;

/// Handle for interacting with a running session
///
/// # Hot Path Methods (fire-and-forget)
/// - `send`, `set_local`, `fade`, `stop_all_transitions`
/// - `subscribe`, `unsubscribe`, `unsubscribe_all`
/// - `stash_store`
///
/// # Query Methods (async with response)
/// - `get`, `stash_take`, `feedbacks_interested_in`, `stats`
/// - `ensure_loaded`, `subscribe_and_load`, `resync`
#[derive(Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::UnboundedSender<SessionCommand>,
    loads: LoadQueue,
    tokens: Arc<LoadTokens>,
}

impl SessionHandle {
    pub(crate) fn new(cmd_tx: mpsc::UnboundedSender<SessionCommand>, loads: LoadQueue) -> Self {
        Self {
            cmd_tx,
            loads,
            tokens: Arc::new(LoadTokens::default()),
        }
    }

    // =========================================================================
    // Hot path methods (fire-and-forget, no await)
    // =========================================================================

    /// Write to the console. Values are mirrored into the cache.
    pub fn send(&self, address: impl Into<String>, args: Vec<OscArg>) {
        let _ = self.cmd_tx.send(SessionCommand::Send {
            address: address.into(),
            args,
        });
    }

    /// Record a value as if the console had reported it
    pub fn set_local(&self, address: impl Into<String>, args: ValueTuple) {
        let _ = self.cmd_tx.send(SessionCommand::SetLocal {
            address: address.into(),
            args,
        });
    }

    pub fn subscribe(&self, address: impl Into<String>, id: FeedbackId, kind: FeedbackKind) {
        let _ = self.cmd_tx.send(SessionCommand::Subscribe {
            address: address.into(),
            id,
            kind,
        });
    }

    pub fn unsubscribe(&self, address: impl Into<String>, id: FeedbackId) {
        let _ = self.cmd_tx.send(SessionCommand::Unsubscribe {
            address: address.into(),
            id,
        });
    }

    pub fn unsubscribe_all(&self, id: FeedbackId) {
        let _ = self.cmd_tx.send(SessionCommand::UnsubscribeAll { id });
    }

    /// Fade `address` to `to` over `duration_ms`.
    ///
    /// `from` of `None` starts from the cached value; an unknown value
    /// becomes a single immediate write.
    pub fn fade(
        &self,
        address: impl Into<String>,
        from: Option<f64>,
        to: f64,
        duration_ms: u64,
        encoding: ValueEncoding,
    ) {
        let from = from.map_or(FadeOrigin::Cached, FadeOrigin::From);
        let _ = self.cmd_tx.send(SessionCommand::Fade {
            address: address.into(),
            from,
            to,
            duration_ms,
            encoding,
        });
    }

    pub fn stop_all_transitions(&self) {
        let _ = self.cmd_tx.send(SessionCommand::StopAllTransitions);
    }

    pub fn stash_store(&self, key: impl Into<String>, value: f64) {
        let _ = self.cmd_tx.send(SessionCommand::StashStore {
            key: key.into(),
            value,
        });
    }

    // =========================================================================
    // Query methods (async with response)
    // =========================================================================

    /// Cached value for `address`; never touches the wire
    pub async fn get(&self, address: &str) -> Option<ValueTuple> {
        let (response, rx) = oneshot::channel();
        let cmd = SessionCommand::Get {
            address: address.to_string(),
            response,
        };
        if self.cmd_tx.send(cmd).is_err() {
            return None;
        }
        rx.await.ok().flatten()
    }

    /// Pop a stashed value; a second take returns `None`
    pub async fn stash_take(&self, key: &str) -> Option<f64> {
        let (response, rx) = oneshot::channel();
        let cmd = SessionCommand::StashTake {
            key: key.to_string(),
            response,
        };
        if self.cmd_tx.send(cmd).is_err() {
            return None;
        }
        rx.await.ok().flatten()
    }

    pub async fn feedbacks_interested_in(&self, address: &str) -> Vec<FeedbackKind> {
        let (response, rx) = oneshot::channel();
        let cmd = SessionCommand::FeedbacksInterestedIn {
            address: address.to_string(),
            response,
        };
        if self.cmd_tx.send(cmd).is_err() {
            return Vec::new();
        }
        rx.await.ok().unwrap_or_default()
    }

    /// `None` once the session is gone
    pub async fn stats(&self) -> Option<SessionStats> {
        let (response, rx) = oneshot::channel();
        self.cmd_tx.send(SessionCommand::Stats { response }).ok()?;
        rx.await.ok()
    }

    // =========================================================================
    // Loads
    // =========================================================================

    /// Make sure the cache holds a value for `address`, querying the console
    /// at most once while a query is outstanding. Never fails: the outcome
    /// only says what happened.
    pub async fn ensure_loaded(&self, address: &str) -> LoadOutcome {
        if address.is_empty() {
            return LoadOutcome::Skipped;
        }

        let token = self.tokens.next();
        match self.loads.run(self.load_unit(address, token)).await {
            Ok(outcome) => outcome,
            Err(LoadQueueError::TimedOut(after)) => {
                warn!(address, "Load timed out after {:?}", after);
                self.cancel_load(address, token);
                LoadOutcome::TimedOut
            }
            Err(LoadQueueError::Closed) => LoadOutcome::SessionClosed,
        }
    }

    /// Subscribe a feedback and fetch the address if it isn't known yet
    pub async fn subscribe_and_load(
        &self,
        address: &str,
        id: FeedbackId,
        kind: FeedbackKind,
    ) -> LoadOutcome {
        self.subscribe(address, id, kind);
        self.ensure_loaded(address).await
    }

    /// Retry loads for every subscribed address still missing a value.
    /// Returns how many were loaded.
    pub async fn resync(&self) -> usize {
        let (response, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(SessionCommand::UnknownSubscribedAddresses { response })
            .is_err()
        {
            return 0;
        }
        let addresses = rx.await.unwrap_or_default();
        if addresses.is_empty() {
            return 0;
        }

        debug!(count = addresses.len(), "Resyncing unknown addresses");
        let mut loads = JoinSet::new();
        for address in addresses {
            let handle = self.clone();
            loads.spawn(async move { handle.ensure_loaded(&address).await });
        }

        let mut loaded = 0;
        while let Some(result) = loads.join_next().await {
            if matches!(result, Ok(LoadOutcome::Loaded)) {
                loaded += 1;
            }
        }
        loaded
    }

    async fn load_unit(&self, address: &str, token: LoadToken) -> LoadOutcome {
        let (resolver, resolved) = oneshot::channel();
        let (response, begun) = oneshot::channel();
        let cmd = SessionCommand::BeginLoad {
            address: address.to_string(),
            token,
            resolver,
            response,
        };
        if self.cmd_tx.send(cmd).is_err() {
            return LoadOutcome::SessionClosed;
        }

        match begun.await {
            Ok(BeginLoad::AlreadyPending) => LoadOutcome::AlreadyPending,
            Ok(BeginLoad::AlreadyKnown) => LoadOutcome::AlreadyKnown,
            Ok(BeginLoad::Waiting) => match resolved.await {
                Ok(()) => LoadOutcome::Loaded,
                Err(_) => LoadOutcome::SessionClosed,
            },
            Err(_) => LoadOutcome::SessionClosed,
        }
    }

    fn cancel_load(&self, address: &str, token: LoadToken) {
        let _ = self.cmd_tx.send(SessionCommand::CancelLoad {
            address: address.to_string(),
            token,
        });
    }

    // =========================================================================
    // Lifecycle methods
    // =========================================================================

    /// Returns false once the actor has stopped
    pub fn is_alive(&self) -> bool {
        !self.cmd_tx.is_closed()
    }

    /// Stop the session: queued loads fail, running ones see `SessionClosed`
    pub fn shutdown(&self) {
        self.loads.close();
        let _ = self.cmd_tx.send(SessionCommand::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn handle() -> (SessionHandle, mpsc::UnboundedReceiver<SessionCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let loads = LoadQueue::new(20, Duration::from_millis(500));
        (SessionHandle::new(tx, loads), rx)
    }

    #[test]
    fn test_handle_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<SessionHandle>();
    }

    #[tokio::test]
    async fn test_is_alive_follows_channel() {
        let (handle, rx) = handle();
        assert!(handle.is_alive());
        drop(rx);
        assert!(!handle.is_alive());
    }

    #[tokio::test]
    async fn test_empty_address_is_skipped() {
        let (handle, mut rx) = handle();
        assert_eq!(handle.ensure_loaded("").await, LoadOutcome::Skipped);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_queries_on_closed_session() {
        let (handle, rx) = handle();
        drop(rx);
        assert_eq!(handle.get("/ch/01/mix/fader").await, None);
        assert_eq!(handle.stash_take("k").await, None);
        assert_eq!(handle.stats().await, None);
        assert_eq!(
            handle.ensure_loaded("/ch/01/mix/fader").await,
            LoadOutcome::SessionClosed
        );
    }

    #[tokio::test]
    async fn test_fade_without_start_uses_cache() {
        let (handle, mut rx) = handle();
        handle.fade("/ch/01/mix/pan", None, 0.5, 300, ValueEncoding::Linear);
        match rx.recv().await {
            Some(SessionCommand::Fade { from, .. }) => assert_eq!(from, FadeOrigin::Cached),
            other => panic!("unexpected {:?}", other),
        }
    }
}
