//! SessionActor - owns every piece of per-connection state
//!
//! The cache, subscriptions, press stash, in-flight loads, fades and both
//! invalidation batchers live here and are only touched from the run loop.
//! A reconnect or config change drops the whole actor and spawns a new one.
//!
//! ```text
//!  SessionHandle ──commands──┐
//!                            ▼
//!  Transport ──inbound──► SessionActor ──events──► surface runtime
//!      ▲                     │
//!      └──── sends ──────────┘  (queries, writes, fade steps)
//! ```

use std::future::pending;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace, warn};

use super::batcher::InvalidationBatcher;
use super::commands::{FadeOrigin, SessionCommand, SessionEvent, SessionStats};
use super::handle::SessionHandle;
use super::SessionConfig;
use crate::load::{BeginLoad, InFlightRequests, LoadQueue, LoadToken};
use crate::osc::{format_args, InboundMessage, OscArg, Transport};
use crate::state::{
    AddressedValueStore, FeedbackKind, PressValueStash, SubscriptionIndex, ValueTuple,
};
use crate::transitions::{FadeStart, TransitionEngine, ValueEncoding};

pub struct SessionActor {
    store: AddressedValueStore,
    stash: PressValueStash,
    subscriptions: SubscriptionIndex,
    inflight: InFlightRequests,
    transitions: TransitionEngine,

    /// Feedback kinds waiting for a UI refresh
    feedback_batch: InvalidationBatcher<FeedbackKind>,
    /// Pending "names changed" regeneration
    regen_batch: InvalidationBatcher<()>,
    name_suffixes: Vec<String>,

    transport: Arc<dyn Transport>,
    command_rx: mpsc::UnboundedReceiver<SessionCommand>,
    inbound_rx: mpsc::UnboundedReceiver<InboundMessage>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,

    messages_routed: u64,
}

impl SessionActor {
    /// Spawn a fresh session on the current runtime.
    ///
    /// Every message arriving on `inbound_rx` goes through the change router.
    /// Returns the handle and the event stream for the surface runtime.
    pub fn spawn(
        config: SessionConfig,
        transport: Arc<dyn Transport>,
        inbound_rx: mpsc::UnboundedReceiver<InboundMessage>,
    ) -> (SessionHandle, mpsc::UnboundedReceiver<SessionEvent>) {
        let (cmd_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let actor = SessionActor {
            store: AddressedValueStore::new(),
            stash: PressValueStash::new(),
            subscriptions: SubscriptionIndex::new(),
            inflight: InFlightRequests::new(),
            transitions: TransitionEngine::new(config.fade_fps, config.easing),
            feedback_batch: InvalidationBatcher::new(
                config.invalidation_window,
                config.invalidation_max_wait,
            ),
            regen_batch: InvalidationBatcher::new(
                config.invalidation_window,
                config.invalidation_max_wait,
            ),
            name_suffixes: config.name_suffixes.clone(),
            transport,
            command_rx,
            inbound_rx,
            event_tx,
            messages_routed: 0,
        };

        tokio::spawn(actor.run());

        info!(
            fps = config.fade_fps,
            concurrency = config.load_concurrency,
            "Session spawned"
        );

        let loads = LoadQueue::new(config.load_concurrency, config.load_timeout);
        (SessionHandle::new(cmd_tx, loads), event_rx)
    }

    async fn run(mut self) {
        debug!("Session run loop started");
        let mut inbound_open = true;
        let mut graceful = false;

        loop {
            let fade_at = self.transitions.next_deadline();
            let feedback_at = self.feedback_batch.deadline();
            let regen_at = self.regen_batch.deadline();

            tokio::select! {
                cmd = self.command_rx.recv() => match cmd {
                    Some(SessionCommand::Shutdown) => {
                        graceful = true;
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
                msg = self.inbound_rx.recv(), if inbound_open => match msg {
                    Some(msg) => self.route_change(msg.address, msg.args),
                    None => {
                        debug!("Inbound stream closed");
                        inbound_open = false;
                    }
                },
                _ = sleep_until_opt(fade_at) => self.tick_transitions(),
                _ = sleep_until_opt(feedback_at) => self.poll_feedback(),
                _ = sleep_until_opt(regen_at) => self.poll_regen(),
            }
        }

        self.teardown(graceful);
    }

    fn handle_command(&mut self, cmd: SessionCommand) {
        trace!(?cmd, "Processing command");

        match cmd {
            SessionCommand::Send { address, args } => self.send(address, args),
            SessionCommand::SetLocal { address, args } => self.route_change(address, args),
            SessionCommand::Subscribe { address, id, kind } => {
                self.subscriptions.subscribe(address, id, kind);
            }
            SessionCommand::Unsubscribe { address, id } => {
                self.subscriptions.unsubscribe(&address, &id);
            }
            SessionCommand::UnsubscribeAll { id } => {
                let removed = self.subscriptions.unsubscribe_all(&id);
                debug!(id = %id, removed, "Feedback instance unsubscribed everywhere");
            }
            SessionCommand::Fade {
                address,
                from,
                to,
                duration_ms,
                encoding,
            } => self.start_fade(address, from, to, duration_ms, encoding),
            SessionCommand::StashStore { key, value } => self.stash.store(key, value),
            SessionCommand::StopAllTransitions => self.transitions.stop_all(),
            SessionCommand::CancelLoad { address, token } => {
                if self.inflight.cancel(&address, token) {
                    debug!(address = %address, "Cleared timed-out load");
                }
            }
            SessionCommand::BeginLoad {
                address,
                token,
                resolver,
                response,
            } => {
                let _ = response.send(self.begin_load(&address, token, resolver));
            }
            SessionCommand::Get { address, response } => {
                let _ = response.send(self.store.get(&address).cloned());
            }
            SessionCommand::StashTake { key, response } => {
                let _ = response.send(self.stash.take_and_clear(&key));
            }
            SessionCommand::FeedbacksInterestedIn { address, response } => {
                let kinds = self.subscriptions.feedbacks_interested_in(&address);
                let _ = response.send(kinds.into_iter().collect());
            }
            SessionCommand::UnknownSubscribedAddresses { response } => {
                let unknown = self
                    .subscriptions
                    .addresses()
                    .into_iter()
                    .filter(|a| !self.store.contains(a) && !self.inflight.is_pending(a))
                    .collect();
                let _ = response.send(unknown);
            }
            SessionCommand::Stats { response } => {
                let _ = response.send(self.stats());
            }
            // Handled by the run loop
            SessionCommand::Shutdown => {}
        }
    }

    /// The single fan-out point for a value change
    fn route_change(&mut self, address: String, args: ValueTuple) {
        self.messages_routed += 1;
        trace!(address = %address, args = %format_args(&args), "Routing change");

        // Cache first, so a woken loader always sees the value
        self.store.set(address.clone(), args.clone());
        self.inflight.resolve(&address);

        let now = Instant::now();
        let kinds = self.subscriptions.feedbacks_interested_in(&address);
        if !kinds.is_empty() {
            if let Some(batch) = self.feedback_batch.push(kinds, now) {
                self.emit(SessionEvent::FeedbacksInvalidated(batch));
            }
        }

        if self.is_name_path(&address) && self.regen_batch.push([()], now).is_some() {
            self.emit(SessionEvent::DefinitionsStale);
        }

        self.emit(SessionEvent::ValueChanged { address, args });
    }

    fn begin_load(
        &mut self,
        address: &str,
        token: LoadToken,
        resolver: tokio::sync::oneshot::Sender<()>,
    ) -> BeginLoad {
        if self.inflight.is_pending(address) {
            debug!(address, "Load already in flight");
            return BeginLoad::AlreadyPending;
        }
        if self.store.contains(address) {
            trace!(address, "Load skipped, value known");
            return BeginLoad::AlreadyKnown;
        }

        self.inflight.register(address, token, resolver);
        // An address with no arguments asks the console for its value
        self.send_wire(address, Vec::new());
        BeginLoad::Waiting
    }

    /// Outbound write. The console does not echo a client's own writes, so
    /// anything carrying a value is mirrored through the router.
    fn send(&mut self, address: String, args: Vec<OscArg>) {
        self.send_wire(&address, args.clone());
        if !args.is_empty() {
            self.route_change(address, args);
        }
    }

    fn send_wire(&self, address: &str, args: Vec<OscArg>) {
        if let Err(e) = self.transport.send(address, args) {
            warn!(address, "Send failed: {}", e);
        }
    }

    fn start_fade(
        &mut self,
        address: String,
        from: FadeOrigin,
        to: f64,
        duration_ms: u64,
        encoding: ValueEncoding,
    ) {
        if !to.is_finite() {
            warn!(address = %address, to, "Ignoring fade to a non-finite value");
            return;
        }
        let from = match from {
            FadeOrigin::From(value) => Some(value),
            FadeOrigin::Cached => self
                .store
                .get(&address)
                .and_then(|args| args.first())
                .and_then(|arg| encoding.decode(arg)),
        };

        match self
            .transitions
            .run(&address, from, to, duration_ms, encoding, Instant::now())
        {
            FadeStart::Immediate(arg) => {
                debug!(address = %address, to, "Immediate write");
                self.send(address, vec![arg]);
            }
            FadeStart::Scheduled { steps } => {
                debug!(address = %address, ?from, to, duration_ms, steps, "Fade started");
            }
        }
    }

    fn tick_transitions(&mut self) {
        for (address, arg) in self.transitions.tick(Instant::now()) {
            self.send(address, vec![arg]);
        }
    }

    fn poll_feedback(&mut self) {
        if let Some(batch) = self.feedback_batch.poll(Instant::now()) {
            self.emit(SessionEvent::FeedbacksInvalidated(batch));
        }
    }

    fn poll_regen(&mut self) {
        if self.regen_batch.poll(Instant::now()).is_some() {
            self.emit(SessionEvent::DefinitionsStale);
        }
    }

    fn is_name_path(&self, address: &str) -> bool {
        self.name_suffixes
            .iter()
            .any(|suffix| address.ends_with(suffix.as_str()))
    }

    fn emit(&self, event: SessionEvent) {
        // Nobody listening is fine
        let _ = self.event_tx.send(event);
    }

    fn stats(&self) -> SessionStats {
        SessionStats {
            cached: self.store.len(),
            subscriptions: self.subscriptions.len(),
            in_flight: self.inflight.len(),
            fading: self.transitions.active_count(),
            stashed: self.stash.len(),
            timer_running: self.transitions.has_timer(),
            messages_routed: self.messages_routed,
        }
    }

    /// A graceful shutdown delivers pending invalidations; a dropped session
    /// discards them
    fn teardown(&mut self, graceful: bool) {
        self.transitions.stop_all();
        let waiters = self.inflight.clear();

        if graceful {
            if let Some(batch) = self.feedback_batch.flush_now() {
                self.emit(SessionEvent::FeedbacksInvalidated(batch));
            }
            if self.regen_batch.flush_now().is_some() {
                self.emit(SessionEvent::DefinitionsStale);
            }
        } else {
            self.feedback_batch.cancel();
            self.regen_batch.cancel();
        }

        info!(
            cached = self.store.len(),
            waiters,
            routed = self.messages_routed,
            "Session stopped"
        );
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}
