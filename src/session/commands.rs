//! Messages into and out of the session actor
//!
//! Commands split the same way as everywhere else in the bridge:
//! - **Hot path** (no response): sends, subscriptions, fades, stash writes
//! - **Request-response**: anything that reads actor state, answered on a
//!   oneshot channel

use tokio::sync::oneshot;

use crate::load::{BeginLoad, LoadToken};
use crate::osc::OscArg;
use crate::state::{FeedbackId, FeedbackKind, ValueTuple};
use crate::transitions::ValueEncoding;

/// Where a fade starts
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FadeOrigin {
    /// An explicit start value in the encoding's domain
    From(f64),
    /// Whatever the cache holds; unknown degrades to an immediate write
    Cached,
}

pub enum SessionCommand {
    // -------------------------------------------------------------------------
    // Hot path commands (no response - fire and forget)
    // -------------------------------------------------------------------------
    /// Write to the console and mirror the value locally
    Send { address: String, args: Vec<OscArg> },

    /// Record a value without touching the wire (goes through the router)
    SetLocal { address: String, args: ValueTuple },

    Subscribe {
        address: String,
        id: FeedbackId,
        kind: FeedbackKind,
    },

    Unsubscribe { address: String, id: FeedbackId },

    /// Remove one feedback instance from every address
    UnsubscribeAll { id: FeedbackId },

    Fade {
        address: String,
        from: FadeOrigin,
        to: f64,
        duration_ms: u64,
        encoding: ValueEncoding,
    },

    StashStore { key: String, value: f64 },

    StopAllTransitions,

    /// Drop the in-flight entry for `address` if `token` still owns it
    CancelLoad { address: String, token: LoadToken },

    // -------------------------------------------------------------------------
    // Request-response commands
    // -------------------------------------------------------------------------
    /// Register a load waiter and send the query unless one is already out
    /// or the value is known
    BeginLoad {
        address: String,
        token: LoadToken,
        resolver: oneshot::Sender<()>,
        response: oneshot::Sender<BeginLoad>,
    },

    Get {
        address: String,
        response: oneshot::Sender<Option<ValueTuple>>,
    },

    StashTake {
        key: String,
        response: oneshot::Sender<Option<f64>>,
    },

    FeedbacksInterestedIn {
        address: String,
        response: oneshot::Sender<Vec<FeedbackKind>>,
    },

    /// Subscribed addresses with no cached value yet
    UnknownSubscribedAddresses { response: oneshot::Sender<Vec<String>> },

    Stats { response: oneshot::Sender<SessionStats> },

    /// Tear the session down
    Shutdown,
}

// Manual Debug implementation because oneshot senders don't implement Debug
impl std::fmt::Debug for SessionCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionCommand::Send { address, args } => f
                .debug_struct("Send")
                .field("address", address)
                .field("args", args)
                .finish(),
            SessionCommand::SetLocal { address, args } => f
                .debug_struct("SetLocal")
                .field("address", address)
                .field("args", args)
                .finish(),
            SessionCommand::Subscribe { address, id, kind } => f
                .debug_struct("Subscribe")
                .field("address", address)
                .field("id", id)
                .field("kind", kind)
                .finish(),
            SessionCommand::Unsubscribe { address, id } => f
                .debug_struct("Unsubscribe")
                .field("address", address)
                .field("id", id)
                .finish(),
            SessionCommand::UnsubscribeAll { id } => {
                f.debug_struct("UnsubscribeAll").field("id", id).finish()
            }
            SessionCommand::Fade {
                address,
                from,
                to,
                duration_ms,
                encoding,
            } => f
                .debug_struct("Fade")
                .field("address", address)
                .field("from", from)
                .field("to", to)
                .field("duration_ms", duration_ms)
                .field("encoding", encoding)
                .finish(),
            SessionCommand::StashStore { key, value } => f
                .debug_struct("StashStore")
                .field("key", key)
                .field("value", value)
                .finish(),
            SessionCommand::StopAllTransitions => write!(f, "StopAllTransitions"),
            SessionCommand::CancelLoad { address, token } => f
                .debug_struct("CancelLoad")
                .field("address", address)
                .field("token", token)
                .finish(),
            SessionCommand::BeginLoad { address, token, .. } => f
                .debug_struct("BeginLoad")
                .field("address", address)
                .field("token", token)
                .finish_non_exhaustive(),
            SessionCommand::Get { address, .. } => f
                .debug_struct("Get")
                .field("address", address)
                .finish_non_exhaustive(),
            SessionCommand::StashTake { key, .. } => f
                .debug_struct("StashTake")
                .field("key", key)
                .finish_non_exhaustive(),
            SessionCommand::FeedbacksInterestedIn { address, .. } => f
                .debug_struct("FeedbacksInterestedIn")
                .field("address", address)
                .finish_non_exhaustive(),
            SessionCommand::UnknownSubscribedAddresses { .. } => {
                write!(f, "UnknownSubscribedAddresses")
            }
            SessionCommand::Stats { .. } => write!(f, "Stats"),
            SessionCommand::Shutdown => write!(f, "Shutdown"),
        }
    }
}

/// What the session tells the surface runtime
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Re-evaluate every instance of these feedback kinds
    FeedbacksInvalidated(Vec<FeedbackKind>),
    /// Names changed; regenerate definitions that embed them
    DefinitionsStale,
    /// A cached value changed (drives variables)
    ValueChanged { address: String, args: ValueTuple },
}

/// Point-in-time counters from the actor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub cached: usize,
    pub subscriptions: usize,
    pub in_flight: usize,
    pub fading: usize,
    pub stashed: usize,
    pub timer_running: bool,
    pub messages_routed: u64,
}
