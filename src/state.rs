//! State stores owned by a console session
//!
//! - [`AddressedValueStore`]: last reported value tuple per wire address
//! - [`PressValueStash`]: pop-once values for store/restore gestures
//! - [`SubscriptionIndex`]: address → interested feedback kinds
//!
//! None of these do I/O or locking. They are owned by the session actor and
//! replaced as a unit whenever the session is rebuilt.

mod stash;
mod store;
mod subscriptions;
mod types;

pub use stash::PressValueStash;
pub use store::AddressedValueStore;
pub use subscriptions::SubscriptionIndex;
pub use types::{stash_key, FeedbackId, FeedbackKind, ValueTuple};
