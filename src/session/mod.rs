//! One connected console session
//!
//! Everything a session knows is rebuilt from the wire: nothing here is
//! persisted, and a reconnect throws the whole session away.

mod actor;
pub mod batcher;
mod commands;
mod handle;


pub use actor::SessionActor;
pub use batcher::InvalidationBatcher;
pub use commands::{FadeOrigin, SessionCommand, SessionEvent, SessionStats};
pub use handle::SessionHandle;

use std::time::Duration;

use crate::load::{DEFAULT_LOAD_CONCURRENCY, DEFAULT_LOAD_TIMEOUT_MS};
use crate::transitions::{Easing, DEFAULT_FPS};
use batcher::{DEFAULT_DEBOUNCE_MS, DEFAULT_MAX_WAIT_MS};

/// Tunables for a session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub fade_fps: u32,
    pub easing: Easing,
    pub load_concurrency: usize,
    pub load_timeout: Duration,
    pub invalidation_window: Duration,
    pub invalidation_max_wait: Duration,
    /// A change on an address ending in one of these regenerates definitions
    pub name_suffixes: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            fade_fps: DEFAULT_FPS,
            easing: Easing::default(),
            load_concurrency: DEFAULT_LOAD_CONCURRENCY,
            load_timeout: Duration::from_millis(DEFAULT_LOAD_TIMEOUT_MS),
            invalidation_window: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            invalidation_max_wait: Duration::from_millis(DEFAULT_MAX_WAIT_MS),
            name_suffixes: vec!["/config/name".to_string()],
        }
    }
}
