//! X32 Bridge
//!
//! Keeps a live mirror of a Behringer X32/M32 console's parameter tree and
//! drives it from surface controls: cached values, deduplicated loads,
//! smooth fades and debounced feedback invalidation over OSC.

pub mod actions;
pub mod bridge;
pub mod cli;
pub mod config;
pub mod discovery;
pub mod levels;
pub mod load;
pub mod monitor;
pub mod osc;
pub mod session;
pub mod state;
pub mod transitions;
