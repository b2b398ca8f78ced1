//! Identifier types shared by the state stores
//!
//! Feedback kinds and instance ids come from the control surface runtime.
//! The core stores them but never interprets them.

use serde::{Deserialize, Serialize};

use crate::osc::OscArg;

/// Full argument tuple last reported for an address
pub type ValueTuple = Vec<OscArg>;

/// A class of UI state indicator (e.g. "mute", "fader_level")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeedbackKind(pub String);

/// One placed instance of a feedback on the surface
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeedbackId(pub String);

impl FeedbackKind {
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FeedbackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FeedbackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for FeedbackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FeedbackKind {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<&str> for FeedbackId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Key for the press stash: one slot per (control, address) pair
pub fn stash_key(control_id: &str, address: &str) -> String {
    format!("{}-{}", control_id, address)
}
