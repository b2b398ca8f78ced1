//! PressValueStash - values captured on press and restored on release
//!
//! Read-once: taking a value removes it, so a stored level never leaks into
//! an unrelated later press.

use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct PressValueStash {
    values: HashMap<String, f64>,
}

impl PressValueStash {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store (overwriting any previous value for the key)
    pub fn store(&mut self, key: impl Into<String>, value: f64) {
        self.values.insert(key.into(), value);
    }

    /// Pop the value for `key`
    pub fn take_and_clear(&mut self, key: &str) -> Option<f64> {
        self.values.remove(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
