//! AddressedValueStore - mirror of the console's parameter tree
//!
//! Holds the last full argument tuple seen for every address. Writes replace
//! the whole tuple; the store itself has no side effects.

use std::collections::HashMap;

use super::types::ValueTuple;

#[derive(Debug, Default)]
pub struct AddressedValueStore {
    values: HashMap<String, ValueTuple>,
}

impl AddressedValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last known tuple, or `None` if the address has never been reported
    pub fn get(&self, address: &str) -> Option<&ValueTuple> {
        self.values.get(address)
    }

    /// Unconditional overwrite
    pub fn set(&mut self, address: impl Into<String>, value: ValueTuple) {
        self.values.insert(address.into(), value);
    }

    pub fn contains(&self, address: &str) -> bool {
        self.values.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// All known addresses, sorted
    pub fn addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.values.keys().cloned().collect();
        addresses.sort();
        addresses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osc::OscArg;

    #[test]
    fn test_missing_address_is_absent() {
        let store = AddressedValueStore::new();
        assert!(store.get("/ch/01/mix/fader").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_set_replaces_whole_tuple() {
        let mut store = AddressedValueStore::new();
        store.set(
            "/ch/01/config",
            vec![
                OscArg::String("Kick".into()),
                OscArg::Int(1),
                OscArg::Int(3),
            ],
        );
        store.set("/ch/01/config", vec![OscArg::String("Snare".into())]);

        assert_eq!(
            store.get("/ch/01/config"),
            Some(&vec![OscArg::String("Snare".into())])
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_addresses_sorted() {
        let mut store = AddressedValueStore::new();
        store.set("/ch/02/mix/on", vec![OscArg::Int(1)]);
        store.set("/ch/01/mix/on", vec![OscArg::Int(0)]);
        assert_eq!(store.addresses(), vec!["/ch/01/mix/on", "/ch/02/mix/on"]);
        assert!(store.contains("/ch/02/mix/on"));
    }
}
