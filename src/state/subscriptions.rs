//! SubscriptionIndex - which feedbacks care about which address
//!
//! Reverse index from wire address to the feedback instances watching it.
//! Lookups report feedback *kinds*, deduplicated: the surface runtime
//! re-checks every instance of a reported kind.

use std::collections::{BTreeSet, HashMap};

use super::types::{FeedbackId, FeedbackKind};

#[derive(Debug, Default)]
pub struct SubscriptionIndex {
    by_address: HashMap<String, HashMap<FeedbackId, FeedbackKind>>,
}

impl SubscriptionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the (address, id) mapping
    pub fn subscribe(&mut self, address: impl Into<String>, id: FeedbackId, kind: FeedbackKind) {
        self.by_address
            .entry(address.into())
            .or_default()
            .insert(id, kind);
    }

    /// Remove the (address, id) mapping; no-op when absent
    pub fn unsubscribe(&mut self, address: &str, id: &FeedbackId) {
        if let Some(subscribers) = self.by_address.get_mut(address) {
            subscribers.remove(id);
            if subscribers.is_empty() {
                self.by_address.remove(address);
            }
        }
    }

    /// Drop one feedback instance from every address it watches.
    /// Returns how many mappings were removed.
    pub fn unsubscribe_all(&mut self, id: &FeedbackId) -> usize {
        let mut removed = 0;
        self.by_address.retain(|_, subscribers| {
            if subscribers.remove(id).is_some() {
                removed += 1;
            }
            !subscribers.is_empty()
        });
        removed
    }

    /// Distinct kinds subscribed to `address`
    pub fn feedbacks_interested_in(&self, address: &str) -> BTreeSet<FeedbackKind> {
        self.by_address
            .get(address)
            .map(|subscribers| subscribers.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_subscribed(&self, address: &str, id: &FeedbackId) -> bool {
        self.by_address
            .get(address)
            .is_some_and(|subscribers| subscribers.contains_key(id))
    }

    /// Every address with at least one subscriber, sorted
    pub fn addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.by_address.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    pub fn len(&self) -> usize {
        self.by_address.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }
}
