// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-connection subscription bookkeeping.
//!
//! Stores `(thingID, name) → correlationID`. An empty name subscribes to all
//! affordances of a thing; an empty thing id to everything. The stored
//! correlation id is echoed on every matching notification so the remote
//! consumer can tie pushes to its original subscribe request.

use std::collections::HashMap;

use parking_lot::RwLock;

/// Concurrent `(thingID, name) → correlationID` table.
#[derive(Default)]
pub struct SubscriptionTable {
    // thing id → affordance name → correlation id
    subs: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, thing_id: &str, name: &str, correlation_id: &str) {
        self.subs
            .write()
            .entry(thing_id.to_owned())
            .or_default()
            .insert(name.to_owned(), correlation_id.to_owned());
    }

    pub fn unsubscribe(&self, thing_id: &str, name: &str) {
        let mut subs = self.subs.write();
        if let Some(names) = subs.get_mut(thing_id) {
            names.remove(name);
            if names.is_empty() {
                subs.remove(thing_id);
            }
        }
    }

    /// Look up the correlation id for `(thing_id, name)`.
    ///
    /// Fallback order: exact match, all names of the thing, everything.
    pub fn get_subscription(&self, thing_id: &str, name: &str) -> Option<String> {
        let subs = self.subs.read();
        for (tid, n) in [(thing_id, name), (thing_id, ""), ("", "")] {
            if let Some(correlation_id) = subs.get(tid).and_then(|names| names.get(n)) {
                return Some(correlation_id.clone());
            }
        }
        None
    }

    pub fn count(&self) -> usize {
        self.subs.read().values().map(HashMap::len).sum()
    }

    pub fn clear(&self) {
        self.subs.write().clear();
    }
}

#[cfg(test)]
#[path = "subscription_tests.rs"]
mod tests;
