// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory bucket store.
//!
//! Buckets are ordered maps; cursors iterate a point-in-time snapshot so
//! writers never block readers mid-iteration.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use thingbus::error::{BusError, ErrorKind};
use thingbus::store::{Bucket, BucketCursor, BucketStore};

/// BTreeMap-backed store; contents do not survive the process.
#[derive(Default)]
pub struct MemStore {
    buckets: RwLock<HashMap<String, Arc<MemBucket>>>,
    opened: AtomicBool,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BucketStore for MemStore {
    fn open(&self) -> Result<(), BusError> {
        self.opened.store(true, Ordering::Release);
        Ok(())
    }

    fn close(&self) {
        self.opened.store(false, Ordering::Release);
        self.buckets.write().clear();
    }

    fn bucket(&self, name: &str) -> Arc<dyn Bucket> {
        let mut buckets = self.buckets.write();
        let bucket = buckets
            .entry(name.to_owned())
            .or_insert_with(|| Arc::new(MemBucket::new(name)))
            .clone();
        bucket
    }
}

pub struct MemBucket {
    name: String,
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemBucket {
    fn new(name: &str) -> Self {
        Self { name: name.to_owned(), entries: RwLock::new(BTreeMap::new()) }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Bucket for MemBucket {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, BusError> {
        self.entries.read().get(key).cloned().ok_or_else(|| {
            BusError::new(ErrorKind::NotFound, format!("{}: no key {key}", self.name))
        })
    }

    fn set(&self, key: &str, value: &[u8]) {
        self.entries.write().insert(key.to_owned(), value.to_vec());
    }

    fn delete(&self, key: &str) {
        self.entries.write().remove(key);
    }

    fn get_multiple(&self, keys: &[String]) -> HashMap<String, Vec<u8>> {
        let entries = self.entries.read();
        keys.iter()
            .filter_map(|key| entries.get(key).map(|value| (key.clone(), value.clone())))
            .collect()
    }

    fn set_multiple(&self, new_entries: &HashMap<String, Vec<u8>>) {
        let mut entries = self.entries.write();
        for (key, value) in new_entries {
            entries.insert(key.clone(), value.clone());
        }
    }

    fn cursor(&self) -> Box<dyn BucketCursor> {
        let snapshot: Vec<(String, Vec<u8>)> =
            self.entries.read().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        Box::new(MemCursor { snapshot, position: None })
    }
}

/// Cursor over a sorted snapshot of a bucket.
struct MemCursor {
    snapshot: Vec<(String, Vec<u8>)>,
    position: Option<usize>,
}

impl MemCursor {
    fn at(&self, index: usize) -> Option<(String, Vec<u8>)> {
        self.snapshot.get(index).cloned()
    }
}

impl BucketCursor for MemCursor {
    fn first(&mut self) -> Option<(String, Vec<u8>)> {
        if self.snapshot.is_empty() {
            return None;
        }
        self.position = Some(0);
        self.at(0)
    }

    fn last(&mut self) -> Option<(String, Vec<u8>)> {
        let last = self.snapshot.len().checked_sub(1)?;
        self.position = Some(last);
        self.at(last)
    }

    fn next(&mut self) -> Option<(String, Vec<u8>)> {
        let next = match self.position {
            Some(index) => index + 1,
            None => 0,
        };
        if next >= self.snapshot.len() {
            return None;
        }
        self.position = Some(next);
        self.at(next)
    }

    fn prev(&mut self) -> Option<(String, Vec<u8>)> {
        let prev = self.position?.checked_sub(1)?;
        self.position = Some(prev);
        self.at(prev)
    }

    fn next_n(&mut self, n: usize) -> Vec<(String, Vec<u8>)> {
        let mut out = Vec::new();
        while out.len() < n {
            match self.next() {
                Some(entry) => out.push(entry),
                None => break,
            }
        }
        out
    }

    fn prev_n(&mut self, n: usize) -> Vec<(String, Vec<u8>)> {
        let mut out = Vec::new();
        while out.len() < n {
            match self.prev() {
                Some(entry) => out.push(entry),
                None => break,
            }
        }
        out
    }

    fn seek(&mut self, key: &str) -> Option<(String, Vec<u8>)> {
        let index = self.snapshot.partition_point(|(k, _)| k.as_str() < key);
        if index >= self.snapshot.len() {
            self.position = None;
            return None;
        }
        self.position = Some(index);
        self.at(index)
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
