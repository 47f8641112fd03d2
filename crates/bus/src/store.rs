// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bucket store contract used by the domain modules.
//!
//! A store hands out named buckets of ordered key/value pairs. Cursors
//! iterate a point-in-time view; dropping a cursor releases it.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::BusError;

pub trait BucketStore: Send + Sync {
    fn open(&self) -> Result<(), BusError>;

    fn close(&self);

    /// Get or create the named bucket.
    fn bucket(&self, name: &str) -> Arc<dyn Bucket>;
}

pub trait Bucket: Send + Sync {
    fn name(&self) -> &str;

    /// Fails with *not-found* for an absent key.
    fn get(&self, key: &str) -> Result<Vec<u8>, BusError>;

    fn set(&self, key: &str, value: &[u8]);

    fn delete(&self, key: &str);

    /// Existing entries only; absent keys are omitted.
    fn get_multiple(&self, keys: &[String]) -> HashMap<String, Vec<u8>>;

    fn set_multiple(&self, entries: &HashMap<String, Vec<u8>>);

    /// Ordered cursor over a snapshot of the bucket.
    fn cursor(&self) -> Box<dyn BucketCursor>;
}

/// Ordered iteration over a bucket snapshot.
pub trait BucketCursor: Send {
    fn first(&mut self) -> Option<(String, Vec<u8>)>;

    fn last(&mut self) -> Option<(String, Vec<u8>)>;

    fn next(&mut self) -> Option<(String, Vec<u8>)>;

    fn prev(&mut self) -> Option<(String, Vec<u8>)>;

    /// Up to `n` entries following the current position.
    fn next_n(&mut self, n: usize) -> Vec<(String, Vec<u8>)>;

    /// Up to `n` entries preceding the current position, nearest first.
    fn prev_n(&mut self, n: usize) -> Vec<(String, Vec<u8>)>;

    /// Position at the first key ≥ `key`.
    fn seek(&mut self, key: &str) -> Option<(String, Vec<u8>)>;
}
