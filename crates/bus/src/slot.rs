// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Replaceable callback cells.
//!
//! Sinks and hooks are optional callbacks that may be swapped while other
//! tasks read them. A slot hands out an owned snapshot, so a reader never
//! observes a torn value and a swap never invalidates an in-flight call.

use std::sync::Arc;

use parking_lot::RwLock;

/// Single-writer, multi-reader callback cell.
pub struct CallbackSlot<T: ?Sized> {
    inner: RwLock<Option<Arc<T>>>,
}

impl<T: ?Sized> CallbackSlot<T> {
    pub fn empty() -> Self {
        Self { inner: RwLock::new(None) }
    }

    /// Replace the callback. `None` clears the slot.
    pub fn set(&self, value: Option<Arc<T>>) {
        *self.inner.write() = value;
    }

    /// Snapshot of the current callback.
    pub fn get(&self) -> Option<Arc<T>> {
        self.inner.read().clone()
    }

    pub fn is_set(&self) -> bool {
        self.inner.read().is_some()
    }
}

impl<T: ?Sized> Default for CallbackSlot<T> {
    fn default() -> Self {
        Self::empty()
    }
}
