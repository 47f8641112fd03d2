// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request-and-response correlation.
//!
//! Matches asynchronous responses arriving on a return channel (SSE push,
//! websocket frame, HTTP POST) to the in-flight request that opened the
//! correlation id. A slot buffers exactly one response; a second delivery is
//! refused so that an out-of-order `pending` arriving after `completed`
//! cannot overwrite the result. Late deliveries to a closed slot are
//! harmless no-ops.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::envelope::ResponseEnvelope;
use crate::error::{BusError, ErrorKind};

/// Wait limit applied when a caller passes a zero timeout.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(60);

struct Slot {
    tx: mpsc::Sender<ResponseEnvelope>,
    /// Taken by the (single) waiter; handed back if the wait times out so a
    /// late delivery can still be picked up before close.
    rx: Option<mpsc::Receiver<ResponseEnvelope>>,
}

/// Correlation table: correlation id → single-response delivery slot.
///
/// Cheap to clone; clones share the table.
#[derive(Clone, Default)]
pub struct RnrChannel {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
}

impl RnrChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a slot for a new correlation id.
    pub fn open(&self, correlation_id: &str) -> Result<(), BusError> {
        let mut slots = self.slots.lock();
        if slots.contains_key(correlation_id) {
            return Err(BusError::new(
                ErrorKind::BadRequest,
                format!("correlation id {correlation_id} already open"),
            ));
        }
        let (tx, rx) = mpsc::channel(1);
        slots.insert(correlation_id.to_owned(), Slot { tx, rx: Some(rx) });
        Ok(())
    }

    /// Release a slot. A waiter blocked on it is woken with no-response.
    pub fn close(&self, correlation_id: &str) {
        self.slots.lock().remove(correlation_id);
    }

    /// Release every slot, waking all waiters with no-response.
    pub fn close_all(&self) {
        self.slots.lock().clear();
    }

    pub fn open_count(&self) -> usize {
        self.slots.lock().len()
    }

    /// Deliver a response to its slot. Returns false when no slot is open
    /// for the correlation id or the slot already holds a delivery.
    pub fn handle_response(&self, response: ResponseEnvelope) -> bool {
        let tx = {
            let slots = self.slots.lock();
            match slots.get(&response.correlation_id) {
                Some(slot) => slot.tx.clone(),
                None => {
                    debug!(
                        correlation_id = %response.correlation_id,
                        operation = %response.operation,
                        "response without an open correlation"
                    );
                    return false;
                }
            }
        };
        match tx.try_send(response) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(resp)) => {
                warn!(
                    correlation_id = %resp.correlation_id,
                    "slot already holds a response, refusing second delivery"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Block up to `timeout` (0 ⇒ [`DEFAULT_WAIT_TIMEOUT`]) for the response.
    ///
    /// Returns `None` on timeout, when the slot was closed, or when another
    /// waiter already claimed the slot.
    pub async fn wait_for_response(
        &self,
        correlation_id: &str,
        timeout: Duration,
    ) -> Option<ResponseEnvelope> {
        let timeout = if timeout.is_zero() { DEFAULT_WAIT_TIMEOUT } else { timeout };
        let mut rx = self.slots.lock().get_mut(correlation_id)?.rx.take()?;

        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(response)) => Some(response),
            // All senders dropped: the slot was closed while waiting.
            Ok(None) => None,
            Err(_) => {
                // Hand the receiver back so a late delivery before close
                // still lands in the slot.
                if let Some(slot) = self.slots.lock().get_mut(correlation_id) {
                    slot.rx = Some(rx);
                }
                None
            }
        }
    }

    /// Background wait: invoke `handler` when the response arrives, then
    /// close the slot. On timeout the handler is not invoked.
    pub fn wait_with_callback(
        &self,
        correlation_id: &str,
        handler: impl FnOnce(ResponseEnvelope) + Send + 'static,
        timeout: Duration,
    ) {
        let rnr = self.clone();
        let correlation_id = correlation_id.to_owned();
        tokio::spawn(async move {
            match rnr.wait_for_response(&correlation_id, timeout).await {
                Some(response) => handler(response),
                None => warn!(%correlation_id, "no response before timeout"),
            }
            rnr.close(&correlation_id);
        });
    }
}

#[cfg(test)]
#[path = "rnr_tests.rs"]
mod tests;
