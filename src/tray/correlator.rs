//! Matches tray replies to the requests waiting on them.
//!
//! Pending requests are kept in insertion order, keyed by `request_id`.
//! A reply echoing a known id completes that request. A reply with no id
//! (trays that predate correlation ids) completes the oldest pending request.
//! A reply with an unknown id is a late reply for a request that already
//! timed out and is dropped.

use std::sync::{Mutex, MutexGuard, PoisonError};

use indexmap::IndexMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::protocol::{classify_reply, REQUEST_ID_KEY};
use crate::error::TrayError;

/// Receiving half handed to the caller of [`Correlator::register`].
pub type ReplyReceiver = oneshot::Receiver<Result<Value, TrayError>>;

type ReplySender = oneshot::Sender<Result<Value, TrayError>>;

#[derive(Default)]
pub struct Correlator {
    pending: Mutex<IndexMap<String, ReplySender>>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, IndexMap<String, ReplySender>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a pending request and get the receiver its reply lands on.
    pub fn register(&self, request_id: &str) -> ReplyReceiver {
        let (tx, rx) = oneshot::channel();
        self.lock().insert(request_id.to_string(), tx);
        rx
    }

    /// Parse a text frame from the tray and route it. Returns `true` if a
    /// pending request was completed.
    pub fn dispatch(&self, text: &str) -> bool {
        match serde_json::from_str::<Value>(text) {
            Ok(reply) => self.resolve(reply),
            Err(e) => {
                warn!("tray: ignoring non-JSON message: {e}");
                false
            }
        }
    }

    /// Complete the request a reply belongs to.
    pub fn resolve(&self, mut reply: Value) -> bool {
        let request_id = reply
            .as_object_mut()
            .and_then(|obj| obj.remove(REQUEST_ID_KEY))
            .and_then(|v| v.as_str().map(ToString::to_string));

        let sender = {
            let mut pending = self.lock();
            match &request_id {
                Some(id) => pending.shift_remove(id),
                // Untagged replies cannot be matched, so one arriving after its
                // request was cancelled completes whichever request is now
                // oldest. Only trays that echo `request_id` get late replies
                // dropped.
                None => pending.shift_remove_index(0).map(|(_, tx)| tx),
            }
        };

        match sender {
            // The receiver may already be gone if the caller was cancelled.
            Some(tx) => tx.send(classify_reply(reply)).is_ok(),
            None => {
                debug!(
                    request_id = request_id.as_deref().unwrap_or("<none>"),
                    "tray: reply with no waiting request"
                );
                false
            }
        }
    }

    /// Forget a pending request. Returns `true` if it was still pending.
    pub fn cancel(&self, request_id: &str) -> bool {
        self.lock().shift_remove(request_id).is_some()
    }

    /// Fail one pending request.
    pub fn fail(&self, request_id: &str, err: TrayError) {
        if let Some(tx) = self.lock().shift_remove(request_id) {
            let _ = tx.send(Err(err));
        }
    }

    /// Fail every pending request for which `keep` returns `false`.
    /// Returns how many were failed.
    pub fn fail_unless(&self, keep: impl Fn(&str) -> bool, err: &TrayError) -> usize {
        let failed: Vec<ReplySender> = {
            let mut pending = self.lock();
            let ids: Vec<String> = pending
                .keys()
                .filter(|id| !keep(id.as_str()))
                .cloned()
                .collect();
            ids.iter().filter_map(|id| pending.shift_remove(id)).collect()
        };
        let count = failed.len();
        for tx in failed {
            let _ = tx.send(Err(err.clone()));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
