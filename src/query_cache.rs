//! Query-key bookkeeping for the resource layer.
//!
//! A deterministic key derived from (path, query) maps to the remote
//! observer id once a subscribe call has resolved, so identical queries
//! reuse one remote observer. While a resolution is in flight, additional
//! subscribers for the same key coalesce into a waiter list instead of
//! issuing duplicate subscribe calls.

use crate::error::Result;
use crate::subscription::QuerySubscription;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use tokio::sync::oneshot;

/// A local subscriber waiting for an in-flight subscribe resolution.
pub(crate) struct Waiter {
    pub reply: oneshot::Sender<Result<QuerySubscription>>,
}

/// Deterministic serialization of (path, query).
///
/// `serde_json::Map` is ordered by key, so semantically-equal queries built
/// in any insertion order serialize identically.
pub fn query_key(path: &str, query: &serde_json::Map<String, JsonValue>) -> String {
    let encoded =
        serde_json::to_string(query).unwrap_or_else(|_| "{}".to_string());
    format!("{}?{}", path, encoded)
}

/// Path/query → observer-id cache plus in-flight waiter lists.
#[derive(Default)]
pub struct QueryCache {
    /// Resolved key → observer id. Never proactively invalidated; a stale
    /// entry is superseded when reinitialization re-keys the observer, and
    /// ignored when the observer it names is no longer live.
    resolved: HashMap<String, String>,
    /// Keys with a subscribe call in flight, and their waiters.
    pending: HashMap<String, Vec<Waiter>>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The observer id this key resolved to, if any.
    pub fn resolved_id(&self, key: &str) -> Option<&str> {
        self.resolved.get(key).map(String::as_str)
    }

    /// Record (or supersede) the observer id for a key.
    pub fn cache(&mut self, key: String, observer_id: String) {
        self.resolved.insert(key, observer_id);
    }

    /// Whether a subscribe call for this key is already in flight.
    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.contains_key(key)
    }

    /// Append a waiter for an in-flight key, or open a new in-flight entry.
    /// Returns true when this call opened the entry — the caller must then
    /// issue exactly one subscribe call.
    pub(crate) fn push_waiter(&mut self, key: &str, waiter: Waiter) -> bool {
        match self.pending.get_mut(key) {
            Some(waiters) => {
                waiters.push(waiter);
                false
            },
            None => {
                self.pending.insert(key.to_string(), vec![waiter]);
                true
            },
        }
    }

    /// Close the in-flight entry for a key and take its waiters.
    pub(crate) fn take_waiters(&mut self, key: &str) -> Vec<Waiter> {
        self.pending.remove(key).unwrap_or_default()
    }
}
