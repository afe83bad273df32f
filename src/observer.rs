//! Local mirror of one remote live-query result set.
//!
//! An observer consumes point-mutation notifications and maintains an
//! ordered list of items, unique by primary-key value. Every accepted
//! mutation publishes a fresh immutable snapshot to all attached
//! subscribers. Notifications that arrive before the initial item list are
//! queued and replayed in order once `initialize` runs.

use crate::events::{FaultBus, FaultEvent};
use crate::models::{Notification, NotificationKind, QueryMap};
use serde_json::Value as JsonValue;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;

/// An immutable, ordered, primary-key-unique item list published to
/// subscribers after each accepted mutation.
pub type Snapshot = Arc<Vec<JsonValue>>;

/// Observer lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverStatus {
    /// Created, no initial item list yet; notifications queue.
    New,
    /// Draining queued notifications against the initial list.
    Initializing,
    /// Live; mutations apply and snapshots publish.
    Initialized,
    /// A fresh remote observer is being created; notifications drop.
    Reinitializing,
    /// Terminal.
    Stopped,
}

/// How to re-create this observer's remote query after a session change:
/// the same observe call, with the same path and query.
#[derive(Debug, Clone)]
pub struct ReinitSpec {
    pub path: String,
    pub query: QueryMap,
}

struct SnapshotSubscriber {
    seq: u64,
    tx: mpsc::Sender<Snapshot>,
}

/// Local mirror of one remote query result set.
pub struct Observer {
    id: String,
    status: ObserverStatus,
    items: Vec<JsonValue>,
    /// Notifications received before initialization, in arrival order.
    queued: VecDeque<Notification>,
    reinit: Option<ReinitSpec>,
    subscribers: Vec<SnapshotSubscriber>,
    faults: FaultBus,
}

impl Observer {
    pub fn new(id: impl Into<String>, faults: FaultBus) -> Self {
        Self {
            id: id.into(),
            status: ObserverStatus::New,
            items: Vec::new(),
            queued: VecDeque::new(),
            reinit: None,
            subscribers: Vec::new(),
            faults,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    pub fn status(&self) -> ObserverStatus {
        self.status
    }

    /// Live observers can be attached to directly from the query cache.
    pub fn is_live(&self) -> bool {
        matches!(
            self.status,
            ObserverStatus::Initialized | ObserverStatus::Reinitializing
        )
    }

    pub(crate) fn set_reinit_spec(&mut self, spec: ReinitSpec) {
        self.reinit = Some(spec);
    }

    pub(crate) fn reinit_spec(&self) -> Option<ReinitSpec> {
        self.reinit.clone()
    }

    /// Consume a notification according to the current state.
    ///
    /// Dropped when `Stopped` or `Reinitializing`; queued when `New`;
    /// applied immediately otherwise. Publishes a snapshot when the
    /// observer is `Initialized`.
    pub async fn update(&mut self, notification: Notification) {
        match self.status {
            ObserverStatus::Stopped | ObserverStatus::Reinitializing => {},
            ObserverStatus::New => self.queued.push_back(notification),
            ObserverStatus::Initializing | ObserverStatus::Initialized => {
                self.apply(notification);
                if self.status == ObserverStatus::Initialized {
                    self.publish().await;
                }
            },
        }
    }

    /// Install the initial item list and drain the queued notifications.
    ///
    /// Only valid from `New`; calls in any other state are ignored with a
    /// warning. A missing item list is a protocol error answered with an
    /// empty list so one malformed response cannot wedge the observer.
    pub async fn initialize(&mut self, items: Option<Vec<JsonValue>>) {
        if self.status != ObserverStatus::New {
            log::warn!(
                "[mirror-link] initialize ignored for observer {} in state {:?}",
                self.id,
                self.status
            );
            return;
        }

        let items = match items {
            Some(items) => items,
            None => {
                self.faults.report(FaultEvent::protocol(format!(
                    "observe response for {} carried no item list; resource is not observable",
                    self.id
                )));
                Vec::new()
            },
        };

        self.status = ObserverStatus::Initializing;
        self.items = items;
        while let Some(notification) = self.queued.pop_front() {
            self.apply(notification);
        }
        self.status = ObserverStatus::Initialized;
        self.publish().await;
    }

    /// Enter `Reinitializing`: notifications drop until the fresh observe
    /// call resolves and `reset_for_reinitialize` + `initialize` run.
    pub(crate) fn mark_reinitializing(&mut self) {
        if self.status == ObserverStatus::Initialized {
            self.status = ObserverStatus::Reinitializing;
        }
    }

    /// Adopt the (possibly new) identity produced by reinitialization and
    /// return to `New` so a fresh `initialize` can run. Subscribers and any
    /// merged queued notifications are preserved.
    pub(crate) fn reset_for_reinitialize(&mut self, id: impl Into<String>) {
        self.id = id.into();
        self.status = ObserverStatus::New;
        self.items.clear();
    }

    /// Terminal stop. The registry removes the observer and issues the
    /// best-effort remote unsubscribe.
    pub fn stop(&mut self) {
        self.status = ObserverStatus::Stopped;
        self.subscribers.clear();
    }

    /// Attach a snapshot subscriber. An `Initialized` observer immediately
    /// emits its current snapshot so the new subscriber does not wait for
    /// the next mutation.
    pub(crate) fn attach(&mut self, seq: u64, capacity: usize) -> mpsc::Receiver<Snapshot> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        if self.status == ObserverStatus::Initialized {
            let _ = tx.try_send(Arc::new(self.items.clone()));
        }
        self.subscribers.push(SnapshotSubscriber { seq, tx });
        rx
    }

    /// Detach a subscriber by its sequence number. Returns the remaining
    /// subscriber count when the sequence was found.
    pub(crate) fn detach(&mut self, seq: u64) -> Option<usize> {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.seq != seq);
        if self.subscribers.len() < before {
            Some(self.subscribers.len())
        } else {
            None
        }
    }

    /// Move queued notifications out, used when re-keying during
    /// reinitialization.
    pub(crate) fn into_queued(self) -> VecDeque<Notification> {
        self.queued
    }

    /// Merge notifications that arrived for the new id while this observer
    /// was still keyed under the old one.
    pub(crate) fn absorb_queued(&mut self, mut queued: VecDeque<Notification>) {
        self.queued.append(&mut queued);
    }

    fn position_of(&self, primary_key: &str, key: &JsonValue) -> Option<usize> {
        self.items
            .iter()
            .position(|item| item.get(primary_key) == Some(key))
    }

    fn insert_clamped(&mut self, order: usize, item: JsonValue) {
        let idx = order.min(self.items.len());
        self.items.insert(idx, item);
    }

    fn apply(&mut self, notification: Notification) {
        let Notification {
            kind,
            primary_key,
            order,
            item,
            ..
        } = notification;

        match kind {
            NotificationKind::Added => {
                // Duplicate delivery of an add must not break key uniqueness.
                if let Some(key) = item.get(&primary_key).cloned() {
                    if let Some(idx) = self.position_of(&primary_key, &key) {
                        self.items.remove(idx);
                    }
                }
                self.insert_clamped(order, item);
            },
            NotificationKind::Removed => {
                let Some(key) = item.get(&primary_key).cloned() else {
                    return;
                };
                // Absent key is a no-op, tolerating duplicate delivery.
                if let Some(idx) = self.position_of(&primary_key, &key) {
                    self.items.remove(idx);
                }
            },
            NotificationKind::Changed => {
                let key = item.get(&primary_key).cloned();
                match key.as_ref().and_then(|k| self.position_of(&primary_key, k)) {
                    Some(idx) if idx == order => self.items[idx] = item,
                    Some(idx) => {
                        self.items.remove(idx);
                        self.insert_clamped(order, item);
                    },
                    // A change for an item we never saw added: adopt it at
                    // the server's position rather than losing it.
                    None => self.insert_clamped(order, item),
                }
            },
            NotificationKind::Unknown => {
                self.faults.report(FaultEvent::protocol(format!(
                    "unknown notification kind for observer {}",
                    self.id
                )));
            },
        }
    }

    /// Publish a fresh immutable snapshot to every subscriber, pruning any
    /// whose receiver is gone.
    async fn publish(&mut self) {
        if self.subscribers.is_empty() {
            return;
        }
        let snapshot: Snapshot = Arc::new(self.items.clone());
        let mut open = Vec::with_capacity(self.subscribers.len());
        for subscriber in self.subscribers.drain(..) {
            if subscriber.tx.send(snapshot.clone()).await.is_ok() {
                open.push(subscriber);
            }
        }
        self.subscribers = open;
    }
}
