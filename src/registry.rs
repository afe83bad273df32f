//! Registry owning the observer-id → observer map.
//!
//! Observers are created lazily so notifications that arrive for an id
//! before any local subscriber exists still populate a (queueing) observer.
//! Remote unsubscribe calls are never performed inline: they are enqueued on
//! a serialized chain — a single FIFO worker that performs one remote call
//! at a time — so a rapid subscribe/unsubscribe/subscribe sequence on the
//! same logical query can never race an unsubscribe past a later subscribe
//! on the wire. Subscribe jobs go through the same chain, which is what
//! guarantees they run only after earlier unsubscribes drain.

use crate::events::FaultBus;
use crate::models::{Notification, QueryMap};
use crate::observer::Observer;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// A job on the serialized remote-call chain. Executed strictly in FIFO
/// order, one at a time, by the chain worker.
#[derive(Debug)]
pub(crate) enum ChainJob {
    /// Fresh observe call for a query key.
    Subscribe {
        key: String,
        path: String,
        query: QueryMap,
    },
    /// Best-effort remote unsubscribe for a removed observer.
    Unsubscribe { observer_id: String },
    /// Re-issue the observe call for an observer whose server-side query
    /// context was invalidated (e.g. by a session change).
    Reinitialize {
        old_id: String,
        key: String,
        path: String,
        query: QueryMap,
    },
}

/// Owner of all observers, keyed by their server-assigned id.
pub struct ObserverRegistry {
    observers: HashMap<String, Observer>,
    chain_tx: mpsc::UnboundedSender<ChainJob>,
    faults: FaultBus,
}

impl ObserverRegistry {
    pub(crate) fn new(chain_tx: mpsc::UnboundedSender<ChainJob>, faults: FaultBus) -> Self {
        Self {
            observers: HashMap::new(),
            chain_tx,
            faults,
        }
    }

    /// Look up an observer, lazily creating and registering one when
    /// `create` is set.
    pub fn get_mut(&mut self, observer_id: &str, create: bool) -> Option<&mut Observer> {
        if create && !self.observers.contains_key(observer_id) {
            log::debug!("[mirror-link] registering observer {}", observer_id);
            self.observers.insert(
                observer_id.to_string(),
                Observer::new(observer_id, self.faults.clone()),
            );
        }
        self.observers.get_mut(observer_id)
    }

    /// Whether the id maps to an observer a new subscriber may attach to.
    pub fn is_live(&self, observer_id: &str) -> bool {
        self.observers
            .get(observer_id)
            .map(Observer::is_live)
            .unwrap_or(false)
    }

    /// Delete the id → observer mapping immediately (so a fast resubscribe
    /// under the same id starts clean), then enqueue the remote unsubscribe
    /// behind the serialized chain.
    pub fn remove(&mut self, observer_id: &str) {
        if self.observers.remove(observer_id).is_some() {
            log::debug!("[mirror-link] removing observer {}", observer_id);
            let _ = self.chain_tx.send(ChainJob::Unsubscribe {
                observer_id: observer_id.to_string(),
            });
        }
    }

    /// Enqueue a job on the serialized chain.
    pub(crate) fn enqueue(&self, job: ChainJob) {
        let _ = self.chain_tx.send(job);
    }

    /// Re-key an observer during reinitialization. Notifications already
    /// queued under the new id (by a lazily-created observer) are merged
    /// into the moving observer. No-op when the ids are identical.
    pub fn move_observer(&mut self, old_id: &str, new_id: &str) {
        if old_id == new_id {
            return;
        }
        let Some(mut observer) = self.observers.remove(old_id) else {
            return;
        };
        if let Some(existing) = self.observers.remove(new_id) {
            observer.absorb_queued(existing.into_queued());
        }
        observer.set_id(new_id);
        self.observers.insert(new_id.to_string(), observer);
    }

    /// Route one inbound notification to its observer, creating a queueing
    /// observer when none exists yet.
    pub async fn update(&mut self, notification: Notification) {
        let observer_id = notification.observer.clone();
        if let Some(observer) = self.get_mut(&observer_id, true) {
            observer.update(notification).await;
        }
    }

    /// Ids of all registered observers.
    pub fn ids(&self) -> Vec<String> {
        self.observers.keys().cloned().collect()
    }

    /// Detach a subscriber wherever it is attached. Returns the observer id
    /// and the remaining subscriber count.
    pub(crate) fn detach_subscriber(&mut self, seq: u64) -> Option<(String, usize)> {
        for (id, observer) in self.observers.iter_mut() {
            if let Some(remaining) = observer.detach(seq) {
                return Some((id.clone(), remaining));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventHandlers;
    use crate::models::NotificationKind;
    use crate::observer::ObserverStatus;
    use serde_json::json;

    fn make_registry() -> (ObserverRegistry, mpsc::UnboundedReceiver<ChainJob>) {
        let (chain_tx, chain_rx) = mpsc::unbounded_channel();
        (
            ObserverRegistry::new(chain_tx, FaultBus::new(EventHandlers::new())),
            chain_rx,
        )
    }

    fn added(observer: &str, order: usize, item: serde_json::Value) -> Notification {
        Notification {
            kind: NotificationKind::Added,
            observer: observer.to_string(),
            primary_key: "id".to_string(),
            order,
            item,
        }
    }

    #[tokio::test]
    async fn test_update_lazily_creates_a_queueing_observer() {
        let (mut registry, _chain_rx) = make_registry();
        registry.update(added("o1", 0, json!({"id": 1}))).await;

        let observer = registry.get_mut("o1", false).expect("lazily created");
        assert_eq!(observer.status(), ObserverStatus::New);

        observer.initialize(Some(vec![])).await;
        let observer = registry.get_mut("o1", false).unwrap();
        assert_eq!(observer.status(), ObserverStatus::Initialized);
    }

    #[tokio::test]
    async fn test_remove_deletes_mapping_and_enqueues_unsubscribe() {
        let (mut registry, mut chain_rx) = make_registry();
        registry.get_mut("o1", true);
        registry.remove("o1");

        assert!(registry.get_mut("o1", false).is_none());
        match chain_rx.try_recv().expect("unsubscribe enqueued") {
            ChainJob::Unsubscribe { observer_id } => assert_eq!(observer_id, "o1"),
            other => panic!("unexpected chain job: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_remove_unknown_id_enqueues_nothing() {
        let (mut registry, mut chain_rx) = make_registry();
        registry.remove("ghost");
        assert!(chain_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_move_observer_merges_notifications_queued_under_new_id() {
        let (mut registry, _chain_rx) = make_registry();

        // Old observer, initialized with one item.
        registry
            .get_mut("old", true)
            .unwrap()
            .initialize(Some(vec![json!({"id": 1})]))
            .await;
        registry.get_mut("old", false).unwrap().mark_reinitializing();

        // A notification for the new id raced in and created a queueing
        // observer there.
        registry.update(added("new", 1, json!({"id": 2}))).await;

        registry.move_observer("old", "new");
        assert!(registry.get_mut("old", false).is_none());

        let observer = registry.get_mut("new", false).expect("re-keyed");
        observer.reset_for_reinitialize("new");
        observer.initialize(Some(vec![json!({"id": 1})])).await;
        assert_eq!(observer.status(), ObserverStatus::Initialized);
        assert!(registry.is_live("new"));

        // The raced notification was merged and replayed after the fresh list.
        let mut rx = registry.get_mut("new", false).unwrap().attach(1, 8);
        let snapshot = rx.try_recv().expect("immediate snapshot");
        assert_eq!(*snapshot, vec![json!({"id": 1}), json!({"id": 2})]);
    }

    #[tokio::test]
    async fn test_move_observer_same_id_is_noop() {
        let (mut registry, _chain_rx) = make_registry();
        registry.get_mut("o1", true);
        registry.move_observer("o1", "o1");
        assert!(registry.get_mut("o1", false).is_some());
    }

    #[tokio::test]
    async fn test_detach_subscriber_finds_owner() {
        let (mut registry, _chain_rx) = make_registry();
        let _rx = registry.get_mut("o1", true).unwrap().attach(7, 8);
        assert_eq!(registry.detach_subscriber(7), Some(("o1".to_string(), 0)));
        assert_eq!(registry.detach_subscriber(7), None);
    }
}
