//! The sync engine: single-task owner of the registry and query cache.
//!
//! All notification handling, snapshot publication, cache mutation and
//! subscriber bookkeeping happen inside one task, so two notifications for
//! the same observer can never be processed concurrently and no locking is
//! needed anywhere in the core. Asynchronous resolutions (observe and
//! reinitialize responses) re-enter the loop as internal messages.
//!
//! Remote calls issued by the engine go through the serialized chain worker:
//! one job at a time, strictly FIFO, so an unsubscribe enqueued before a
//! resubscribe is always on the wire first.

use crate::error::{MirrorLinkError, Result};
use crate::events::{FaultBus, FaultEvent};
use crate::models::{ConnectionOptions, Notification, ObserveResponse, QueryMap};
use crate::observer::{ObserverStatus, ReinitSpec};
use crate::query_cache::{query_key, QueryCache, Waiter};
use crate::registry::{ChainJob, ObserverRegistry};
use crate::subscription::QuerySubscription;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Capacity of the public command channel into the engine task.
const COMMAND_CHANNEL_CAPACITY: usize = 256;

/// Request/response calls the engine needs from the remote side.
///
/// The production implementation rides the transport's HTTP path; tests
/// substitute a recording fake.
pub trait RemoteCalls: Send + Sync + 'static {
    /// Issue an observe (subscribe) call for a query, carrying the client
    /// session id. Resolves to the observer id and the initial item list.
    fn observe(
        &self,
        path: &str,
        query: &QueryMap,
        session_id: &str,
    ) -> impl Future<Output = Result<ObserveResponse>> + Send;

    /// Release a remote observer for this session.
    fn unobserve(
        &self,
        observer_id: &str,
        session_id: &str,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Commands from the client handle into the engine task.
pub(crate) enum EngineCmd {
    /// Attach a subscriber to the live query for (path, query).
    Observe {
        path: String,
        query: QueryMap,
        reply: oneshot::Sender<Result<QuerySubscription>>,
    },
    /// Recreate every observer's server-side query context.
    ReinitializeAll { ack: oneshot::Sender<()> },
    Shutdown,
}

/// Resolutions flowing back from the chain worker.
enum ChainOutcome {
    Subscribed {
        key: String,
        path: String,
        query: QueryMap,
        result: Result<ObserveResponse>,
    },
    Reinitialized {
        old_id: String,
        key: String,
        result: Result<ObserveResponse>,
    },
}

/// Cloneable handle to a running engine task.
#[derive(Clone)]
pub(crate) struct EngineHandle {
    cmd_tx: mpsc::Sender<EngineCmd>,
}

impl EngineHandle {
    /// Subscribe to the live query for (path, query).
    ///
    /// Resolves once the (possibly shared) remote observer is known. There
    /// is deliberately no deadline here: a subscribe call that never
    /// resolves leaves the caller pending.
    pub async fn observe(
        &self,
        path: impl Into<String>,
        query: QueryMap,
    ) -> Result<QuerySubscription> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(EngineCmd::Observe {
                path: path.into(),
                query,
                reply: reply_tx,
            })
            .await
            .map_err(|_| {
                MirrorLinkError::TransportError("sync engine is not running".to_string())
            })?;
        reply_rx.await.map_err(|_| {
            MirrorLinkError::TransportError("sync engine stopped before answering".to_string())
        })?
    }

    /// Ask every observer to recreate its remote query context.
    pub async fn reinitialize_all(&self) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.cmd_tx
            .send(EngineCmd::ReinitializeAll { ack: ack_tx })
            .await
            .map_err(|_| {
                MirrorLinkError::TransportError("sync engine is not running".to_string())
            })?;
        ack_rx.await.map_err(|_| {
            MirrorLinkError::TransportError("sync engine stopped before answering".to_string())
        })
    }

    /// Stop the engine task.
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(EngineCmd::Shutdown).await;
    }
}

/// Spawn the engine task and its serialized chain worker.
pub(crate) fn spawn_engine<R: RemoteCalls>(
    remote: Arc<R>,
    session_id: String,
    notification_rx: mpsc::Receiver<Notification>,
    faults: FaultBus,
    options: &ConnectionOptions,
) -> EngineHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    let (chain_tx, chain_rx) = mpsc::unbounded_channel();
    let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
    let (detach_tx, detach_rx) = mpsc::unbounded_channel();

    tokio::spawn(chain_worker(remote, session_id, chain_rx, outcome_tx));

    let engine = SyncEngine {
        registry: ObserverRegistry::new(chain_tx, faults.clone()),
        cache: QueryCache::new(),
        detach_tx,
        next_subscriber_seq: 1,
        snapshot_capacity: options.snapshot_capacity,
        faults,
    };
    tokio::spawn(engine.run(cmd_rx, notification_rx, detach_rx, outcome_rx));

    EngineHandle { cmd_tx }
}

/// The serialized chain: performs one remote call at a time, in the exact
/// order jobs were enqueued.
async fn chain_worker<R: RemoteCalls>(
    remote: Arc<R>,
    session_id: String,
    mut chain_rx: mpsc::UnboundedReceiver<ChainJob>,
    outcome_tx: mpsc::UnboundedSender<ChainOutcome>,
) {
    while let Some(job) = chain_rx.recv().await {
        match job {
            ChainJob::Subscribe { key, path, query } => {
                let result = remote.observe(&path, &query, &session_id).await;
                if outcome_tx
                    .send(ChainOutcome::Subscribed { key, path, query, result })
                    .is_err()
                {
                    return;
                }
            },
            ChainJob::Unsubscribe { observer_id } => {
                if let Err(error) = remote.unobserve(&observer_id, &session_id).await {
                    log::warn!(
                        "[mirror-link] best-effort unsubscribe for {} failed: {}",
                        observer_id,
                        error
                    );
                }
            },
            ChainJob::Reinitialize { old_id, key, path, query } => {
                let result = remote.observe(&path, &query, &session_id).await;
                if outcome_tx
                    .send(ChainOutcome::Reinitialized { old_id, key, result })
                    .is_err()
                {
                    return;
                }
            },
        }
    }
}

struct SyncEngine {
    registry: ObserverRegistry,
    cache: QueryCache,
    /// Cloned into every subscription handle; carries detach sequences back.
    detach_tx: mpsc::UnboundedSender<u64>,
    next_subscriber_seq: u64,
    snapshot_capacity: usize,
    faults: FaultBus,
}

impl SyncEngine {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<EngineCmd>,
        mut notification_rx: mpsc::Receiver<Notification>,
        mut detach_rx: mpsc::UnboundedReceiver<u64>,
        mut outcome_rx: mpsc::UnboundedReceiver<ChainOutcome>,
    ) {
        let mut notifications_open = true;
        loop {
            tokio::select! {
                biased;

                // Detaches first: a dispose issued before a resubscribe must
                // reach the chain before the new subscribe job does.
                Some(seq) = detach_rx.recv() => self.handle_detach(seq),

                Some(outcome) = outcome_rx.recv() => match outcome {
                    ChainOutcome::Subscribed { key, path, query, result } => {
                        self.handle_subscribed(key, path, query, result).await;
                    },
                    ChainOutcome::Reinitialized { old_id, key, result } => {
                        self.handle_reinitialized(old_id, key, result).await;
                    },
                },

                cmd = cmd_rx.recv() => match cmd {
                    Some(EngineCmd::Observe { path, query, reply }) => {
                        self.handle_observe(path, query, reply);
                    },
                    Some(EngineCmd::ReinitializeAll { ack }) => {
                        self.handle_reinitialize_all();
                        let _ = ack.send(());
                    },
                    Some(EngineCmd::Shutdown) | None => break,
                },

                notification = notification_rx.recv(), if notifications_open => {
                    match notification {
                        Some(notification) => self.registry.update(notification).await,
                        None => {
                            log::warn!("[mirror-link] notification stream ended");
                            notifications_open = false;
                        },
                    }
                },
            }
        }
    }

    fn attach_subscriber(&mut self, observer_id: &str) -> Option<QuerySubscription> {
        let seq = self.next_subscriber_seq;
        self.next_subscriber_seq += 1;
        let capacity = self.snapshot_capacity;
        let observer = self.registry.get_mut(observer_id, true)?;
        let snapshot_rx = observer.attach(seq, capacity);
        Some(QuerySubscription::new(
            observer_id.to_string(),
            seq,
            snapshot_rx,
            self.detach_tx.clone(),
        ))
    }

    fn handle_observe(
        &mut self,
        path: String,
        query: QueryMap,
        reply: oneshot::Sender<Result<QuerySubscription>>,
    ) {
        let key = query_key(&path, &query);

        // Fast path: the key already resolved and its observer is live.
        if let Some(observer_id) = self.cache.resolved_id(&key).map(str::to_string) {
            if self.registry.is_live(&observer_id) {
                if let Some(subscription) = self.attach_subscriber(&observer_id) {
                    // A refused reply detaches itself via Drop.
                    let _ = reply.send(Ok(subscription));
                    return;
                }
            }
        }

        // Coalesce with an in-flight subscribe, or open a new one.
        if self.cache.push_waiter(&key, Waiter { reply }) {
            log::debug!("[mirror-link] subscribing {}", key);
            self.registry.enqueue(ChainJob::Subscribe { key, path, query });
        }
    }

    async fn handle_subscribed(
        &mut self,
        key: String,
        path: String,
        query: QueryMap,
        result: Result<ObserveResponse>,
    ) {
        let waiters = self.cache.take_waiters(&key);
        match result {
            Ok(response) => {
                let observer_id = response.observer.clone();
                log::debug!("[mirror-link] {} resolved to observer {}", key, observer_id);
                self.cache.cache(key, observer_id.clone());

                if let Some(observer) = self.registry.get_mut(&observer_id, true) {
                    observer.set_reinit_spec(ReinitSpec { path, query });
                }
                for waiter in waiters {
                    if let Some(subscription) = self.attach_subscriber(&observer_id) {
                        let _ = waiter.reply.send(Ok(subscription));
                    }
                }
                if let Some(observer) = self.registry.get_mut(&observer_id, true) {
                    // A racing resolution for the same remote observer may
                    // have initialized it already.
                    if observer.status() != ObserverStatus::Initialized {
                        observer.initialize(response.items).await;
                    }
                }
            },
            Err(error) => {
                self.faults.report(FaultEvent::from_error(&error));
                for waiter in waiters {
                    let _ = waiter.reply.send(Err(error.duplicate()));
                }
            },
        }
    }

    async fn handle_reinitialized(
        &mut self,
        old_id: String,
        key: String,
        result: Result<ObserveResponse>,
    ) {
        match result {
            Ok(response) => {
                // The last subscriber may have detached while the fresh
                // observe call was in flight; nothing to re-key then.
                if old_id != response.observer
                    && self.registry.get_mut(&old_id, false).is_none()
                {
                    log::debug!(
                        "[mirror-link] observer {} disappeared during reinitialization",
                        old_id
                    );
                    return;
                }
                let new_id = response.observer.clone();
                self.registry.move_observer(&old_id, &new_id);
                self.cache.cache(key, new_id.clone());
                if let Some(observer) = self.registry.get_mut(&new_id, false) {
                    observer.reset_for_reinitialize(&new_id);
                    observer.initialize(response.items).await;
                }
            },
            Err(error) => {
                log::warn!(
                    "[mirror-link] reinitialization of observer {} failed: {}",
                    old_id,
                    error
                );
                self.faults.report(FaultEvent::from_error(&error));
            },
        }
    }

    fn handle_detach(&mut self, seq: u64) {
        if let Some((observer_id, remaining)) = self.registry.detach_subscriber(seq) {
            if remaining == 0 {
                if let Some(observer) = self.registry.get_mut(&observer_id, false) {
                    observer.stop();
                }
                self.registry.remove(&observer_id);
            }
        }
    }

    fn handle_reinitialize_all(&mut self) {
        for observer_id in self.registry.ids() {
            let Some(observer) = self.registry.get_mut(&observer_id, false) else {
                continue;
            };
            // Only meaningful from Initialized; a no-op otherwise.
            if observer.status() != ObserverStatus::Initialized {
                continue;
            }
            match observer.reinit_spec() {
                Some(spec) => {
                    observer.mark_reinitializing();
                    let key = query_key(&spec.path, &spec.query);
                    self.registry.enqueue(ChainJob::Reinitialize {
                        old_id: observer_id,
                        key,
                        path: spec.path,
                        query: spec.query,
                    });
                },
                None => {
                    self.faults.report(FaultEvent::protocol(format!(
                        "observer {} cannot be reinitialized: no subscribe call on record",
                        observer_id
                    )));
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventHandlers, FaultKind};
    use crate::models::NotificationKind;
    use serde_json::{json, Value as JsonValue};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    enum Scripted {
        Ok {
            observer: String,
            items: Vec<JsonValue>,
        },
        Err {
            status: u16,
            message: String,
        },
    }

    /// Recording fake for the remote side. Responses are scripted in order;
    /// once the script runs dry, observe calls answer with an empty list
    /// under a generated id.
    struct FakeRemote {
        calls: Mutex<Vec<String>>,
        script: Mutex<VecDeque<Scripted>>,
        delay: Duration,
    }

    impl FakeRemote {
        fn new(script: Vec<Scripted>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                script: Mutex::new(script.into()),
                delay: Duration::from_millis(10),
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn observe_calls(&self) -> usize {
            self.calls()
                .iter()
                .filter(|c| c.starts_with("observe"))
                .count()
        }
    }

    impl RemoteCalls for FakeRemote {
        async fn observe(
            &self,
            path: &str,
            _query: &QueryMap,
            _session_id: &str,
        ) -> Result<ObserveResponse> {
            self.calls.lock().unwrap().push(format!("observe {}", path));
            tokio::time::sleep(self.delay).await;
            let scripted = self.script.lock().unwrap().pop_front();
            match scripted {
                Some(Scripted::Ok { observer, items }) => Ok(ObserveResponse {
                    observer,
                    items: Some(items),
                }),
                Some(Scripted::Err { status, message }) => Err(MirrorLinkError::ServerError {
                    status_code: status,
                    message,
                }),
                None => Ok(ObserveResponse {
                    observer: format!("auto_{}", self.calls.lock().unwrap().len()),
                    items: Some(Vec::new()),
                }),
            }
        }

        async fn unobserve(&self, observer_id: &str, _session_id: &str) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("unobserve {}", observer_id));
            tokio::time::sleep(self.delay).await;
            Ok(())
        }
    }

    struct Harness {
        remote: Arc<FakeRemote>,
        handle: EngineHandle,
        notification_tx: mpsc::Sender<Notification>,
        faults: FaultBus,
    }

    fn start(script: Vec<Scripted>) -> Harness {
        start_with(FakeRemote::new(script))
    }

    fn start_with(remote: FakeRemote) -> Harness {
        let remote = Arc::new(remote);
        let faults = FaultBus::new(EventHandlers::new());
        let (notification_tx, notification_rx) = mpsc::channel(64);
        let handle = spawn_engine(
            remote.clone(),
            "sess_test".to_string(),
            notification_rx,
            faults.clone(),
            &ConnectionOptions::default(),
        );
        Harness {
            remote,
            handle,
            notification_tx,
            faults,
        }
    }

    fn slug_query(value: &str) -> QueryMap {
        let mut query = QueryMap::new();
        query.insert("slug".to_string(), json!(value));
        query
    }

    fn added(observer: &str, order: usize, item: JsonValue) -> Notification {
        Notification {
            kind: NotificationKind::Added,
            observer: observer.to_string(),
            primary_key: "id".to_string(),
            order,
            item,
        }
    }

    async fn next_snapshot(subscription: &mut QuerySubscription) -> crate::observer::Snapshot {
        tokio::time::timeout(Duration::from_secs(2), subscription.next())
            .await
            .expect("snapshot within deadline")
            .expect("stream open")
    }

    #[tokio::test]
    async fn test_concurrent_identical_subscribes_issue_one_call() {
        let harness = start(vec![Scripted::Ok {
            observer: "o1".to_string(),
            items: vec![json!({"id": 1, "name": "a"}), json!({"id": 2, "name": "b"})],
        }]);

        let query = slug_query("x");
        let (a, b, c) = tokio::join!(
            harness.handle.observe("/api/data", query.clone()),
            harness.handle.observe("/api/data", query.clone()),
            harness.handle.observe("/api/data", query.clone()),
        );
        let mut subs = [a.unwrap(), b.unwrap(), c.unwrap()];

        assert_eq!(harness.remote.observe_calls(), 1, "calls must coalesce");
        for sub in subs.iter_mut() {
            assert_eq!(sub.observer_id(), "o1");
            let snapshot = next_snapshot(sub).await;
            assert_eq!(snapshot.len(), 2);
        }
    }

    #[tokio::test]
    async fn test_resubscribe_after_dispose_keeps_wire_order() {
        let harness = start(vec![
            Scripted::Ok {
                observer: "o1".to_string(),
                items: vec![json!({"id": 1})],
            },
            Scripted::Ok {
                observer: "o2".to_string(),
                items: vec![json!({"id": 1})],
            },
        ]);

        let query = slug_query("x");
        let mut sub = harness
            .handle
            .observe("/api/data", query.clone())
            .await
            .unwrap();
        let _ = next_snapshot(&mut sub).await;

        drop(sub);
        let mut sub2 = harness
            .handle
            .observe("/api/data", query.clone())
            .await
            .unwrap();
        let _ = next_snapshot(&mut sub2).await;
        assert_eq!(sub2.observer_id(), "o2");

        // Let the chain finish the trailing unsubscribe too.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            harness.remote.calls(),
            vec![
                "observe /api/data".to_string(),
                "unobserve o1".to_string(),
                "observe /api/data".to_string(),
            ],
            "the wire must never see subscribe, subscribe, unsubscribe"
        );
    }

    #[tokio::test]
    async fn test_shared_observer_survives_first_dispose() {
        let harness = start(vec![Scripted::Ok {
            observer: "o1".to_string(),
            items: vec![json!({"id": 1})],
        }]);

        let query = slug_query("x");
        let mut first = harness
            .handle
            .observe("/api/data", query.clone())
            .await
            .unwrap();
        let _ = next_snapshot(&mut first).await;
        let mut second = harness
            .handle
            .observe("/api/data", query.clone())
            .await
            .unwrap();
        assert_eq!(harness.remote.observe_calls(), 1);
        assert_eq!(first.observer_id(), second.observer_id());
        // The second subscriber gets the current snapshot immediately.
        let _ = next_snapshot(&mut second).await;

        drop(first);
        tokio::time::sleep(Duration::from_millis(50)).await;

        harness
            .notification_tx
            .send(added("o1", 1, json!({"id": 2})))
            .await
            .unwrap();
        let snapshot = next_snapshot(&mut second).await;
        assert_eq!(snapshot.len(), 2, "remaining subscriber still updates");

        drop(second);
        tokio::time::sleep(Duration::from_millis(100)).await;
        let unobserves: Vec<_> = harness
            .remote
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("unobserve"))
            .collect();
        assert_eq!(unobserves, vec!["unobserve o1".to_string()]);
    }

    #[tokio::test]
    async fn test_notifications_arriving_before_resolution_are_replayed() {
        let remote = FakeRemote::new(vec![Scripted::Ok {
            observer: "o1".to_string(),
            items: vec![json!({"id": 1})],
        }])
        .with_delay(Duration::from_millis(120));
        let harness = start_with(remote);

        let handle = harness.handle.clone();
        let pending =
            tokio::spawn(async move { handle.observe("/api/data", slug_query("x")).await });

        // While the observe call is in flight, a notification for the
        // soon-to-exist observer arrives and must queue, not vanish.
        tokio::time::sleep(Duration::from_millis(40)).await;
        harness
            .notification_tx
            .send(added("o1", 1, json!({"id": 2})))
            .await
            .unwrap();

        let mut sub = pending.await.unwrap().unwrap();
        let snapshot = next_snapshot(&mut sub).await;
        assert_eq!(*snapshot, vec![json!({"id": 1}), json!({"id": 2})]);
    }

    #[tokio::test]
    async fn test_reinitialize_all_rekeys_and_refreshes() {
        let harness = start(vec![
            Scripted::Ok {
                observer: "o1".to_string(),
                items: vec![json!({"id": 1, "owner": "alice"})],
            },
            Scripted::Ok {
                observer: "o2".to_string(),
                items: vec![json!({"id": 9, "owner": "bob"})],
            },
        ]);

        let query = slug_query("mine");
        let mut sub = harness
            .handle
            .observe("/api/data", query.clone())
            .await
            .unwrap();
        let first = next_snapshot(&mut sub).await;
        assert_eq!(*first, vec![json!({"id": 1, "owner": "alice"})]);

        harness.handle.reinitialize_all().await.unwrap();

        let refreshed = next_snapshot(&mut sub).await;
        assert_eq!(*refreshed, vec![json!({"id": 9, "owner": "bob"})]);
        assert_eq!(harness.remote.observe_calls(), 2);

        // The cache now points at the re-keyed observer: attaching again
        // must not issue a third call.
        let mut late = harness
            .handle
            .observe("/api/data", query.clone())
            .await
            .unwrap();
        assert_eq!(late.observer_id(), "o2");
        assert_eq!(harness.remote.observe_calls(), 2);
        let _ = next_snapshot(&mut late).await;
    }

    #[tokio::test]
    async fn test_failed_subscribe_rejects_every_waiter_and_reports() {
        let harness = start(vec![
            Scripted::Err {
                status: 503,
                message: "overloaded".to_string(),
            },
            Scripted::Ok {
                observer: "o1".to_string(),
                items: vec![],
            },
        ]);
        let mut fault_rx = harness.faults.subscribe();

        let query = slug_query("x");
        let (a, b) = tokio::join!(
            harness.handle.observe("/api/data", query.clone()),
            harness.handle.observe("/api/data", query.clone()),
        );
        assert!(a.is_err() && b.is_err());
        assert_eq!(harness.remote.observe_calls(), 1);

        let fault = fault_rx.recv().await.unwrap();
        assert_eq!(fault.kind, FaultKind::Server);
        assert_eq!(fault.code, Some(503));

        // The in-flight entry was cleared; a retry issues a fresh call.
        let sub = harness.handle.observe("/api/data", query).await;
        assert!(sub.is_ok());
        assert_eq!(harness.remote.observe_calls(), 2);
    }
}
