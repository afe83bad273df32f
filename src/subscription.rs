//! `QuerySubscription` — consumer handle for one live query.
//!
//! Receives snapshots published by the shared observer. Dropping (or
//! closing) the handle detaches it; when the last handle for an observer
//! detaches, the observer stops and the remote unsubscribe is issued
//! through the serialized chain.

use crate::observer::Snapshot;
use tokio::sync::mpsc;

/// Disposable handle to one live query's snapshot stream.
///
/// # Examples
///
/// ```rust,no_run
/// use mirror_link::MirrorLinkClient;
/// use serde_json::json;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = MirrorLinkClient::builder()
///     .base_url("http://localhost:3000")
///     .connect()
///     .await?;
///
/// let mut query = serde_json::Map::new();
/// query.insert("slug".to_string(), json!("x"));
/// let mut subscription = client.observe("/api/data", query).await?;
///
/// while let Some(snapshot) = subscription.next().await {
///     println!("{} items", snapshot.len());
/// }
/// # Ok(())
/// # }
/// ```
pub struct QuerySubscription {
    observer_id: String,
    subscriber_seq: u64,
    snapshot_rx: mpsc::Receiver<Snapshot>,
    /// Carries this handle's sequence number to the engine on close/Drop.
    /// `None` after `close()` has run.
    detach_tx: Option<mpsc::UnboundedSender<u64>>,
}

impl QuerySubscription {
    pub(crate) fn new(
        observer_id: String,
        subscriber_seq: u64,
        snapshot_rx: mpsc::Receiver<Snapshot>,
        detach_tx: mpsc::UnboundedSender<u64>,
    ) -> Self {
        Self {
            observer_id,
            subscriber_seq,
            snapshot_rx,
            detach_tx: Some(detach_tx),
        }
    }

    /// Receive the next snapshot.
    ///
    /// The first value arrives as soon as the observer is initialized (or
    /// immediately, when attaching to an already-initialized observer);
    /// subsequent values follow each accepted mutation. Returns `None` once
    /// the subscription is detached.
    pub async fn next(&mut self) -> Option<Snapshot> {
        self.snapshot_rx.recv().await
    }

    /// The remote observer id this subscription is attached to.
    pub fn observer_id(&self) -> &str {
        &self.observer_id
    }

    /// Detach from the observer. Safe to call multiple times.
    pub fn close(&mut self) {
        if let Some(tx) = self.detach_tx.take() {
            let _ = tx.send(self.subscriber_seq);
        }
    }

    /// Returns `true` if `close()` has been called.
    pub fn is_closed(&self) -> bool {
        self.detach_tx.is_none()
    }
}

impl Drop for QuerySubscription {
    fn drop(&mut self) {
        // Fire-and-forget detach; the engine handles refcounting and the
        // eventual remote unsubscribe.
        if let Some(tx) = self.detach_tx.take() {
            let _ = tx.send(self.subscriber_seq);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_sub() -> (QuerySubscription, mpsc::UnboundedReceiver<u64>) {
        let (_snap_tx, snap_rx) = mpsc::channel(1);
        let (detach_tx, detach_rx) = mpsc::unbounded_channel();
        (
            QuerySubscription::new("o1".to_string(), 42, snap_rx, detach_tx),
            detach_rx,
        )
    }

    #[tokio::test]
    async fn test_close_sends_detach_once() {
        let (mut sub, mut detach_rx) = make_sub();
        assert!(!sub.is_closed());
        sub.close();
        assert!(sub.is_closed());
        sub.close();
        assert_eq!(detach_rx.recv().await, Some(42));
        drop(sub);
        assert!(detach_rx.try_recv().is_err(), "close must detach only once");
    }

    #[tokio::test]
    async fn test_drop_sends_detach() {
        let (sub, mut detach_rx) = make_sub();
        drop(sub);
        assert_eq!(detach_rx.recv().await, Some(42));
    }

    #[tokio::test]
    async fn test_next_returns_none_after_sender_drops() {
        let (mut sub, _detach_rx) = make_sub();
        assert!(sub.next().await.is_none());
    }
}
