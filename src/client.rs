//! Main mirror-link client with builder pattern.
//!
//! The client wires together the transport, the sync engine and the session
//! context; everything is constructed explicitly and passed by handle, so
//! there is no module-level connection state anywhere.

use crate::engine::{spawn_engine, EngineHandle};
use crate::error::{MirrorLinkError, Result};
use crate::events::{EventHandlers, FaultBus, FaultEvent};
use crate::models::{unwrap_results, ConnectionOptions, QueryMap};
use crate::remote::HttpRemote;
use crate::session::{SessionContext, SharedSession};
use crate::subscription::QuerySubscription;
use crate::timeouts::MirrorLinkTimeouts;
use crate::transport::Transport;
use serde_json::Value as JsonValue;
use std::sync::{Arc, RwLock};
use tokio::sync::{broadcast, watch};

/// Main live-query client.
///
/// Use [`MirrorLinkClient::builder`] to configure and connect.
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
#[derive(Clone)]
pub struct MirrorLinkClient {
    transport: Arc<Transport>,
    engine: EngineHandle,
    session: SharedSession,
    faults: FaultBus,
}

impl MirrorLinkClient {
    /// Create a new builder for configuring the client.
    pub fn builder() -> MirrorLinkClientBuilder {
        MirrorLinkClientBuilder::new()
    }

    /// Fetch a query's results once, without observing.
    ///
    /// Unwraps a paginated `{"results": [...]}` envelope when present.
    pub async fn fetch(&self, path: &str, query: Option<QueryMap>) -> Result<Vec<JsonValue>> {
        let body = self.transport.get(path, query).await?;
        Ok(unwrap_results(body))
    }

    /// Subscribe to the live query for (path, query).
    ///
    /// Concurrent identical subscriptions share one remote observer; the
    /// returned handle receives an initial snapshot and then one snapshot
    /// per accepted mutation. Dropping the handle detaches it.
    pub async fn observe(
        &self,
        path: impl Into<String>,
        query: QueryMap,
    ) -> Result<QuerySubscription> {
        self.engine.observe(path, query).await
    }

    /// Recreate every observer's server-side query context, preserving
    /// local subscribers. Call after a session change (login/logout) since
    /// query results may depend on the authenticated identity.
    pub async fn reinitialize_all(&self) -> Result<()> {
        self.engine.reinitialize_all().await
    }

    /// Raw request/response calls against the companion endpoint. Calls
    /// issued while disconnected are queued and replayed in order.
    pub async fn get(&self, path: &str, params: Option<QueryMap>) -> Result<JsonValue> {
        self.transport.get(path, params).await
    }

    pub async fn post(
        &self,
        path: &str,
        body: Option<JsonValue>,
        params: Option<QueryMap>,
    ) -> Result<JsonValue> {
        self.transport.post(path, body, params).await
    }

    pub async fn put(
        &self,
        path: &str,
        body: Option<JsonValue>,
        params: Option<QueryMap>,
    ) -> Result<JsonValue> {
        self.transport.put(path, body, params).await
    }

    pub async fn patch(
        &self,
        path: &str,
        body: Option<JsonValue>,
        params: Option<QueryMap>,
    ) -> Result<JsonValue> {
        self.transport.patch(path, body, params).await
    }

    pub async fn delete(&self, path: &str, params: Option<QueryMap>) -> Result<JsonValue> {
        self.transport.delete(path, params).await
    }

    /// Whether the persistent connection is currently open.
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Current and subsequent connected/disconnected state.
    pub fn connected_stream(&self) -> watch::Receiver<bool> {
        self.transport.connected_stream()
    }

    /// Subscribe to the shared fault stream for the whole connection.
    pub fn faults(&self) -> broadcast::Receiver<FaultEvent> {
        self.faults.subscribe()
    }

    /// The session id used as the subscriber identity for observe calls.
    pub fn session_id(&self) -> String {
        let session = self.session.read().unwrap_or_else(|e| e.into_inner());
        session.session_id().to_string()
    }

    /// Replace the CSRF token, e.g. after login/logout. Follow with
    /// [`reinitialize_all`](Self::reinitialize_all) when server-side query
    /// results depend on the session.
    pub fn set_csrf_token(&self, token: Option<String>) {
        let mut session = self.session.write().unwrap_or_else(|e| e.into_inner());
        session.set_csrf_token(token);
    }

    /// Shut down the engine and close the persistent connection.
    pub async fn disconnect(&self) {
        self.engine.shutdown().await;
        self.transport.shutdown().await;
    }
}

/// Builder for [`MirrorLinkClient`].
#[derive(Debug, Clone, Default)]
pub struct MirrorLinkClientBuilder {
    base_url: Option<String>,
    csrf_token: Option<String>,
    timeouts: Option<MirrorLinkTimeouts>,
    options: Option<ConnectionOptions>,
    handlers: Option<EventHandlers>,
}

impl MirrorLinkClientBuilder {
    fn new() -> Self {
        Self::default()
    }

    /// Base URL of the backend, e.g. `http://localhost:3000`. Required.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// CSRF token attached to mutating calls.
    pub fn csrf_token(mut self, token: impl Into<String>) -> Self {
        self.csrf_token = Some(token.into());
        self
    }

    /// Override the default timeouts.
    pub fn timeouts(mut self, timeouts: MirrorLinkTimeouts) -> Self {
        self.timeouts = Some(timeouts);
        self
    }

    /// Override the default connection options.
    pub fn connection_options(mut self, options: ConnectionOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Register connection lifecycle callbacks.
    pub fn event_handlers(mut self, handlers: EventHandlers) -> Self {
        self.handlers = Some(handlers);
        self
    }

    /// Construct the client and start connecting.
    ///
    /// Returns as soon as the background tasks are running; the persistent
    /// connection is dialed (and re-dialed) in the background, and calls
    /// issued before it opens are queued.
    pub async fn connect(self) -> Result<MirrorLinkClient> {
        let base_url = self.base_url.ok_or_else(|| {
            MirrorLinkError::ConfigurationError("base_url is required".to_string())
        })?;
        let timeouts = self.timeouts.unwrap_or_default();
        let options = self.options.unwrap_or_default();
        let handlers = self.handlers.unwrap_or_default();

        let mut context = SessionContext::new();
        if let Some(token) = self.csrf_token {
            context = context.with_csrf_token(token);
        }
        let session_id = context.session_id().to_string();
        let session: SharedSession = Arc::new(RwLock::new(context));

        let faults = FaultBus::new(handlers);
        let (transport, notification_rx) = Transport::connect(
            &base_url,
            options.clone(),
            timeouts,
            session.clone(),
            faults.clone(),
        )?;
        let transport = Arc::new(transport);

        let remote = Arc::new(HttpRemote::new(
            transport.clone(),
            options.unobserve_path.clone(),
        ));
        let engine = spawn_engine(remote, session_id, notification_rx, faults.clone(), &options);

        Ok(MirrorLinkClient {
            transport,
            engine,
            session,
            faults,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_requires_base_url() {
        let result = MirrorLinkClient::builder().connect().await;
        assert!(matches!(
            result.err(),
            Some(MirrorLinkError::ConfigurationError(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_base_url() {
        let result = MirrorLinkClient::builder()
            .base_url("not a url")
            .connect()
            .await;
        assert!(matches!(
            result.err(),
            Some(MirrorLinkError::ConfigurationError(_))
        ));
    }

    #[tokio::test]
    async fn test_client_wires_session_and_state() {
        let client = MirrorLinkClient::builder()
            .base_url("http://127.0.0.1:9") // nothing listens; dialing stays in the background
            .csrf_token("tok")
            .connect()
            .await
            .expect("construction does not require a live server");
        assert!(client.session_id().starts_with("sess_"));
        assert!(!client.is_connected());
        client.set_csrf_token(None);
        client.disconnect().await;
    }
}
