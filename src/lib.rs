//! mirror-link — live-query synchronization client.
//!
//! Keeps query results synchronized with a remote data store in near-real
//! time. A caller asks for "all items matching query Q"; the client returns
//! an initial snapshot and keeps it current by applying incremental
//! add/change/remove notifications pushed over a persistent connection,
//! transparently handling disconnection, reconnection and multiple
//! independent consumers of the same logical query.
//!
//! # Architecture
//!
//! - [`Transport`] — one persistent WebSocket connection with throttled
//!   reconnect; request/response calls against the companion endpoint are
//!   queued while disconnected and replayed in order.
//! - Observer — per-query state machine reconstructing an ordered,
//!   primary-key-unique list from the notification stream.
//! - Registry + query cache — multiplex many local subscribers onto few
//!   remote observers, de-duplicate concurrent identical subscribe calls,
//!   and serialize unsubscribes behind later subscribes on the wire.
//! - [`MirrorLinkClient`] — ties the pieces together behind a builder.
//!
//! # Example
//!
//! ```rust,no_run
//! use mirror_link::MirrorLinkClient;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = MirrorLinkClient::builder()
//!     .base_url("http://localhost:3000")
//!     .connect()
//!     .await?;
//!
//! let mut query = serde_json::Map::new();
//! query.insert("slug".to_string(), json!("x"));
//!
//! let mut subscription = client.observe("/api/data", query).await?;
//! while let Some(snapshot) = subscription.next().await {
//!     println!("{} items", snapshot.len());
//! }
//! # Ok(())
//! # }
//! ```

mod client;
mod engine;
mod error;
mod events;
mod models;
mod observer;
mod query_cache;
mod registry;
mod remote;
mod session;
mod subscription;
mod timeouts;
mod transport;

pub use client::{MirrorLinkClient, MirrorLinkClientBuilder};
pub use error::{MirrorLinkError, Result};
pub use events::{
    DisconnectReason, EventHandlers, FaultBus, FaultEvent, FaultKind,
};
pub use models::{
    parse_frame, ConnectionOptions, ErrorDetail, Notification, NotificationKind,
    ObserveResponse, QueryMap,
};
pub use observer::{Observer, ObserverStatus, Snapshot};
pub use query_cache::{query_key, QueryCache};
pub use registry::ObserverRegistry;
pub use session::{SessionContext, SharedSession, CSRF_HEADER, SESSION_HEADER};
pub use subscription::QuerySubscription;
pub use timeouts::{MirrorLinkTimeouts, MirrorLinkTimeoutsBuilder};
pub use transport::Transport;
