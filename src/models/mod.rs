//! Data models for the mirror-link client.
//!
//! Wire shapes for notification frames and observe responses, the paginated
//! envelope, embedded error payloads, and connection-level options.

pub mod connection_options;
pub mod error_detail;
pub mod notification;
pub mod observe_response;
pub mod page;

pub use connection_options::ConnectionOptions;
pub use error_detail::{embedded_error, ErrorDetail};
pub use notification::{parse_frame, Notification, NotificationKind};
pub use observe_response::ObserveResponse;
pub use page::unwrap_results;

/// Query parameters for a request or live query. Backed by a sorted map, so
/// serializing one is deterministic — which is what makes the query key
/// canonical.
pub type QueryMap = serde_json::Map<String, serde_json::Value>;
