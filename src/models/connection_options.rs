use serde::{Deserialize, Serialize};

/// Connection-level options for the persistent stream and its companion
/// request/response endpoint.
///
/// Separate from [`MirrorLinkTimeouts`](crate::timeouts::MirrorLinkTimeouts),
/// which covers per-operation deadlines.
///
/// # Example
///
/// ```rust
/// use mirror_link::ConnectionOptions;
///
/// let options = ConnectionOptions::default()
///     .with_reconnect_interval_ms(10_000);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionOptions {
    /// Reconnect automatically when the persistent connection closes.
    /// Default: true. Connection loss is never fatal; there is no attempt
    /// cap. When disabled, the transport dials once and calls issued while
    /// disconnected are rejected instead of queued.
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,

    /// Minimum interval between reconnect attempts, in milliseconds.
    /// The loop is throttled at a fixed interval so noisy close/retry cycles
    /// do not storm the server. Default: 5000.
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    /// Path of the persistent stream endpoint, resolved against the base URL
    /// with an http(s) → ws(s) scheme switch. Default: `/api/stream`.
    #[serde(default = "default_stream_path")]
    pub stream_path: String,

    /// Full stream URL override. When set, `stream_path` is ignored and the
    /// persistent connection dials this URL directly (it must use ws:// or
    /// wss://). Default: none.
    #[serde(default)]
    pub stream_url: Option<String>,

    /// Path of the unobserve endpoint. Default: `/api/unobserve`.
    #[serde(default = "default_unobserve_path")]
    pub unobserve_path: String,

    /// Capacity of the inbound notification channel. When full, the
    /// connection task pauses stream reads (back-pressure). Default: 8192.
    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,

    /// Capacity of each subscriber's snapshot channel. Default: 256.
    #[serde(default = "default_snapshot_capacity")]
    pub snapshot_capacity: usize,
}

fn default_auto_reconnect() -> bool {
    true
}

fn default_reconnect_interval_ms() -> u64 {
    5000
}

fn default_stream_path() -> String {
    "/api/stream".to_string()
}

fn default_unobserve_path() -> String {
    "/api/unobserve".to_string()
}

fn default_notification_capacity() -> usize {
    8192
}

fn default_snapshot_capacity() -> usize {
    256
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            reconnect_interval_ms: 5000,
            stream_path: default_stream_path(),
            stream_url: None,
            unobserve_path: default_unobserve_path(),
            notification_capacity: 8192,
            snapshot_capacity: 256,
        }
    }
}

impl ConnectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether to automatically reconnect on connection loss.
    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Set the minimum interval between reconnect attempts (milliseconds).
    pub fn with_reconnect_interval_ms(mut self, interval_ms: u64) -> Self {
        self.reconnect_interval_ms = interval_ms;
        self
    }

    /// Set the persistent stream endpoint path.
    pub fn with_stream_path(mut self, path: impl Into<String>) -> Self {
        self.stream_path = path.into();
        self
    }

    /// Set a full stream URL override (ws:// or wss://).
    pub fn with_stream_url(mut self, url: impl Into<String>) -> Self {
        self.stream_url = Some(url.into());
        self
    }

    /// Set the unobserve endpoint path.
    pub fn with_unobserve_path(mut self, path: impl Into<String>) -> Self {
        self.unobserve_path = path.into();
        self
    }

    /// Set the inbound notification channel capacity.
    pub fn with_notification_capacity(mut self, capacity: usize) -> Self {
        self.notification_capacity = capacity;
        self
    }

    /// Set the per-subscriber snapshot channel capacity.
    pub fn with_snapshot_capacity(mut self, capacity: usize) -> Self {
        self.snapshot_capacity = capacity;
        self
    }
}
