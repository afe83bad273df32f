//! Timeout configuration for mirror-link client operations.

use std::time::Duration;

/// Timeout configuration for client operations.
///
/// All values have sensible defaults. A zero duration means "disabled".
///
/// # Examples
///
/// ```rust
/// use mirror_link::MirrorLinkTimeouts;
/// use std::time::Duration;
///
/// let timeouts = MirrorLinkTimeouts::builder()
///     .connection_timeout(Duration::from_secs(30))
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct MirrorLinkTimeouts {
    /// Timeout for establishing the persistent connection (TCP + TLS +
    /// WebSocket handshake). Default: 10 seconds.
    pub connection_timeout: Duration,

    /// Timeout for a single request/response call. Zero disables it, which
    /// preserves the historical behavior where a subscribe call that never
    /// resolves leaves its waiters pending. Default: 0 (disabled).
    pub request_timeout: Duration,

    /// Keep-alive ping interval on the persistent connection.
    /// Zero disables pings. Default: 20 seconds.
    pub keepalive_interval: Duration,

    /// Maximum wait for a Pong (or any frame) after a keepalive Ping before
    /// the connection is treated as dead. Zero disables the check.
    /// Default: 5 seconds.
    pub pong_timeout: Duration,
}

impl Default for MirrorLinkTimeouts {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(10),
            request_timeout: Duration::ZERO,
            keepalive_interval: Duration::from_secs(20),
            pong_timeout: Duration::from_secs(5),
        }
    }
}

impl MirrorLinkTimeouts {
    /// Create a new builder for custom timeout configuration.
    pub fn builder() -> MirrorLinkTimeoutsBuilder {
        MirrorLinkTimeoutsBuilder::new()
    }

    /// Timeouts suited to localhost development and tests.
    pub fn fast() -> Self {
        Self {
            connection_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(5),
            pong_timeout: Duration::from_secs(2),
        }
    }

    /// Check if a duration represents "no timeout".
    pub fn is_no_timeout(duration: Duration) -> bool {
        duration.is_zero()
    }
}

/// Builder for [`MirrorLinkTimeouts`].
#[derive(Debug, Clone)]
pub struct MirrorLinkTimeoutsBuilder {
    timeouts: MirrorLinkTimeouts,
}

impl MirrorLinkTimeoutsBuilder {
    fn new() -> Self {
        Self {
            timeouts: MirrorLinkTimeouts::default(),
        }
    }

    /// Set the connection-establishment timeout.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.connection_timeout = timeout;
        self
    }

    /// Set the per-request timeout. Zero disables it.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.request_timeout = timeout;
        self
    }

    /// Set the keepalive ping interval. Zero disables pings.
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.timeouts.keepalive_interval = interval;
        self
    }

    /// Set the pong timeout. Zero disables the check.
    pub fn pong_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.pong_timeout = timeout;
        self
    }

    /// Build the timeout configuration.
    pub fn build(self) -> MirrorLinkTimeouts {
        self.timeouts
    }
}
