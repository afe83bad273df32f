//! Client session identity and request headers.
//!
//! Every call carries the session header; mutating calls additionally carry
//! the CSRF header when a token has been supplied. The same session id is
//! what the server uses as the `subscriber` identity for observe/unobserve
//! calls, so the context is shared (behind a lock) between the HTTP path,
//! the persistent connection, and the sync engine.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

/// Header naming the client session on every request.
pub const SESSION_HEADER: &str = "x-mirror-session";

/// Header carrying the CSRF token on mutating requests.
pub const CSRF_HEADER: &str = "x-csrf-token";

/// Session identity shared across the client.
#[derive(Debug, Clone)]
pub struct SessionContext {
    session_id: String,
    csrf_token: Option<String>,
}

impl SessionContext {
    /// Create a context with a fresh, unique session id.
    pub fn new() -> Self {
        // Counter disambiguates ids minted within one clock tick.
        static SEQ: AtomicU64 = AtomicU64::new(0);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let seq = SEQ.fetch_add(1, Ordering::Relaxed);
        Self {
            session_id: format!("sess_{}_{}", nanos, seq),
            csrf_token: None,
        }
    }

    /// Set the CSRF token attached to mutating calls.
    pub fn with_csrf_token(mut self, token: impl Into<String>) -> Self {
        self.csrf_token = Some(token.into());
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn csrf_token(&self) -> Option<&str> {
        self.csrf_token.as_deref()
    }

    /// Replace the CSRF token, e.g. after login/logout. Callers typically
    /// follow this with a session-wide reinitialization.
    pub fn set_csrf_token(&mut self, token: Option<String>) {
        self.csrf_token = token;
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Session context shared between the client handle and background tasks.
pub type SharedSession = Arc<RwLock<SessionContext>>;
