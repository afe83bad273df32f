//! Connection lifecycle callbacks and the shared fault stream.
//!
//! Faults are observational: the transport keeps healing itself (reconnect,
//! queued calls), so failures are pushed onto a broadcast stream and into the
//! optional [`EventHandlers`] callbacks instead of being thrown at whoever
//! happens to be mid-call. Request/response callers additionally receive the
//! failure through their own `Result`.

use crate::error::MirrorLinkError;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Capacity of the broadcast fault stream. Slow subscribers lag rather than
/// block the connection task.
const FAULT_STREAM_CAPACITY: usize = 64;

/// Classification of an observed fault, mirroring the error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Connection-level: abnormal close, failed connect attempt.
    Transport,
    /// Rejected request: 413, structured error payload on a 2xx.
    Request,
    /// 5xx response.
    Server,
    /// Malformed or unexpected wire data.
    Protocol,
}

/// One observational fault pushed onto the shared stream.
#[derive(Debug, Clone)]
pub struct FaultEvent {
    pub kind: FaultKind,
    pub message: String,
    /// HTTP status or WebSocket close code, when one applies.
    pub code: Option<u16>,
}

impl FaultEvent {
    pub fn transport(message: impl Into<String>, code: Option<u16>) -> Self {
        Self { kind: FaultKind::Transport, message: message.into(), code }
    }

    pub fn request(message: impl Into<String>, code: Option<u16>) -> Self {
        Self { kind: FaultKind::Request, message: message.into(), code }
    }

    pub fn server(message: impl Into<String>, code: Option<u16>) -> Self {
        Self { kind: FaultKind::Server, message: message.into(), code }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self { kind: FaultKind::Protocol, message: message.into(), code: None }
    }

    /// Classify an error for the fault stream.
    pub fn from_error(error: &MirrorLinkError) -> Self {
        match error {
            MirrorLinkError::ServerError { status_code, message } => {
                Self::server(message.clone(), Some(*status_code))
            },
            MirrorLinkError::RequestError { status_code, message } => {
                Self::request(message.clone(), Some(*status_code))
            },
            MirrorLinkError::ProtocolError(m) => Self::protocol(m.clone()),
            other => Self::transport(other.to_string(), None),
        }
    }
}

impl fmt::Display for FaultEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{:?}: {} (code: {})", self.kind, self.message, code),
            None => write!(f, "{:?}: {}", self.kind, self.message),
        }
    }
}

/// Reason for a disconnect callback.
#[derive(Debug, Clone)]
pub struct DisconnectReason {
    /// Human-readable description of why the connection closed.
    pub message: String,
    /// WebSocket close code, if available (e.g. 1000 = normal, 1006 = abnormal).
    pub code: Option<u16>,
}

impl DisconnectReason {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), code: None }
    }

    pub fn with_code(message: impl Into<String>, code: u16) -> Self {
        Self { message: message.into(), code: Some(code) }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = self.code {
            write!(f, "{} (code: {})", self.message, code)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

/// Type alias for the on_connect callback.
pub type OnConnectCallback = Arc<dyn Fn() + Send + Sync>;

/// Type alias for the on_disconnect callback.
pub type OnDisconnectCallback = Arc<dyn Fn(DisconnectReason) + Send + Sync>;

/// Type alias for the on_fault callback.
pub type OnFaultCallback = Arc<dyn Fn(FaultEvent) + Send + Sync>;

/// Optional connection lifecycle callbacks.
///
/// All handlers are optional; register only the ones you need. Handlers are
/// `Send + Sync` so they work from the background connection task.
#[derive(Clone, Default)]
pub struct EventHandlers {
    pub(crate) on_connect: Option<OnConnectCallback>,
    pub(crate) on_disconnect: Option<OnDisconnectCallback>,
    pub(crate) on_fault: Option<OnFaultCallback>,
}

impl fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlers")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_fault", &self.on_fault.is_some())
            .finish()
    }
}

impl EventHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback invoked when the persistent connection opens.
    pub fn on_connect(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(f));
        self
    }

    /// Register a callback invoked when the persistent connection closes.
    pub fn on_disconnect(mut self, f: impl Fn(DisconnectReason) + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Arc::new(f));
        self
    }

    /// Register a callback invoked for every fault pushed onto the stream.
    pub fn on_fault(mut self, f: impl Fn(FaultEvent) + Send + Sync + 'static) -> Self {
        self.on_fault = Some(Arc::new(f));
        self
    }
}

/// Shared sink for faults and lifecycle events.
///
/// Cloned into the transport task and the sync engine; both report through
/// it so subscribers see one merged stream for the whole connection.
#[derive(Clone)]
pub struct FaultBus {
    tx: broadcast::Sender<FaultEvent>,
    handlers: EventHandlers,
}

impl FaultBus {
    pub fn new(handlers: EventHandlers) -> Self {
        let (tx, _) = broadcast::channel(FAULT_STREAM_CAPACITY);
        Self { tx, handlers }
    }

    /// Subscribe to the fault stream.
    pub fn subscribe(&self) -> broadcast::Receiver<FaultEvent> {
        self.tx.subscribe()
    }

    /// Push a fault onto the stream and into the on_fault callback.
    pub fn report(&self, fault: FaultEvent) {
        log::warn!("[mirror-link] {}", fault);
        if let Some(cb) = &self.handlers.on_fault {
            cb(fault.clone());
        }
        // No subscribers is fine; the stream is observational.
        let _ = self.tx.send(fault);
    }

    pub fn connected(&self) {
        if let Some(cb) = &self.handlers.on_connect {
            cb();
        }
    }

    pub fn disconnected(&self, reason: DisconnectReason) {
        if let Some(cb) = &self.handlers.on_disconnect {
            cb(reason);
        }
    }
}

impl fmt::Debug for FaultBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultBus")
            .field("handlers", &self.handlers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_from_error_maps_server_errors() {
        let err = MirrorLinkError::ServerError {
            status_code: 500,
            message: "boom".to_string(),
        };
        let fault = FaultEvent::from_error(&err);
        assert_eq!(fault.kind, FaultKind::Server);
        assert_eq!(fault.code, Some(500));
    }

    #[test]
    fn test_from_error_maps_protocol_errors() {
        let fault =
            FaultEvent::from_error(&MirrorLinkError::ProtocolError("bad frame".to_string()));
        assert_eq!(fault.kind, FaultKind::Protocol);
        assert!(fault.code.is_none());
    }

    #[tokio::test]
    async fn test_report_reaches_stream_and_callback() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_cb = hits.clone();
        let bus = FaultBus::new(EventHandlers::new().on_fault(move |_| {
            hits_cb.fetch_add(1, Ordering::SeqCst);
        }));
        let mut rx = bus.subscribe();

        bus.report(FaultEvent::protocol("unexpected kind"));

        let fault = rx.recv().await.expect("fault should be broadcast");
        assert_eq!(fault.kind, FaultKind::Protocol);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_report_without_subscribers_does_not_panic() {
        let bus = FaultBus::new(EventHandlers::new());
        bus.report(FaultEvent::transport("closed", Some(1006)));
    }
}
