//! Persistent-connection transport.
//!
//! Owns exactly one logical WebSocket connection to the backend and the
//! request/response path against its companion stateless endpoint. Handles:
//!
//! - Automatic reconnection, throttled to a fixed minimum interval so noisy
//!   close/retry cycles do not storm the server
//! - Queuing of request/response calls while disconnected, replayed FIFO,
//!   each exactly once, when the connection opens
//! - Parsing inbound frames into notifications, in arrival order; frames
//!   without a `msg` field (heartbeats) are dropped
//! - Classification of call failures onto the shared fault stream
//! - Keepalive pings with per-connection jitter and pong-timeout detection

use crate::error::{MirrorLinkError, Result};
use crate::events::{DisconnectReason, FaultBus, FaultEvent};
use crate::models::{embedded_error, parse_frame, ConnectionOptions, Notification, QueryMap};
use crate::session::{SharedSession, CSRF_HEADER, SESSION_HEADER};
use crate::timeouts::MirrorLinkTimeouts;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use reqwest::{Method, Url};
use serde_json::Value as JsonValue;
use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant as TokioInstant;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::header::{HeaderName, HeaderValue},
        protocol::Message,
    },
};

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>;

/// Frames larger than this are dropped with a warning.
const MAX_TEXT_FRAME_BYTES: usize = 16 << 20;

/// Capacity of the command channel into the connection task.
const COMMAND_CHANNEL_CAPACITY: usize = 256;

/// Sleep bound that will not overflow `Instant + Duration`.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

/// One outbound call held while the persistent connection is not open.
/// Replayed exactly once, in submission order, when the connection opens.
struct PendingRequest {
    method: Method,
    path: String,
    body: Option<JsonValue>,
    params: Option<QueryMap>,
    reply: oneshot::Sender<Result<JsonValue>>,
}

enum TransportCmd {
    Enqueue(PendingRequest),
    Shutdown,
}

/// Everything the request/response path needs, shared between the public
/// handle and the connection task (which replays queued calls).
struct CallContext {
    http: reqwest::Client,
    base_url: String,
    session: SharedSession,
    faults: FaultBus,
}

/// Handle to the persistent connection and its companion endpoint.
pub struct Transport {
    ctx: Arc<CallContext>,
    cmd_tx: mpsc::Sender<TransportCmd>,
    connected_rx: watch::Receiver<bool>,
}

impl Transport {
    /// Establish the transport: spawns the background connection task and
    /// returns the handle plus the inbound notification stream.
    ///
    /// Establishing is non-blocking — the task dials in the background and
    /// calls issued before the connection opens are queued. Must be called
    /// from within a tokio runtime.
    pub fn connect(
        base_url: &str,
        options: ConnectionOptions,
        timeouts: MirrorLinkTimeouts,
        session: SharedSession,
        faults: FaultBus,
    ) -> Result<(Transport, mpsc::Receiver<Notification>)> {
        let base = Url::parse(base_url.trim()).map_err(|e| {
            MirrorLinkError::ConfigurationError(format!("invalid base_url '{}': {}", base_url, e))
        })?;
        if base.host_str().is_none() {
            return Err(MirrorLinkError::ConfigurationError(
                "base_url must include a host".to_string(),
            ));
        }
        let stream_url = resolve_stream_url(&base, &options)?;
        let base_url = base.to_string().trim_end_matches('/').to_string();

        let mut builder = reqwest::Client::builder();
        if !MirrorLinkTimeouts::is_no_timeout(timeouts.connection_timeout) {
            builder = builder.connect_timeout(timeouts.connection_timeout);
        }
        if !MirrorLinkTimeouts::is_no_timeout(timeouts.request_timeout) {
            builder = builder.timeout(timeouts.request_timeout);
        }
        let http = builder.build().map_err(|e| {
            MirrorLinkError::ConfigurationError(format!("failed to build HTTP client: {}", e))
        })?;

        let ctx = Arc::new(CallContext {
            http,
            base_url,
            session,
            faults,
        });

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (notification_tx, notification_rx) = mpsc::channel(options.notification_capacity);
        let (connected_tx, connected_rx) = watch::channel(false);

        tokio::spawn(connection_task(
            ctx.clone(),
            stream_url,
            options,
            timeouts,
            cmd_rx,
            notification_tx,
            connected_tx,
        ));

        Ok((
            Transport {
                ctx,
                cmd_tx,
                connected_rx,
            },
            notification_rx,
        ))
    }

    /// Whether the persistent connection is currently open.
    pub fn is_connected(&self) -> bool {
        *self.connected_rx.borrow()
    }

    /// Current and subsequent connected/disconnected state.
    pub fn connected_stream(&self) -> watch::Receiver<bool> {
        self.connected_rx.clone()
    }

    /// Subscribe to the shared fault stream.
    pub fn faults(&self) -> broadcast::Receiver<FaultEvent> {
        self.ctx.faults.subscribe()
    }

    /// Perform a request/response call.
    ///
    /// When the persistent connection is open the call executes at once;
    /// otherwise it is queued and replayed, exactly once, after the
    /// connection (re)opens. No automatic retry beyond that replay.
    pub async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<JsonValue>,
        params: Option<QueryMap>,
    ) -> Result<JsonValue> {
        if self.is_connected() {
            return execute_call(&self.ctx, method, path, body.as_ref(), params.as_ref()).await;
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(TransportCmd::Enqueue(PendingRequest {
                method,
                path: path.to_string(),
                body,
                params,
                reply: reply_tx,
            }))
            .await
            .map_err(|_| {
                MirrorLinkError::TransportError("transport is not running".to_string())
            })?;
        reply_rx.await.map_err(|_| {
            MirrorLinkError::TransportError("transport stopped before replying".to_string())
        })?
    }

    pub async fn get(&self, path: &str, params: Option<QueryMap>) -> Result<JsonValue> {
        self.call(Method::GET, path, None, params).await
    }

    pub async fn post(
        &self,
        path: &str,
        body: Option<JsonValue>,
        params: Option<QueryMap>,
    ) -> Result<JsonValue> {
        self.call(Method::POST, path, body, params).await
    }

    pub async fn put(
        &self,
        path: &str,
        body: Option<JsonValue>,
        params: Option<QueryMap>,
    ) -> Result<JsonValue> {
        self.call(Method::PUT, path, body, params).await
    }

    pub async fn patch(
        &self,
        path: &str,
        body: Option<JsonValue>,
        params: Option<QueryMap>,
    ) -> Result<JsonValue> {
        self.call(Method::PATCH, path, body, params).await
    }

    pub async fn delete(&self, path: &str, params: Option<QueryMap>) -> Result<JsonValue> {
        self.call(Method::DELETE, path, None, params).await
    }

    /// Close the persistent connection and stop the background task.
    /// Queued calls are rejected.
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(TransportCmd::Shutdown).await;
    }
}

// ── URL resolution ──────────────────────────────────────────────────────────

/// Resolve the persistent stream URL: an explicit ws(s) override, or the
/// base URL with its scheme switched to ws(s) and the stream path applied.
fn resolve_stream_url(base: &Url, options: &ConnectionOptions) -> Result<String> {
    if let Some(override_url) = &options.stream_url {
        let parsed = Url::parse(override_url.trim()).map_err(|e| {
            MirrorLinkError::ConfigurationError(format!(
                "invalid stream_url '{}': {}",
                override_url, e
            ))
        })?;
        match parsed.scheme() {
            "ws" | "wss" => {},
            other => {
                return Err(MirrorLinkError::ConfigurationError(format!(
                    "stream_url must use ws:// or wss:// (found '{}')",
                    other
                )));
            },
        }
        return Ok(parsed.to_string());
    }

    let scheme = match base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(MirrorLinkError::ConfigurationError(format!(
                "unsupported base_url scheme '{}'; expected http(s) or ws(s)",
                other
            )));
        },
    };

    let mut stream = base.clone();
    stream.set_scheme(scheme).map_err(|_| {
        MirrorLinkError::ConfigurationError("failed to set stream URL scheme".to_string())
    })?;
    stream.set_path(&options.stream_path);
    stream.set_query(None);
    stream.set_fragment(None);
    Ok(stream.to_string())
}

// ── Request execution and classification ────────────────────────────────────

/// Query values are sent as their raw string form; everything else is
/// JSON-encoded.
fn query_pairs(params: &QueryMap) -> Vec<(String, String)> {
    params
        .iter()
        .map(|(key, value)| {
            let rendered = match value {
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), rendered)
        })
        .collect()
}

/// Classify a non-success status. The bool says whether the failure belongs
/// on the shared fault stream: 5xx and 413 do, other 4xx stay on the
/// caller's `Result` only.
fn classify_failure(status_code: u16, message: String) -> (MirrorLinkError, bool) {
    if status_code >= 500 {
        (
            MirrorLinkError::ServerError { status_code, message },
            true,
        )
    } else if status_code == 413 {
        (
            MirrorLinkError::RequestError { status_code, message },
            true,
        )
    } else {
        (
            MirrorLinkError::RequestError { status_code, message },
            false,
        )
    }
}

async fn execute_call(
    ctx: &CallContext,
    method: Method,
    path: &str,
    body: Option<&JsonValue>,
    params: Option<&QueryMap>,
) -> Result<JsonValue> {
    let url = if path.starts_with('/') {
        format!("{}{}", ctx.base_url, path)
    } else {
        format!("{}/{}", ctx.base_url, path)
    };

    let mutating = method != Method::GET;
    let mut builder = ctx.http.request(method, url.as_str());
    if let Some(params) = params {
        builder = builder.query(&query_pairs(params));
    }
    if let Some(body) = body {
        builder = builder.json(body);
    }

    {
        let session = ctx.session.read().unwrap_or_else(|e| e.into_inner());
        builder = builder.header(SESSION_HEADER, session.session_id());
        if mutating {
            if let Some(token) = session.csrf_token() {
                builder = builder.header(CSRF_HEADER, token);
            }
        }
    }

    log::debug!("[mirror-link] {}", url);
    let response = builder.send().await?;
    let status_code = response.status().as_u16();

    if !response.status().is_success() {
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        let (error, surface) = classify_failure(status_code, message);
        if surface {
            ctx.faults.report(FaultEvent::from_error(&error));
        }
        return Err(error);
    }

    let text = response.text().await?;
    let value: JsonValue = if text.trim().is_empty() {
        JsonValue::Null
    } else {
        match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(e) => {
                let error =
                    MirrorLinkError::ProtocolError(format!("unparsable response body: {}", e));
                ctx.faults.report(FaultEvent::from_error(&error));
                return Err(error);
            },
        }
    };

    // A structured error payload on an otherwise-successful response is a
    // request error.
    if let Some(detail) = embedded_error(&value) {
        let error = MirrorLinkError::RequestError {
            status_code,
            message: detail.message,
        };
        ctx.faults.report(FaultEvent::from_error(&error));
        return Err(error);
    }

    Ok(value)
}

/// Replay the queue FIFO, one call at a time, resolving each caller exactly
/// once.
async fn flush_pending(ctx: &Arc<CallContext>, pending: &mut VecDeque<PendingRequest>) {
    if pending.is_empty() {
        return;
    }
    log::info!(
        "[mirror-link] replaying {} queued request(s)",
        pending.len()
    );
    while let Some(request) = pending.pop_front() {
        let result = execute_call(
            ctx,
            request.method,
            &request.path,
            request.body.as_ref(),
            request.params.as_ref(),
        )
        .await;
        let _ = request.reply.send(result);
    }
}

// ── Persistent connection ───────────────────────────────────────────────────

/// Spread keepalive pings across connections to avoid synchronized bursts.
/// Deterministic per seed, so a reconnecting client keeps its phase.
fn jitter_keepalive_interval(base: Duration, seed: &str) -> Duration {
    let base_ms = base.as_millis() as u64;
    if base_ms <= 1 {
        return base;
    }

    // +/-20% window.
    let jitter_span = (base_ms / 5).max(1);
    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    let hashed = hasher.finish();

    let offset = (hashed % (2 * jitter_span + 1)) as i64 - jitter_span as i64;
    let jittered_ms = if offset >= 0 {
        base_ms.saturating_add(offset as u64)
    } else {
        base_ms.saturating_sub((-offset) as u64).max(1)
    };
    Duration::from_millis(jittered_ms)
}

/// Dial the stream endpoint and complete the WebSocket handshake, carrying
/// the session header.
async fn establish_stream(
    ctx: &CallContext,
    stream_url: &str,
    timeouts: &MirrorLinkTimeouts,
) -> Result<WsStream> {
    let mut request = stream_url.into_client_request().map_err(|e| {
        MirrorLinkError::TransportError(format!("failed to build stream request: {}", e))
    })?;

    let session_id = {
        let session = ctx.session.read().unwrap_or_else(|e| e.into_inner());
        session.session_id().to_string()
    };
    let header = HeaderValue::from_str(&session_id).map_err(|e| {
        MirrorLinkError::ConfigurationError(format!("session id is not header-safe: {}", e))
    })?;
    request
        .headers_mut()
        .insert(HeaderName::from_static(SESSION_HEADER), header);

    let connecting = connect_async(request);
    let result = if !MirrorLinkTimeouts::is_no_timeout(timeouts.connection_timeout) {
        tokio::time::timeout(timeouts.connection_timeout, connecting).await
    } else {
        Ok(connecting.await)
    };

    match result {
        Ok(Ok((stream, _response))) => Ok(stream),
        Ok(Err(e)) => Err(MirrorLinkError::TransportError(format!(
            "connection failed: {}",
            e
        ))),
        Err(_) => Err(MirrorLinkError::TimeoutError(format!(
            "connection timeout ({:?})",
            timeouts.connection_timeout
        ))),
    }
}

/// The background task owning the persistent connection.
///
/// Lifecycle:
/// 1. Dial the stream endpoint
/// 2. Event loop: frames + commands + keepalive + pong deadline
/// 3. On close: surface a transport fault with the close code, flip the
///    connected state, and schedule a throttled reconnect
/// 4. On (re)open: flush the pending-call queue FIFO and signal connected
async fn connection_task(
    ctx: Arc<CallContext>,
    stream_url: String,
    options: ConnectionOptions,
    timeouts: MirrorLinkTimeouts,
    mut cmd_rx: mpsc::Receiver<TransportCmd>,
    notification_tx: mpsc::Sender<Notification>,
    connected_tx: watch::Sender<bool>,
) {
    let mut pending: VecDeque<PendingRequest> = VecDeque::new();
    let mut stream: Option<WsStream> = None;
    let mut shutdown = false;

    let reconnect_interval = Duration::from_millis(options.reconnect_interval_ms);
    let mut last_attempt: Option<TokioInstant> = None;

    let has_keepalive = !timeouts.keepalive_interval.is_zero();
    let keepalive_dur = if has_keepalive {
        jitter_keepalive_interval(timeouts.keepalive_interval, &stream_url)
    } else {
        FAR_FUTURE
    };
    let mut idle_deadline = TokioInstant::now() + keepalive_dur;

    let has_pong_timeout = has_keepalive && !timeouts.pong_timeout.is_zero();
    let mut awaiting_pong = false;
    let mut pong_deadline = TokioInstant::now() + FAR_FUTURE;

    loop {
        if shutdown {
            if let Some(mut ws) = stream.take() {
                let _ = ws.close(None).await;
            }
            let was_connected = *connected_tx.borrow();
            let _ = connected_tx.send(false);
            if was_connected {
                ctx.faults
                    .disconnected(DisconnectReason::new("client disconnected"));
            }
            for request in pending.drain(..) {
                let _ = request.reply.send(Err(MirrorLinkError::TransportError(
                    "transport shut down".to_string(),
                )));
            }
            return;
        }

        if let Some(ref mut ws) = stream {
            let idle_sleep = tokio::time::sleep_until(idle_deadline);
            tokio::pin!(idle_sleep);
            let pong_sleep = tokio::time::sleep_until(pong_deadline);
            tokio::pin!(pong_sleep);

            tokio::select! {
                biased;

                // No frame arrived since our Ping: the connection is dead.
                _ = &mut pong_sleep, if has_pong_timeout && awaiting_pong => {
                    let reason = format!(
                        "pong timeout ({:?}), peer unresponsive",
                        timeouts.pong_timeout
                    );
                    ctx.faults.report(FaultEvent::transport(reason.clone(), None));
                    ctx.faults.disconnected(DisconnectReason::new(reason));
                    let _ = connected_tx.send(false);
                    awaiting_pong = false;
                    stream = None;
                    continue;
                }

                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(TransportCmd::Enqueue(request)) => {
                            // Raced a reconnect: the caller saw a closed
                            // connection that has since opened. Run the
                            // queue now to preserve submission order.
                            pending.push_back(request);
                            flush_pending(&ctx, &mut pending).await;
                        },
                        Some(TransportCmd::Shutdown) | None => {
                            shutdown = true;
                        },
                    }
                }

                _ = &mut idle_sleep, if has_keepalive && !awaiting_pong => {
                    if let Err(e) = ws.send(Message::Ping(Bytes::new())).await {
                        let reason = format!("keepalive ping failed: {}", e);
                        ctx.faults.report(FaultEvent::transport(reason.clone(), None));
                        ctx.faults.disconnected(DisconnectReason::new(reason));
                        let _ = connected_tx.send(false);
                        awaiting_pong = false;
                        stream = None;
                        continue;
                    }
                    if has_pong_timeout {
                        awaiting_pong = true;
                        pong_deadline = TokioInstant::now() + timeouts.pong_timeout;
                    }
                    idle_deadline = TokioInstant::now() + keepalive_dur;
                }

                frame = ws.next() => {
                    // Any frame proves the connection is alive.
                    idle_deadline = TokioInstant::now() + keepalive_dur;
                    if awaiting_pong {
                        awaiting_pong = false;
                        pong_deadline = TokioInstant::now() + FAR_FUTURE;
                    }

                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            if text.len() > MAX_TEXT_FRAME_BYTES {
                                log::warn!(
                                    "[mirror-link] dropping oversized frame ({} bytes)",
                                    text.len()
                                );
                                continue;
                            }
                            match parse_frame(&text) {
                                Ok(Some(notification)) => {
                                    if notification_tx.send(notification).await.is_err() {
                                        log::warn!("[mirror-link] notification consumer gone");
                                    }
                                },
                                Ok(None) => {}, // heartbeat or unrelated frame
                                Err(e) => ctx.faults.report(FaultEvent::from_error(&e)),
                            }
                        },
                        Some(Ok(Message::Binary(_))) => {
                            log::debug!("[mirror-link] ignoring binary frame");
                        },
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = ws.send(Message::Pong(payload)).await;
                        },
                        Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {},
                        Some(Ok(Message::Close(frame))) => {
                            let (message, code) = match frame {
                                Some(f) => (f.reason.to_string(), Some(u16::from(f.code))),
                                None => ("server closed connection".to_string(), None),
                            };
                            ctx.faults.report(FaultEvent::transport(
                                format!("connection closed: {}", message),
                                code,
                            ));
                            let reason = match code {
                                Some(code) => DisconnectReason::with_code(message, code),
                                None => DisconnectReason::new(message),
                            };
                            ctx.faults.disconnected(reason);
                            let _ = connected_tx.send(false);
                            stream = None;
                            continue;
                        },
                        Some(Err(e)) => {
                            let message = format!("stream error: {}", e);
                            ctx.faults.report(FaultEvent::transport(message.clone(), None));
                            ctx.faults.disconnected(DisconnectReason::new(message));
                            let _ = connected_tx.send(false);
                            stream = None;
                            continue;
                        },
                        None => {
                            ctx.faults.report(FaultEvent::transport(
                                "stream ended".to_string(),
                                None,
                            ));
                            ctx.faults.disconnected(DisconnectReason::new("stream ended"));
                            let _ = connected_tx.send(false);
                            stream = None;
                            continue;
                        },
                    }
                }
            }
        } else {
            // ── Disconnected ──

            // The initial dial always happens; auto_reconnect only gates
            // redials after a failed attempt or a lost connection.
            if !options.auto_reconnect && last_attempt.is_some() {
                for request in pending.drain(..) {
                    let _ = request.reply.send(Err(MirrorLinkError::TransportError(
                        "not connected and auto-reconnect is disabled".to_string(),
                    )));
                }
                match cmd_rx.recv().await {
                    Some(TransportCmd::Enqueue(request)) => {
                        let _ = request.reply.send(Err(MirrorLinkError::TransportError(
                            "not connected and auto-reconnect is disabled".to_string(),
                        )));
                    },
                    Some(TransportCmd::Shutdown) | None => {
                        shutdown = true;
                    },
                }
                continue;
            }

            // Throttle: keep a fixed minimum interval between attempts,
            // queueing calls that arrive while we wait.
            if let Some(last) = last_attempt {
                let wait_until = last + reconnect_interval;
                loop {
                    tokio::select! {
                        biased;
                        cmd = cmd_rx.recv() => {
                            match cmd {
                                Some(TransportCmd::Enqueue(request)) => {
                                    pending.push_back(request);
                                },
                                Some(TransportCmd::Shutdown) | None => {
                                    shutdown = true;
                                    break;
                                },
                            }
                        }
                        _ = tokio::time::sleep_until(wait_until) => break,
                    }
                }
                if shutdown {
                    continue;
                }
            }

            last_attempt = Some(TokioInstant::now());
            match establish_stream(&ctx, &stream_url, &timeouts).await {
                Ok(ws) => {
                    log::info!("[mirror-link] connected to {}", stream_url);
                    stream = Some(ws);
                    let _ = connected_tx.send(true);
                    ctx.faults.connected();
                    flush_pending(&ctx, &mut pending).await;
                    idle_deadline = TokioInstant::now() + keepalive_dur;
                    awaiting_pong = false;
                    pong_deadline = TokioInstant::now() + FAR_FUTURE;
                },
                Err(e) => {
                    log::warn!("[mirror-link] connect attempt failed: {}", e);
                    ctx.faults
                        .report(FaultEvent::transport(format!("connect failed: {}", e), None));
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options() -> ConnectionOptions {
        ConnectionOptions::default()
    }

    #[test]
    fn test_stream_url_scheme_mapping() {
        let base = Url::parse("http://localhost:3000").unwrap();
        assert_eq!(
            resolve_stream_url(&base, &options()).unwrap(),
            "ws://localhost:3000/api/stream"
        );

        let base = Url::parse("https://api.example.com").unwrap();
        assert_eq!(
            resolve_stream_url(&base, &options()).unwrap(),
            "wss://api.example.com/api/stream"
        );
    }

    #[test]
    fn test_stream_url_override_wins() {
        let base = Url::parse("http://localhost:3000").unwrap();
        let options = options().with_stream_url("ws://other:9000/live");
        assert_eq!(
            resolve_stream_url(&base, &options).unwrap(),
            "ws://other:9000/live"
        );
    }

    #[test]
    fn test_stream_url_override_rejects_http_scheme() {
        let base = Url::parse("http://localhost:3000").unwrap();
        let options = options().with_stream_url("http://other:9000/live");
        assert!(resolve_stream_url(&base, &options).is_err());
    }

    #[test]
    fn test_stream_url_custom_path() {
        let base = Url::parse("http://localhost:3000").unwrap();
        let options = options().with_stream_path("/events");
        assert_eq!(
            resolve_stream_url(&base, &options).unwrap(),
            "ws://localhost:3000/events"
        );
    }

    #[test]
    fn test_classify_5xx_as_server_error_on_fault_stream() {
        let (error, surface) = classify_failure(502, "bad gateway".to_string());
        assert!(matches!(error, MirrorLinkError::ServerError { status_code: 502, .. }));
        assert!(surface);
    }

    #[test]
    fn test_classify_413_as_surfaced_request_error() {
        let (error, surface) = classify_failure(413, "too large".to_string());
        assert!(matches!(error, MirrorLinkError::RequestError { status_code: 413, .. }));
        assert!(surface);
    }

    #[test]
    fn test_classify_other_4xx_stays_on_result_path() {
        let (error, surface) = classify_failure(404, "missing".to_string());
        assert!(matches!(error, MirrorLinkError::RequestError { status_code: 404, .. }));
        assert!(!surface);
    }

    #[test]
    fn test_query_pairs_render_strings_raw() {
        let mut params = QueryMap::new();
        params.insert("slug".to_string(), json!("x"));
        params.insert("limit".to_string(), json!(10));
        params.insert("nested".to_string(), json!({"a": 1}));

        let pairs = query_pairs(&params);
        assert!(pairs.contains(&("slug".to_string(), "x".to_string())));
        assert!(pairs.contains(&("limit".to_string(), "10".to_string())));
        assert!(pairs.contains(&("nested".to_string(), "{\"a\":1}".to_string())));
    }

    #[test]
    fn test_keepalive_jitter_is_deterministic_and_bounded() {
        let base = Duration::from_secs(20);
        let a = jitter_keepalive_interval(base, "ws://host/api/stream");
        let b = jitter_keepalive_interval(base, "ws://host/api/stream");
        assert_eq!(a, b, "jitter must be stable for the same endpoint");
        assert!(a >= Duration::from_secs(16) && a <= Duration::from_secs(24));
    }
}
