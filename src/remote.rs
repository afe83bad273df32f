//! HTTP implementation of the engine's remote calls.

use crate::engine::RemoteCalls;
use crate::error::{MirrorLinkError, Result};
use crate::models::{ObserveResponse, QueryMap};
use crate::transport::Transport;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;

/// Performs observe/unobserve calls over the transport's request path.
pub(crate) struct HttpRemote {
    transport: Arc<Transport>,
    unobserve_path: String,
}

impl HttpRemote {
    pub(crate) fn new(transport: Arc<Transport>, unobserve_path: String) -> Self {
        Self {
            transport,
            unobserve_path,
        }
    }
}

impl RemoteCalls for HttpRemote {
    async fn observe(
        &self,
        path: &str,
        query: &QueryMap,
        session_id: &str,
    ) -> Result<ObserveResponse> {
        let mut params = query.clone();
        params.insert("observe".to_string(), JsonValue::String(session_id.to_string()));
        let body = self.transport.get(path, Some(params)).await?;
        serde_json::from_value(body).map_err(|e| {
            MirrorLinkError::ProtocolError(format!("malformed observe response: {}", e))
        })
    }

    async fn unobserve(&self, observer_id: &str, session_id: &str) -> Result<()> {
        let mut params = QueryMap::new();
        params.insert("observer".to_string(), json!(observer_id));
        params.insert("subscriber".to_string(), json!(session_id));
        self.transport
            .post(&self.unobserve_path, Some(json!({})), Some(params))
            .await?;
        Ok(())
    }
}
