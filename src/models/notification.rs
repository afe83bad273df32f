use crate::error::{MirrorLinkError, Result};
use serde::Deserialize;
use serde_json::Value as JsonValue;

/// Kind of point-mutation carried by a notification frame.
///
/// Unknown kinds are preserved so the observer can report them as protocol
/// errors instead of the parser dropping the frame silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Added,
    Changed,
    Removed,
    #[serde(other)]
    Unknown,
}

/// One point-mutation message delivered over the persistent connection.
///
/// `order` is the item's zero-based position in the post-mutation list as
/// known to the server. `primary_key` names the field whose value identifies
/// the item; the value itself is read out of `item`.
#[derive(Debug, Clone, Deserialize)]
pub struct Notification {
    #[serde(rename = "msg")]
    pub kind: NotificationKind,
    pub observer: String,
    pub primary_key: String,
    #[serde(default)]
    pub order: usize,
    #[serde(default)]
    pub item: JsonValue,
}

impl Notification {
    /// The primary-key value of the carried item, when present.
    pub fn key_value(&self) -> Option<&JsonValue> {
        self.item.get(&self.primary_key)
    }
}

/// Parse one inbound frame.
///
/// Returns `Ok(None)` for frames without a `msg` field (heartbeats and other
/// unrelated traffic). A frame that has `msg` but does not deserialize is a
/// protocol error.
pub fn parse_frame(text: &str) -> Result<Option<Notification>> {
    let value: JsonValue = serde_json::from_str(text)
        .map_err(|e| MirrorLinkError::ProtocolError(format!("unparsable frame: {}", e)))?;
    if value.get("msg").is_none() {
        return Ok(None);
    }
    let notification: Notification = serde_json::from_value(value)
        .map_err(|e| MirrorLinkError::ProtocolError(format!("malformed notification: {}", e)))?;
    Ok(Some(notification))
}
