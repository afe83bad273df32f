use serde::Deserialize;
use serde_json::Value as JsonValue;

/// Response to an observe (subscribe) call.
///
/// `items` is optional because a remote resource that is not actually
/// observable answers without an item list; the observer treats that as a
/// protocol error and substitutes an empty list.
#[derive(Debug, Clone, Deserialize)]
pub struct ObserveResponse {
    /// Server-assigned observer id.
    pub observer: String,
    /// Initial result set, in server order.
    #[serde(default)]
    pub items: Option<Vec<JsonValue>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_with_items() {
        let resp: ObserveResponse =
            serde_json::from_str(r#"{"observer":"o1","items":[{"id":1},{"id":2}]}"#).unwrap();
        assert_eq!(resp.observer, "o1");
        assert_eq!(resp.items.as_ref().map(Vec::len), Some(2));
    }

    #[test]
    fn test_deserialize_without_items() {
        let resp: ObserveResponse = serde_json::from_str(r#"{"observer":"o2"}"#).unwrap();
        assert!(resp.items.is_none());
    }
}
