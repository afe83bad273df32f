use serde::Deserialize;
use serde_json::Value as JsonValue;

/// Structured error payload embedded in an otherwise-successful response.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
}

/// Extract an embedded error payload from a 2xx response body, if present.
///
/// Accepts `{"error": {"message": ...}}` and `{"error": "..."}` shapes.
pub fn embedded_error(body: &JsonValue) -> Option<ErrorDetail> {
    match body.get("error")? {
        JsonValue::String(message) => Some(ErrorDetail {
            code: None,
            message: message.clone(),
        }),
        detail @ JsonValue::Object(_) => serde_json::from_value(detail.clone()).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_object_error_payload() {
        let body = json!({"error": {"code": "E42", "message": "bad slug"}});
        let detail = embedded_error(&body).expect("payload present");
        assert_eq!(detail.code.as_deref(), Some("E42"));
        assert_eq!(detail.message, "bad slug");
    }

    #[test]
    fn test_string_error_payload() {
        let body = json!({"error": "nope"});
        assert_eq!(embedded_error(&body).unwrap().message, "nope");
    }

    #[test]
    fn test_clean_body_has_no_error() {
        assert!(embedded_error(&json!({"results": []})).is_none());
    }
}
