use serde_json::Value as JsonValue;

/// Unwrap a possibly-paginated response body into a plain item list.
///
/// A `{"results": [...]}` envelope yields its results; a bare array is
/// returned as-is; any other body becomes a single-item list.
pub fn unwrap_results(body: JsonValue) -> Vec<JsonValue> {
    match body {
        JsonValue::Object(mut map) => match map.remove("results") {
            Some(JsonValue::Array(results)) => results,
            Some(other) => vec![other],
            None => vec![JsonValue::Object(map)],
        },
        JsonValue::Array(items) => items,
        other => vec![other],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unwraps_results_envelope() {
        let body = json!({"results": [{"id": 1}, {"id": 2}], "count": 2});
        assert_eq!(unwrap_results(body), vec![json!({"id": 1}), json!({"id": 2})]);
    }

    #[test]
    fn test_bare_array_passes_through() {
        let body = json!([{"id": 3}]);
        assert_eq!(unwrap_results(body), vec![json!({"id": 3})]);
    }

    #[test]
    fn test_single_object_becomes_one_item() {
        let body = json!({"id": 4});
        assert_eq!(unwrap_results(body), vec![json!({"id": 4})]);
    }
}
