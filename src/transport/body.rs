use serde_json::Value;

use crate::error::{ClientError, REQUEST_ERROR_MESSAGE};

pub fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

/// Decode a raw HTTP body: JSON when it parses, the raw text otherwise.
/// An empty body decodes to `null`.
pub fn decode_bytes(bytes: &[u8]) -> Value {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

/// Opportunistically parse a string-encoded JSON body. Anything that is not
/// a string, or a string that does not parse, passes through unchanged.
pub fn normalize(value: Value) -> Value {
    match value {
        Value::String(text) => match serde_json::from_str::<Value>(&text) {
            Ok(parsed) => parsed,
            Err(_) => Value::String(text),
        },
        other => other,
    }
}

/// Message for a failed response: the body's `detail` if it is a string,
/// otherwise the generic request error.
pub fn failure_message(body: &Value) -> String {
    body.get("detail")
        .and_then(Value::as_str)
        .filter(|d| !d.is_empty())
        .unwrap_or(REQUEST_ERROR_MESSAGE)
        .to_string()
}

/// Classify a decoded response by status code. Shared by both transports so
/// the [200, 300) rule holds identically across them.
pub fn classify(status: u16, body: Value) -> Result<Value, ClientError> {
    if is_success(status) {
        Ok(body)
    } else {
        Err(ClientError::Status {
            status,
            message: failure_message(&body),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_range_is_half_open() {
        assert!(!is_success(199));
        assert!(is_success(200));
        assert!(is_success(204));
        assert!(is_success(299));
        assert!(!is_success(300));
        assert!(!is_success(404));
    }

    #[test]
    fn normalize_parses_json_strings() {
        let v = normalize(Value::String(r#"{"task_id":"t1"}"#.to_string()));
        assert_eq!(v, json!({"task_id": "t1"}));
    }

    #[test]
    fn normalize_passes_through_unparseable_strings() {
        let v = normalize(Value::String("<html>gateway</html>".to_string()));
        assert_eq!(v, Value::String("<html>gateway</html>".to_string()));
    }

    #[test]
    fn normalize_leaves_objects_alone() {
        let v = normalize(json!({"status": "pending"}));
        assert_eq!(v, json!({"status": "pending"}));
    }

    #[test]
    fn decode_bytes_handles_text_and_empty() {
        assert_eq!(decode_bytes(b"{\"a\":1}"), json!({"a": 1}));
        assert_eq!(decode_bytes(b"plain"), Value::String("plain".to_string()));
        assert_eq!(decode_bytes(b""), Value::Null);
    }

    #[test]
    fn failure_message_prefers_detail() {
        assert_eq!(failure_message(&json!({"detail": "token expired"})), "token expired");
        assert_eq!(failure_message(&json!({"detail": ["x"]})), "request error");
        assert_eq!(failure_message(&json!("boom")), "request error");
        assert_eq!(failure_message(&Value::Null), "request error");
    }

    #[test]
    fn classify_carries_status_and_body() {
        let err = classify(422, json!({"detail": "bad payload"})).unwrap_err();
        match err {
            ClientError::Status { status, message, body } => {
                assert_eq!(status, 422);
                assert_eq!(message, "bad payload");
                assert_eq!(body["detail"], "bad payload");
            }
            other => panic!("expected Status, got {other:?}"),
        }
    }
}
