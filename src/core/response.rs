use crate::core::classifier::{classify, RawError};
use crate::domain::ports::RawResponse;
use crate::utils::error::{ClassifiedError, Result};
use serde_json::Value;

/// Turns any upstream response into either its payload or a classified error.
///
/// Success bodies are unwrapped from `data` when present and returned as-is
/// otherwise. Failure bodies may be a JSON object carrying `message`, `error`
/// or `errors`, or plain text; the extracted text is classified together with
/// the status code.
pub fn normalize_response(response: &RawResponse) -> Result<Value> {
    if response.is_success() {
        let trimmed = response.body.trim();
        if trimmed.is_empty() {
            return Ok(Value::Null);
        }
        let value: Value = serde_json::from_str(trimmed).map_err(|e| {
            ClassifiedError::unknown(format!("upstream returned a non-JSON success body: {}", e))
                .with_status(response.status)
        })?;
        return Ok(unwrap_data(value));
    }

    let message = failure_message(&response.body);
    Err(classify(&RawError::http(response.status, message)))
}

fn unwrap_data(value: Value) -> Value {
    match value {
        Value::Object(mut obj) if obj.contains_key("data") => {
            obj.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// 從錯誤回應中取出最有意義的訊息
fn failure_message(body: &str) -> String {
    let trimmed = body.trim();
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => message_from_json(&value).unwrap_or_else(|| trimmed.to_string()),
        Err(_) => trimmed.to_string(),
    }
}

fn message_from_json(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => ["message", "error", "errors", "detail", "data"]
            .iter()
            .filter_map(|key| obj.get(*key))
            .find_map(message_from_json),
        Value::Array(items) => items.iter().find_map(message_from_json),
        _ => None,
    }
}

/// Reads the first present string field among `keys`; numbers are stringified.
pub(crate) fn string_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| value.get(*key))
        .find_map(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}
