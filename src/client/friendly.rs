use serde_json::Value;

use super::transport::TransportError;

pub const DEFAULT_ERROR_MESSAGE: &str =
    "Something went wrong while contacting the assistant. Please try again.";

/// Turn a raw error body or message into text fit for a chat bubble.
///
/// A JSON object is mined for `message` (then `error`, then `error.message`)
/// and `retryAfter`; when `retryAfter` is present its value is always shown.
/// Anything else is returned trimmed, or a generic message when blank.
#[must_use]
pub fn friendly_error(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Ok(Value::Object(body)) = serde_json::from_str::<Value>(trimmed) {
        let message = non_empty_str(body.get("message"))
            .or_else(|| non_empty_str(body.get("error")))
            .or_else(|| non_empty_str(body.get("error").and_then(|error| error.get("message"))));
        let retry_after = body.get("retryAfter").and_then(retry_after_secs);
        match (message, retry_after) {
            (Some(message), Some(secs)) => {
                return format!("{message} Please try again in {secs} seconds.");
            }
            (None, Some(secs)) => {
                return format!("Too many requests. Please try again in {secs} seconds.");
            }
            (Some(message), None) => return message.to_string(),
            (None, None) => {}
        }
    }
    if trimmed.is_empty() {
        DEFAULT_ERROR_MESSAGE.to_string()
    } else {
        trimmed.to_string()
    }
}

#[must_use]
pub fn friendly_transport_error(err: &TransportError) -> String {
    match err {
        TransportError::Http { status, body } if body.trim().is_empty() => {
            format!("Request failed with status {status}.")
        }
        TransportError::Http { body, .. } => friendly_error(body),
        TransportError::Network(message) => friendly_error(message),
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
}

fn retry_after_secs(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64().or_else(|| {
            number
                .as_f64()
                .filter(|secs| secs.is_finite() && *secs >= 0.0)
                .map(|secs| secs.ceil() as u64)
        }),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}
