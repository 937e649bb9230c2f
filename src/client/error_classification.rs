//! Error classification logic
//!
//! One pure mapping from an HTTP status plus optional body to a classified error,
//! shared by the buffered path, the streaming path, and the process transport.

use crate::error_code::ErrorKind;
use crate::Error;

/// Upper bound on error body bytes read for a message.
pub const ERROR_BODY_LIMIT: usize = 4 * 1024;

/// Classify a non-2xx response.
///
/// A 2xx status passed here is reported as `unexpected_status`, since callers only
/// classify responses they already decided to reject.
pub fn classify_status(status: u16, body: Option<&str>) -> Error {
    let kind = ErrorKind::from_http_status(status).unwrap_or(ErrorKind::UnexpectedStatus);
    Error::Remote {
        status,
        kind,
        message: error_message(status, body),
    }
}

/// Ollama reports failures as `{"error": "..."}`; anything else is taken verbatim.
fn error_message(status: u16, body: Option<&str>) -> String {
    let body = body.map(str::trim).unwrap_or_default();

    if body.starts_with('{') {
        if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
            if let Some(msg) = json.get("error").and_then(|e| {
                e.as_str()
                    .or_else(|| e.get("message").and_then(|m| m.as_str()))
            }) {
                return msg.to_string();
            }
        }
    }

    if !body.is_empty() {
        return body.to_string();
    }

    reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}", status))
}
