//! Application errors and their JSON wire shape.
//!
//! Handlers and middlewares return [`HttpError`] to pick the response status.
//! Dispatch serialises it as
//!
//! ```text
//! { "code": 404, "message": "User not found", "attrs": { "id": 42 } }
//! ```
//!
//! `attrs` is omitted when empty. Any other error type is answered with a
//! generic `500` body and its text only reaches the log.

use http::StatusCode;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// A structured application error carrying an HTTP status.
#[derive(Clone, Debug, Error, PartialEq, Serialize)]
#[error("({code}) {message}")]
pub struct HttpError {
    pub code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub attrs: Map<String, Value>,
}

impl HttpError {
    /// An empty `message` is replaced by the canonical reason phrase.
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        let mut message = message.into();
        if message.is_empty() {
            message = StatusCode::from_u16(code)
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or_default()
                .to_owned();
        }
        Self { code, message, attrs: Map::new() }
    }

    /// Attach a structured attribute. It is serialised under `attrs` and
    /// merged into the request log record.
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    /// The status to answer with; out-of-range codes degrade to `500`.
    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub(crate) fn to_json(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_else(|_| {
            format!(r#"{{"code":{},"message":"{}"}}"#, self.code, self.status()).into_bytes()
        })
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(400, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(401, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(403, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(404, message)
    }

    pub fn method_not_allowed(message: impl Into<String>) -> Self {
        Self::new(405, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(409, message)
    }

    pub fn gone(message: impl Into<String>) -> Self {
        Self::new(410, message)
    }

    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(422, message)
    }

    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self::new(429, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(500, message)
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(501, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(503, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attrs_are_omitted_when_empty() {
        let body = HttpError::not_found("X").to_json();
        assert_eq!(body, br#"{"code":404,"message":"X"}"#);
    }

    #[test]
    fn attrs_are_serialised_when_present() {
        let err = HttpError::unprocessable("invalid").with_attr("field", "email");
        let json: Value = serde_json::from_slice(&err.to_json()).unwrap();
        assert_eq!(json["code"], 422);
        assert_eq!(json["attrs"]["field"], "email");
    }

    #[test]
    fn empty_message_uses_reason_phrase() {
        assert_eq!(HttpError::new(409, "").message, "Conflict");
    }

    #[test]
    fn bogus_code_maps_to_internal_status() {
        assert_eq!(HttpError::new(1000, "x").status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
