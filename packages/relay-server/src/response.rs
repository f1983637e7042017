//! HTTP-shaped handler responses and error-to-status mapping.

use std::collections::BTreeMap;

use http::StatusCode;
use relay_core::StatusError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const CONTENT_TYPE_JSON: &str = "application/json; charset=utf-8";
const CONTENT_TYPE_TEXT: &str = "text/plain; charset=utf-8";

/// Response envelope returned to the HTTP proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpResponse {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
    #[serde(default)]
    pub is_base64_encoded: bool,
}

impl HttpResponse {
    fn with(status: StatusCode, content_type: &str, body: String) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("Access-Control-Allow-Origin".to_string(), "*".to_string());
        headers.insert(
            "Access-Control-Allow-Credentials".to_string(),
            "true".to_string(),
        );
        headers.insert("Content-Type".to_string(), content_type.to_string());
        Self {
            status_code: status.as_u16(),
            headers,
            body,
            is_base64_encoded: false,
        }
    }

    /// 200 with `value` as body. Strings are sent as-is, everything else as
    /// JSON.
    #[must_use]
    pub fn ok(value: &Value) -> Self {
        match value {
            Value::String(text) => Self::with(StatusCode::OK, CONTENT_TYPE_TEXT, text.clone()),
            other => Self::with(StatusCode::OK, CONTENT_TYPE_JSON, other.to_string()),
        }
    }

    #[must_use]
    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        Self::with(status, CONTENT_TYPE_TEXT, body.into())
    }

    #[must_use]
    pub fn redirect(status: StatusCode, location: &str) -> Self {
        let mut response = Self::with(status, CONTENT_TYPE_TEXT, String::new());
        response
            .headers
            .insert("Location".to_string(), location.to_string());
        response
    }

    /// Maps a handler failure onto a response.
    ///
    /// Status-coded errors (a [`StatusError`], or a message following its
    /// convention) keep their code; 301/302 redirect to the detail; anything
    /// else is a 503 with the message as body.
    #[must_use]
    pub fn from_error(err: &anyhow::Error) -> Self {
        let status = err
            .downcast_ref::<StatusError>()
            .cloned()
            .or_else(|| StatusError::parse(&err.to_string()));
        match status {
            Some(status) => Self::from_status(&status),
            None => Self::text(StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
        }
    }

    #[must_use]
    pub fn from_status(status: &StatusError) -> Self {
        let code =
            StatusCode::from_u16(status.code).unwrap_or(StatusCode::SERVICE_UNAVAILABLE);
        if code == StatusCode::MOVED_PERMANENTLY || code == StatusCode::FOUND {
            Self::redirect(code, status.detail.trim())
        } else {
            Self::text(code, status.to_string())
        }
    }

    /// Preflight answer.
    #[must_use]
    pub fn preflight() -> Self {
        let mut response = Self::with(StatusCode::OK, CONTENT_TYPE_TEXT, String::new());
        response.headers.insert(
            "Access-Control-Allow-Methods".to_string(),
            "GET,POST,PUT,PATCH,DELETE,OPTIONS".to_string(),
        );
        response.headers.insert(
            "Access-Control-Allow-Headers".to_string(),
            "*".to_string(),
        );
        response
    }

    /// Serializes the envelope for the proxy.
    #[must_use]
    pub fn into_value(self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
