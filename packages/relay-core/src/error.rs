//! Error types shared by the address codec and the wire transformers.
//!
//! Also hosts [`StatusError`], the `"<code> <TITLE> - <detail>"` message
//! convention that remote handlers use to carry an HTTP-like status through
//! plain error strings.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

// ---------------------------------------------------------------------------
// AddressError
// ---------------------------------------------------------------------------

/// Errors from building or parsing a protocol address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("unsupported scheme: {scheme}")]
    UnsupportedScheme { scheme: String },
    #[error("malformed address `{address}`: {reason}")]
    Malformed { address: String, reason: &'static str },
    #[error("@{0} is required")]
    MissingArgument(&'static str),
    #[error("unknown endpoint: {name}")]
    UnknownEndpoint { name: String },
}

// ---------------------------------------------------------------------------
// TransformError
// ---------------------------------------------------------------------------

/// Errors from encoding a call onto a transport or decoding it back.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("missing wire field: {0}")]
    MissingField(&'static str),
    #[error("invalid wire field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("relay marker mismatch: expected `{expected}`, found `{found}`")]
    MarkerMismatch { expected: &'static str, found: String },
    #[error("{field} mismatch: context has `{context}`, metadata has `{metadata}`")]
    ContextMismatch {
        field: &'static str,
        context: String,
        metadata: String,
    },
    #[error("invalid address for transport: {0}")]
    Address(#[from] AddressError),
    #[error("invalid json in {field}: {source}")]
    Json {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl TransformError {
    /// Maps a serde error onto `Json` for `field`.
    pub fn json(field: &'static str) -> impl FnOnce(serde_json::Error) -> Self {
        move |source| Self::Json { field, source }
    }
}

// ---------------------------------------------------------------------------
// StatusError
// ---------------------------------------------------------------------------

/// A status-coded error in the `"<3-digit code> <TITLE> - <detail>"` form.
///
/// Handlers return these (directly or as plain messages) so the HTTP-facing
/// side can answer with a matching status code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusError {
    pub code: u16,
    pub title: String,
    pub detail: String,
}

fn status_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)^([1-5][0-9]{2}) ([A-Z][A-Z0-9 _]*?)(?: - (.*))?$")
            .unwrap_or_else(|e| unreachable!("status pattern is valid: {e}"))
    })
}

impl StatusError {
    #[must_use]
    pub fn new(code: u16, title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            code,
            title: title.into(),
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(404, "NOT FOUND", detail)
    }

    #[must_use]
    pub fn invalid(detail: impl Into<String>) -> Self {
        Self::new(400, "INVALID PARAM", detail)
    }

    #[must_use]
    pub fn redirect(code: u16, location: impl Into<String>) -> Self {
        Self::new(code, "REDIRECT", location)
    }

    /// Parses a message that follows the status convention.
    ///
    /// Returns `None` for messages that do not start with a 3-digit code and
    /// an upper-case title.
    #[must_use]
    pub fn parse(message: &str) -> Option<Self> {
        let caps = status_pattern().captures(message)?;
        let code = caps.get(1)?.as_str().parse().ok()?;
        let title = caps.get(2)?.as_str().trim_end().to_string();
        let detail = caps.get(3).map_or("", |m| m.as_str()).to_string();
        Some(Self {
            code,
            title,
            detail,
        })
    }
}

impl fmt::Display for StatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} - {}", self.code, self.title, self.detail)
    }
}

impl std::error::Error for StatusError {}
