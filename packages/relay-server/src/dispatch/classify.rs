//! Event classification: decides which handler an inbound event belongs to.
//!
//! Predicates are checked in a fixed order, so an event matching several
//! shapes always lands on the same handler.

use std::fmt;

use serde_json::Value;

/// Source shape of an inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Pub/sub notification posted over HTTP.
    Notification,
    /// HTTP-proxy request, including relayed sync calls.
    Web,
    WebSocket,
    Cron,
    /// Identity-provider (user pool) trigger.
    IdentityTrigger,
    /// Pub/sub records.
    PubSub,
    /// Queue records.
    Queue,
    /// Table change-feed records.
    ChangeFeed,
}

impl EventKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Notification => "notification",
            Self::Web => "web",
            Self::WebSocket => "websocket",
            Self::Cron => "cron",
            Self::IdentityTrigger => "identity",
            Self::PubSub => "pubsub",
            Self::Queue => "queue",
            Self::ChangeFeed => "change-feed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassifyError {
    #[error("event must be a JSON object")]
    NotAnObject,
    #[error("unrecognized event shape (keys: {keys})")]
    Unrecognized { keys: String },
}

/// Headers an HTTP-delivered pub/sub notification always carries.
const NOTIFICATION_HEADERS: [&str; 3] = [
    "x-amz-sns-message-type",
    "x-amz-sns-message-id",
    "x-amz-sns-topic-arn",
];

/// Classifies `event` by its shape.
///
/// # Errors
///
/// Returns `ClassifyError` when the event is not an object or matches no
/// known shape.
pub fn classify(event: &Value) -> Result<EventKind, ClassifyError> {
    let object = event.as_object().ok_or(ClassifyError::NotAnObject)?;

    if let Some(request_context) = object.get("requestContext").filter(|rc| rc.is_object()) {
        if has_notification_headers(object.get("headers")) {
            return Ok(EventKind::Notification);
        }
        // Present-but-null counts: root-path requests carry `null`.
        if object.contains_key("pathParameters") {
            return Ok(EventKind::Web);
        }
        if request_context.get("connectionId").is_some()
            || request_context.get("eventType").is_some()
        {
            return Ok(EventKind::WebSocket);
        }
    }
    if object.contains_key("cron") {
        return Ok(EventKind::Cron);
    }
    if object.contains_key("userPoolId") {
        return Ok(EventKind::IdentityTrigger);
    }
    if let Some(records) = object.get("Records").and_then(Value::as_array) {
        if records.iter().any(|r| r.get("Sns").is_some()) {
            return Ok(EventKind::PubSub);
        }
        if records
            .iter()
            .any(|r| r.get("eventSource").and_then(Value::as_str) == Some("aws:sqs"))
        {
            return Ok(EventKind::Queue);
        }
        if records.iter().any(|r| r.get("dynamodb").is_some()) {
            return Ok(EventKind::ChangeFeed);
        }
    }

    Err(ClassifyError::Unrecognized {
        keys: object.keys().map(String::as_str).collect::<Vec<_>>().join(","),
    })
}

fn has_notification_headers(headers: Option<&Value>) -> bool {
    let Some(headers) = headers.and_then(Value::as_object) else {
        return false;
    };
    NOTIFICATION_HEADERS
        .iter()
        .all(|name| headers.keys().any(|key| key.eq_ignore_ascii_case(name)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
