//! Web-socket route events (`$connect`, `$disconnect`, messages).

use std::sync::Arc;

use async_trait::async_trait;
use relay_core::wire::ApiProxyEvent;
use relay_core::ExecutionContext;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::web::body_text;
use super::RecordListener;
use crate::dispatch::classify::EventKind;
use crate::dispatch::handler::{DispatchError, EventHandler, InboundEvent};
use crate::response::HttpResponse;

/// One socket event, flattened out of the request context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketEvent {
    pub connection_id: Option<String>,
    /// `CONNECT`, `DISCONNECT` or `MESSAGE`.
    pub event_type: Option<String>,
    pub route_key: Option<String>,
    pub domain: Option<String>,
    pub stage: Option<String>,
    /// Message body, parsed when it is JSON.
    pub body: Option<Value>,
}

impl SocketEvent {
    fn from_proxy(event: &ApiProxyEvent) -> Result<Self, relay_core::StatusError> {
        let rc = event.request_context.clone().unwrap_or_default();
        let body = body_text(event)?.map(|raw| {
            serde_json::from_str(&raw).unwrap_or(Value::String(raw))
        });
        Ok(Self {
            connection_id: rc.connection_id,
            event_type: rc.event_type,
            route_key: rc.route_key,
            domain: rc.domain_name,
            stage: rc.stage,
            body,
        })
    }
}

pub struct SocketHandler {
    listener: Arc<dyn RecordListener<SocketEvent>>,
}

impl SocketHandler {
    #[must_use]
    pub fn new(listener: Arc<dyn RecordListener<SocketEvent>>) -> Self {
        Self { listener }
    }
}

#[async_trait]
impl EventHandler for SocketHandler {
    fn kind(&self) -> EventKind {
        EventKind::WebSocket
    }

    async fn handle(
        &self,
        event: InboundEvent,
        context: ExecutionContext,
    ) -> Result<Value, DispatchError> {
        let event: ApiProxyEvent = event.decode(EventKind::WebSocket)?;
        let socket = match SocketEvent::from_proxy(&event) {
            Ok(socket) => socket,
            Err(status) => return Ok(HttpResponse::from_status(&status).into_value()),
        };
        debug!(
            connection = socket.connection_id.as_deref().unwrap_or_default(),
            route = socket.route_key.as_deref().unwrap_or_default(),
            "socket event"
        );
        let response = match self.listener.on_record(socket, &context).await {
            Ok(value) => HttpResponse::ok(&value),
            Err(err) => {
                warn!(error = %err, "socket event failed");
                HttpResponse::from_error(&err)
            }
        };
        Ok(response.into_value())
    }
}
