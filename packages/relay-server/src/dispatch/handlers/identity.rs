//! Identity-pool lifecycle triggers (sign-up, authentication, ...).
//!
//! The pool expects the event back, possibly with `response` filled in, so a
//! listener answering `null` returns the event unchanged.

use std::sync::Arc;

use async_trait::async_trait;
use relay_core::ExecutionContext;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::RecordListener;
use crate::dispatch::classify::EventKind;
use crate::dispatch::handler::{DispatchError, EventHandler, InboundEvent};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityTrigger {
    pub user_pool_id: String,
    #[serde(default)]
    pub trigger_source: String,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub request: Value,
    #[serde(default)]
    pub response: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub struct IdentityTriggerHandler {
    listener: Arc<dyn RecordListener<IdentityTrigger>>,
}

impl IdentityTriggerHandler {
    #[must_use]
    pub fn new(listener: Arc<dyn RecordListener<IdentityTrigger>>) -> Self {
        Self { listener }
    }
}

#[async_trait]
impl EventHandler for IdentityTriggerHandler {
    fn kind(&self) -> EventKind {
        EventKind::IdentityTrigger
    }

    async fn handle(
        &self,
        event: InboundEvent,
        context: ExecutionContext,
    ) -> Result<Value, DispatchError> {
        let trigger: IdentityTrigger = event.decode(EventKind::IdentityTrigger)?;
        debug!(source = %trigger.trigger_source, pool = %trigger.user_pool_id, "identity trigger");
        match self.listener.on_record(trigger, &context).await? {
            Value::Null => Ok(event.event),
            answer => Ok(answer),
        }
    }
}
