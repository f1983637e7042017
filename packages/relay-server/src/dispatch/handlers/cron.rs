use std::sync::Arc;

use async_trait::async_trait;
use relay_core::ExecutionContext;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use super::RecordListener;
use crate::dispatch::classify::EventKind;
use crate::dispatch::handler::{DispatchError, EventHandler, InboundEvent};

/// Payload of a scheduled trigger: `{"cron": {"name": ..., ...}}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CronEvent {
    #[serde(default)]
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub action: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct CronEnvelope {
    cron: CronEvent,
}

pub struct CronHandler {
    listener: Arc<dyn RecordListener<CronEvent>>,
}

impl CronHandler {
    #[must_use]
    pub fn new(listener: Arc<dyn RecordListener<CronEvent>>) -> Self {
        Self { listener }
    }
}

#[async_trait]
impl EventHandler for CronHandler {
    fn kind(&self) -> EventKind {
        EventKind::Cron
    }

    async fn handle(
        &self,
        event: InboundEvent,
        context: ExecutionContext,
    ) -> Result<Value, DispatchError> {
        let CronEnvelope { cron } = event.decode(EventKind::Cron)?;
        info!(name = %cron.name, "scheduled trigger");
        Ok(self.listener.on_record(cron, &context).await?)
    }
}
