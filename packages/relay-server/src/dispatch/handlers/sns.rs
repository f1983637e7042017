use std::sync::Arc;

use async_trait::async_trait;
use relay_core::wire::{SnsNotification, SnsTransformer};
use relay_core::ExecutionContext;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::web::ProtocolEndpoint;
use super::RecordListener;
use crate::config::ServiceConfig;
use crate::dispatch::batch::map_bounded;
use crate::dispatch::classify::EventKind;
use crate::dispatch::handler::{DispatchError, EventHandler, InboundEvent};
use crate::traits::ErrorReporter;

#[derive(Debug, Deserialize)]
struct SnsBatch {
    #[serde(rename = "Records")]
    records: Vec<SnsEventRecord>,
}

#[derive(Debug, Deserialize)]
struct SnsEventRecord {
    #[serde(rename = "Sns")]
    sns: SnsNotification,
}

/// Pub/sub record batches. Relayed calls run on the protocol endpoint,
/// anything else goes to the listener.
pub struct PubSubHandler {
    transformer: SnsTransformer,
    endpoint: Arc<ProtocolEndpoint>,
    listener: Option<Arc<dyn RecordListener<SnsNotification>>>,
    reporter: Arc<dyn ErrorReporter>,
    width: usize,
}

impl PubSubHandler {
    #[must_use]
    pub fn new(
        config: &ServiceConfig,
        endpoint: Arc<ProtocolEndpoint>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            transformer: SnsTransformer::new(config.target()),
            endpoint,
            listener: None,
            reporter,
            width: config.pubsub_concurrency,
        }
    }

    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn RecordListener<SnsNotification>>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Handles one notification.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError` when a relayed call is malformed or fails, or
    /// a plain notification has no listener or the listener fails.
    pub async fn process(
        &self,
        notification: SnsNotification,
        context: &ExecutionContext,
    ) -> Result<Value, DispatchError> {
        if notification.is_protocol() {
            let decoded = self.transformer.from_notification(&notification)?;
            debug!(message_id = %notification.message_id, "relayed notification");
            return self.endpoint.relay(decoded).await;
        }
        match &self.listener {
            Some(listener) => Ok(listener.on_record(notification, context).await?),
            None => Err(anyhow::anyhow!(
                "no listener for notification {} on {}",
                notification.message_id,
                notification.topic_arn
            )
            .into()),
        }
    }
}

#[async_trait]
impl EventHandler for PubSubHandler {
    fn kind(&self) -> EventKind {
        EventKind::PubSub
    }

    async fn handle(
        &self,
        event: InboundEvent,
        context: ExecutionContext,
    ) -> Result<Value, DispatchError> {
        let batch: SnsBatch = event.decode(EventKind::PubSub)?;
        let notifications = batch.records.into_iter().map(|r| r.sns).collect();
        let results = map_bounded(
            notifications,
            self.width,
            "pubsub.record",
            self.reporter.as_ref(),
            |notification| self.process(notification, &context),
        )
        .await;
        Ok(Value::Array(results))
    }
}

#[cfg(test)]
mod tests {
    use relay_core::wire::WireTransformer;
    use relay_core::{CallDescriptor, CallMode, Stage};
    use serde_json::json;

    use super::*;
    use crate::dispatch::handlers::listener_fn;
    use crate::dispatch::handlers::web::tests::endpoint;
    use crate::testing::RecordingReporter;

    fn config() -> ServiceConfig {
        ServiceConfig {
            name: "user-api".into(),
            stage: Some(Stage::Dev),
            account_id: Some("111".into()),
            ..ServiceConfig::default()
        }
    }

    fn relayed(call: &CallDescriptor) -> Value {
        let input = SnsTransformer::new(config().target())
            .to_wire("sns://user-api-dev/user", call, None)
            .unwrap();
        serde_json::to_value(SnsNotification::from(&input)).unwrap()
    }

    fn batch(records: Vec<Value>) -> InboundEvent {
        let records: Vec<Value> = records.into_iter().map(|sns| json!({"Sns": sns})).collect();
        InboundEvent::new(json!({ "Records": records }))
    }

    #[tokio::test]
    async fn relays_protocol_records_and_listens_to_plain_ones() {
        let reporter = Arc::new(RecordingReporter::default());
        let handler = PubSubHandler::new(&config(), Arc::new(endpoint()), reporter.clone())
            .with_listener(listener_fn(|n: SnsNotification, _ctx| async move {
                Ok(json!({"plain": n.message}))
            }));

        let call = CallDescriptor::new("user-api", "user")
            .with_mode(CallMode::Get)
            .with_id("7");
        let plain = json!({
            "Type": "Notification",
            "MessageId": "m-2",
            "TopicArn": "arn:aws:sns:ap-northeast-2:111:alarm",
            "Message": "disk full"
        });

        let out = handler
            .handle(batch(vec![relayed(&call), plain]), ExecutionContext::default())
            .await
            .unwrap();
        assert_eq!(out[0], json!({"id": "7", "param": {}}));
        assert_eq!(out[1], json!({"plain": "disk full"}));
        assert!(reporter.reports.lock().is_empty());
    }

    #[tokio::test]
    async fn plain_record_without_listener_is_marked() {
        let reporter = Arc::new(RecordingReporter::default());
        let handler = PubSubHandler::new(&config(), Arc::new(endpoint()), reporter.clone());
        let plain = json!({"Type": "Notification", "MessageId": "m-1", "TopicArn": "t", "Message": "x"});

        let out = handler
            .handle(batch(vec![plain]), ExecutionContext::default())
            .await
            .unwrap();
        assert_eq!(out, json!(["ERROR - no listener for notification m-1 on t"]));
        assert_eq!(reporter.reports.lock()[0].scope, "pubsub.record");
    }

    #[tokio::test]
    async fn rejects_events_without_records() {
        let handler = PubSubHandler::new(
            &config(),
            Arc::new(endpoint()),
            Arc::new(RecordingReporter::default()),
        );
        let err = handler
            .handle(InboundEvent::new(json!({"Records": "nope"})), ExecutionContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidEvent { kind: EventKind::PubSub, .. }));
    }
}
