use std::sync::Arc;

use async_trait::async_trait;
use relay_core::wire::{SqsRecord, SqsTransformer};
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
struct SqsBatch {
    #[serde(rename = "Records")]
    records: Vec<SqsRecord>,
}

/// Queue record batches.
pub struct QueueHandler {
    transformer: SqsTransformer,
    endpoint: Arc<ProtocolEndpoint>,
    listener: Option<Arc<dyn RecordListener<SqsRecord>>>,
    reporter: Arc<dyn ErrorReporter>,
    width: usize,
}

impl QueueHandler {
    #[must_use]
    pub fn new(
        config: &ServiceConfig,
        endpoint: Arc<ProtocolEndpoint>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            transformer: SqsTransformer::new(config.target()),
            endpoint,
            listener: None,
            reporter,
            width: config.queue_concurrency,
        }
    }

    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn RecordListener<SqsRecord>>) -> Self {
        self.listener = Some(listener);
        self
    }

    async fn process(
        &self,
        record: SqsRecord,
        context: &ExecutionContext,
    ) -> Result<Value, DispatchError> {
        if record.is_protocol() {
            let decoded = self.transformer.from_record(&record)?;
            debug!(message_id = %record.message_id, "relayed queue record");
            return self.endpoint.relay(decoded).await;
        }
        match &self.listener {
            Some(listener) => Ok(listener.on_record(record, context).await?),
            None => Err(anyhow::anyhow!("no listener for queue record {}", record.message_id).into()),
        }
    }
}

#[async_trait]
impl EventHandler for QueueHandler {
    fn kind(&self) -> EventKind {
        EventKind::Queue
    }

    async fn handle(
        &self,
        event: InboundEvent,
        context: ExecutionContext,
    ) -> Result<Value, DispatchError> {
        let batch: SqsBatch = event.decode(EventKind::Queue)?;
        let results = map_bounded(
            batch.records,
            self.width,
            "queue.record",
            self.reporter.as_ref(),
            |record| self.process(record, &context),
        )
        .await;
        Ok(Value::Array(results))
    }
}

#[cfg(test)]
mod tests {
    use relay_core::wire::sqs::{RecordAttribute, SQS_EVENT_SOURCE};
    use relay_core::wire::WireTransformer;
    use relay_core::{CallDescriptor, Stage};
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

    /// The record a queue delivers for a relayed `call`.
    fn relayed(message_id: &str, call: &CallDescriptor) -> Value {
        let input = SqsTransformer::new(config().target())
            .to_wire("sqs://user-api-dev/user", call, None)
            .unwrap();
        let record = SqsRecord {
            message_id: message_id.to_string(),
            body: input.message_body,
            message_attributes: input
                .message_attributes
                .into_iter()
                .map(|(name, attr)| {
                    let attr = RecordAttribute {
                        string_value: attr.string_value,
                        data_type: attr.data_type,
                    };
                    (name, attr)
                })
                .collect(),
            event_source: SQS_EVENT_SOURCE.to_string(),
            ..SqsRecord::default()
        };
        serde_json::to_value(record).unwrap()
    }

    fn handler(reporter: Arc<RecordingReporter>) -> QueueHandler {
        QueueHandler::new(&config(), Arc::new(endpoint()), reporter)
    }

    #[tokio::test]
    async fn failing_record_is_marked_and_siblings_resolve() {
        let reporter = Arc::new(RecordingReporter::default());
        let records = vec![
            relayed("m-1", &CallDescriptor::new("user-api", "user").with_id("1")),
            relayed("m-2", &CallDescriptor::new("user-api", "user").with_id("missing")),
            relayed("m-3", &CallDescriptor::new("user-api", "user").with_id("3")),
        ];

        let out = handler(reporter.clone())
            .handle(
                InboundEvent::new(json!({ "Records": records })),
                ExecutionContext::default(),
            )
            .await
            .unwrap();

        assert_eq!(
            out,
            json!([
                {"id": "1", "param": {}},
                "ERROR - 404 NOT FOUND - id:missing",
                {"id": "3", "param": {}}
            ])
        );
        let reports = reporter.reports.lock();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].scope, "queue.record");
    }

    #[tokio::test]
    async fn plain_records_go_to_listener() {
        let reporter = Arc::new(RecordingReporter::default());
        let handler = handler(reporter).with_listener(listener_fn(
            |record: SqsRecord, context: ExecutionContext| async move {
                Ok(json!({"body": record.body, "requestId": context.request_id}))
            },
        ));
        let event = json!({"Records": [{
            "messageId": "m-1",
            "body": "hello",
            "messageAttributes": {},
            "eventSource": "aws:sqs"
        }]});

        let context = ExecutionContext::with_ids(None, Some("req-1".into()));
        let out = handler.handle(InboundEvent::new(event), context).await.unwrap();
        assert_eq!(out, json!([{"body": "hello", "requestId": "req-1"}]));
    }

    #[tokio::test]
    async fn contradicting_context_fails_only_that_record() {
        let reporter = Arc::new(RecordingReporter::default());
        let mut record = relayed(
            "m-1",
            &CallDescriptor::new("user-api", "user")
                .with_id("1")
                .with_context(ExecutionContext::with_ids(None, Some("req-a".into()))),
        );
        record["messageAttributes"]["requestId"]["stringValue"] = json!("req-b");

        let out = handler(reporter)
            .handle(
                InboundEvent::new(json!({ "Records": [record] })),
                ExecutionContext::default(),
            )
            .await
            .unwrap();
        assert!(out[0].as_str().unwrap().starts_with("ERROR - "));
    }
}
