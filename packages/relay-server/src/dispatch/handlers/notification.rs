//! Pub/sub notifications delivered to an HTTP subscription.

use std::sync::Arc;

use async_trait::async_trait;
use http::StatusCode;
use relay_core::wire::{ApiProxyEvent, SnsNotification};
use relay_core::ExecutionContext;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::sns::PubSubHandler;
use super::web::body_text;
use super::RecordListener;
use crate::dispatch::classify::EventKind;
use crate::dispatch::handler::{DispatchError, EventHandler, InboundEvent};
use crate::response::HttpResponse;

/// Answers subscription confirmations and processes notifications the same
/// way as a pub/sub record. Failures answer non-2xx so the sender retries.
pub struct NotificationHandler {
    pubsub: Arc<PubSubHandler>,
    confirmations: Option<Arc<dyn RecordListener<SnsNotification>>>,
}

impl NotificationHandler {
    #[must_use]
    pub fn new(pubsub: Arc<PubSubHandler>) -> Self {
        Self {
            pubsub,
            confirmations: None,
        }
    }

    /// Hands subscription confirmations to `listener` instead of only
    /// logging them.
    #[must_use]
    pub fn with_confirmations(
        mut self,
        listener: Arc<dyn RecordListener<SnsNotification>>,
    ) -> Self {
        self.confirmations = Some(listener);
        self
    }

    async fn respond(
        &self,
        notification: SnsNotification,
        context: &ExecutionContext,
    ) -> Result<Value, DispatchError> {
        if notification.is_subscription_confirmation() {
            info!(
                topic = %notification.topic_arn,
                subscribe_url = notification.subscribe_url.as_deref().unwrap_or_default(),
                "subscription confirmation"
            );
            return match &self.confirmations {
                Some(listener) => Ok(listener.on_record(notification, context).await?),
                None => Ok(json!("OK")),
            };
        }
        if notification.kind != SnsNotification::NOTIFICATION {
            info!(kind = %notification.kind, topic = %notification.topic_arn, "ignored message");
            return Ok(json!("OK"));
        }
        self.pubsub.process(notification, context).await
    }
}

#[async_trait]
impl EventHandler for NotificationHandler {
    fn kind(&self) -> EventKind {
        EventKind::Notification
    }

    async fn handle(
        &self,
        event: InboundEvent,
        context: ExecutionContext,
    ) -> Result<Value, DispatchError> {
        let event: ApiProxyEvent = event.decode(EventKind::Notification)?;
        let notification = match body_text(&event) {
            Err(status) => return Ok(HttpResponse::from_status(&status).into_value()),
            Ok(None) => {
                return Ok(HttpResponse::text(StatusCode::BAD_REQUEST, "empty notification")
                    .into_value())
            }
            Ok(Some(raw)) => match serde_json::from_str::<SnsNotification>(&raw) {
                Ok(notification) => notification,
                Err(err) => {
                    return Ok(
                        HttpResponse::text(StatusCode::BAD_REQUEST, err.to_string()).into_value()
                    )
                }
            },
        };

        let response = match self.respond(notification, &context).await {
            Ok(value) => HttpResponse::ok(&value),
            Err(err) => {
                warn!(error = %err, "notification failed");
                HttpResponse::from_error(&anyhow::Error::new(err))
            }
        };
        Ok(response.into_value())
    }
}

#[cfg(test)]
mod tests {
    use relay_core::wire::{SnsTransformer, WireTransformer};
    use relay_core::{CallDescriptor, Stage};

    use super::*;
    use crate::config::ServiceConfig;
    use crate::dispatch::handlers::listener_fn;
    use crate::dispatch::handlers::web::tests::endpoint;
    use crate::testing::RecordingReporter;

    fn handler() -> NotificationHandler {
        let config = ServiceConfig {
            name: "user-api".into(),
            stage: Some(Stage::Dev),
            ..ServiceConfig::default()
        };
        let pubsub = PubSubHandler::new(
            &config,
            Arc::new(endpoint()),
            Arc::new(RecordingReporter::default()),
        );
        NotificationHandler::new(Arc::new(pubsub))
    }

    fn post(body: &Value) -> InboundEvent {
        InboundEvent::new(json!({
            "httpMethod": "POST",
            "path": "/sns",
            "headers": {
                "x-amz-sns-message-type": body["Type"],
                "x-amz-sns-message-id": "m-1",
                "x-amz-sns-topic-arn": "arn:aws:sns:ap-northeast-2:111:user-api-dev"
            },
            "body": body.to_string(),
            "requestContext": {"requestId": "req-1"}
        }))
    }

    async fn serve(handler: &NotificationHandler, event: InboundEvent) -> HttpResponse {
        let value = handler
            .handle(event, ExecutionContext::default())
            .await
            .unwrap();
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn confirmation_is_acknowledged() {
        let body = json!({
            "Type": "SubscriptionConfirmation",
            "MessageId": "m-1",
            "TopicArn": "arn:aws:sns:ap-northeast-2:111:user-api-dev",
            "Message": "You have chosen to subscribe",
            "SubscribeURL": "https://sns.example/confirm?token=t",
            "Token": "t"
        });
        let response = serve(&handler(), post(&body)).await;
        assert_eq!(response.status_code, 200);
        assert_eq!(response.body, "OK");

        let handler = handler().with_confirmations(listener_fn(
            |n: SnsNotification, _ctx| async move { Ok(json!({"confirm": n.subscribe_url})) },
        ));
        let response = serve(&handler, post(&body)).await;
        assert_eq!(response.body, r#"{"confirm":"https://sns.example/confirm?token=t"}"#);
    }

    #[tokio::test]
    async fn relayed_notification_runs_like_a_record() {
        let config = ServiceConfig {
            name: "user-api".into(),
            account_id: Some("111".into()),
            ..ServiceConfig::default()
        };
        let input = SnsTransformer::new(config.target())
            .to_wire(
                "sns://user-api-dev/user",
                &CallDescriptor::new("user-api", "user").with_id("7"),
                None,
            )
            .unwrap();
        let body = serde_json::to_value(SnsNotification::from(&input)).unwrap();

        let response = serve(&handler(), post(&body)).await;
        assert_eq!(response.status_code, 200);
        assert_eq!(response.body, r#"{"id":"7","param":{}}"#);
    }

    #[tokio::test]
    async fn failures_answer_non_2xx() {
        let body = json!({"Type": "Notification", "MessageId": "m-1", "TopicArn": "t", "Message": "x"});
        let response = serve(&handler(), post(&body)).await;
        assert_eq!(response.status_code, 503);

        let mut event = post(&body);
        event.event["body"] = json!("not json");
        assert_eq!(serve(&handler(), event).await.status_code, 400);
    }
}
