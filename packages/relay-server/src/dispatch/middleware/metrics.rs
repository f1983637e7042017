//! Metrics middleware for dispatch.
//!
//! Records dispatch duration and outcome in `tracing` spans. Invocations
//! without a platform request id get a generated one for the span.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use serde_json::Value;
use tower::{Layer, Service};
use tracing::{info_span, Instrument};
use uuid::Uuid;

use crate::dispatch::classify::classify;
use crate::dispatch::handler::{DispatchError, InboundEvent};

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

/// Tower layer that instruments dispatch with timing via `tracing` spans.
#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

impl<S> Service<InboundEvent> for MetricsService<S>
where
    S: Service<InboundEvent, Response = Value, Error = DispatchError> + Send,
    S::Future: Send + 'static,
{
    type Response = Value;
    type Error = DispatchError;
    type Future = Pin<Box<dyn Future<Output = Result<Value, DispatchError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, event: InboundEvent) -> Self::Future {
        let kind = classify(&event.event).map_or("unknown", |k| k.as_str());
        let request_id = event
            .platform
            .as_ref()
            .and_then(|p| p.aws_request_id.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let span = info_span!(
            "dispatch",
            kind = kind,
            request_id = %request_id,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(event);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;

                let outcome = match &result {
                    Ok(_) => "ok",
                    Err(_) => "error",
                };

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = start.elapsed().as_millis() as u64;
                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);

                match &result {
                    Ok(_) => tracing::info!(kind, duration_ms, outcome, "dispatch complete"),
                    Err(err) => {
                        tracing::warn!(kind, duration_ms, outcome, error = %err, "dispatch failed");
                    }
                }

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
