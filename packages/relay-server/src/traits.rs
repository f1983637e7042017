use std::collections::HashMap;

use async_trait::async_trait;
use relay_core::wire::{SnsPublishInput, SqsSendInput};
use serde_json::Value;

/// Synchronous function invocation request.
#[derive(Debug, Clone, PartialEq)]
pub struct InvokeRequest {
    pub function_name: String,
    /// Event handed to the target function.
    pub payload: Value,
}

/// Raw result of an invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct InvokeResponse {
    /// Status of the invoke call itself, not of the function's answer.
    pub status_code: u16,
    /// Set when the function threw, e.g. `Unhandled`.
    pub function_error: Option<String>,
    pub payload: Option<Value>,
}

/// Managed-service delivery backend: function invoke, topic publish, queue
/// send. Implementations: cloud SDK clients, in-memory fakes (tests).
#[async_trait]
pub trait DeliveryClient: Send + Sync {
    async fn invoke(&self, request: InvokeRequest) -> anyhow::Result<InvokeResponse>;

    /// Publishes to a topic and returns the provider message id.
    async fn publish(&self, input: SnsPublishInput) -> anyhow::Result<String>;

    /// Sends to a queue and returns the provider message id.
    async fn send(&self, input: SqsSendInput) -> anyhow::Result<String>;
}

/// Verifies signed-token signatures against a managed key.
#[async_trait]
pub trait KeyVerifier: Send + Sync {
    /// Returns `Ok(false)` for a well-formed but wrong signature.
    async fn verify(&self, alias: &str, message: &[u8], signature: &[u8]) -> anyhow::Result<bool>;
}

/// Resolves a bare endpoint name (e.g. a topic name) to its full ARN.
#[async_trait]
pub trait EndpointResolver: Send + Sync {
    async fn resolve(&self, name: &str) -> anyhow::Result<Option<String>>;
}

/// Failure report handed to an [`ErrorReporter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    /// Operation that failed, e.g. `notify` or `queue.record`.
    pub scope: String,
    pub message: String,
    pub request_id: Option<String>,
}

impl ErrorReport {
    #[must_use]
    pub fn new(scope: impl Into<String>, error: &dyn std::fmt::Display) -> Self {
        Self {
            scope: scope.into(),
            message: error.to_string(),
            request_id: None,
        }
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }
}

/// Sink for failures that must not abort the caller. Never fails.
#[async_trait]
pub trait ErrorReporter: Send + Sync {
    async fn report(&self, report: ErrorReport);
}

// ---------------------------------------------------------------------------
// Default implementations
// ---------------------------------------------------------------------------

/// Reports failures as `error`-level tracing events.
#[derive(Debug, Clone, Default)]
pub struct TracingReporter;

#[async_trait]
impl ErrorReporter for TracingReporter {
    async fn report(&self, report: ErrorReport) {
        tracing::error!(
            scope = %report.scope,
            request_id = report.request_id.as_deref().unwrap_or(""),
            "{}",
            report.message
        );
    }
}

/// Endpoint table fixed at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticEndpoints {
    endpoints: HashMap<String, String>,
}

impl StaticEndpoints {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, arn: impl Into<String>) -> Self {
        self.endpoints.insert(name.into(), arn.into());
        self
    }
}

#[async_trait]
impl EndpointResolver for StaticEndpoints {
    async fn resolve(&self, name: &str) -> anyhow::Result<Option<String>> {
        Ok(self.endpoints.get(name).cloned())
    }
}

/// Key verifier for deployments without signing keys: every signature is
/// rejected.
#[derive(Debug, Clone, Default)]
pub struct NullKeyVerifier;

#[async_trait]
impl KeyVerifier for NullKeyVerifier {
    async fn verify(&self, alias: &str, _message: &[u8], _signature: &[u8]) -> anyhow::Result<bool> {
        tracing::debug!(alias, "no key verifier configured, rejecting signature");
        Ok(false)
    }
}
