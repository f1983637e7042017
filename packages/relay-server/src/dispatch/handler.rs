use async_trait::async_trait;
use relay_core::{ExecutionContext, TransformError};
use serde_json::Value;

use super::classify::{ClassifyError, EventKind};
use crate::context::{ContextBuilder, ContextError, PlatformContext};
use crate::protocol::ProtocolError;

/// One function invocation: the raw event plus runtime metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub event: Value,
    pub platform: Option<PlatformContext>,
}

impl InboundEvent {
    #[must_use]
    pub fn new(event: Value) -> Self {
        Self {
            event,
            platform: None,
        }
    }

    #[must_use]
    pub fn with_platform(mut self, platform: PlatformContext) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Decodes the raw event into a typed shape.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::InvalidEvent` when the event does not match.
    pub fn decode<T: serde::de::DeserializeOwned>(&self, kind: EventKind) -> Result<T, DispatchError> {
        T::deserialize(&self.event).map_err(|source| DispatchError::InvalidEvent { kind, source })
    }
}

/// Errors from dispatching an inbound event.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Classify(#[from] ClassifyError),
    #[error("no handler registered for {kind} events")]
    UnknownHandler { kind: EventKind },
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error("invalid {kind} event: {source}")]
    InvalidEvent {
        kind: EventKind,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Handler(#[from] anyhow::Error),
}

/// Handler for one [`EventKind`].
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn kind(&self) -> EventKind;

    /// Builds the context handed to [`Self::handle`]. Handlers override this
    /// to derive context from their own event shape.
    async fn pack_context(
        &self,
        contexts: &ContextBuilder,
        event: &InboundEvent,
    ) -> Result<ExecutionContext, DispatchError> {
        Ok(contexts.build(&event.event, event.platform.as_ref()).await?)
    }

    async fn handle(
        &self,
        event: InboundEvent,
        context: ExecutionContext,
    ) -> Result<Value, DispatchError>;
}
