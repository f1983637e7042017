//! Event routing: dispatches `InboundEvent` to the handler of its `EventKind`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use serde_json::Value;
use tower::Service;
use tracing::debug;

use super::classify::{classify, EventKind};
use super::handler::{DispatchError, EventHandler, InboundEvent};
use crate::context::ContextBuilder;

type BoxedFuture = Pin<Box<dyn Future<Output = Result<Value, DispatchError>> + Send>>;

// ---------------------------------------------------------------------------
// EventRouter
// ---------------------------------------------------------------------------

/// Routes inbound events to registered handlers by classified kind.
///
/// Built once at startup: construct the handlers, then `register` each.
/// Events of a kind with no registered handler return
/// `DispatchError::UnknownHandler`.
pub struct EventRouter {
    handlers: HashMap<EventKind, Arc<dyn EventHandler>>,
    contexts: Arc<ContextBuilder>,
}

impl EventRouter {
    #[must_use]
    pub fn new(contexts: Arc<ContextBuilder>) -> Self {
        Self {
            handlers: HashMap::new(),
            contexts,
        }
    }

    /// Registers `handler` for its kind, replacing any previous one.
    pub fn register(&mut self, handler: Arc<dyn EventHandler>) -> &mut Self {
        let kind = handler.kind();
        if self.handlers.insert(kind, handler).is_some() {
            debug!(%kind, "replaced event handler");
        }
        self
    }

    #[must_use]
    pub fn handles(&self, kind: EventKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Classifies and handles one event.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError` when the event is unrecognized, has no
    /// handler, or its context or handler fails.
    pub async fn dispatch(&self, event: InboundEvent) -> Result<Value, DispatchError> {
        let (handler, contexts) = self.route(&event)?;
        run(handler, contexts, event).await
    }

    fn route(
        &self,
        event: &InboundEvent,
    ) -> Result<(Arc<dyn EventHandler>, Arc<ContextBuilder>), DispatchError> {
        let kind = classify(&event.event)?;
        let handler = self
            .handlers
            .get(&kind)
            .cloned()
            .ok_or(DispatchError::UnknownHandler { kind })?;
        debug!(%kind, "dispatching event");
        Ok((handler, Arc::clone(&self.contexts)))
    }
}

async fn run(
    handler: Arc<dyn EventHandler>,
    contexts: Arc<ContextBuilder>,
    event: InboundEvent,
) -> Result<Value, DispatchError> {
    let context = handler.pack_context(&contexts, &event).await?;
    handler.handle(event, context).await
}

impl Service<InboundEvent> for EventRouter {
    type Response = Value;
    type Error = DispatchError;
    type Future = BoxedFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: InboundEvent) -> Self::Future {
        match self.route(&event) {
            Ok((handler, contexts)) => Box::pin(run(handler, contexts, event)),
            Err(err) => Box::pin(async move { Err(err) }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
