//! Startup wiring: collaborators in, a ready [`EventRouter`] out.

use std::sync::Arc;

use relay_core::ClockSource;
use serde_json::Value;

use crate::config::ServiceConfig;
use crate::context::{ContextBuilder, TokenVerifier};
use crate::dispatch::handlers::{
    NotificationHandler, ProtocolEndpoint, PubSubHandler, QueueHandler, WebHandler,
};
use crate::dispatch::{build_dispatch_pipeline, DispatchError, EventRouter, InboundEvent};
use crate::protocol::ProtocolService;
use crate::traits::{DeliveryClient, EndpointResolver, ErrorReporter, KeyVerifier};

/// External systems the relay talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub delivery: Arc<dyn DeliveryClient>,
    pub endpoints: Arc<dyn EndpointResolver>,
    pub reporter: Arc<dyn ErrorReporter>,
    pub keys: Arc<dyn KeyVerifier>,
    pub clock: Arc<dyn ClockSource>,
}

/// Shared, read-only state of one deployed service.
pub struct RelayRuntime {
    config: Arc<ServiceConfig>,
    protocol: Arc<ProtocolService>,
    contexts: Arc<ContextBuilder>,
    reporter: Arc<dyn ErrorReporter>,
}

impl RelayRuntime {
    #[must_use]
    pub fn new(config: ServiceConfig, collaborators: Collaborators) -> Self {
        let protocol = ProtocolService::new(
            &config,
            collaborators.delivery,
            collaborators.endpoints,
            Arc::clone(&collaborators.reporter),
        );
        let tokens = TokenVerifier::new(collaborators.keys, collaborators.clock);
        Self {
            config: Arc::new(config),
            protocol: Arc::new(protocol),
            contexts: Arc::new(ContextBuilder::new(tokens)),
            reporter: collaborators.reporter,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Outbound side, for resource handlers calling other services.
    #[must_use]
    pub fn protocol(&self) -> Arc<ProtocolService> {
        Arc::clone(&self.protocol)
    }

    #[must_use]
    pub fn contexts(&self) -> Arc<ContextBuilder> {
        Arc::clone(&self.contexts)
    }

    /// Router serving `endpoint` over HTTP, HTTP notifications, pub/sub and
    /// queue records, with callbacks posted through this runtime. Listeners
    /// for the other sources are registered on the result by the caller.
    #[must_use]
    pub fn router(&self, endpoint: ProtocolEndpoint) -> EventRouter {
        let endpoint = Arc::new(endpoint.with_callbacks(self.protocol()));
        let pubsub = Arc::new(PubSubHandler::new(
            &self.config,
            Arc::clone(&endpoint),
            Arc::clone(&self.reporter),
        ));
        let queue = QueueHandler::new(&self.config, Arc::clone(&endpoint), Arc::clone(&self.reporter));

        let mut router = EventRouter::new(self.contexts());
        router
            .register(Arc::new(WebHandler::new(endpoint)))
            .register(Arc::new(NotificationHandler::new(Arc::clone(&pubsub))))
            .register(pubsub)
            .register(Arc::new(queue));
        router
    }

    /// Per-invocation entry point: `router` behind the dispatch middleware.
    pub fn serve(
        &self,
        router: EventRouter,
    ) -> impl tower::Service<InboundEvent, Response = Value, Error = DispatchError> {
        tracing::debug!(service = %self.config.name, "dispatch pipeline ready");
        build_dispatch_pipeline(router)
    }
}
