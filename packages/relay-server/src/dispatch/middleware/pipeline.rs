//! Pipeline composition: wraps the router in the middleware stack.

use serde_json::Value;
use tower::ServiceBuilder;

use super::metrics::MetricsLayer;
use crate::dispatch::handler::{DispatchError, InboundEvent};
use crate::dispatch::router::EventRouter;

/// Build the dispatch pipeline by wrapping the `EventRouter` with
/// middleware layers.
///
/// The returned service implements `tower::Service<InboundEvent>`.
#[must_use]
pub fn build_dispatch_pipeline(
    router: EventRouter,
) -> impl tower::Service<InboundEvent, Response = Value, Error = DispatchError> {
    ServiceBuilder::new().layer(MetricsLayer).service(router)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use tower::ServiceExt;

    use super::*;
    use crate::dispatch::classify::EventKind;
    use crate::dispatch::router::tests::{contexts, EchoHandler};

    #[tokio::test]
    async fn pipeline_routes_through_all_layers() {
        let mut router = EventRouter::new(contexts());
        router.register(Arc::new(EchoHandler(EventKind::Cron)));

        let svc = build_dispatch_pipeline(router);
        let resp = svc
            .oneshot(InboundEvent::new(json!({"cron": {"name": "hourly"}})))
            .await
            .unwrap();
        assert_eq!(resp["kind"], "cron");
    }

    #[tokio::test]
    async fn pipeline_surfaces_router_errors() {
        let router = EventRouter::new(contexts());
        let svc = build_dispatch_pipeline(router);
        let err = svc
            .oneshot(InboundEvent::new(json!({"cron": {}})))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnknownHandler { .. }));
    }
}
