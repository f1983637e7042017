//! HTTP-proxy requests: routing `/{type}/{id}/{cmd}` onto resource handlers.
//!
//! The same [`ProtocolEndpoint`] also executes calls relayed over the
//! pub/sub and queue transports, so a resource handler cannot tell how a
//! call reached it.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use futures_util::future::BoxFuture;
use relay_core::address::encode_path;
use relay_core::wire::web::{PARAM_CMD, PARAM_ID, PARAM_TYPE};
use relay_core::wire::{ApiProxyEvent, DecodedCall, WebTransformer};
use relay_core::{CallDescriptor, CallMode, ExecutionContext, StatusError};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::dispatch::classify::EventKind;
use crate::dispatch::handler::{DispatchError, EventHandler, InboundEvent};
use crate::protocol::ProtocolService;
use crate::response::HttpResponse;

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

/// Everything a resource handler gets for one call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WebRequest {
    pub mode: Option<CallMode>,
    pub id: Option<String>,
    pub cmd: Option<String>,
    pub param: BTreeMap<String, String>,
    pub body: Option<Map<String, Value>>,
    pub context: ExecutionContext,
}

pub type ResourceHandler =
    Arc<dyn Fn(WebRequest) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// Picks the handler of one `(mode, id, cmd)`, if any.
pub type ResourceDecoder =
    Arc<dyn Fn(CallMode, Option<&str>, Option<&str>) -> Option<ResourceHandler> + Send + Sync>;

/// Wraps an async closure as a [`ResourceHandler`].
pub fn handler_fn<F, Fut>(f: F) -> ResourceHandler
where
    F: Fn(WebRequest) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(move |request: WebRequest| -> BoxFuture<'static, anyhow::Result<Value>> {
        Box::pin(f(request))
    })
}

/// A resource implemented as one object.
#[async_trait]
pub trait ResourceController: Send + Sync {
    fn supports(&self, mode: CallMode, id: Option<&str>, cmd: Option<&str>) -> bool;

    async fn handle(&self, request: WebRequest) -> anyhow::Result<Value>;
}

/// How one resource type is served.
#[derive(Clone)]
pub enum WebRoute {
    Decoder(ResourceDecoder),
    Controller(Arc<dyn ResourceController>),
}

impl WebRoute {
    /// Route backed by a decoder closure.
    pub fn decoder<F>(f: F) -> Self
    where
        F: Fn(CallMode, Option<&str>, Option<&str>) -> Option<ResourceHandler>
            + Send
            + Sync
            + 'static,
    {
        Self::Decoder(Arc::new(f))
    }

    #[must_use]
    pub fn resolve(
        &self,
        mode: CallMode,
        id: Option<&str>,
        cmd: Option<&str>,
    ) -> Option<ResourceHandler> {
        match self {
            Self::Decoder(decode) => decode(mode, id, cmd),
            Self::Controller(controller) => {
                if !controller.supports(mode, id, cmd) {
                    return None;
                }
                let controller = Arc::clone(controller);
                let handler: ResourceHandler = Arc::new(
                    move |request: WebRequest| -> BoxFuture<'static, anyhow::Result<Value>> {
                        let controller = Arc::clone(&controller);
                        Box::pin(async move { controller.handle(request).await })
                    },
                );
                Some(handler)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ProtocolEndpoint
// ---------------------------------------------------------------------------

/// Executes calls against the resources this service exposes.
#[derive(Default)]
pub struct ProtocolEndpoint {
    routes: HashMap<String, WebRoute>,
    callbacks: Option<Arc<ProtocolService>>,
}

impl ProtocolEndpoint {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves resource `resource_type` through `route`.
    #[must_use]
    pub fn route(mut self, resource_type: impl Into<String>, route: WebRoute) -> Self {
        self.routes.insert(resource_type.into(), route);
        self
    }

    /// Posts relayed-call outcomes to their callbacks through `protocol`.
    #[must_use]
    pub fn with_callbacks(mut self, protocol: Arc<ProtocolService>) -> Self {
        self.callbacks = Some(protocol);
        self
    }

    #[must_use]
    pub fn resolve(
        &self,
        resource_type: &str,
        mode: CallMode,
        id: Option<&str>,
        cmd: Option<&str>,
    ) -> Option<ResourceHandler> {
        self.routes.get(resource_type)?.resolve(mode, id, cmd)
    }

    /// Runs `call` on the matching resource handler.
    ///
    /// # Errors
    ///
    /// Returns a 404 [`StatusError`] when nothing serves the call, otherwise
    /// whatever the handler fails with.
    pub async fn execute(&self, call: CallDescriptor) -> anyhow::Result<Value> {
        let mode = call.resolved_mode();
        let handler = self
            .resolve(&call.resource_type, mode, call.id.as_deref(), call.cmd.as_deref())
            .ok_or_else(|| {
                StatusError::not_found(format!(
                    "{mode} {}",
                    encode_path(&call.resource_type, call.id.as_deref(), call.cmd.as_deref())
                ))
            })?;
        debug!(%mode, resource = %call.resource_type, "executing resource handler");
        handler(WebRequest {
            mode: Some(mode),
            id: call.id,
            cmd: call.cmd,
            param: call.param,
            body: call.body,
            context: call.context,
        })
        .await
    }

    /// Executes a relayed call and posts its outcome to the callback, when
    /// one was given.
    ///
    /// # Errors
    ///
    /// Returns the call's own failure (after the callback saw it), or the
    /// failure to post the callback.
    pub async fn relay(&self, decoded: DecodedCall) -> Result<Value, DispatchError> {
        let DecodedCall {
            descriptor,
            callback,
        } = decoded;
        let context = descriptor.context.clone();
        let result = self.execute(descriptor).await;
        if let Some(callback) = callback.as_deref() {
            match &self.callbacks {
                Some(protocol) => {
                    let outcome = result.as_ref().cloned().map_err(ToString::to_string);
                    protocol.callback(callback, outcome, &context).await?;
                }
                None => warn!(%callback, "callback dropped: no protocol service configured"),
            }
        }
        Ok(result?)
    }
}

// ---------------------------------------------------------------------------
// WebHandler
// ---------------------------------------------------------------------------

/// Serves HTTP-proxy events, relayed sync calls included.
pub struct WebHandler {
    endpoint: Arc<ProtocolEndpoint>,
    relay: WebTransformer,
}

impl WebHandler {
    #[must_use]
    pub fn new(endpoint: Arc<ProtocolEndpoint>) -> Self {
        Self {
            endpoint,
            relay: WebTransformer,
        }
    }

    fn descriptor(
        &self,
        event: &ApiProxyEvent,
        context: ExecutionContext,
    ) -> Result<CallDescriptor, StatusError> {
        if event.is_relayed() {
            return self
                .relay
                .decode_event(event)
                .map(|decoded| decoded.descriptor)
                .map_err(|err| StatusError::invalid(err.to_string()));
        }
        let resource_type = event
            .path_param(PARAM_TYPE)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| StatusError::not_found(format!("{} {}", event.http_method, event.path)))?;
        let id = event.path_param(PARAM_ID).map(str::to_string);
        let cmd = event.path_param(PARAM_CMD).map(str::to_string);
        let mode = CallMode::from_http(&event.http_method, id.as_deref(), cmd.as_deref())
            .ok_or_else(|| {
                StatusError::invalid(format!("unsupported method: {}", event.http_method))
            })?;
        Ok(CallDescriptor {
            resource_type: resource_type.to_string(),
            mode: Some(mode),
            id,
            cmd,
            param: event.query_string_parameters.clone().unwrap_or_default(),
            body: decode_body(event)?,
            context,
            ..CallDescriptor::default()
        })
    }
}

#[async_trait]
impl EventHandler for WebHandler {
    fn kind(&self) -> EventKind {
        EventKind::Web
    }

    async fn handle(
        &self,
        event: InboundEvent,
        context: ExecutionContext,
    ) -> Result<Value, DispatchError> {
        let event: ApiProxyEvent = event.decode(EventKind::Web)?;
        if event.http_method.eq_ignore_ascii_case("OPTIONS") {
            return Ok(HttpResponse::preflight().into_value());
        }
        let response = match self.descriptor(&event, context) {
            Err(status) => HttpResponse::from_status(&status),
            Ok(call) => match self.endpoint.execute(call).await {
                Ok(value) => HttpResponse::ok(&value),
                Err(err) => {
                    warn!(method = %event.http_method, path = %event.path, error = %err, "request failed");
                    HttpResponse::from_error(&err)
                }
            },
        };
        Ok(response.into_value())
    }
}

/// Request body text, base64 unwrapped.
pub(crate) fn body_text(event: &ApiProxyEvent) -> Result<Option<String>, StatusError> {
    let Some(raw) = event.body.as_deref().filter(|b| !b.is_empty()) else {
        return Ok(None);
    };
    if !event.is_base64_encoded {
        return Ok(Some(raw.to_string()));
    }
    let bytes = STANDARD
        .decode(raw)
        .map_err(|e| StatusError::invalid(format!("body: {e}")))?;
    String::from_utf8(bytes)
        .map(Some)
        .map_err(|e| StatusError::invalid(format!("body: {e}")))
}

/// Request body as an object: JSON or form-encoded.
fn decode_body(event: &ApiProxyEvent) -> Result<Option<Map<String, Value>>, StatusError> {
    let Some(raw) = body_text(event)? else {
        return Ok(None);
    };

    let form = event
        .header("content-type")
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
    if form {
        let map = url::form_urlencoded::parse(raw.as_bytes())
            .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
            .collect();
        return Ok(Some(map));
    }
    match serde_json::from_str(&raw) {
        Ok(Value::Object(map)) => Ok(Some(map)),
        Ok(_) => Err(StatusError::invalid("body: expected a JSON object")),
        Err(e) => Err(StatusError::invalid(format!("body: {e}"))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use async_trait::async_trait;
    use relay_core::{Stage, WireTransformer};
    use serde_json::json;

    use super::*;
    use crate::config::{ReportPolicy, ServiceConfig};
    use crate::dispatch::router::tests::contexts;
    use crate::dispatch::router::EventRouter;
    use crate::testing::RecordingReporter;
    use crate::traits::{DeliveryClient, InvokeRequest, InvokeResponse, StaticEndpoints};

    /// `user` resource: a controller answering reads and one command.
    struct Users;

    #[async_trait]
    impl ResourceController for Users {
        fn supports(&self, mode: CallMode, _id: Option<&str>, cmd: Option<&str>) -> bool {
            match mode {
                CallMode::Get | CallMode::List => cmd.is_none(),
                CallMode::Put => cmd == Some("name"),
                _ => false,
            }
        }

        async fn handle(&self, request: WebRequest) -> anyhow::Result<Value> {
            match (request.mode, request.id.as_deref()) {
                (Some(CallMode::List), _) => Ok(json!({"list": [], "sid": request
                    .context
                    .identity
                    .and_then(|i| i.sid)})),
                (Some(CallMode::Get), Some("missing")) => {
                    Err(StatusError::not_found("id:missing").into())
                }
                (Some(CallMode::Get), Some("broken")) => Err(anyhow::anyhow!("database down")),
                (Some(CallMode::Put), Some(id)) => Ok(json!({"id": id, "body": request.body})),
                (_, id) => Ok(json!({"id": id, "param": request.param})),
            }
        }
    }

    pub(crate) fn endpoint() -> ProtocolEndpoint {
        ProtocolEndpoint::new()
            .route("user", WebRoute::Controller(Arc::new(Users)))
            .route(
                "hello",
                WebRoute::decoder(|mode, _id, _cmd| {
                    (mode == CallMode::List).then(|| handler_fn(|_req| async { Ok(json!("hello")) }))
                }),
            )
    }

    fn handler() -> WebHandler {
        WebHandler::new(Arc::new(endpoint()))
    }

    fn request(method: &str, params: Value) -> ApiProxyEvent {
        serde_json::from_value(json!({
            "httpMethod": method,
            "path": "/",
            "headers": {},
            "pathParameters": params,
            "requestContext": {"requestId": "req-1"}
        }))
        .unwrap()
    }

    async fn serve(event: ApiProxyEvent) -> HttpResponse {
        let value = handler()
            .handle(
                InboundEvent::new(serde_json::to_value(event).unwrap()),
                ExecutionContext::default(),
            )
            .await
            .unwrap();
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn get_with_id_reaches_controller() {
        let mut event = request("GET", json!({"type": "user", "id": "7"}));
        event.query_string_parameters = Some(BTreeMap::from([("q".into(), "x".into())]));
        let response = serve(event).await;
        assert_eq!(response.status_code, 200);
        let body: Value = serde_json::from_str(&response.body).unwrap();
        assert_eq!(body, json!({"id": "7", "param": {"q": "x"}}));
    }

    #[tokio::test]
    async fn get_without_id_is_a_listing() {
        let response = serve(request("GET", json!({"type": "hello"}))).await;
        assert_eq!(response.status_code, 200);
        assert_eq!(response.body, "hello");
    }

    #[tokio::test]
    async fn unserved_calls_are_not_found() {
        let response = serve(request("DELETE", json!({"type": "user", "id": "7"}))).await;
        assert_eq!(response.status_code, 404);
        assert_eq!(response.body, "404 NOT FOUND - DELETE /user/7");

        let response = serve(request("GET", json!({"type": "order"}))).await;
        assert_eq!(response.status_code, 404);
    }

    #[tokio::test]
    async fn handler_failures_map_to_status() {
        let response = serve(request("GET", json!({"type": "user", "id": "missing"}))).await;
        assert_eq!(response.status_code, 404);
        assert_eq!(response.body, "404 NOT FOUND - id:missing");

        let response = serve(request("GET", json!({"type": "user", "id": "broken"}))).await;
        assert_eq!(response.status_code, 503);
        assert_eq!(response.body, "database down");
    }

    #[tokio::test]
    async fn decodes_json_form_and_base64_bodies() {
        let params = json!({"type": "user", "id": "7", "cmd": "name"});

        let mut event = request("PUT", params.clone());
        event.body = Some(r#"{"name":"lemon"}"#.into());
        let body: Value = serde_json::from_str(&serve(event).await.body).unwrap();
        assert_eq!(body["body"], json!({"name": "lemon"}));

        let mut event = request("PUT", params.clone());
        event.headers = Some(BTreeMap::from([(
            "Content-Type".into(),
            "application/x-www-form-urlencoded".into(),
        )]));
        event.body = Some("name=lemon+tree&age=3".into());
        let body: Value = serde_json::from_str(&serve(event).await.body).unwrap();
        assert_eq!(body["body"], json!({"name": "lemon tree", "age": "3"}));

        let mut event = request("PUT", params);
        event.is_base64_encoded = true;
        event.body = Some(STANDARD.encode(r#"{"name":"b64"}"#));
        let body: Value = serde_json::from_str(&serve(event).await.body).unwrap();
        assert_eq!(body["body"], json!({"name": "b64"}));
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let mut event = request("PUT", json!({"type": "user", "id": "7", "cmd": "name"}));
        event.body = Some("[1, 2]".into());
        assert_eq!(serve(event).await.status_code, 400);
    }

    #[tokio::test]
    async fn options_gets_preflight() {
        let response = serve(request("OPTIONS", json!({"type": "user"}))).await;
        assert_eq!(response.status_code, 200);
        assert!(response.headers.contains_key("Access-Control-Allow-Methods"));
    }

    /// Delivers sync calls straight into a local router.
    struct Loopback(EventRouter);

    #[async_trait]
    impl DeliveryClient for Loopback {
        async fn invoke(&self, request: InvokeRequest) -> anyhow::Result<InvokeResponse> {
            let payload = self.0.dispatch(InboundEvent::new(request.payload)).await?;
            Ok(InvokeResponse {
                status_code: 200,
                function_error: None,
                payload: Some(payload),
            })
        }

        async fn publish(&self, _: relay_core::wire::SnsPublishInput) -> anyhow::Result<String> {
            anyhow::bail!("not wired")
        }

        async fn send(&self, _: relay_core::wire::SqsSendInput) -> anyhow::Result<String> {
            anyhow::bail!("not wired")
        }
    }

    fn loopback() -> ProtocolService {
        let mut router = EventRouter::new(contexts());
        router.register(Arc::new(handler()));
        let config = ServiceConfig {
            name: "caller-api".into(),
            stage: Some(Stage::Dev),
            report_policy: ReportPolicy::Rethrow,
            ..ServiceConfig::default()
        };
        ProtocolService::new(
            &config,
            Arc::new(Loopback(router)),
            Arc::new(StaticEndpoints::new()),
            Arc::new(RecordingReporter::default()),
        )
    }

    #[tokio::test]
    async fn relayed_sync_call_keeps_caller_context() {
        let protocol = loopback();
        let mut context = ExecutionContext::with_ids(Some("111".into()), Some("req-9".into()));
        context.identity_mut().sid = Some("s-1".into());

        let call = CallDescriptor::new("user-api", "user").with_context(context);
        let result = protocol.execute(call, None).await.unwrap();
        assert_eq!(result, json!({"list": [], "sid": "s-1"}));
    }

    #[tokio::test]
    async fn relayed_not_found_comes_back_as_rejection() {
        let protocol = loopback();
        let call = CallDescriptor::new("user-api", "user").with_id("missing");
        let err = protocol.execute(call, None).await.unwrap_err();
        assert_eq!(err.to_string(), "404 NOT FOUND - id:missing");
    }

    #[tokio::test]
    async fn relayed_event_decodes_through_transformer() {
        let call = CallDescriptor::new("user-api", "user")
            .with_id("7")
            .with_param("q", "x");
        let wire = WebTransformer
            .to_wire("web://user-api-dev-lambda/user/7", &call, None)
            .unwrap();
        let response = serve(wire.event).await;
        let body: Value = serde_json::from_str(&response.body).unwrap();
        assert_eq!(body, json!({"id": "7", "param": {"q": "x"}}));
    }
}
