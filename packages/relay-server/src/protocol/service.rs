use std::sync::Arc;

use relay_core::wire::{SnsTransformer, SqsTransformer, WebTransformer, WireTransformer};
use relay_core::{
    AddressCodec, AddressError, CallDescriptor, CallMode, CallbackDescriptor, ExecutionContext,
    Scheme, TransformError,
};
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::config::{ReportPolicy, ServiceConfig};
use crate::traits::{
    DeliveryClient, EndpointResolver, ErrorReport, ErrorReporter, InvokeRequest, InvokeResponse,
};

/// Upper bound of a queue delivery delay.
pub const MAX_DELAY_SECONDS: i64 = 900;
/// Delay used by [`ProtocolService::enqueue_default`].
pub const DEFAULT_DELAY_SECONDS: i64 = 10;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A delivery that reached (or failed to reach) the target.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("transport failure: {0}")]
    Transport(#[source] anyhow::Error),
    /// Client-side rejection (400/404); the message is the literal body.
    #[error("{message}")]
    Rejected { status: u16, message: String },
    #[error("remote error {status}: {body}")]
    Remote { status: u16, body: String },
    #[error("function error ({kind}): {message}")]
    Function { kind: String, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
    #[error("invalid request: {0}")]
    Validation(String),
}

impl ProtocolError {
    /// Address and validation errors are caller bugs: they fail fast and are
    /// never reported.
    #[must_use]
    pub fn is_reportable(&self) -> bool {
        matches!(self, Self::Transform(_) | Self::Delivery(_))
    }
}

// ---------------------------------------------------------------------------
// ProtocolService
// ---------------------------------------------------------------------------

/// Sends calls to other services (or to this one) over the three transports.
pub struct ProtocolService {
    codec: AddressCodec,
    policy: ReportPolicy,
    web: WebTransformer,
    sns: SnsTransformer,
    sqs: SqsTransformer,
    delivery: Arc<dyn DeliveryClient>,
    endpoints: Arc<dyn EndpointResolver>,
    reporter: Arc<dyn ErrorReporter>,
}

impl ProtocolService {
    #[must_use]
    pub fn new(
        config: &ServiceConfig,
        delivery: Arc<dyn DeliveryClient>,
        endpoints: Arc<dyn EndpointResolver>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            codec: config.codec(),
            policy: config.report_policy,
            web: WebTransformer,
            sns: SnsTransformer::new(config.target()),
            sqs: SqsTransformer::new(config.target()),
            delivery,
            endpoints,
            reporter,
        }
    }

    #[must_use]
    pub fn codec(&self) -> &AddressCodec {
        &self.codec
    }

    /// Address of `call` on `scheme`.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::Address` when the service or type is missing.
    pub fn address_of(&self, scheme: Scheme, call: &CallDescriptor) -> Result<String, ProtocolError> {
        Ok(self.codec.build(scheme, call)?)
    }

    /// Calls the target synchronously and returns its answer.
    ///
    /// The sync-call address is built from `call` unless `address` is given.
    /// Failures are always reported and then returned.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` on address, encoding or delivery failure,
    /// including any non-2xx answer from the target.
    #[instrument(skip_all, fields(service = %call.service, resource = %call.resource_type))]
    pub async fn execute(
        &self,
        call: CallDescriptor,
        address: Option<&str>,
    ) -> Result<Value, ProtocolError> {
        let call = self.stamp(call);
        let address = match address {
            Some(address) => address.to_string(),
            None => self.codec.build(Scheme::Web, &call)?,
        };
        let result = self.invoke(&address, &call).await;
        if let Err(err) = &result {
            if err.is_reportable() {
                self.report("execute", err, &call.context).await;
            }
        }
        result
    }

    async fn invoke(&self, address: &str, call: &CallDescriptor) -> Result<Value, ProtocolError> {
        let wire = self.web.to_wire(address, call, None)?;
        let payload =
            serde_json::to_value(&wire.event).map_err(TransformError::json("event"))?;
        debug!(%address, function = %wire.function_name, "invoking");
        let response = self
            .delivery
            .invoke(InvokeRequest {
                function_name: wire.function_name,
                payload,
            })
            .await
            .map_err(DeliveryError::Transport)?;
        Ok(decode_invoke(response)?)
    }

    /// Publishes `call` to the target's topic.
    ///
    /// Returns the provider message id, or `None` when a failure was
    /// reported and swallowed.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::Address` immediately, and encoding or delivery
    /// failures when the report policy rethrows.
    #[instrument(skip_all, fields(service = %call.service, resource = %call.resource_type))]
    pub async fn notify(
        &self,
        call: CallDescriptor,
        callback: Option<&CallbackDescriptor>,
    ) -> Result<Option<String>, ProtocolError> {
        let call = self.stamp(call);
        let address = self.codec.build(Scheme::Sns, &call)?;
        let callback = self.callback_address(callback, &call.context)?;
        let outcome = async {
            let input = self.sns.to_wire(&address, &call, callback.as_deref())?;
            debug!(%address, topic = %input.topic_arn, "publishing");
            let id = self
                .delivery
                .publish(input)
                .await
                .map_err(DeliveryError::Transport)?;
            Ok::<_, ProtocolError>(id)
        }
        .await;
        self.settle("notify", outcome, &call.context).await
    }

    /// Sends `call` to the target's queue after `delay_seconds`.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::Validation` for a delay outside `0..=900`
    /// before anything is sent; otherwise as [`Self::notify`].
    #[instrument(skip_all, fields(service = %call.service, resource = %call.resource_type, delay_seconds = delay_seconds))]
    pub async fn enqueue(
        &self,
        call: CallDescriptor,
        callback: Option<&CallbackDescriptor>,
        delay_seconds: i64,
    ) -> Result<Option<String>, ProtocolError> {
        let delay = u32::try_from(delay_seconds)
            .ok()
            .filter(|d| i64::from(*d) <= MAX_DELAY_SECONDS)
            .ok_or_else(|| {
                ProtocolError::Validation(format!(
                    "@delay must be within 0..={MAX_DELAY_SECONDS} seconds, got {delay_seconds}"
                ))
            })?;
        let call = self.stamp(call);
        let address = self.codec.build(Scheme::Sqs, &call)?;
        let callback = self.callback_address(callback, &call.context)?;
        let outcome = async {
            let input = self
                .sqs
                .to_wire(&address, &call, callback.as_deref())?
                .with_delay(delay);
            debug!(%address, queue = %input.queue_url, "sending");
            let id = self
                .delivery
                .send(input)
                .await
                .map_err(DeliveryError::Transport)?;
            Ok::<_, ProtocolError>(id)
        }
        .await;
        self.settle("enqueue", outcome, &call.context).await
    }

    /// [`Self::enqueue`] with the default delay.
    ///
    /// # Errors
    ///
    /// As [`Self::enqueue`].
    pub async fn enqueue_default(
        &self,
        call: CallDescriptor,
        callback: Option<&CallbackDescriptor>,
    ) -> Result<Option<String>, ProtocolError> {
        self.enqueue(call, callback, DEFAULT_DELAY_SECONDS).await
    }

    /// Publishes a plain (non-protocol) message to `endpoint`, a topic ARN or
    /// a bare name known to the endpoint resolver.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::Address` for an unknown endpoint name; encoding
    /// or delivery failures as [`Self::notify`].
    #[instrument(skip_all, fields(endpoint = %endpoint))]
    pub async fn broadcast(
        &self,
        context: &ExecutionContext,
        endpoint: &str,
        body: &Map<String, Value>,
    ) -> Result<Option<String>, ProtocolError> {
        let topic_arn = if endpoint.starts_with("arn:") {
            endpoint.to_string()
        } else {
            let resolved = match self.endpoints.resolve(endpoint).await {
                Ok(resolved) => resolved,
                Err(err) => {
                    let err = ProtocolError::Delivery(DeliveryError::Transport(err));
                    return self.settle("broadcast", Err(err), context).await;
                }
            };
            resolved.ok_or_else(|| AddressError::UnknownEndpoint {
                name: endpoint.to_string(),
            })?
        };
        let outcome = async {
            let input = SnsTransformer::plain(topic_arn, body, context)?;
            let id = self
                .delivery
                .publish(input)
                .await
                .map_err(DeliveryError::Transport)?;
            Ok::<_, ProtocolError>(id)
        }
        .await;
        self.settle("broadcast", outcome, context).await
    }

    /// Posts the outcome of a relayed call back to its callback address.
    ///
    /// A successful object result becomes the body; any other result is
    /// wrapped as `{"result": ...}`, a failure as `{"error": "..."}`.
    ///
    /// # Errors
    ///
    /// As [`Self::execute`].
    pub async fn callback(
        &self,
        address: &str,
        outcome: Result<Value, String>,
        context: &ExecutionContext,
    ) -> Result<Value, ProtocolError> {
        let parsed = self.codec.parse(address)?;
        let body = match outcome {
            Ok(Value::Object(map)) => map,
            Ok(other) => Map::from_iter([("result".to_string(), other)]),
            Err(message) => Map::from_iter([("error".to_string(), Value::String(message))]),
        };
        let mut call = parsed.into_descriptor();
        call.mode = Some(CallMode::Post);
        call.body = Some(body);
        call.context = ExecutionContext {
            account_id: call.context.account_id.or_else(|| context.account_id.clone()),
            ..context.clone()
        };
        self.execute(call, Some(address)).await
    }

    fn callback_address(
        &self,
        callback: Option<&CallbackDescriptor>,
        context: &ExecutionContext,
    ) -> Result<Option<String>, AddressError> {
        callback
            .map(|cb| self.codec.build_callback(Scheme::Web, cb, context))
            .transpose()
    }

    /// Marks one more hop and the sender on the outbound context.
    fn stamp(&self, mut call: CallDescriptor) -> CallDescriptor {
        let context = &mut call.context;
        context.depth = Some(context.depth.unwrap_or(0).saturating_add(1));
        if context.source.is_none() {
            context.source = self.codec.self_address(Scheme::Api, context).ok();
        }
        call
    }

    async fn settle(
        &self,
        scope: &str,
        outcome: Result<String, ProtocolError>,
        context: &ExecutionContext,
    ) -> Result<Option<String>, ProtocolError> {
        match outcome {
            Ok(id) => Ok(Some(id)),
            Err(err) if !err.is_reportable() => Err(err),
            Err(err) => {
                self.report(scope, &err, context).await;
                match self.policy {
                    ReportPolicy::Rethrow => Err(err),
                    ReportPolicy::Swallow => Ok(None),
                }
            }
        }
    }

    async fn report(&self, scope: &str, err: &ProtocolError, context: &ExecutionContext) {
        self.reporter
            .report(ErrorReport::new(scope, err).with_request_id(context.request_id.clone()))
            .await;
    }
}

/// Interprets an invoke result carrying a web response envelope.
fn decode_invoke(response: InvokeResponse) -> Result<Value, DeliveryError> {
    if let Some(kind) = response.function_error {
        let message = response
            .payload
            .as_ref()
            .and_then(|p| p.get("errorMessage"))
            .and_then(Value::as_str)
            .unwrap_or("function failed")
            .to_string();
        return Err(DeliveryError::Function { kind, message });
    }
    if !(200..300).contains(&response.status_code) {
        return Err(DeliveryError::Remote {
            status: response.status_code,
            body: response.payload.map(|p| p.to_string()).unwrap_or_default(),
        });
    }
    let Some(payload) = response.payload else {
        return Ok(Value::Null);
    };
    let Some(status) = payload
        .get("statusCode")
        .and_then(Value::as_u64)
        .and_then(|s| u16::try_from(s).ok())
    else {
        return Ok(payload);
    };
    let body = match payload.get("body") {
        Some(Value::String(body)) => body.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    match status {
        200..=299 if !is_json(&payload) => Ok(Value::String(body)),
        200..=299 => Ok(serde_json::from_str(&body).unwrap_or(Value::String(body))),
        400 | 404 => Err(DeliveryError::Rejected {
            status,
            message: body,
        }),
        _ => Err(DeliveryError::Remote { status, body }),
    }
}

/// A declared non-JSON content type keeps the body a string. Without one the
/// body is parsed when it can be.
fn is_json(envelope: &Value) -> bool {
    let content_type = envelope
        .get("headers")
        .and_then(Value::as_object)
        .and_then(|headers| {
            headers
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
        })
        .and_then(|(_, value)| value.as_str());
    content_type.map_or(true, |ct| ct.to_ascii_lowercase().contains("json"))
}
