//! Sync-call transport: a call shaped like an inbound HTTP-proxy request.
//!
//! The receiving function sees an ordinary proxy event whose
//! `x-protocol-context` header carries the caller's full execution context.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{ensure_consistent, DecodedCall, WireTransformer, HEADER_PROTOCOL_CONTEXT};
use crate::address::{encode_path, host_of};
use crate::context::ExecutionContext;
use crate::descriptor::{CallDescriptor, CallMode, SELF_SERVICE};
use crate::error::{AddressError, TransformError};

/// Path parameter names of the proxy resource `/{type}/{id}/{cmd}`.
pub const PARAM_TYPE: &str = "type";
pub const PARAM_ID: &str = "id";
pub const PARAM_CMD: &str = "cmd";

const PROXY_RESOURCE: &str = "/{type}/{id}/{cmd}";

// ---------------------------------------------------------------------------
// Proxy event shapes
// ---------------------------------------------------------------------------

/// Caller identity block of a proxy request context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyIdentity {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cognito_authentication_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cognito_identity_pool_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cognito_identity_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub account_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub caller: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Platform request metadata of a proxy event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyRequestContext {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub account_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub domain_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub http_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub connection_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub event_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub route_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub identity: Option<ProxyIdentity>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An HTTP-proxy integration event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiProxyEvent {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub http_method: String,
    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub path_parameters: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub query_string_parameters: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub is_base64_encoded: bool,
    #[serde(default)]
    pub request_context: Option<ProxyRequestContext>,
}

impl ApiProxyEvent {
    /// Case-insensitive header lookup.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.as_ref().and_then(|headers| {
            headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
        })
    }

    #[must_use]
    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_parameters
            .as_ref()
            .and_then(|p| p.get(name))
            .map(String::as_str)
    }

    /// True when the event carries a relayed protocol call.
    #[must_use]
    pub fn is_relayed(&self) -> bool {
        self.header(HEADER_PROTOCOL_CONTEXT).is_some()
    }
}

/// A sync call ready for delivery: target function plus the event payload.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncCall {
    pub function_name: String,
    pub event: ApiProxyEvent,
}

// ---------------------------------------------------------------------------
// WebTransformer
// ---------------------------------------------------------------------------

/// Sync-call transformer.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebTransformer;

impl WebTransformer {
    /// Decodes a relayed call from the proxy event the receiver was handed.
    ///
    /// # Errors
    ///
    /// Returns `TransformError` when the context header or request context is
    /// missing, the path parameters lack a type, or the ids contradict.
    pub fn decode_event(&self, event: &ApiProxyEvent) -> Result<DecodedCall, TransformError> {
        let header = event
            .header(HEADER_PROTOCOL_CONTEXT)
            .ok_or(TransformError::MissingField("headers.x-protocol-context"))?;
        let request_context = event
            .request_context
            .as_ref()
            .ok_or(TransformError::MissingField("requestContext"))?;
        let context: ExecutionContext =
            serde_json::from_str(header).map_err(TransformError::json(HEADER_PROTOCOL_CONTEXT))?;
        ensure_consistent(
            &context,
            request_context.account_id.as_deref(),
            request_context.request_id.as_deref(),
        )?;

        let resource_type = event
            .path_param(PARAM_TYPE)
            .ok_or(TransformError::MissingField("pathParameters.type"))?
            .to_string();
        let id = event.path_param(PARAM_ID).map(str::to_string);
        let cmd = event.path_param(PARAM_CMD).map(str::to_string);
        let mode = CallMode::from_http(&event.http_method, id.as_deref(), cmd.as_deref())
            .ok_or_else(|| TransformError::InvalidField {
                field: "httpMethod",
                reason: format!("unsupported method `{}`", event.http_method),
            })?;
        let body = match event.body.as_deref().filter(|b| !b.is_empty()) {
            None => None,
            Some(raw) => match serde_json::from_str(raw).map_err(TransformError::json("body"))? {
                Value::Object(map) => Some(map),
                _ => {
                    return Err(TransformError::InvalidField {
                        field: "body",
                        reason: "expected a JSON object".to_string(),
                    })
                }
            },
        };

        Ok(DecodedCall {
            descriptor: CallDescriptor {
                service: SELF_SERVICE.to_string(),
                stage: request_context.stage.as_deref().and_then(|s| s.parse().ok()),
                resource_type,
                mode: Some(mode),
                id,
                cmd,
                param: event.query_string_parameters.clone().unwrap_or_default(),
                body,
                context,
            },
            callback: None,
        })
    }
}

impl WireTransformer for WebTransformer {
    type Message = SyncCall;

    fn to_wire(
        &self,
        address: &str,
        call: &CallDescriptor,
        _callback: Option<&str>,
    ) -> Result<SyncCall, TransformError> {
        let function_name = host_of(address)
            .ok_or_else(|| AddressError::Malformed {
                address: address.to_string(),
                reason: "missing host",
            })?
            .to_string();
        if call.resource_type.is_empty() {
            return Err(TransformError::MissingField("type"));
        }
        let call = call.clone().normalized();
        let mode = call.resolved_mode();

        let mut path_parameters = BTreeMap::new();
        path_parameters.insert(PARAM_TYPE.to_string(), call.resource_type.clone());
        if let Some(id) = &call.id {
            path_parameters.insert(PARAM_ID.to_string(), id.clone());
        }
        if let Some(cmd) = call.cmd.as_ref().filter(|c| !c.is_empty()) {
            path_parameters.insert(PARAM_CMD.to_string(), cmd.clone());
        }

        let mut headers = BTreeMap::new();
        headers.insert(
            HEADER_PROTOCOL_CONTEXT.to_string(),
            serde_json::to_string(&call.context)
                .map_err(TransformError::json(HEADER_PROTOCOL_CONTEXT))?,
        );
        let body = call
            .body
            .map(|b| serde_json::to_string(&Value::Object(b)))
            .transpose()
            .map_err(TransformError::json("body"))?;
        if body.is_some() {
            headers.insert(
                "content-type".to_string(),
                "application/json; charset=utf-8".to_string(),
            );
        }

        let path = encode_path(&call.resource_type, call.id.as_deref(), call.cmd.as_deref());
        let request_context = ProxyRequestContext {
            account_id: call.context.account_id.clone(),
            request_id: call.context.request_id.clone(),
            stage: call.stage.map(|s| s.to_string()),
            domain_name: Some(function_name.clone()),
            http_method: Some(mode.http_method().to_string()),
            path: Some(path.clone()),
            ..ProxyRequestContext::default()
        };

        Ok(SyncCall {
            function_name,
            event: ApiProxyEvent {
                resource: Some(PROXY_RESOURCE.to_string()),
                path,
                http_method: mode.http_method().to_string(),
                headers: Some(headers),
                path_parameters: Some(path_parameters),
                query_string_parameters: (!call.param.is_empty()).then_some(call.param),
                body,
                is_base64_encoded: false,
                request_context: Some(request_context),
            },
        })
    }

    fn from_wire(&self, message: &SyncCall) -> Result<DecodedCall, TransformError> {
        self.decode_event(&message.event)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::address::Stage;
    use crate::context::Identity;

    fn sample_call() -> CallDescriptor {
        let mut body = Map::new();
        body.insert("name".into(), json!("lemon"));
        CallDescriptor::new("hello-api", "user")
            .with_stage(Stage::Dev)
            .with_mode(CallMode::Put)
            .with_id("u 1")
            .with_cmd("profile/name")
            .with_param("force", "true")
            .with_body(body)
            .with_context(ExecutionContext {
                identity: Some(Identity {
                    sid: Some("s-1".into()),
                    ..Identity::default()
                }),
                account_id: Some("085403634746".into()),
                request_id: Some("req-1".into()),
                depth: Some(1),
                ..ExecutionContext::default()
            })
    }

    #[test]
    fn encodes_like_a_proxy_request() {
        let call = WebTransformer
            .to_wire("web://085403634746@hello-api-dev-lambda/user/u%201#1.0", &sample_call(), None)
            .unwrap();
        assert_eq!(call.function_name, "hello-api-dev-lambda");
        let event = &call.event;
        assert_eq!(event.http_method, "PUT");
        assert_eq!(event.path, "/user/u%201/profile/name");
        assert_eq!(event.path_param("id"), Some("u 1"));
        assert_eq!(event.path_param("cmd"), Some("profile/name"));
        assert!(event.is_relayed());
        let rc = event.request_context.as_ref().unwrap();
        assert_eq!(rc.account_id.as_deref(), Some("085403634746"));
        assert_eq!(rc.request_id.as_deref(), Some("req-1"));
        assert_eq!(
            serde_json::from_str::<Value>(event.body.as_deref().unwrap()).unwrap(),
            json!({"name": "lemon"})
        );
    }

    #[test]
    fn decodes_what_it_encodes() {
        let original = sample_call();
        let wire = WebTransformer
            .to_wire("web://hello-api-dev-lambda/user", &original, None)
            .unwrap();
        let decoded = WebTransformer.from_wire(&wire).unwrap();
        let descriptor = decoded.descriptor;
        assert_eq!(descriptor.service, "self");
        assert_eq!(descriptor.stage, Some(Stage::Dev));
        assert_eq!(descriptor.mode, Some(CallMode::Put));
        assert_eq!(descriptor.resource_type, original.resource_type);
        assert_eq!(descriptor.id, original.id);
        assert_eq!(descriptor.cmd, original.cmd);
        assert_eq!(descriptor.param, original.param);
        assert_eq!(descriptor.body, original.body);
        assert_eq!(descriptor.context, original.context);
        assert!(decoded.callback.is_none());
    }

    #[test]
    fn empty_id_survives_and_absent_id_lists() {
        let call = CallDescriptor::new("self", "user").with_id("");
        let wire = WebTransformer.to_wire("web://h/user/", &call, None).unwrap();
        let decoded = WebTransformer.from_wire(&wire).unwrap().descriptor;
        assert_eq!(decoded.id.as_deref(), Some(""));
        assert_eq!(decoded.mode, Some(CallMode::Get));

        let list = CallDescriptor::new("self", "user");
        let wire = WebTransformer.to_wire("web://h/user", &list, None).unwrap();
        let decoded = WebTransformer.from_wire(&wire).unwrap().descriptor;
        assert_eq!(decoded.mode, Some(CallMode::List));
        assert!(decoded.id.is_none());
    }

    #[test]
    fn command_without_id_keeps_get() {
        let call = CallDescriptor::new("self", "user")
            .with_mode(CallMode::Get)
            .with_cmd("x");
        let wire = WebTransformer.to_wire("web://h/user//x", &call, None).unwrap();
        assert_eq!(wire.event.http_method, "GET");
        let decoded = WebTransformer.from_wire(&wire).unwrap().descriptor;
        assert_eq!(decoded.mode, Some(CallMode::Get));
        assert!(decoded.id.is_none());
        assert_eq!(decoded.cmd.as_deref(), Some("x"));
        assert_eq!(decoded.clone().normalized().cmd.as_deref(), Some("x"));
    }

    proptest! {
        #[test]
        fn command_without_id_round_trips(
            mode in prop::sample::select(vec![
                CallMode::Get,
                CallMode::Post,
                CallMode::Put,
                CallMode::Patch,
                CallMode::Delete,
            ]),
            cmd in "[a-zA-Z0-9 /._-]{1,12}",
        ) {
            let call = CallDescriptor::new("self", "user")
                .with_mode(mode)
                .with_cmd(cmd.clone());
            let wire = WebTransformer.to_wire("web://h/user", &call, None).unwrap();
            let decoded = WebTransformer.from_wire(&wire).unwrap().descriptor.normalized();
            prop_assert_eq!(decoded.mode, Some(mode));
            prop_assert_eq!(decoded.id, None);
            prop_assert_eq!(decoded.cmd, Some(cmd));
        }
    }

    #[test]
    fn rejects_missing_context_header() {
        let mut wire = WebTransformer
            .to_wire("web://h/user", &sample_call(), None)
            .unwrap();
        wire.event.headers = None;
        assert!(matches!(
            WebTransformer.from_wire(&wire),
            Err(TransformError::MissingField("headers.x-protocol-context"))
        ));
    }

    #[test]
    fn rejects_missing_request_context() {
        let mut wire = WebTransformer
            .to_wire("web://h/user", &sample_call(), None)
            .unwrap();
        wire.event.request_context = None;
        assert!(matches!(
            WebTransformer.from_wire(&wire),
            Err(TransformError::MissingField("requestContext"))
        ));
    }

    #[test]
    fn rejects_contradicting_ids() {
        let mut wire = WebTransformer
            .to_wire("web://h/user", &sample_call(), None)
            .unwrap();
        if let Some(rc) = wire.event.request_context.as_mut() {
            rc.request_id = Some("req-forged".into());
        }
        assert!(matches!(
            WebTransformer.from_wire(&wire),
            Err(TransformError::ContextMismatch { field: "requestId", .. })
        ));

        let mut wire = WebTransformer
            .to_wire("web://h/user", &sample_call(), None)
            .unwrap();
        if let Some(rc) = wire.event.request_context.as_mut() {
            rc.account_id = Some("999".into());
        }
        assert!(matches!(
            WebTransformer.from_wire(&wire),
            Err(TransformError::ContextMismatch { field: "accountId", .. })
        ));
    }

    #[test]
    fn header_lookup_ignores_case() {
        let event: ApiProxyEvent = serde_json::from_value(json!({
            "httpMethod": "GET",
            "path": "/",
            "headers": {"X-Protocol-Context": "{}", "Host": "example.com"},
            "pathParameters": null,
            "requestContext": {"requestId": "r"}
        }))
        .unwrap();
        assert_eq!(event.header("host"), Some("example.com"));
        assert!(event.is_relayed());
        assert!(event.path_parameters.is_none());
    }
}
