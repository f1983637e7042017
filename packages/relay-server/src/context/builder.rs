use relay_core::wire::{
    ApiProxyEvent, ProxyIdentity, WebTransformer, HEADER_IDENTITY, HEADER_LANGUAGE,
};
use relay_core::{ExecutionContext, Identity, TransformError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::cookie::parse_cookie;
use super::token::{is_token, TokenError, TokenVerifier};

/// Invocation metadata supplied by the function runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformContext {
    #[serde(default)]
    pub aws_request_id: Option<String>,
    /// `arn:aws:lambda:<region>:<account>:function:<name>[:<alias>]`
    #[serde(default)]
    pub invoked_function_arn: Option<String>,
    #[serde(default)]
    pub function_name: Option<String>,
    #[serde(default)]
    pub function_version: Option<String>,
}

impl PlatformContext {
    /// Account id taken from the invoked function ARN.
    #[must_use]
    pub fn account_id(&self) -> Option<&str> {
        self.invoked_function_arn
            .as_deref()
            .and_then(|arn| arn.split(':').nth(4))
            .filter(|a| !a.is_empty())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("invalid relayed context: {0}")]
    Relay(#[from] TransformError),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("identity is missing a sid")]
    MissingSid,
    #[error("invalid identity header: {0}")]
    Identity(#[source] serde_json::Error),
    #[error("invalid proxy event: {0}")]
    Event(#[source] serde_json::Error),
}

/// Produces the [`ExecutionContext`] of an inbound event.
pub struct ContextBuilder {
    tokens: TokenVerifier,
    relay: WebTransformer,
}

impl ContextBuilder {
    #[must_use]
    pub fn new(tokens: TokenVerifier) -> Self {
        Self {
            tokens,
            relay: WebTransformer,
        }
    }

    /// Context for any inbound event. HTTP-shaped events (those with a
    /// `requestContext`) get the full treatment; others only carry the
    /// platform correlation ids.
    ///
    /// # Errors
    ///
    /// Returns `ContextError` when a relayed context contradicts its
    /// metadata or the identity header is invalid.
    pub async fn build(
        &self,
        event: &Value,
        platform: Option<&PlatformContext>,
    ) -> Result<ExecutionContext, ContextError> {
        if event.get("requestContext").is_some_and(Value::is_object) {
            let proxy = ApiProxyEvent::deserialize(event).map_err(ContextError::Event)?;
            self.from_proxy(&proxy, platform).await
        } else {
            Ok(Self::from_platform(platform))
        }
    }

    /// Context for an HTTP-proxy event.
    ///
    /// # Errors
    ///
    /// See [`Self::build`].
    pub async fn from_proxy(
        &self,
        event: &ApiProxyEvent,
        platform: Option<&PlatformContext>,
    ) -> Result<ExecutionContext, ContextError> {
        if event.is_relayed() {
            let context = self.relay.decode_event(event)?.descriptor.context;
            debug!(depth = context.depth.unwrap_or(0), "recovered relayed context");
            return Ok(context);
        }

        let mut context = ExecutionContext::default();
        if let Some(raw) = non_empty(event.header(HEADER_IDENTITY)) {
            context.identity = Some(self.identity(raw, event.header("host").is_none()).await?);
        }
        if let Some(lang) = non_empty(event.header(HEADER_LANGUAGE)) {
            context.identity_mut().lang = Some(lang.to_string());
        }

        let request_context = event.request_context.as_ref();
        if let Some(platform_identity) = request_context.and_then(|rc| rc.identity.as_ref()) {
            overlay(&mut context, platform_identity);
            context.client_ip.clone_from(&platform_identity.source_ip);
            context.user_agent.clone_from(&platform_identity.user_agent);
        }
        if context.user_agent.is_none() {
            context.user_agent = non_empty(event.header("user-agent")).map(str::to_string);
        }
        if let Some(cookie) = non_empty(event.header("cookie")) {
            context.cookie = parse_cookie(cookie);
        }

        context.request_id = request_context
            .and_then(|rc| rc.request_id.clone())
            .or_else(|| platform.and_then(|p| p.aws_request_id.clone()));
        context.account_id = request_context
            .and_then(|rc| rc.account_id.clone())
            .or_else(|| platform.and_then(|p| p.account_id().map(str::to_string)));
        context.domain = request_context
            .and_then(|rc| rc.domain_name.clone())
            .or_else(|| event.header("host").map(str::to_string));
        Ok(context)
    }

    /// Context for events without HTTP metadata.
    #[must_use]
    pub fn from_platform(platform: Option<&PlatformContext>) -> ExecutionContext {
        ExecutionContext::with_ids(
            platform.and_then(|p| p.account_id().map(str::to_string)),
            platform.and_then(|p| p.aws_request_id.clone()),
        )
    }

    async fn identity(&self, raw: &str, internal: bool) -> Result<Identity, ContextError> {
        if internal && raw.starts_with('{') {
            let identity: Identity = serde_json::from_str(raw).map_err(ContextError::Identity)?;
            if identity.sid.as_deref().map_or(true, str::is_empty) {
                return Err(ContextError::MissingSid);
            }
            return Ok(identity);
        }
        if is_token(raw) {
            return Ok(self.tokens.verify(raw).await?);
        }
        Ok(Identity {
            meta: Some(raw.to_string()),
            ..Identity::default()
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Copies the platform-asserted identity fields that are present.
fn overlay(context: &mut ExecutionContext, platform: &ProxyIdentity) {
    let sources = [
        &platform.cognito_authentication_provider,
        &platform.cognito_identity_pool_id,
        &platform.cognito_identity_id,
        &platform.account_id,
        &platform.user_agent,
        &platform.caller,
    ];
    if sources.iter().all(|s| s.is_none()) {
        return;
    }
    let identity = context.identity_mut();
    let targets = [
        &mut identity.identity_provider,
        &mut identity.identity_pool_id,
        &mut identity.identity_id,
        &mut identity.account_id,
        &mut identity.user_agent,
        &mut identity.caller,
    ];
    for (target, source) in targets.into_iter().zip(sources) {
        if let Some(value) = source {
            *target = Some(value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::context::token::tests::{token, verifier};

    fn builder() -> ContextBuilder {
        ContextBuilder::new(verifier(1_700_000_000_000))
    }

    fn http_event(headers: Value) -> Value {
        json!({
            "resource": "/{type}/{id}/{cmd}",
            "path": "/user/1",
            "httpMethod": "GET",
            "headers": headers,
            "pathParameters": {"type": "user", "id": "1"},
            "queryStringParameters": null,
            "body": null,
            "isBase64Encoded": false,
            "requestContext": {
                "accountId": "085403634746",
                "requestId": "req-1",
                "stage": "dev",
                "domainName": "api.example.com",
                "identity": {
                    "sourceIp": "10.0.0.9",
                    "userAgent": "curl/8.0",
                    "cognitoIdentityId": "ap-northeast-2:abc",
                    "caller": null
                }
            }
        })
    }

    #[tokio::test]
    async fn http_event_fills_correlation_and_client_fields() {
        let event = http_event(json!({
            "Host": "api.example.com",
            "Cookie": "sid=s-1; theme=dark",
            "X-Lemon-Language": "ko"
        }));
        let ctx = builder().build(&event, None).await.unwrap();
        assert_eq!(ctx.account_id.as_deref(), Some("085403634746"));
        assert_eq!(ctx.request_id.as_deref(), Some("req-1"));
        assert_eq!(ctx.client_ip.as_deref(), Some("10.0.0.9"));
        assert_eq!(ctx.user_agent.as_deref(), Some("curl/8.0"));
        assert_eq!(ctx.domain.as_deref(), Some("api.example.com"));
        assert_eq!(ctx.cookie["theme"], "dark");

        let identity = ctx.identity.unwrap();
        assert_eq!(identity.lang.as_deref(), Some("ko"));
        assert_eq!(identity.identity_id.as_deref(), Some("ap-northeast-2:abc"));
        assert_eq!(identity.user_agent.as_deref(), Some("curl/8.0"));
        assert!(identity.caller.is_none());
    }

    #[tokio::test]
    async fn internal_json_identity_requires_sid() {
        let event = http_event(json!({"x-lemon-identity": r#"{"sid":"s-1","uid":"u-1"}"#}));
        let ctx = builder().build(&event, None).await.unwrap();
        assert_eq!(ctx.identity.unwrap().uid.as_deref(), Some("u-1"));

        let event = http_event(json!({"x-lemon-identity": r#"{"uid":"u-1"}"#}));
        assert!(matches!(
            builder().build(&event, None).await,
            Err(ContextError::MissingSid)
        ));
    }

    #[tokio::test]
    async fn external_json_identity_is_kept_as_meta() {
        let raw = r#"{"sid":"forged"}"#;
        let event = http_event(json!({"host": "api.example.com", "x-lemon-identity": raw}));
        let identity = builder().build(&event, None).await.unwrap().identity.unwrap();
        assert!(identity.sid.is_none());
        assert_eq!(identity.meta.as_deref(), Some(raw));
    }

    #[tokio::test]
    async fn signed_token_identity_is_verified() {
        let token = token(&json!({"iss": "kms/lemon-identity-key", "sid": "s-9", "gid": "g"}));
        let event = http_event(json!({"host": "api.example.com", "x-lemon-identity": token}));
        let identity = builder().build(&event, None).await.unwrap().identity.unwrap();
        assert_eq!(identity.sid.as_deref(), Some("s-9"));
        assert_eq!(identity.gid.as_deref(), Some("g"));

        let bad = token.replace(".", ".x");
        let event = http_event(json!({"host": "h", "x-lemon-identity": bad}));
        assert!(builder().build(&event, None).await.is_err());
    }

    #[tokio::test]
    async fn relayed_context_is_recovered_verbatim() {
        let embedded = ExecutionContext {
            account_id: Some("085403634746".into()),
            request_id: Some("req-1".into()),
            source: Some("api://caller-api-dev".into()),
            depth: Some(3),
            ..ExecutionContext::default()
        };
        let event = http_event(json!({
            "x-protocol-context": serde_json::to_string(&embedded).unwrap()
        }));
        let ctx = builder().build(&event, None).await.unwrap();
        assert_eq!(ctx, embedded);
    }

    #[tokio::test]
    async fn relayed_context_with_other_request_id_is_rejected() {
        let embedded = ExecutionContext::with_ids(None, Some("req-other".into()));
        let event = http_event(json!({
            "x-protocol-context": serde_json::to_string(&embedded).unwrap()
        }));
        assert!(matches!(
            builder().build(&event, None).await,
            Err(ContextError::Relay(TransformError::ContextMismatch { field: "requestId", .. }))
        ));
    }

    #[tokio::test]
    async fn non_http_event_uses_platform_ids() {
        let platform = PlatformContext {
            aws_request_id: Some("aws-req".into()),
            invoked_function_arn: Some(
                "arn:aws:lambda:ap-northeast-2:085403634746:function:hello-api-dev-lambda".into(),
            ),
            ..PlatformContext::default()
        };
        let ctx = builder()
            .build(&json!({"cron": {"name": "daily"}}), Some(&platform))
            .await
            .unwrap();
        assert_eq!(ctx.request_id.as_deref(), Some("aws-req"));
        assert_eq!(ctx.account_id.as_deref(), Some("085403634746"));
        assert!(ctx.identity.is_none());
    }
}
