use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Caller identity attached to an [`ExecutionContext`].
///
/// Known fields are typed; anything else a token or upstream service put into
/// the identity object is kept in `extra` so a relay hop never loses it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Session id. Required for identities passed as plain JSON.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub uid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub gid: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub roles: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub lang: Option<String>,
    /// Opaque identity text that was neither JSON nor a signed token.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub meta: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub identity_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub identity_pool_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub identity_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub account_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub caller: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Per-call metadata threaded through a call and every relay hop after it.
///
/// Serialized verbatim into the `x-protocol-context` header of a relayed
/// sync call, and into the descriptor body of pub/sub and queue relays.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub identity: Option<Identity>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub account_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub client_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub cookie: BTreeMap<String, String>,
    /// Address of the service that issued the call.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source: Option<String>,
    /// Number of relay hops this context has travelled.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub depth: Option<u32>,
}

impl ExecutionContext {
    /// Context carrying only correlation ids.
    #[must_use]
    pub fn with_ids(account_id: Option<String>, request_id: Option<String>) -> Self {
        Self {
            account_id,
            request_id,
            ..Self::default()
        }
    }

    /// Returns the identity, creating an empty one first if needed.
    pub fn identity_mut(&mut self) -> &mut Identity {
        self.identity.get_or_insert_with(Identity::default)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn context_serializes_camel_case_and_skips_empty() {
        let ctx = ExecutionContext {
            account_id: Some("085403634746".into()),
            request_id: Some("req-1".into()),
            client_ip: Some("10.0.0.1".into()),
            depth: Some(2),
            ..ExecutionContext::default()
        };
        let value = serde_json::to_value(&ctx).unwrap();
        assert_eq!(
            value,
            json!({
                "accountId": "085403634746",
                "requestId": "req-1",
                "clientIp": "10.0.0.1",
                "depth": 2,
            })
        );
    }

    #[test]
    fn identity_keeps_unknown_claims() {
        let raw = json!({
            "sid": "s-1",
            "uid": "u-1",
            "roles": ["admin"],
            "tenant": "acme",
            "scopes": {"read": true},
        });
        let identity: Identity = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(identity.sid.as_deref(), Some("s-1"));
        assert_eq!(identity.roles, vec!["admin".to_string()]);
        assert_eq!(identity.extra.get("tenant"), Some(&json!("acme")));

        let back = serde_json::to_value(&identity).unwrap();
        assert_eq!(back, raw);
    }

    #[test]
    fn identity_mut_creates_identity_once() {
        let mut ctx = ExecutionContext::default();
        ctx.identity_mut().lang = Some("ko".into());
        ctx.identity_mut().sid = Some("s".into());
        let identity = ctx.identity.unwrap();
        assert_eq!(identity.lang.as_deref(), Some("ko"));
        assert_eq!(identity.sid.as_deref(), Some("s"));
    }
}
