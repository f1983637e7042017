//! Wire transformers: a [`CallDescriptor`] onto each transport's native
//! message shape and back.
//!
//! - [`web`]: synchronous invoke, shaped like an inbound HTTP-proxy request
//! - [`sns`]: pub/sub publish with a marker subject
//! - [`sqs`]: queue send with a marker attribute
//!
//! Every transport also carries the correlation ids of the caller. Decoding
//! rejects messages whose embedded context contradicts them.

pub mod sns;
pub mod sqs;
pub mod web;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::address::{account_of, host_of};
use crate::context::ExecutionContext;
use crate::descriptor::CallDescriptor;
use crate::error::{AddressError, TransformError};

pub use sns::{SnsNotification, SnsPublishInput, SnsTransformer};
pub use sqs::{SqsRecord, SqsSendInput, SqsTransformer};
pub use web::{ApiProxyEvent, ProxyIdentity, ProxyRequestContext, SyncCall, WebTransformer};

/// Header carrying the serialized [`ExecutionContext`]; its presence marks a
/// relayed sync call.
pub const HEADER_PROTOCOL_CONTEXT: &str = "x-protocol-context";
/// Header carrying the caller identity (JSON object or signed token).
pub const HEADER_IDENTITY: &str = "x-lemon-identity";
/// Header overriding the identity language.
pub const HEADER_LANGUAGE: &str = "x-lemon-language";
/// Subject (pub/sub) and `Subject` attribute value (queue) of relayed calls.
pub const PROTOCOL_SUBJECT: &str = "PROTOCOL PARAMS";

pub const ATTR_SUBJECT: &str = "Subject";
pub const ATTR_ACCOUNT_ID: &str = "accountId";
pub const ATTR_REQUEST_ID: &str = "requestId";
pub const ATTR_CALLBACK: &str = "callback";

// ---------------------------------------------------------------------------
// WireTransformer
// ---------------------------------------------------------------------------

/// Converts a call descriptor to and from one transport's message shape.
pub trait WireTransformer {
    /// Transport-native message.
    type Message;

    /// Encodes `call` for delivery to `address`.
    ///
    /// # Errors
    ///
    /// Returns `TransformError` when the address or the descriptor lacks a
    /// field the transport needs.
    fn to_wire(
        &self,
        address: &str,
        call: &CallDescriptor,
        callback: Option<&str>,
    ) -> Result<Self::Message, TransformError>;

    /// Decodes a message back into the call it carries.
    ///
    /// # Errors
    ///
    /// Returns `TransformError` on a missing field, a missing or wrong relay
    /// marker, or contradicting correlation ids.
    fn from_wire(&self, message: &Self::Message) -> Result<DecodedCall, TransformError>;
}

/// A call recovered from the wire, together with its return address.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedCall {
    pub descriptor: CallDescriptor,
    pub callback: Option<String>,
}

/// Rejects a context whose ids contradict the transport's metadata.
///
/// Absence on either side is accepted; only two present, different values
/// are an error.
///
/// # Errors
///
/// Returns `TransformError::ContextMismatch` naming the first differing field.
pub fn ensure_consistent(
    context: &ExecutionContext,
    account_id: Option<&str>,
    request_id: Option<&str>,
) -> Result<(), TransformError> {
    let checks = [
        ("accountId", context.account_id.as_deref(), account_id),
        ("requestId", context.request_id.as_deref(), request_id),
    ];
    for (field, embedded, metadata) in checks {
        if let (Some(embedded), Some(metadata)) = (embedded, metadata) {
            if embedded != metadata {
                tracing::warn!(
                    field,
                    embedded,
                    metadata,
                    "relayed context contradicts transport metadata"
                );
                return Err(TransformError::ContextMismatch {
                    field,
                    context: embedded.to_string(),
                    metadata: metadata.to_string(),
                });
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Message attributes
// ---------------------------------------------------------------------------

/// A typed message attribute as accepted by publish and send APIs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MessageAttribute {
    pub data_type: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub string_value: Option<String>,
}

impl MessageAttribute {
    #[must_use]
    pub fn string(value: impl Into<String>) -> Self {
        Self {
            data_type: "String".to_string(),
            string_value: Some(value.into()),
        }
    }
}

pub type MessageAttributes = BTreeMap<String, MessageAttribute>;

/// Correlation attributes for `context`, plus the callback when given.
///
/// Empty values are left out; providers reject empty string attributes.
pub(crate) fn correlation_attributes(
    context: &ExecutionContext,
    callback: Option<&str>,
) -> MessageAttributes {
    let mut attrs = MessageAttributes::new();
    let pairs = [
        (ATTR_ACCOUNT_ID, context.account_id.as_deref()),
        (ATTR_REQUEST_ID, context.request_id.as_deref()),
        (ATTR_CALLBACK, callback),
    ];
    for (name, value) in pairs {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            attrs.insert(name.to_string(), MessageAttribute::string(value));
        }
    }
    attrs
}

pub(crate) fn attribute<'a>(attrs: &'a MessageAttributes, name: &str) -> Option<&'a str> {
    attrs.get(name).and_then(|a| a.string_value.as_deref())
}

// ---------------------------------------------------------------------------
// TransportTarget
// ---------------------------------------------------------------------------

/// Region and fallback account used to turn an address host into a
/// provider resource name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportTarget {
    pub region: String,
    /// Used when the address carries no account id.
    pub account_id: Option<String>,
}

impl TransportTarget {
    #[must_use]
    pub fn new(region: impl Into<String>, account_id: Option<String>) -> Self {
        Self {
            region: region.into(),
            account_id,
        }
    }

    fn parts<'a>(&'a self, address: &'a str) -> Result<(&'a str, &'a str), TransformError> {
        let host = host_of(address).ok_or_else(|| AddressError::Malformed {
            address: address.to_string(),
            reason: "missing host",
        })?;
        let account = account_of(address)
            .or(self.account_id.as_deref())
            .ok_or(TransformError::MissingField("accountId"))?;
        Ok((account, host))
    }

    /// Topic ARN for a `sns://` address.
    ///
    /// # Errors
    ///
    /// Returns `TransformError` when the host or account id is missing.
    pub fn topic_arn(&self, address: &str) -> Result<String, TransformError> {
        let (account, host) = self.parts(address)?;
        Ok(format!("arn:aws:sns:{}:{account}:{host}", self.region))
    }

    /// Queue URL for a `sqs://` address.
    ///
    /// # Errors
    ///
    /// Returns `TransformError` when the host or account id is missing.
    pub fn queue_url(&self, address: &str) -> Result<String, TransformError> {
        let (account, host) = self.parts(address)?;
        Ok(format!(
            "https://sqs.{}.amazonaws.com/{account}/{host}",
            self.region
        ))
    }
}
