//! Pub/sub transport.
//!
//! The descriptor travels as the JSON `Message` of a publish whose subject is
//! the relay marker. Receivers see either a record (`Records[].Sns`) or the
//! same object posted over HTTP; both normalize to [`SnsNotification`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{
    correlation_attributes, ensure_consistent, DecodedCall, MessageAttributes,
    TransportTarget, WireTransformer, ATTR_ACCOUNT_ID, ATTR_CALLBACK, ATTR_REQUEST_ID,
    PROTOCOL_SUBJECT,
};
use crate::context::ExecutionContext;
use crate::descriptor::CallDescriptor;
use crate::error::TransformError;

/// Publish request for one topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SnsPublishInput {
    pub topic_arn: String,
    /// Relay marker for protocol calls, absent for plain broadcasts.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub subject: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub message_attributes: MessageAttributes,
}

/// Attribute as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NotificationAttribute {
    #[serde(rename = "Type", default)]
    pub data_type: String,
    #[serde(default)]
    pub value: String,
}

/// A delivered notification: the `Sns` object of a record, or the body of
/// an HTTP subscription post.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SnsNotification {
    #[serde(rename = "Type", default)]
    pub kind: String,
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub topic_arn: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub message_attributes: BTreeMap<String, NotificationAttribute>,
    #[serde(rename = "SubscribeURL", skip_serializing_if = "Option::is_none", default)]
    pub subscribe_url: Option<String>,
    #[serde(rename = "UnsubscribeURL", skip_serializing_if = "Option::is_none", default)]
    pub unsubscribe_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub token: Option<String>,
}

impl SnsNotification {
    pub const SUBSCRIPTION_CONFIRMATION: &'static str = "SubscriptionConfirmation";
    pub const NOTIFICATION: &'static str = "Notification";

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.message_attributes.get(name).map(|a| a.value.as_str())
    }

    #[must_use]
    pub fn is_subscription_confirmation(&self) -> bool {
        self.kind == Self::SUBSCRIPTION_CONFIRMATION
    }

    /// True when the subject carries the relay marker.
    #[must_use]
    pub fn is_protocol(&self) -> bool {
        self.subject.as_deref() == Some(PROTOCOL_SUBJECT)
    }

    /// The message parsed as JSON, or kept as a string when it is not JSON.
    #[must_use]
    pub fn payload(&self) -> Value {
        serde_json::from_str(&self.message).unwrap_or_else(|_| Value::String(self.message.clone()))
    }
}

impl From<&SnsPublishInput> for SnsNotification {
    fn from(input: &SnsPublishInput) -> Self {
        Self {
            kind: Self::NOTIFICATION.to_string(),
            topic_arn: input.topic_arn.clone(),
            subject: input.subject.clone(),
            message: input.message.clone(),
            message_attributes: input
                .message_attributes
                .iter()
                .map(|(name, attr)| {
                    (
                        name.clone(),
                        NotificationAttribute {
                            data_type: attr.data_type.clone(),
                            value: attr.string_value.clone().unwrap_or_default(),
                        },
                    )
                })
                .collect(),
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// SnsTransformer
// ---------------------------------------------------------------------------

/// Pub/sub transformer.
#[derive(Debug, Clone)]
pub struct SnsTransformer {
    target: TransportTarget,
}

impl SnsTransformer {
    #[must_use]
    pub fn new(target: TransportTarget) -> Self {
        Self { target }
    }

    /// Decodes a relayed call from a delivered notification.
    ///
    /// # Errors
    ///
    /// Returns `TransformError` when the subject is not the relay marker, the
    /// message is not a descriptor, or the correlation ids contradict.
    pub fn from_notification(
        &self,
        notification: &SnsNotification,
    ) -> Result<DecodedCall, TransformError> {
        match notification.subject.as_deref() {
            Some(PROTOCOL_SUBJECT) => {}
            other => {
                return Err(TransformError::MarkerMismatch {
                    expected: PROTOCOL_SUBJECT,
                    found: other.unwrap_or_default().to_string(),
                })
            }
        }
        if notification.message.is_empty() {
            return Err(TransformError::MissingField("Message"));
        }
        let descriptor: CallDescriptor =
            serde_json::from_str(&notification.message).map_err(TransformError::json("Message"))?;
        ensure_consistent(
            &descriptor.context,
            notification.attribute(ATTR_ACCOUNT_ID),
            notification.attribute(ATTR_REQUEST_ID),
        )?;
        Ok(DecodedCall {
            descriptor,
            callback: notification
                .attribute(ATTR_CALLBACK)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
        })
    }

    /// A plain publish of `body` without the relay marker.
    ///
    /// # Errors
    ///
    /// Returns `TransformError::Json` when the body cannot be serialized.
    pub fn plain(
        topic_arn: impl Into<String>,
        body: &Map<String, Value>,
        context: &ExecutionContext,
    ) -> Result<SnsPublishInput, TransformError> {
        Ok(SnsPublishInput {
            topic_arn: topic_arn.into(),
            subject: None,
            message: serde_json::to_string(body).map_err(TransformError::json("Message"))?,
            message_attributes: correlation_attributes(context, None),
        })
    }
}

impl WireTransformer for SnsTransformer {
    type Message = SnsPublishInput;

    fn to_wire(
        &self,
        address: &str,
        call: &CallDescriptor,
        callback: Option<&str>,
    ) -> Result<SnsPublishInput, TransformError> {
        if call.resource_type.is_empty() {
            return Err(TransformError::MissingField("type"));
        }
        let topic_arn = self.target.topic_arn(address)?;
        let call = call.clone().normalized();
        Ok(SnsPublishInput {
            topic_arn,
            subject: Some(PROTOCOL_SUBJECT.to_string()),
            message: serde_json::to_string(&call).map_err(TransformError::json("Message"))?,
            message_attributes: correlation_attributes(&call.context, callback),
        })
    }

    fn from_wire(&self, message: &SnsPublishInput) -> Result<DecodedCall, TransformError> {
        self.from_notification(&SnsNotification::from(message))
    }
}
