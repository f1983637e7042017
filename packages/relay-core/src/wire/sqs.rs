//! Queue transport. The relay marker travels as the `Subject` attribute.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{
    attribute, correlation_attributes, ensure_consistent, DecodedCall, MessageAttribute,
    MessageAttributes, TransportTarget, WireTransformer, ATTR_ACCOUNT_ID, ATTR_CALLBACK,
    ATTR_REQUEST_ID, ATTR_SUBJECT, PROTOCOL_SUBJECT,
};
use crate::descriptor::CallDescriptor;
use crate::error::TransformError;

/// Event source name of queue records.
pub const SQS_EVENT_SOURCE: &str = "aws:sqs";

/// Send request for one queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SqsSendInput {
    pub queue_url: String,
    pub message_body: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub message_attributes: MessageAttributes,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub delay_seconds: Option<u32>,
}

impl SqsSendInput {
    #[must_use]
    pub fn with_delay(mut self, seconds: u32) -> Self {
        self.delay_seconds = Some(seconds);
        self
    }
}

/// Attribute as delivered inside a queue record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordAttribute {
    #[serde(default)]
    pub string_value: Option<String>,
    #[serde(default)]
    pub data_type: String,
}

/// One delivered queue message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqsRecord {
    #[serde(default)]
    pub message_id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub receipt_handle: Option<String>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub message_attributes: BTreeMap<String, RecordAttribute>,
    #[serde(default)]
    pub event_source: String,
    #[serde(rename = "eventSourceARN", skip_serializing_if = "Option::is_none", default)]
    pub event_source_arn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub aws_region: Option<String>,
}

impl SqsRecord {
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.message_attributes
            .get(name)
            .and_then(|a| a.string_value.as_deref())
    }

    #[must_use]
    pub fn is_protocol(&self) -> bool {
        self.attribute(ATTR_SUBJECT) == Some(PROTOCOL_SUBJECT)
    }
}

// ---------------------------------------------------------------------------
// SqsTransformer
// ---------------------------------------------------------------------------

/// Queue transformer.
#[derive(Debug, Clone)]
pub struct SqsTransformer {
    target: TransportTarget,
}

impl SqsTransformer {
    #[must_use]
    pub fn new(target: TransportTarget) -> Self {
        Self { target }
    }

    /// Decodes a relayed call from a delivered record.
    ///
    /// # Errors
    ///
    /// Returns `TransformError` when the marker attribute is missing or wrong,
    /// the body is not a descriptor, or the correlation ids contradict.
    pub fn from_record(&self, record: &SqsRecord) -> Result<DecodedCall, TransformError> {
        decode(
            record.attribute(ATTR_SUBJECT),
            &record.body,
            record.attribute(ATTR_ACCOUNT_ID),
            record.attribute(ATTR_REQUEST_ID),
            record.attribute(ATTR_CALLBACK),
        )
    }
}

fn decode(
    subject: Option<&str>,
    body: &str,
    account_id: Option<&str>,
    request_id: Option<&str>,
    callback: Option<&str>,
) -> Result<DecodedCall, TransformError> {
    if subject != Some(PROTOCOL_SUBJECT) {
        return Err(TransformError::MarkerMismatch {
            expected: PROTOCOL_SUBJECT,
            found: subject.unwrap_or_default().to_string(),
        });
    }
    if body.is_empty() {
        return Err(TransformError::MissingField("MessageBody"));
    }
    let descriptor: CallDescriptor =
        serde_json::from_str(body).map_err(TransformError::json("MessageBody"))?;
    ensure_consistent(&descriptor.context, account_id, request_id)?;
    Ok(DecodedCall {
        descriptor,
        callback: callback.filter(|c| !c.is_empty()).map(str::to_string),
    })
}

impl WireTransformer for SqsTransformer {
    type Message = SqsSendInput;

    fn to_wire(
        &self,
        address: &str,
        call: &CallDescriptor,
        callback: Option<&str>,
    ) -> Result<SqsSendInput, TransformError> {
        if call.resource_type.is_empty() {
            return Err(TransformError::MissingField("type"));
        }
        let queue_url = self.target.queue_url(address)?;
        let call = call.clone().normalized();
        let mut message_attributes = correlation_attributes(&call.context, callback);
        message_attributes.insert(
            ATTR_SUBJECT.to_string(),
            MessageAttribute::string(PROTOCOL_SUBJECT),
        );
        Ok(SqsSendInput {
            queue_url,
            message_body: serde_json::to_string(&call)
                .map_err(TransformError::json("MessageBody"))?,
            message_attributes,
            delay_seconds: None,
        })
    }

    fn from_wire(&self, message: &SqsSendInput) -> Result<DecodedCall, TransformError> {
        let attrs = &message.message_attributes;
        decode(
            attribute(attrs, ATTR_SUBJECT),
            &message.message_body,
            attribute(attrs, ATTR_ACCOUNT_ID),
            attribute(attrs, ATTR_REQUEST_ID),
            attribute(attrs, ATTR_CALLBACK),
        )
    }
}
