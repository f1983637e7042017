//! In-memory collaborators shared by unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_core::wire::{SnsPublishInput, SqsSendInput};
use serde_json::json;

use crate::traits::{
    DeliveryClient, ErrorReport, ErrorReporter, InvokeRequest, InvokeResponse, KeyVerifier,
};

/// Records every delivery and answers invokes with a canned response.
pub(crate) struct RecordingDelivery {
    pub invoked: Mutex<Vec<InvokeRequest>>,
    pub published: Mutex<Vec<SnsPublishInput>>,
    pub sent: Mutex<Vec<SqsSendInput>>,
    pub response: Mutex<InvokeResponse>,
    pub fail: Mutex<Option<String>>,
}

impl RecordingDelivery {
    pub fn new() -> Self {
        Self {
            invoked: Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            response: Mutex::new(Self::answer(200, "{}")),
            fail: Mutex::new(None),
        }
    }

    /// Invoke result whose payload is a web response envelope.
    pub fn answer(status: u16, body: &str) -> InvokeResponse {
        InvokeResponse {
            status_code: 200,
            function_error: None,
            payload: Some(json!({"statusCode": status, "body": body})),
        }
    }

    pub fn respond(&self, response: InvokeResponse) {
        *self.response.lock() = response;
    }

    pub fn fail_with(&self, message: &str) {
        *self.fail.lock() = Some(message.to_string());
    }

    fn check(&self) -> anyhow::Result<()> {
        match self.fail.lock().as_deref() {
            Some(message) => Err(anyhow::anyhow!(message.to_string())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DeliveryClient for RecordingDelivery {
    async fn invoke(&self, request: InvokeRequest) -> anyhow::Result<InvokeResponse> {
        self.check()?;
        self.invoked.lock().push(request);
        Ok(self.response.lock().clone())
    }

    async fn publish(&self, input: SnsPublishInput) -> anyhow::Result<String> {
        self.check()?;
        let mut published = self.published.lock();
        published.push(input);
        Ok(format!("sns-{}", published.len()))
    }

    async fn send(&self, input: SqsSendInput) -> anyhow::Result<String> {
        self.check()?;
        let mut sent = self.sent.lock();
        sent.push(input);
        Ok(format!("sqs-{}", sent.len()))
    }
}

#[derive(Default)]
pub(crate) struct RecordingReporter {
    pub reports: Mutex<Vec<ErrorReport>>,
}

#[async_trait]
impl ErrorReporter for RecordingReporter {
    async fn report(&self, report: ErrorReport) {
        self.reports.lock().push(report);
    }
}

/// Accepts exactly one signature for one alias.
pub(crate) struct FixedKey {
    pub alias: &'static str,
    pub signature: &'static [u8],
}

#[async_trait]
impl KeyVerifier for FixedKey {
    async fn verify(&self, alias: &str, _message: &[u8], signature: &[u8]) -> anyhow::Result<bool> {
        if alias != self.alias {
            anyhow::bail!("unknown key alias: {alias}");
        }
        Ok(signature == self.signature)
    }
}
