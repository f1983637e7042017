//! Per-source event handlers.
//!
//! - [`web`]: HTTP-proxy requests and relayed sync calls
//! - [`notification`]: pub/sub notifications posted over HTTP
//! - [`sns`]: pub/sub record batches
//! - [`sqs`]: queue record batches
//! - [`change_feed`]: table change-feed batches
//! - [`cron`], [`identity`], [`socket`]: delegate to a listener

pub mod change_feed;
pub mod cron;
pub mod identity;
pub mod notification;
pub mod sns;
pub mod socket;
pub mod sqs;
pub mod web;

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use relay_core::ExecutionContext;
use serde_json::Value;

pub use change_feed::{ChangeFeedHandler, ChangeRecord};
pub use cron::{CronEvent, CronHandler};
pub use identity::{IdentityTrigger, IdentityTriggerHandler};
pub use notification::NotificationHandler;
pub use sns::PubSubHandler;
pub use socket::{SocketEvent, SocketHandler};
pub use sqs::QueueHandler;
pub use web::{
    handler_fn, ProtocolEndpoint, ResourceController, ResourceHandler, WebHandler, WebRequest,
    WebRoute,
};

/// Business logic plugged into a handler for one record shape.
#[async_trait]
pub trait RecordListener<R: Send + 'static>: Send + Sync {
    async fn on_record(&self, record: R, context: &ExecutionContext) -> anyhow::Result<Value>;
}

struct FnListener<R, F> {
    f: F,
    _record: PhantomData<fn(R)>,
}

#[async_trait]
impl<R, F, Fut> RecordListener<R> for FnListener<R, F>
where
    R: Send + 'static,
    F: Fn(R, ExecutionContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    async fn on_record(&self, record: R, context: &ExecutionContext) -> anyhow::Result<Value> {
        (self.f)(record, context.clone()).await
    }
}

/// Wraps an async closure as a [`RecordListener`].
pub fn listener_fn<R, F, Fut>(f: F) -> Arc<dyn RecordListener<R>>
where
    R: Send + 'static,
    F: Fn(R, ExecutionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(FnListener {
        f,
        _record: PhantomData,
    })
}
