//! Relay server: inbound event routing and outbound cross-service calls for
//! functions deployed behind HTTP proxies, topics, queues and change feeds.

pub mod config;
pub mod context;
pub mod dispatch;
pub mod protocol;
pub mod response;
pub mod runtime;
pub mod traits;

#[cfg(test)]
mod testing;

pub use config::{ConfigArgs, ReportPolicy, ServiceConfig};
pub use dispatch::{build_dispatch_pipeline, DispatchError, EventKind, EventRouter, InboundEvent};
pub use protocol::{DeliveryError, ProtocolError, ProtocolService};
pub use runtime::{Collaborators, RelayRuntime};
pub use traits::{DeliveryClient, EndpointResolver, ErrorReporter, KeyVerifier};
