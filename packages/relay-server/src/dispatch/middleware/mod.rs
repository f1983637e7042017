//! Tower middleware layers for the dispatch pipeline.
//!
//! - [`metrics`]: dispatch timing and outcome via `tracing` spans
//! - [`pipeline`]: composes the layers around the router

pub mod metrics;
pub mod pipeline;

pub use metrics::MetricsLayer;
pub use pipeline::build_dispatch_pipeline;
