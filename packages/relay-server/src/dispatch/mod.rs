//! Inbound event dispatch.
//!
//! - [`classify`]: decides the [`EventKind`] of a raw event
//! - [`router`]: routes events to the handler registered for their kind
//! - [`handlers`]: one handler per event source
//! - [`batch`]: ordered, bounded fan-out over batch records
//! - [`middleware`]: tower layers wrapped around the router

pub mod batch;
pub mod classify;
pub mod handler;
pub mod handlers;
pub mod middleware;
pub mod router;

pub use batch::{map_bounded, ERROR_MARKER};
pub use classify::{classify, ClassifyError, EventKind};
pub use handler::{DispatchError, EventHandler, InboundEvent};
pub use middleware::{build_dispatch_pipeline, MetricsLayer};
pub use router::EventRouter;
