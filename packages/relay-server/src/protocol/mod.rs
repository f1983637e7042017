//! Cross-service call orchestration: sync execute, pub/sub notify, queued
//! enqueue, plain broadcast and callbacks.

pub mod service;

pub use service::{DeliveryError, ProtocolError, ProtocolService, MAX_DELAY_SECONDS};
