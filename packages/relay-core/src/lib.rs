//! Relay core: protocol addresses, call descriptors, execution context and
//! wire transformers. No I/O.

pub mod address;
pub mod clock;
pub mod context;
pub mod descriptor;
pub mod error;
pub mod wire;

pub use address::{AddressCodec, ParsedAddress, Scheme, Stage};
pub use clock::{ClockSource, FixedClock, SystemClock};
pub use context::{ExecutionContext, Identity};
pub use descriptor::{CallDescriptor, CallMode, CallbackDescriptor, SELF_SERVICE};
pub use error::{AddressError, StatusError, TransformError};
pub use wire::{DecodedCall, TransportTarget, WireTransformer};
