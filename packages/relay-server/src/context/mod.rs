//! Execution-context construction for inbound events.
//!
//! - [`builder`]: `ContextBuilder` for proxy and platform events
//! - [`token`]: signed identity-token verification
//! - [`cookie`]: `cookie` header parsing

pub mod builder;
pub mod cookie;
pub mod token;

pub use builder::{ContextBuilder, ContextError, PlatformContext};
pub use cookie::parse_cookie;
pub use token::{TokenError, TokenVerifier};
