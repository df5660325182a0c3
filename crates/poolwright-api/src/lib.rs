//! poolwright-api
//!
//! Remote API gateway for instance pools. Thin typed wrapper around the
//! compute API: the engine decides retry policy for mutations, the gateway
//! only retries transient failures of reads.

pub mod error;
pub mod gateway;
pub mod http;
pub mod signer;
pub mod wire;

#[cfg(feature = "test-util")]
pub mod memory;

pub use crate::error::ApiError;
pub use crate::gateway::{BoxFuture, Gateway};
pub use crate::http::{HttpGateway, HttpGatewayConfig};
