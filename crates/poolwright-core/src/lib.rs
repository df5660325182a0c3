//! poolwright-core
//!
//! Pure domain types for instance pool reconciliation and the polling
//! primitives shared by the gateway and the engine.
//! No HTTP dependency; this is the shared vocabulary of the workspace.

pub mod catalog;
pub mod declaration;
pub mod error;
pub mod pool;
pub mod retry;
pub mod user_data;

pub use crate::error::CoreError;
pub use crate::pool::{Phase, PoolSpec, PoolState, PoolUpdate};
