use std::future::Future;
use std::pin::Pin;

use poolwright_core::catalog::{InstanceType, SecurityGroup, Template};
use poolwright_core::pool::{PoolSpec, PoolState, PoolUpdate};

use crate::error::ApiError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Typed contract of the remote compute API.
///
/// Implementations must be safe for concurrent use: one gateway is shared
/// by every pool being reconciled. Calls are keyed by zone + pool ID.
/// Mutating calls return once the API has accepted and finished the
/// operation; convergence of the pool itself is the caller's concern.
///
/// Methods return boxed futures for dyn compatibility.
pub trait Gateway: Send + Sync {
    /// Create a pool. Returns the ID assigned by the API.
    fn create_instance_pool<'a>(
        &'a self,
        spec: &'a PoolSpec,
    ) -> BoxFuture<'a, Result<String, ApiError>>;

    /// Fails with [`ApiError::NotFound`] once the pool no longer exists.
    fn get_instance_pool<'a>(
        &'a self,
        zone: &'a str,
        id: &'a str,
    ) -> BoxFuture<'a, Result<PoolState, ApiError>>;

    /// Apply a batched fieldset. The whole batch is sent together.
    fn update_instance_pool<'a>(
        &'a self,
        zone: &'a str,
        id: &'a str,
        update: &'a PoolUpdate,
    ) -> BoxFuture<'a, Result<(), ApiError>>;

    fn scale_instance_pool<'a>(
        &'a self,
        zone: &'a str,
        id: &'a str,
        size: u64,
    ) -> BoxFuture<'a, Result<(), ApiError>>;

    fn delete_instance_pool<'a>(
        &'a self,
        zone: &'a str,
        id: &'a str,
    ) -> BoxFuture<'a, Result<(), ApiError>>;

    /// Templates of one visibility ("public" or "private") in a zone.
    fn list_templates<'a>(
        &'a self,
        zone: &'a str,
        visibility: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Template>, ApiError>>;

    fn get_template<'a>(
        &'a self,
        zone: &'a str,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Template, ApiError>>;

    fn list_instance_types<'a>(
        &'a self,
        zone: &'a str,
    ) -> BoxFuture<'a, Result<Vec<InstanceType>, ApiError>>;

    fn list_security_groups<'a>(
        &'a self,
        zone: &'a str,
    ) -> BoxFuture<'a, Result<Vec<SecurityGroup>, ApiError>>;
}
