//! poolwright-provisioner
//!
//! Reconciliation engine for instance pools.
//! Library consumed by the `poolwright` CLI.
//!
//! Public API:
//! - `resolve::Normalizer`: declaration → canonical spec, lookups only
//! - `Reconciler::plan()`: read the pool and lay out the steps (dry run)
//! - `Reconciler::apply()`: execute a plan, polling until converged
//! - `Reconciler::destroy()` / `import()`: single-pool lifecycle
//! - `orchestrate`: the same over a whole manifest, pools in parallel
//! - `provision()` / `destroy()`: convenience wrappers that also load state

pub mod addr;
pub mod diff;
pub mod error;
pub mod locks;
pub mod manifest;
pub mod orchestrate;
pub mod persistence;
pub mod plan;
pub mod project;
pub mod reconcile;
pub mod resolve;
pub mod state;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

pub use crate::addr::ResourceAddr;
pub use crate::error::{ErrorKind, ProvisionerError};
pub use crate::manifest::Manifest;
pub use crate::orchestrate::PoolResult;
pub use crate::persistence::{StatePersistence, StateStore};
pub use crate::plan::{Change, Plan, Step};
pub use crate::project::Attributes;
pub use crate::reconcile::{ApplyOptions, EngineConfig, Journal, Outcome, PoolRef, Reconciler};
pub use crate::state::{ProvisionerState, TrackedPool};

/// Full provisioning: load state → plan → apply every pool.
///
/// Returns the first pool failure after every pool has run.
pub async fn provision(
    reconciler: &Reconciler,
    manifest: &Manifest,
    persistence: StatePersistence,
    options: ApplyOptions,
    cancel: &CancellationToken,
) -> Result<(), ProvisionerError> {
    let store = Arc::new(StateStore::open(persistence).await?);
    let plans = orchestrate::plan_all(reconciler, manifest, &store, cancel).await?;

    let changes = plans.iter().filter(|p| p.needs_apply()).count();
    if changes == 0 {
        tracing::info!("all instance pools in sync, no changes needed");
        return Ok(());
    }
    tracing::info!(pools = plans.len(), changes, "executing provisioning plan");

    let results = orchestrate::apply_all(reconciler, manifest, store, options, cancel).await?;
    first_failure(results)
}

/// Destroy every tracked pool.
pub async fn destroy(
    reconciler: &Reconciler,
    persistence: StatePersistence,
    cancel: &CancellationToken,
) -> Result<(), ProvisionerError> {
    let store = Arc::new(StateStore::open(persistence).await?);
    let results = orchestrate::destroy_all(reconciler, store, cancel).await?;
    first_failure(results)
}

fn first_failure<T>(results: Vec<PoolResult<T>>) -> Result<(), ProvisionerError> {
    for result in results {
        result.result?;
    }
    Ok(())
}
