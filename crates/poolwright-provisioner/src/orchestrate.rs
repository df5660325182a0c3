use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::addr::ResourceAddr;
use crate::error::ProvisionerError;
use crate::manifest::Manifest;
use crate::persistence::StateStore;
use crate::plan::{Plan, Step};
use crate::reconcile::{ApplyOptions, Journal, Outcome, Reconciler};
use crate::resolve::Normalizer;
use crate::state::TrackedPool;

/// Result of one pool in a multi-pool run.
#[derive(Debug)]
pub struct PoolResult<T> {
    pub addr: ResourceAddr,
    pub result: Result<T, ProvisionerError>,
}

pub fn failures<T>(results: &[PoolResult<T>]) -> impl Iterator<Item = &PoolResult<T>> {
    results.iter().filter(|r| r.result.is_err())
}

/// Normalize every declaration and plan it against the tracked pool.
///
/// Read-only. Tracked pools that are no longer declared get a delete plan.
/// Any normalization failure fails the whole plan, before a single pool is
/// read.
pub async fn plan_all(
    reconciler: &Reconciler,
    manifest: &Manifest,
    store: &StateStore,
    cancel: &CancellationToken,
) -> Result<Vec<Plan>, ProvisionerError> {
    let normalizer = Normalizer::new(reconciler.gateway());
    let mut specs = Vec::new();
    for (addr, decl) in manifest.entries() {
        specs.push((addr, normalizer.normalize(decl).await?));
    }

    let state = store.snapshot().await;
    let mut plans = Vec::new();
    for (addr, spec) in &specs {
        let tracked = state.pools.get(addr).map(TrackedPool::pool_ref);
        plans.push(reconciler.plan(addr, spec, tracked.as_ref(), cancel).await?);
    }

    for (addr, pool) in &state.pools {
        if !manifest.contains(addr) {
            plans.push(Plan::orphan(addr.clone(), pool.id.clone()));
        }
    }
    Ok(plans)
}

/// Converge every declared pool, concurrently, and remove orphans.
///
/// Each pool runs in its own task. A failing pool does not stop the others.
/// A new pool is recorded as soon as it is created, and again with its
/// projection once it converges.
pub async fn apply_all(
    reconciler: &Reconciler,
    manifest: &Manifest,
    store: Arc<StateStore>,
    options: ApplyOptions,
    cancel: &CancellationToken,
) -> Result<Vec<PoolResult<Vec<Step>>>, ProvisionerError> {
    let state = store.snapshot().await;
    let mut tasks = JoinSet::new();

    let journaled = reconciler.clone().with_journal(Arc::clone(&store) as Arc<dyn Journal>);
    for (addr, decl) in manifest.entries() {
        let reconciler = journaled.clone();
        let store = Arc::clone(&store);
        let cancel = cancel.clone();
        let decl = decl.clone();
        let tracked = state.pools.get(&addr).map(TrackedPool::pool_ref);

        tasks.spawn(async move {
            let result = async {
                let spec = Normalizer::new(reconciler.gateway()).normalize(&decl).await?;
                let outcome = reconciler
                    .apply(&addr, &spec, tracked.as_ref(), options, &cancel)
                    .await?;
                store.record(addr.clone(), tracked_pool(&outcome)).await?;
                Ok::<_, ProvisionerError>(outcome.applied)
            }
            .await;
            PoolResult { addr, result }
        });
    }

    for (addr, pool) in &state.pools {
        if manifest.contains(addr) {
            continue;
        }
        let reconciler = reconciler.clone();
        let store = Arc::clone(&store);
        let cancel = cancel.clone();
        let addr = addr.clone();
        let pool = pool.pool_ref();

        tasks.spawn(async move {
            tracing::info!(addr = %addr, pool_id = %pool.id, "destroying orphaned instance pool");
            let result = async {
                reconciler.destroy(&addr, &pool, &cancel).await?;
                store.forget(&addr).await?;
                Ok::<_, ProvisionerError>(vec![Step::Delete])
            }
            .await;
            PoolResult { addr, result }
        });
    }

    let results = join_all(tasks).await?;
    if failures(&results).next().is_none() {
        store.stamp_manifest(Some(Manifest::VERSION)).await?;
    }
    Ok(results)
}

/// Destroy every tracked pool, concurrently.
pub async fn destroy_all(
    reconciler: &Reconciler,
    store: Arc<StateStore>,
    cancel: &CancellationToken,
) -> Result<Vec<PoolResult<()>>, ProvisionerError> {
    let state = store.snapshot().await;
    let mut tasks = JoinSet::new();

    for (addr, pool) in state.pools {
        let reconciler = reconciler.clone();
        let store = Arc::clone(&store);
        let cancel = cancel.clone();

        tasks.spawn(async move {
            let result = async {
                reconciler.destroy(&addr, &pool.pool_ref(), &cancel).await?;
                store.forget(&addr).await?;
                Ok::<_, ProvisionerError>(())
            }
            .await;
            PoolResult { addr, result }
        });
    }

    let results = join_all(tasks).await?;
    if failures(&results).next().is_none() {
        store.stamp_manifest(None).await?;
    }
    Ok(results)
}

fn tracked_pool(outcome: &Outcome) -> TrackedPool {
    TrackedPool {
        id: outcome.state.id.clone(),
        zone: outcome.state.zone.clone(),
        attributes: outcome.attributes.clone(),
        updated_at: jiff::Timestamp::now(),
    }
}

async fn join_all<T: 'static>(
    mut tasks: JoinSet<PoolResult<T>>,
) -> Result<Vec<PoolResult<T>>, ProvisionerError> {
    let mut results = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        let result = joined.map_err(|e| ProvisionerError::Internal(format!("pool task failed: {e}")))?;
        if let Err(e) = &result.result {
            tracing::error!(addr = %result.addr, error = %e, "pool failed");
        }
        results.push(result);
    }
    results.sort_by(|a, b| a.addr.cmp(&b.addr));
    Ok(results)
}
