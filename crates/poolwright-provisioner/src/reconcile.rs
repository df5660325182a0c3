//! The reconciliation engine.
//!
//! One [`Reconciler::apply`] owns one pool address for its whole run. It
//! reads the pool, plans, then issues the planned mutations one at a time.
//! After every mutation it polls until the targeted fields are observed, so
//! a run only reports success for state it has actually seen.
//!
//! A mutation that was sent is never re-sent blindly. If its response is
//! lost (transient error) the engine re-reads the pool and carries on only
//! when the change is visible. A created pool is handed to the [`Journal`]
//! before the engine waits on it, so a later run finds it even when this one
//! times out or is cancelled.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use poolwright_api::{ApiError, BoxFuture, Gateway};
use poolwright_core::retry::{Poll, PollError, RetryPolicy, poll_until};
use poolwright_core::{Phase, PoolSpec, PoolState};

use crate::addr::ResourceAddr;
use crate::diff::{self, Field};
use crate::error::ProvisionerError;
use crate::locks::PoolLocks;
use crate::plan::{self, Cause, Plan, Step};
use crate::project::{self, Attributes, CatalogNames};

/// Polling budgets of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Waiting for a new pool to leave `creating` and fill up.
    pub create: RetryPolicy,
    /// Waiting for an update to show, and for a busy pool to settle before
    /// planning.
    pub update: RetryPolicy,
    pub scale: RetryPolicy,
    /// Verifying a delete. Fixed interval, bounded attempts.
    pub delete: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let converge = RetryPolicy::exponential(
            Duration::from_secs(1),
            Duration::from_secs(15),
            Duration::from_secs(10 * 60),
        );
        Self {
            create: converge,
            update: converge,
            scale: converge,
            delete: RetryPolicy::fixed(Duration::from_secs(3), 10),
        }
    }
}

/// Identity of a pool on the remote side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoolRef {
    pub id: String,
    pub zone: String,
}

impl fmt::Display for PoolRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.zone)
    }
}

/// Parses the `<id>@<zone>` import syntax.
impl FromStr for PoolRef {
    type Err = ProvisionerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, zone) = s.split_once('@').ok_or_else(|| {
            ProvisionerError::InvalidSpec(format!("expected <id>@<zone>, got {s:?}"))
        })?;
        if uuid::Uuid::parse_str(id).is_err() {
            return Err(ProvisionerError::InvalidSpec(format!(
                "{id:?} is not a pool ID"
            )));
        }
        if zone.is_empty() {
            return Err(ProvisionerError::InvalidSpec(format!("missing zone in {s:?}")));
        }
        Ok(Self {
            id: id.to_string(),
            zone: zone.to_string(),
        })
    }
}

/// Where the engine records a pool as soon as the API has assigned its ID.
pub trait Journal: Send + Sync {
    fn created<'a>(
        &'a self,
        addr: &'a ResourceAddr,
        pool: &'a PoolRef,
    ) -> BoxFuture<'a, Result<(), ProvisionerError>>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Permit plans that delete and recreate a pool.
    pub allow_replace: bool,
}

/// What an apply did and what it left behind.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub plan: Plan,
    pub applied: Vec<Step>,
    pub state: PoolState,
    pub attributes: Attributes,
}

#[derive(Debug, Clone)]
pub struct Observation {
    pub state: PoolState,
    pub attributes: Attributes,
}

#[derive(Clone)]
pub struct Reconciler {
    gateway: Arc<dyn Gateway>,
    config: EngineConfig,
    locks: PoolLocks,
    journal: Option<Arc<dyn Journal>>,
}

impl Reconciler {
    pub fn new(gateway: Arc<dyn Gateway>, config: EngineConfig) -> Self {
        Self {
            gateway,
            config,
            locks: PoolLocks::new(),
            journal: None,
        }
    }

    /// Record new pools in `journal` the moment they are created. Clones
    /// keep sharing the per-pool locks.
    pub fn with_journal(mut self, journal: Arc<dyn Journal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn gateway(&self) -> &dyn Gateway {
        self.gateway.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Dry run: read the pool and plan, never mutate.
    pub async fn plan(
        &self,
        addr: &ResourceAddr,
        spec: &PoolSpec,
        tracked: Option<&PoolRef>,
        cancel: &CancellationToken,
    ) -> Result<Plan, ProvisionerError> {
        let observed = self.observe(addr, tracked, cancel).await?;
        Ok(plan_for(addr, spec, tracked, observed.as_ref()))
    }

    /// Converge the pool at `addr` to `spec`.
    pub async fn apply(
        &self,
        addr: &ResourceAddr,
        spec: &PoolSpec,
        tracked: Option<&PoolRef>,
        options: ApplyOptions,
        cancel: &CancellationToken,
    ) -> Result<Outcome, ProvisionerError> {
        let _guard = self.locks.acquire(addr).await;

        let mut current = self.observe(addr, tracked, cancel).await?;
        let plan = plan_for(addr, spec, tracked, current.as_ref());

        if plan.destructive && !options.allow_replace {
            let mut fields: Vec<String> = plan
                .replaced_fields()
                .iter()
                .map(|f| f.to_string())
                .collect();
            if let Some(phase) = plan.observed_phase.filter(|p| *p == Phase::Error) {
                fields.push(format!("phase {phase}"));
            }
            return Err(ProvisionerError::ReplacementRequired {
                addr: addr.to_string(),
                fields,
            });
        }

        if plan.cause == Cause::InSync {
            tracing::info!(addr = %addr, "instance pool in sync, no changes needed");
        }

        let mut applied = Vec::new();
        for step in &plan.steps {
            if cancel.is_cancelled() {
                return Err(ProvisionerError::Cancelled {
                    addr: addr.to_string(),
                });
            }
            tracing::info!(addr = %addr, step = ?step, "applying step");

            current = match step {
                Step::Create => Some(self.create(addr, spec, cancel).await?),
                Step::Update { fields } => {
                    let pool = existing(addr, current.as_ref())?;
                    Some(self.update(addr, pool, spec, fields, cancel).await?)
                }
                Step::Scale { to, .. } => {
                    let pool = existing(addr, current.as_ref())?;
                    Some(self.scale(addr, pool, *to, cancel).await?)
                }
                Step::Replace { .. } => {
                    let old = pool_ref(existing(addr, current.as_ref())?);
                    self.delete_and_verify(addr, &old, cancel).await?;
                    Some(self.create(addr, spec, cancel).await?)
                }
                Step::Delete => {
                    let old = pool_ref(existing(addr, current.as_ref())?);
                    self.delete_and_verify(addr, &old, cancel).await?;
                    None
                }
            };
            applied.push(step.clone());
        }

        let mut state = current.ok_or_else(|| {
            ProvisionerError::Internal(format!("{addr}: no pool left after apply"))
        })?;
        if !state.is_settled() {
            tracing::warn!(
                addr = %addr,
                pool_id = %state.id,
                members = state.instance_ids.len(),
                size = state.size,
                "instance pool is missing members, waiting"
            );
            state = self.wait_for_members(addr, &state, state.size, cancel).await?;
        }

        let remaining: Vec<String> = diff::diff(spec, &state)
            .into_iter()
            .map(|d| d.field.to_string())
            .collect();
        if !remaining.is_empty() {
            return Err(ProvisionerError::NotConverged {
                addr: addr.to_string(),
                fields: remaining,
            });
        }

        let attributes = project::project(&state, &self.catalog_names(&state.zone).await?);
        tracing::info!(addr = %addr, pool_id = %state.id, steps = applied.len(), "instance pool converged");
        Ok(Outcome {
            plan,
            applied,
            state,
            attributes,
        })
    }

    /// Delete a pool and wait until the API shows it going away.
    pub async fn destroy(
        &self,
        addr: &ResourceAddr,
        pool: &PoolRef,
        cancel: &CancellationToken,
    ) -> Result<(), ProvisionerError> {
        let _guard = self.locks.acquire(addr).await;
        self.delete_and_verify(addr, pool, cancel).await?;
        tracing::info!(addr = %addr, pool_id = %pool.id, "instance pool destroyed");
        Ok(())
    }

    /// Read an existing pool so it can be tracked.
    pub async fn import(&self, addr: &ResourceAddr, pool: &PoolRef) -> Result<Observation, ProvisionerError> {
        let state = match self.gateway.get_instance_pool(&pool.zone, &pool.id).await {
            Ok(state) => state,
            Err(ApiError::NotFound(_)) => {
                return Err(ProvisionerError::PoolNotFound {
                    addr: addr.to_string(),
                    id: pool.id.clone(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        let attributes = project::project(&state, &self.catalog_names(&state.zone).await?);
        tracing::info!(addr = %addr, pool_id = %state.id, phase = %state.phase, "instance pool imported");
        Ok(Observation { state, attributes })
    }

    pub async fn catalog_names(&self, zone: &str) -> Result<CatalogNames, ProvisionerError> {
        let types = self.gateway.list_instance_types(zone).await?;
        Ok(CatalogNames::from_instance_types(&types))
    }

    /// Current state of a tracked pool, once it is not mid-transition.
    ///
    /// `None` when nothing is tracked or the tracked pool is gone.
    async fn observe(
        &self,
        addr: &ResourceAddr,
        tracked: Option<&PoolRef>,
        cancel: &CancellationToken,
    ) -> Result<Option<PoolState>, ProvisionerError> {
        let Some(tracked) = tracked else {
            return Ok(None);
        };
        let gateway = self.gateway.as_ref();

        let observed = poll_until(&self.config.update, cancel, |_| async move {
            match gateway.get_instance_pool(&tracked.zone, &tracked.id).await {
                Ok(state) if state.phase == Phase::Destroyed => Ok(Poll::Ready(None)),
                Ok(state) if state.phase.is_transitional() => {
                    Ok(Poll::Pending(format!("pool is {}", state.phase)))
                }
                Ok(state) => Ok(Poll::Ready(Some(state))),
                Err(ApiError::NotFound(_)) => Ok(Poll::Ready(None)),
                Err(e) => Err(ProvisionerError::from(e)),
            }
        })
        .await
        .map_err(|e| {
            poll_failure(addr, e, |elapsed, last| ProvisionerError::UpdateTimeout {
                addr: addr.to_string(),
                elapsed,
                last,
            })
        })?;

        if observed.is_none() {
            tracing::warn!(addr = %addr, pool_id = %tracked.id, "tracked instance pool no longer exists");
        }
        Ok(observed)
    }

    async fn create(
        &self,
        addr: &ResourceAddr,
        spec: &PoolSpec,
        cancel: &CancellationToken,
    ) -> Result<PoolState, ProvisionerError> {
        let id = self.gateway.create_instance_pool(spec).await?;
        tracing::info!(addr = %addr, pool_id = %id, zone = %spec.zone, "instance pool created, waiting for members");
        if let Some(journal) = &self.journal {
            let pool = PoolRef {
                id: id.clone(),
                zone: spec.zone.clone(),
            };
            journal.created(addr, &pool).await?;
        }

        let size = spec.size;
        self.converge(addr, &self.config.create, &spec.zone, &id, true, cancel, |state| {
            if state.phase != Phase::Running {
                Some(format!("pool is {}", state.phase))
            } else if state.instance_ids.len() as u64 != size {
                Some(format!("{} of {size} instances", state.instance_ids.len()))
            } else {
                None
            }
        })
        .await
        .map_err(|e| {
            poll_failure(addr, e, |elapsed, last| ProvisionerError::CreationTimeout {
                addr: addr.to_string(),
                elapsed,
                last,
            })
        })
    }

    async fn update(
        &self,
        addr: &ResourceAddr,
        current: &PoolState,
        spec: &PoolSpec,
        fields: &[Field],
        cancel: &CancellationToken,
    ) -> Result<PoolState, ProvisionerError> {
        let update = diff::update_for(spec, fields);
        if let Err(e) = self
            .gateway
            .update_instance_pool(&current.zone, &current.id, &update)
            .await
        {
            self.recover(addr, current, e, |fresh| diff::converged(spec, fresh, fields))
                .await?;
        }

        self.converge(addr, &self.config.update, &current.zone, &current.id, false, cancel, |state| {
            if state.phase != Phase::Running {
                Some(format!("pool is {}", state.phase))
            } else if !diff::converged(spec, state, fields) {
                Some("update not visible yet".to_string())
            } else {
                None
            }
        })
        .await
        .map_err(|e| {
            poll_failure(addr, e, |elapsed, last| ProvisionerError::UpdateTimeout {
                addr: addr.to_string(),
                elapsed,
                last,
            })
        })
    }

    async fn scale(
        &self,
        addr: &ResourceAddr,
        current: &PoolState,
        size: u64,
        cancel: &CancellationToken,
    ) -> Result<PoolState, ProvisionerError> {
        if let Err(e) = self
            .gateway
            .scale_instance_pool(&current.zone, &current.id, size)
            .await
        {
            self.recover(addr, current, e, |fresh| fresh.size == size).await?;
        }
        self.wait_for_members(addr, current, size, cancel).await
    }

    /// Poll until the pool runs with exactly `size` members.
    async fn wait_for_members(
        &self,
        addr: &ResourceAddr,
        current: &PoolState,
        size: u64,
        cancel: &CancellationToken,
    ) -> Result<PoolState, ProvisionerError> {
        self.converge(addr, &self.config.scale, &current.zone, &current.id, false, cancel, |state| {
            if state.phase != Phase::Running {
                Some(format!("pool is {}", state.phase))
            } else if state.size != size || state.instance_ids.len() as u64 != size {
                Some(format!("{} of {size} instances", state.instance_ids.len()))
            } else {
                None
            }
        })
        .await
        .map_err(|e| {
            poll_failure(addr, e, |elapsed, last| ProvisionerError::ScaleTimeout {
                addr: addr.to_string(),
                size,
                elapsed,
                last,
            })
        })
    }

    async fn delete_and_verify(
        &self,
        addr: &ResourceAddr,
        pool: &PoolRef,
        cancel: &CancellationToken,
    ) -> Result<(), ProvisionerError> {
        match self.gateway.delete_instance_pool(&pool.zone, &pool.id).await {
            Ok(()) => {}
            Err(ApiError::NotFound(_)) => {
                tracing::info!(addr = %addr, pool_id = %pool.id, "instance pool already gone");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        let gateway = self.gateway.as_ref();
        poll_until(&self.config.delete, cancel, |_| async move {
            match gateway.get_instance_pool(&pool.zone, &pool.id).await {
                Err(ApiError::NotFound(_)) => Ok(Poll::Ready(())),
                Ok(state) if matches!(state.phase, Phase::Destroying | Phase::Destroyed) => {
                    Ok(Poll::Ready(()))
                }
                Ok(state) => Ok(Poll::Pending(format!("pool is still {}", state.phase))),
                Err(e) if e.is_transient() => Ok(Poll::Pending(e.to_string())),
                Err(e) => Err(ProvisionerError::from(e)),
            }
        })
        .await
        .map_err(|e| match e {
            PollError::Exhausted { attempts, .. } | PollError::TimedOut { attempts, .. } => {
                ProvisionerError::DestroyVerificationTimeout {
                    addr: addr.to_string(),
                    attempts,
                }
            }
            PollError::Cancelled { .. } => ProvisionerError::Cancelled {
                addr: addr.to_string(),
            },
            PollError::Probe(e) => e,
        })
    }

    /// Decide what a failed mutation means from a fresh read.
    ///
    /// `applied` tells whether the fresh state already carries the change.
    async fn recover(
        &self,
        addr: &ResourceAddr,
        current: &PoolState,
        err: ApiError,
        applied: impl Fn(&PoolState) -> bool,
    ) -> Result<(), ProvisionerError> {
        let fresh = self
            .gateway
            .get_instance_pool(&current.zone, &current.id)
            .await;

        match err {
            ApiError::Rejected { message, .. } => {
                tracing::warn!(addr = %addr, pool_id = %current.id, %message, "change rejected");
                Err(ProvisionerError::Rejected {
                    addr: addr.to_string(),
                    message,
                    observed: fresh.ok().map(Box::new),
                })
            }
            ApiError::NotFound(_) => Err(ProvisionerError::PoolNotFound {
                addr: addr.to_string(),
                id: current.id.clone(),
            }),
            err if err.is_transient() => match fresh {
                Ok(state) if applied(&state) => {
                    tracing::warn!(
                        addr = %addr,
                        pool_id = %current.id,
                        error = %err,
                        "mutation response lost but the change is visible, continuing"
                    );
                    Ok(())
                }
                _ => Err(err.into()),
            },
            err => Err(err.into()),
        }
    }

    /// Poll a pool until `pending` has nothing left to wait for.
    ///
    /// Phase `error` fails at once. A pool that is not visible yet only
    /// counts as pending when `fresh` (it was just created).
    #[allow(clippy::too_many_arguments)]
    async fn converge(
        &self,
        addr: &ResourceAddr,
        policy: &RetryPolicy,
        zone: &str,
        id: &str,
        fresh: bool,
        cancel: &CancellationToken,
        pending: impl Fn(&PoolState) -> Option<String>,
    ) -> Result<PoolState, PollError<ProvisionerError>> {
        let gateway = self.gateway.as_ref();
        let pending = &pending;

        poll_until(policy, cancel, |_| async move {
            match gateway.get_instance_pool(zone, id).await {
                Ok(state) if state.phase == Phase::Error => Err(ProvisionerError::ResourceFailed {
                    addr: addr.to_string(),
                    phase: state.phase,
                }),
                Ok(state) => Ok(match pending(&state) {
                    Some(reason) => Poll::Pending(reason),
                    None => Poll::Ready(state),
                }),
                Err(ApiError::NotFound(_)) if fresh => {
                    Ok(Poll::Pending("pool not visible yet".into()))
                }
                Err(ApiError::NotFound(_)) => Err(ProvisionerError::PoolNotFound {
                    addr: addr.to_string(),
                    id: id.to_string(),
                }),
                Err(e) if e.is_transient() => Ok(Poll::Pending(e.to_string())),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }
}

fn plan_for(
    addr: &ResourceAddr,
    spec: &PoolSpec,
    tracked: Option<&PoolRef>,
    observed: Option<&PoolState>,
) -> Plan {
    let mut plan = plan::build(addr.clone(), spec, observed);
    if tracked.is_some() && observed.is_none() {
        plan.cause = Cause::Vanished;
    }
    plan
}

fn existing<'a>(
    addr: &ResourceAddr,
    current: Option<&'a PoolState>,
) -> Result<&'a PoolState, ProvisionerError> {
    current.ok_or_else(|| ProvisionerError::Internal(format!("{addr}: step needs an existing pool")))
}

fn pool_ref(state: &PoolState) -> PoolRef {
    PoolRef {
        id: state.id.clone(),
        zone: state.zone.clone(),
    }
}

fn poll_failure(
    addr: &ResourceAddr,
    err: PollError<ProvisionerError>,
    timeout: impl FnOnce(Duration, String) -> ProvisionerError,
) -> ProvisionerError {
    match err {
        PollError::Exhausted { elapsed, last, .. } | PollError::TimedOut { elapsed, last, .. } => {
            timeout(elapsed, last)
        }
        PollError::Cancelled { .. } => ProvisionerError::Cancelled {
            addr: addr.to_string(),
        },
        PollError::Probe(e) => e,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_id_needs_uuid_and_zone() {
        let pool: PoolRef = "3f4e8a2c-1b6d-4c3a-9e7f-5a6b7c8d9e0f@ch-gva-2".parse().unwrap();
        assert_eq!(pool.zone, "ch-gva-2");
        assert_eq!(pool.to_string(), "3f4e8a2c-1b6d-4c3a-9e7f-5a6b7c8d9e0f@ch-gva-2");

        assert!("web@ch-gva-2".parse::<PoolRef>().is_err());
        assert!("3f4e8a2c-1b6d-4c3a-9e7f-5a6b7c8d9e0f".parse::<PoolRef>().is_err());
        assert!("3f4e8a2c-1b6d-4c3a-9e7f-5a6b7c8d9e0f@".parse::<PoolRef>().is_err());
    }

    #[test]
    fn default_budgets() {
        let config = EngineConfig::default();
        assert_eq!(config.create.timeout(), Some(Duration::from_secs(600)));
        assert_eq!(config.delete.max_attempts, Some(10));
    }
}
