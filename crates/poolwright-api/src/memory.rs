//! In-memory simulated zone.
//!
//! Behaves like the remote API as far as the engine can tell: pools move
//! through transitional phases for a configurable number of reads before
//! settling, deletion takes a while to show, and every call is logged so
//! tests can assert exactly which mutations were issued.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use poolwright_core::catalog::{InstanceType, SecurityGroup, Template};
use poolwright_core::pool::{Phase, PoolSpec, PoolState, PoolUpdate};

use crate::error::ApiError;
use crate::gateway::{BoxFuture, Gateway};

/// A call received by the simulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create { name: String },
    Get { id: String },
    Update { id: String, update: PoolUpdate },
    Scale { id: String, size: u64 },
    Delete { id: String },
    ListTemplates { zone: String, visibility: String },
    GetTemplate { id: String },
    ListInstanceTypes,
    ListSecurityGroups,
}

impl Call {
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Self::Create { .. } | Self::Update { .. } | Self::Scale { .. } | Self::Delete { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Create,
    Get,
    Update,
    Scale,
    Delete,
}

/// An injected failure for the next call of an [`Op`].
#[derive(Debug, Clone)]
pub enum Fault {
    /// Fail without touching the simulated pool.
    Before(ApiError),
    /// Apply the call, then report the error anyway (lost response).
    AfterCommit(ApiError),
    /// Acknowledge the call without applying it, as if the change had not
    /// propagated yet. A swallowed create returns an empty ID.
    Swallow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Create,
    Scale,
    Update,
    Destroy,
}

#[derive(Debug)]
struct SimPool {
    state: PoolState,
    transition: Option<(Transition, u32)>,
}

#[derive(Debug, Default)]
struct Inner {
    pools: HashMap<String, SimPool>,
    templates: Vec<(String, Template)>,
    instance_types: Vec<InstanceType>,
    security_groups: Vec<SecurityGroup>,
    calls: Vec<Call>,
    faults: HashMap<Op, VecDeque<Fault>>,
    lag: u32,
    frozen: bool,
}

#[derive(Debug, Default)]
pub struct MemoryGateway {
    inner: Mutex<Inner>,
}

pub const GVA2: &str = "ch-gva-2";
pub const UBUNTU_ID: &str = "7f2a0a4e-6d2b-4a3e-9b6f-0a1b2c3d4e01";
pub const DEBIAN_ID: &str = "7f2a0a4e-6d2b-4a3e-9b6f-0a1b2c3d4e02";
pub const TINY_ID: &str = "b6cd1ff5-3a2f-4e9d-a4d1-8988c1191fe8";
pub const SMALL_ID: &str = "21624abb-764e-4def-81d7-9fc54b5957fb";
pub const DEFAULT_SG_ID: &str = "c8a7f2d4-51e6-4b3c-8a90-3f1e2d4c5b6a";

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// A zone with a small realistic catalog: two featured templates, the
    /// tiny/small/medium standard types and a "default" security group.
    pub fn with_default_catalog() -> Self {
        let gateway = Self::new();
        {
            let mut inner = gateway.lock();
            inner.templates = vec![
                (
                    GVA2.to_string(),
                    Template {
                        id: UBUNTU_ID.into(),
                        name: "Linux Ubuntu 20.04 LTS 64-bit".into(),
                        default_user: Some("ubuntu".into()),
                        visibility: "public".into(),
                    },
                ),
                (
                    GVA2.to_string(),
                    Template {
                        id: DEBIAN_ID.into(),
                        name: "Linux Debian 10 (Buster) 64-bit".into(),
                        default_user: Some("debian".into()),
                        visibility: "public".into(),
                    },
                ),
            ];
            inner.instance_types = vec![
                InstanceType {
                    id: TINY_ID.into(),
                    family: "standard".into(),
                    size: "tiny".into(),
                },
                InstanceType {
                    id: SMALL_ID.into(),
                    family: "standard".into(),
                    size: "small".into(),
                },
                InstanceType {
                    id: "0b8c5d0e-0a7e-4c5a-9f1a-2b3c4d5e6f70".into(),
                    family: "standard".into(),
                    size: "medium".into(),
                },
            ];
            inner.security_groups = vec![SecurityGroup {
                id: DEFAULT_SG_ID.into(),
                name: "default".into(),
            }];
        }
        gateway
    }

    /// Number of reads a pool stays in a transitional phase after a
    /// mutation before it settles.
    pub fn with_lag(self, lag: u32) -> Self {
        self.lock().lag = lag;
        self
    }

    pub fn add_template(&self, zone: &str, template: Template) {
        self.lock().templates.push((zone.to_string(), template));
    }

    pub fn add_security_group(&self, group: SecurityGroup) {
        self.lock().security_groups.push(group);
    }

    /// Queue a fault for the next call of `op`.
    pub fn inject(&self, op: Op, fault: Fault) {
        self.lock().faults.entry(op).or_default().push_back(fault);
    }

    /// While frozen, pools never leave their transitional phase.
    pub fn freeze(&self, frozen: bool) {
        self.lock().frozen = frozen;
    }

    /// Put a pool in place directly, bypassing the call log.
    pub fn insert_pool(&self, state: PoolState) {
        self.lock().pools.insert(
            state.id.clone(),
            SimPool {
                state,
                transition: None,
            },
        );
    }

    /// Change a pool out of band, as another client would.
    pub fn tamper(&self, id: &str, f: impl FnOnce(&mut PoolState)) {
        if let Some(pool) = self.lock().pools.get_mut(id) {
            f(&mut pool.state);
        }
    }

    /// Current simulated state without advancing any transition.
    pub fn peek(&self, id: &str) -> Option<PoolState> {
        self.lock().pools.get(id).map(|p| p.state.clone())
    }

    pub fn pool_count(&self) -> usize {
        self.lock().pools.len()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn mutating_calls(&self) -> Vec<Call> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.is_mutating())
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Inner {
    fn take_fault(&mut self, op: Op) -> Option<Fault> {
        self.faults.get_mut(&op).and_then(VecDeque::pop_front)
    }

    /// Run `apply` unless a `Before` fault is queued; honour `AfterCommit`.
    fn mutate<T: Default>(
        &mut self,
        op: Op,
        apply: impl FnOnce(&mut Self) -> Result<T, ApiError>,
    ) -> Result<T, ApiError> {
        match self.take_fault(op) {
            Some(Fault::Before(err)) => Err(err),
            Some(Fault::AfterCommit(err)) => {
                apply(self)?;
                Err(err)
            }
            Some(Fault::Swallow) => Ok(T::default()),
            None => apply(self),
        }
    }

    fn pool_mut(&mut self, id: &str) -> Result<&mut SimPool, ApiError> {
        self.pools
            .get_mut(id)
            .ok_or_else(|| ApiError::NotFound(format!("instance pool {id}")))
    }

    fn begin(&mut self, id: &str, transition: Transition, phase: Phase) -> Result<(), ApiError> {
        let lag = self.lag;
        let pool = self.pool_mut(id)?;
        pool.state.phase = phase;
        pool.transition = Some((transition, lag));
        Ok(())
    }

    fn create(&mut self, spec: &PoolSpec) -> Result<String, ApiError> {
        if !self
            .templates
            .iter()
            .any(|(zone, t)| zone == &spec.zone && t.id == spec.template_id)
        {
            return Err(ApiError::Rejected {
                status: 400,
                message: format!("template {} not found in {}", spec.template_id, spec.zone),
            });
        }
        if !self
            .instance_types
            .iter()
            .any(|t| t.id == spec.instance_type_id)
        {
            return Err(ApiError::Rejected {
                status: 400,
                message: format!("unknown instance type {}", spec.instance_type_id),
            });
        }

        let id = uuid::Uuid::new_v4().to_string();
        self.pools.insert(
            id.clone(),
            SimPool {
                state: PoolState::from_spec(&id, spec, Phase::Creating),
                transition: None,
            },
        );
        self.begin(&id, Transition::Create, Phase::Creating)?;
        Ok(id)
    }

    fn get(&mut self, id: &str) -> Result<PoolState, ApiError> {
        let frozen = self.frozen;
        let transition = self.pool_mut(id)?.transition;

        match transition {
            Some((Transition::Destroy, 0)) if !frozen => {
                self.pools.remove(id);
                return Err(ApiError::NotFound(format!("instance pool {id}")));
            }
            Some((_, 0)) if !frozen => {
                let pool = self.pool_mut(id)?;
                pool.transition = None;
                settle(&mut pool.state);
            }
            Some((kind, remaining)) if !frozen => {
                self.pool_mut(id)?.transition = Some((kind, remaining - 1));
            }
            _ => {}
        }
        Ok(self.pool_mut(id)?.state.clone())
    }

    fn update(&mut self, id: &str, update: &PoolUpdate) -> Result<(), ApiError> {
        let pool = self.pool_mut(id)?;
        if pool.state.phase == Phase::Destroying {
            return Err(ApiError::Rejected {
                status: 409,
                message: "instance pool is being destroyed".into(),
            });
        }
        if update.disk_size.is_some_and(|d| d < pool.state.disk_size) {
            return Err(ApiError::Rejected {
                status: 400,
                message: "disk size cannot be reduced".into(),
            });
        }
        update.apply_to(&mut pool.state);
        self.begin(id, Transition::Update, Phase::Updating)
    }

    fn scale(&mut self, id: &str, size: u64) -> Result<(), ApiError> {
        let pool = self.pool_mut(id)?;
        if size == 0 {
            return Err(ApiError::Rejected {
                status: 400,
                message: "size must be at least 1".into(),
            });
        }
        pool.state.size = size;
        self.begin(id, Transition::Scale, Phase::Scaling)
    }

    fn delete(&mut self, id: &str) -> Result<(), ApiError> {
        self.begin(id, Transition::Destroy, Phase::Destroying)
    }
}

/// Finish a transition: running, with exactly `size` members.
fn settle(state: &mut PoolState) {
    state.phase = Phase::Running;
    let size = state.size as usize;
    state.instance_ids.truncate(size);
    while state.instance_ids.len() < size {
        state.instance_ids.push(uuid::Uuid::new_v4().to_string());
    }
}

impl Gateway for MemoryGateway {
    fn create_instance_pool<'a>(
        &'a self,
        spec: &'a PoolSpec,
    ) -> BoxFuture<'a, Result<String, ApiError>> {
        Box::pin(async move {
            let mut inner = self.lock();
            inner.calls.push(Call::Create {
                name: spec.name.clone(),
            });
            inner.mutate(Op::Create, |inner| inner.create(spec))
        })
    }

    fn get_instance_pool<'a>(
        &'a self,
        _zone: &'a str,
        id: &'a str,
    ) -> BoxFuture<'a, Result<PoolState, ApiError>> {
        Box::pin(async move {
            let mut inner = self.lock();
            inner.calls.push(Call::Get { id: id.to_string() });
            match inner.take_fault(Op::Get) {
                Some(Fault::Before(err)) | Some(Fault::AfterCommit(err)) => Err(err),
                Some(Fault::Swallow) | None => inner.get(id),
            }
        })
    }

    fn update_instance_pool<'a>(
        &'a self,
        _zone: &'a str,
        id: &'a str,
        update: &'a PoolUpdate,
    ) -> BoxFuture<'a, Result<(), ApiError>> {
        Box::pin(async move {
            let mut inner = self.lock();
            inner.calls.push(Call::Update {
                id: id.to_string(),
                update: update.clone(),
            });
            inner.mutate(Op::Update, |inner| inner.update(id, update))
        })
    }

    fn scale_instance_pool<'a>(
        &'a self,
        _zone: &'a str,
        id: &'a str,
        size: u64,
    ) -> BoxFuture<'a, Result<(), ApiError>> {
        Box::pin(async move {
            let mut inner = self.lock();
            inner.calls.push(Call::Scale {
                id: id.to_string(),
                size,
            });
            inner.mutate(Op::Scale, |inner| inner.scale(id, size))
        })
    }

    fn delete_instance_pool<'a>(
        &'a self,
        _zone: &'a str,
        id: &'a str,
    ) -> BoxFuture<'a, Result<(), ApiError>> {
        Box::pin(async move {
            let mut inner = self.lock();
            inner.calls.push(Call::Delete { id: id.to_string() });
            inner.mutate(Op::Delete, |inner| inner.delete(id))
        })
    }

    fn list_templates<'a>(
        &'a self,
        zone: &'a str,
        visibility: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Template>, ApiError>> {
        Box::pin(async move {
            let mut inner = self.lock();
            inner.calls.push(Call::ListTemplates {
                zone: zone.to_string(),
                visibility: visibility.to_string(),
            });
            Ok(inner
                .templates
                .iter()
                .filter(|(z, t)| z == zone && t.visibility == visibility)
                .map(|(_, t)| t.clone())
                .collect())
        })
    }

    fn get_template<'a>(
        &'a self,
        zone: &'a str,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Template, ApiError>> {
        Box::pin(async move {
            let mut inner = self.lock();
            inner.calls.push(Call::GetTemplate { id: id.to_string() });
            inner
                .templates
                .iter()
                .find(|(z, t)| z == zone && t.id == id)
                .map(|(_, t)| t.clone())
                .ok_or_else(|| ApiError::NotFound(format!("template {id}")))
        })
    }

    fn list_instance_types<'a>(
        &'a self,
        _zone: &'a str,
    ) -> BoxFuture<'a, Result<Vec<InstanceType>, ApiError>> {
        Box::pin(async move {
            let mut inner = self.lock();
            inner.calls.push(Call::ListInstanceTypes);
            Ok(inner.instance_types.clone())
        })
    }

    fn list_security_groups<'a>(
        &'a self,
        _zone: &'a str,
    ) -> BoxFuture<'a, Result<Vec<SecurityGroup>, ApiError>> {
        Box::pin(async move {
            let mut inner = self.lock();
            inner.calls.push(Call::ListSecurityGroups);
            Ok(inner.security_groups.clone())
        })
    }
}
