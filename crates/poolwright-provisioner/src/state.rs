use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::addr::ResourceAddr;
use crate::project::Attributes;
use crate::reconcile::PoolRef;

/// Local record of managed pools, persisted as JSON next to the manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvisionerState {
    /// Manifest version the last apply ran against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_version: Option<u32>,

    #[serde(default)]
    pub pools: BTreeMap<ResourceAddr, TrackedPool>,
}

/// State for a single managed pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedPool {
    pub id: String,
    pub zone: String,
    /// Projection taken after the last successful apply or import. Empty
    /// for a pool whose creation has not converged yet.
    pub attributes: Attributes,
    pub updated_at: jiff::Timestamp,
}

impl TrackedPool {
    pub fn pool_ref(&self) -> PoolRef {
        PoolRef {
            id: self.id.clone(),
            zone: self.zone.clone(),
        }
    }
}
