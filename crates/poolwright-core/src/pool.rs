use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Lifecycle stage of a pool as reported by the remote API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Creating,
    Running,
    Scaling,
    Updating,
    Destroying,
    Destroyed,
    Error,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Running => "running",
            Self::Scaling => "scaling",
            Self::Updating => "updating",
            Self::Destroying => "destroying",
            Self::Destroyed => "destroyed",
            Self::Error => "error",
        }
    }

    /// The remote system is still moving the pool between stable phases.
    pub fn is_transitional(self) -> bool {
        matches!(
            self,
            Self::Creating | Self::Scaling | Self::Updating | Self::Destroying
        )
    }

    /// No further transition will happen without a new mutating call.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Destroyed | Self::Error)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "creating" => Ok(Self::Creating),
            "running" => Ok(Self::Running),
            "scaling-up" | "scaling-down" | "scaling" => Ok(Self::Scaling),
            "updating" => Ok(Self::Updating),
            "destroying" => Ok(Self::Destroying),
            "destroyed" => Ok(Self::Destroyed),
            "error" | "suspended" => Ok(Self::Error),
            other => Err(CoreError::UnknownPhase(other.to_string())),
        }
    }
}

/// Canonical desired state of a pool. Every reference is an opaque ID.
///
/// This is the form the reconciler diffs against observed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSpec {
    pub name: String,
    pub zone: String,
    /// Empty string = no description.
    pub description: String,
    pub template_id: String,
    pub instance_type_id: String,
    pub size: u64,
    pub disk_size: u64,
    pub ipv6_enabled: bool,
    pub ssh_key: Option<String>,
    /// Base64, as sent on the wire.
    pub user_data: Option<String>,
    /// Write-once: set at creation only.
    pub anti_affinity_group_ids: BTreeSet<String>,
    pub security_group_ids: BTreeSet<String>,
    pub network_ids: BTreeSet<String>,
    pub elastic_ip_ids: BTreeSet<String>,
    pub instance_prefix: String,
}

/// Snapshot of a pool as last observed on the remote API.
///
/// Owned by the remote system; any copy held locally may be stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolState {
    pub id: String,
    pub zone: String,
    pub phase: Phase,
    pub name: String,
    pub description: String,
    pub template_id: String,
    pub instance_type_id: String,
    pub size: u64,
    pub disk_size: u64,
    pub ipv6_enabled: bool,
    pub ssh_key: Option<String>,
    pub user_data: Option<String>,
    pub anti_affinity_group_ids: BTreeSet<String>,
    pub security_group_ids: BTreeSet<String>,
    pub network_ids: BTreeSet<String>,
    pub elastic_ip_ids: BTreeSet<String>,
    pub instance_prefix: String,
    /// Member instances, in the order the API lists them.
    pub instance_ids: Vec<String>,
}

impl PoolState {
    /// Running with exactly `size` members.
    pub fn is_settled(&self) -> bool {
        self.phase == Phase::Running && self.instance_ids.len() as u64 == self.size
    }

    /// The state a freshly created pool is expected to converge to.
    pub fn from_spec(id: impl Into<String>, spec: &PoolSpec, phase: Phase) -> Self {
        Self {
            id: id.into(),
            zone: spec.zone.clone(),
            phase,
            name: spec.name.clone(),
            description: spec.description.clone(),
            template_id: spec.template_id.clone(),
            instance_type_id: spec.instance_type_id.clone(),
            size: spec.size,
            disk_size: spec.disk_size,
            ipv6_enabled: spec.ipv6_enabled,
            ssh_key: spec.ssh_key.clone(),
            user_data: spec.user_data.clone(),
            anti_affinity_group_ids: spec.anti_affinity_group_ids.clone(),
            security_group_ids: spec.security_group_ids.clone(),
            network_ids: spec.network_ids.clone(),
            elastic_ip_ids: spec.elastic_ip_ids.clone(),
            instance_prefix: spec.instance_prefix.clone(),
            instance_ids: Vec::new(),
        }
    }
}

/// Batched set of in-place changes sent in a single update call.
///
/// `None` leaves a field untouched. For clearable fields, `Some` of the
/// empty value (`""`, `Some(None)`, empty set, `false`) resets it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_type_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_group_ids: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_ids: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elastic_ip_ids: Option<BTreeSet<String>>,
}

impl PoolUpdate {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Apply the fieldset to a state snapshot.
    pub fn apply_to(&self, state: &mut PoolState) {
        if let Some(name) = &self.name {
            state.name = name.clone();
        }
        if let Some(description) = &self.description {
            state.description = description.clone();
        }
        if let Some(instance_type_id) = &self.instance_type_id {
            state.instance_type_id = instance_type_id.clone();
        }
        if let Some(disk_size) = self.disk_size {
            state.disk_size = disk_size;
        }
        if let Some(ipv6) = self.ipv6_enabled {
            state.ipv6_enabled = ipv6;
        }
        if let Some(ssh_key) = &self.ssh_key {
            state.ssh_key = ssh_key.clone();
        }
        if let Some(user_data) = &self.user_data {
            state.user_data = user_data.clone();
        }
        if let Some(ids) = &self.security_group_ids {
            state.security_group_ids = ids.clone();
        }
        if let Some(ids) = &self.network_ids {
            state.network_ids = ids.clone();
        }
        if let Some(ids) = &self.elastic_ip_ids {
            state.elastic_ip_ids = ids.clone();
        }
    }
}
