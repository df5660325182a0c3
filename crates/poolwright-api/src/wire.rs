//! JSON bodies of the compute API (v2, kebab-case keys).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use poolwright_core::catalog::{InstanceType, SecurityGroup, Template};
use poolwright_core::pool::{Phase, PoolSpec, PoolState, PoolUpdate};

use crate::error::ApiError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRef {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameRef {
    pub name: String,
}

fn id_refs(ids: &BTreeSet<String>) -> Vec<IdRef> {
    ids.iter().map(|id| IdRef { id: id.clone() }).collect()
}

fn id_set(refs: Vec<IdRef>) -> BTreeSet<String> {
    refs.into_iter().map(|r| r.id).collect()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct InstancePoolBody {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub state: String,
    pub size: u64,
    pub disk_size: u64,
    #[serde(default)]
    pub ipv6_enabled: bool,
    #[serde(default)]
    pub ssh_key: Option<NameRef>,
    #[serde(default)]
    pub user_data: Option<String>,
    pub template: IdRef,
    pub instance_type: IdRef,
    #[serde(default)]
    pub anti_affinity_groups: Vec<IdRef>,
    #[serde(default)]
    pub security_groups: Vec<IdRef>,
    #[serde(default)]
    pub private_networks: Vec<IdRef>,
    #[serde(default)]
    pub elastic_ips: Vec<IdRef>,
    #[serde(default)]
    pub instances: Vec<IdRef>,
    #[serde(default)]
    pub instance_prefix: Option<String>,
}

impl InstancePoolBody {
    pub fn into_state(self, zone: &str) -> Result<PoolState, ApiError> {
        let phase: Phase = self
            .state
            .parse()
            .map_err(|e: poolwright_core::CoreError| ApiError::Decode(e.to_string()))?;

        Ok(PoolState {
            id: self.id,
            zone: zone.to_string(),
            phase,
            name: self.name,
            description: self.description.unwrap_or_default(),
            template_id: self.template.id,
            instance_type_id: self.instance_type.id,
            size: self.size,
            disk_size: self.disk_size,
            ipv6_enabled: self.ipv6_enabled,
            ssh_key: self.ssh_key.map(|k| k.name),
            user_data: self.user_data.filter(|u| !u.is_empty()),
            anti_affinity_group_ids: id_set(self.anti_affinity_groups),
            security_group_ids: id_set(self.security_groups),
            network_ids: id_set(self.private_networks),
            elastic_ip_ids: id_set(self.elastic_ips),
            instance_prefix: self.instance_prefix.unwrap_or_default(),
            instance_ids: self.instances.into_iter().map(|i| i.id).collect(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct CreatePoolRequest {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub template: IdRef,
    pub instance_type: IdRef,
    pub size: u64,
    pub disk_size: u64,
    pub ipv6_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssh_key: Option<NameRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub anti_affinity_groups: Vec<IdRef>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub security_groups: Vec<IdRef>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub private_networks: Vec<IdRef>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub elastic_ips: Vec<IdRef>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub instance_prefix: String,
}

impl From<&PoolSpec> for CreatePoolRequest {
    fn from(spec: &PoolSpec) -> Self {
        Self {
            name: spec.name.clone(),
            description: spec.description.clone(),
            template: IdRef {
                id: spec.template_id.clone(),
            },
            instance_type: IdRef {
                id: spec.instance_type_id.clone(),
            },
            size: spec.size,
            disk_size: spec.disk_size,
            ipv6_enabled: spec.ipv6_enabled,
            ssh_key: spec.ssh_key.clone().map(|name| NameRef { name }),
            user_data: spec.user_data.clone(),
            anti_affinity_groups: id_refs(&spec.anti_affinity_group_ids),
            security_groups: id_refs(&spec.security_group_ids),
            private_networks: id_refs(&spec.network_ids),
            elastic_ips: id_refs(&spec.elastic_ip_ids),
            instance_prefix: spec.instance_prefix.clone(),
        }
    }
}

/// The "set" half of a [`PoolUpdate`]. Resets go through
/// [`reset_fields`] because the API has no way to null a field in a PUT.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct UpdatePoolRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<IdRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv6_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssh_key: Option<NameRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_groups: Option<Vec<IdRef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_networks: Option<Vec<IdRef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elastic_ips: Option<Vec<IdRef>>,
}

impl UpdatePoolRequest {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.instance_type.is_none()
            && self.disk_size.is_none()
            && self.ipv6_enabled.is_none()
            && self.ssh_key.is_none()
            && self.user_data.is_none()
            && self.security_groups.is_none()
            && self.private_networks.is_none()
            && self.elastic_ips.is_none()
    }
}

impl From<&PoolUpdate> for UpdatePoolRequest {
    fn from(update: &PoolUpdate) -> Self {
        let non_empty = |ids: &Option<BTreeSet<String>>| {
            ids.as_ref().filter(|ids| !ids.is_empty()).map(id_refs)
        };

        Self {
            name: update.name.clone(),
            description: update.description.clone().filter(|d| !d.is_empty()),
            instance_type: update
                .instance_type_id
                .clone()
                .map(|id| IdRef { id }),
            disk_size: update.disk_size,
            ipv6_enabled: update.ipv6_enabled.filter(|enabled| *enabled),
            ssh_key: update.ssh_key.clone().flatten().map(|name| NameRef { name }),
            user_data: update.user_data.clone().flatten(),
            security_groups: non_empty(&update.security_group_ids),
            private_networks: non_empty(&update.network_ids),
            elastic_ips: non_empty(&update.elastic_ip_ids),
        }
    }
}

/// Fields of an update that clear a value, as reset-field path segments.
pub fn reset_fields(update: &PoolUpdate) -> Vec<&'static str> {
    let mut fields = Vec::new();
    if update.description.as_deref() == Some("") {
        fields.push("description");
    }
    if update.ipv6_enabled == Some(false) {
        fields.push("ipv6-enabled");
    }
    if matches!(update.ssh_key, Some(None)) {
        fields.push("ssh-key");
    }
    if matches!(update.user_data, Some(None)) {
        fields.push("user-data");
    }
    if update.security_group_ids.as_ref().is_some_and(|s| s.is_empty()) {
        fields.push("security-groups");
    }
    if update.network_ids.as_ref().is_some_and(|s| s.is_empty()) {
        fields.push("private-networks");
    }
    if update.elastic_ip_ids.as_ref().is_some_and(|s| s.is_empty()) {
        fields.push("elastic-ips");
    }
    fields
}

#[derive(Debug, Clone, Serialize)]
pub struct ScalePoolRequest {
    pub size: u64,
}

/// Asynchronous job handle returned by every mutating call.
#[derive(Debug, Clone, Deserialize)]
pub struct Operation {
    pub id: String,
    pub state: String,
    #[serde(default)]
    pub reference: Option<IdRef>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl Operation {
    pub fn is_pending(&self) -> bool {
        self.state == "pending"
    }

    pub fn is_success(&self) -> bool {
        self.state == "success"
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TemplateBody {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub default_user: Option<String>,
    #[serde(default)]
    pub visibility: Option<String>,
}

impl From<TemplateBody> for Template {
    fn from(body: TemplateBody) -> Self {
        Self {
            id: body.id,
            name: body.name,
            default_user: body.default_user,
            visibility: body.visibility.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateList {
    #[serde(default)]
    pub templates: Vec<TemplateBody>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstanceTypeBody {
    pub id: String,
    pub family: String,
    pub size: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct InstanceTypeList {
    #[serde(default)]
    pub instance_types: Vec<InstanceTypeBody>,
}

impl From<InstanceTypeBody> for InstanceType {
    fn from(body: InstanceTypeBody) -> Self {
        Self {
            id: body.id,
            family: body.family,
            size: body.size,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SecurityGroupList {
    #[serde(default)]
    pub security_groups: Vec<SecurityGroupBody>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityGroupBody {
    pub id: String,
    pub name: String,
}

impl From<SecurityGroupBody> for SecurityGroup {
    fn from(body: SecurityGroupBody) -> Self {
        Self {
            id: body.id,
            name: body.name,
        }
    }
}

/// Error payload of a non-2xx response.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
}
