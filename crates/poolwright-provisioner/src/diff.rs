use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use poolwright_core::{PoolSpec, PoolState, PoolUpdate};

/// Every attribute of a pool the engine compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Zone,
    Name,
    Description,
    TemplateId,
    InstanceTypeId,
    Size,
    DiskSize,
    Ipv6Enabled,
    SshKey,
    UserData,
    AntiAffinityGroupIds,
    SecurityGroupIds,
    NetworkIds,
    ElasticIpIds,
    InstancePrefix,
}

/// How a change to a field reaches the remote pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldClass {
    /// Delete then create.
    Replace,
    /// A dedicated scale call.
    Scale,
    /// Part of the single batched update call.
    Update,
}

impl Field {
    pub const ALL: [Field; 15] = [
        Field::Zone,
        Field::Name,
        Field::Description,
        Field::TemplateId,
        Field::InstanceTypeId,
        Field::Size,
        Field::DiskSize,
        Field::Ipv6Enabled,
        Field::SshKey,
        Field::UserData,
        Field::AntiAffinityGroupIds,
        Field::SecurityGroupIds,
        Field::NetworkIds,
        Field::ElasticIpIds,
        Field::InstancePrefix,
    ];

    pub fn class(self) -> FieldClass {
        match self {
            Self::Zone | Self::TemplateId | Self::AntiAffinityGroupIds | Self::InstancePrefix => {
                FieldClass::Replace
            }
            Self::Size => FieldClass::Scale,
            Self::Name
            | Self::Description
            | Self::InstanceTypeId
            | Self::DiskSize
            | Self::Ipv6Enabled
            | Self::SshKey
            | Self::UserData
            | Self::SecurityGroupIds
            | Self::NetworkIds
            | Self::ElasticIpIds => FieldClass::Update,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Zone => "zone",
            Self::Name => "name",
            Self::Description => "description",
            Self::TemplateId => "template_id",
            Self::InstanceTypeId => "instance_type_id",
            Self::Size => "size",
            Self::DiskSize => "disk_size",
            Self::Ipv6Enabled => "ipv6_enabled",
            Self::SshKey => "ssh_key",
            Self::UserData => "user_data",
            Self::AntiAffinityGroupIds => "anti_affinity_group_ids",
            Self::SecurityGroupIds => "security_group_ids",
            Self::NetworkIds => "network_ids",
            Self::ElasticIpIds => "elastic_ip_ids",
            Self::InstancePrefix => "instance_prefix",
        }
    }

    /// Short label for rendered plans.
    pub fn label(self) -> &'static str {
        match self {
            Self::Zone => "Zone",
            Self::Name => "Name",
            Self::Description => "Description",
            Self::TemplateId => "Template",
            Self::InstanceTypeId => "Instance type",
            Self::Size => "Size",
            Self::DiskSize => "Disk size (GB)",
            Self::Ipv6Enabled => "IPv6",
            Self::SshKey => "SSH key",
            Self::UserData => "User data",
            Self::AntiAffinityGroupIds => "Anti-affinity groups",
            Self::SecurityGroupIds => "Security groups",
            Self::NetworkIds => "Private networks",
            Self::ElasticIpIds => "Elastic IPs",
            Self::InstancePrefix => "Instance prefix",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read access to the attributes shared by desired and observed pools.
pub trait PoolFields {
    fn field(&self, field: Field) -> Value;
}

macro_rules! impl_pool_fields {
    ($ty:ty) => {
        impl PoolFields for $ty {
            fn field(&self, field: Field) -> Value {
                match field {
                    Field::Zone => json!(self.zone),
                    Field::Name => json!(self.name),
                    Field::Description => json!(self.description),
                    Field::TemplateId => json!(self.template_id),
                    Field::InstanceTypeId => json!(self.instance_type_id),
                    Field::Size => json!(self.size),
                    Field::DiskSize => json!(self.disk_size),
                    Field::Ipv6Enabled => json!(self.ipv6_enabled),
                    Field::SshKey => json!(self.ssh_key),
                    Field::UserData => json!(self.user_data),
                    Field::AntiAffinityGroupIds => json!(self.anti_affinity_group_ids),
                    Field::SecurityGroupIds => json!(self.security_group_ids),
                    Field::NetworkIds => json!(self.network_ids),
                    Field::ElasticIpIds => json!(self.elastic_ip_ids),
                    Field::InstancePrefix => json!(self.instance_prefix),
                }
            }
        }
    };
}

impl_pool_fields!(PoolSpec);
impl_pool_fields!(PoolState);

/// Structured before/after for a single field that doesn't match desired
/// state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDrift {
    pub field: Field,
    /// What we want
    pub expected: Value,
    /// What the API reports
    pub actual: Value,
}

/// Fields whose observed value differs from the desired one, in
/// [`Field::ALL`] order.
pub fn diff(desired: &PoolSpec, observed: &PoolState) -> Vec<FieldDrift> {
    Field::ALL
        .iter()
        .filter_map(|&field| {
            let expected = desired.field(field);
            let actual = observed.field(field);
            (expected != actual).then_some(FieldDrift {
                field,
                expected,
                actual,
            })
        })
        .collect()
}

/// True when every listed field already has its desired value.
pub fn converged(desired: &PoolSpec, observed: &PoolState, fields: &[Field]) -> bool {
    fields
        .iter()
        .all(|&f| desired.field(f) == observed.field(f))
}

/// The batched fieldset that moves `fields` to their desired values.
///
/// Fields outside the update class are ignored.
pub fn update_for(desired: &PoolSpec, fields: &[Field]) -> PoolUpdate {
    let mut update = PoolUpdate::default();
    for field in fields {
        match field {
            Field::Name => update.name = Some(desired.name.clone()),
            Field::Description => update.description = Some(desired.description.clone()),
            Field::InstanceTypeId => {
                update.instance_type_id = Some(desired.instance_type_id.clone());
            }
            Field::DiskSize => update.disk_size = Some(desired.disk_size),
            Field::Ipv6Enabled => update.ipv6_enabled = Some(desired.ipv6_enabled),
            Field::SshKey => update.ssh_key = Some(desired.ssh_key.clone()),
            Field::UserData => update.user_data = Some(desired.user_data.clone()),
            Field::SecurityGroupIds => {
                update.security_group_ids = Some(desired.security_group_ids.clone());
            }
            Field::NetworkIds => update.network_ids = Some(desired.network_ids.clone()),
            Field::ElasticIpIds => update.elastic_ip_ids = Some(desired.elastic_ip_ids.clone()),
            Field::Zone
            | Field::TemplateId
            | Field::Size
            | Field::AntiAffinityGroupIds
            | Field::InstancePrefix => {}
        }
    }
    update
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_field_has_exactly_one_class() {
        let replace: Vec<_> = Field::ALL
            .iter()
            .filter(|f| f.class() == FieldClass::Replace)
            .collect();
        assert_eq!(
            replace,
            vec![
                &Field::Zone,
                &Field::TemplateId,
                &Field::AntiAffinityGroupIds,
                &Field::InstancePrefix
            ]
        );
        assert_eq!(Field::Size.class(), FieldClass::Scale);
        assert_eq!(Field::SecurityGroupIds.class(), FieldClass::Update);
    }
}
