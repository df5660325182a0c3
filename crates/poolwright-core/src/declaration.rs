use serde::{Deserialize, Serialize};

/// An instance pool as the caller declares it.
///
/// References to other resources may still be symbolic (a template name, a
/// security group name). The normalizer turns this into a [`PoolSpec`]
/// where every reference is an opaque ID.
///
/// Omitting an optional field means "none": a pool declared without
/// security groups converges to a pool with no security groups attached.
///
/// [`PoolSpec`]: crate::pool::PoolSpec
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolDeclaration {
    pub name: String,
    pub zone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub template: TemplateRef,
    /// e.g. "tiny", "small", "standard.medium", "gpu.large"
    #[serde(alias = "service_offering")]
    pub instance_type: String,
    pub size: u64,
    /// Root disk size in GB.
    pub disk_size: u64,
    #[serde(default)]
    pub ipv6: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_pair: Option<String>,
    /// Plain text; encoded by the normalizer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
    #[serde(default, alias = "affinity_group_ids")]
    pub anti_affinity_group_ids: Vec<String>,
    #[serde(default)]
    pub security_groups: Vec<SecurityGroupRef>,
    #[serde(default)]
    pub network_ids: Vec<String>,
    #[serde(default)]
    pub elastic_ip_ids: Vec<String>,
    /// Hostname prefix of the pool members. Fixed at creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_prefix: Option<String>,
}

/// How a pool names its template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TemplateRef {
    Id {
        id: String,
    },
    Lookup {
        name: String,
        #[serde(default)]
        filter: TemplateFilter,
    },
}

/// Which template catalog a lookup searches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateFilter {
    /// Templates published by the provider.
    #[default]
    Featured,
    /// Templates registered by the account.
    Mine,
}

impl TemplateFilter {
    /// The API visibility this filter maps to.
    pub fn visibility(self) -> &'static str {
        match self {
            Self::Featured => "public",
            Self::Mine => "private",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SecurityGroupRef {
    Id { id: String },
    Name { name: String },
}
