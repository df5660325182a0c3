use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use poolwright_core::declaration::PoolDeclaration;

use crate::addr::ResourceAddr;
use crate::error::ProvisionerError;

/// The full manifest: format version + every declared pool, keyed by the
/// name part of its address.
///
/// ```json
/// { "version": 1, "pools": { "web": { "name": "web", "zone": "ch-gva-2", ... } } }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    #[serde(default)]
    pub pools: BTreeMap<String, PoolDeclaration>,
}

impl Manifest {
    /// Bump when the manifest shape changes.
    pub const VERSION: u32 = 1;

    pub fn from_json(json: &str) -> Result<Self, ProvisionerError> {
        let manifest: Self = serde_json::from_str(json)?;
        if manifest.version == 0 || manifest.version > Self::VERSION {
            return Err(ProvisionerError::InvalidSpec(format!(
                "manifest version {} is not supported (expected {})",
                manifest.version,
                Self::VERSION
            )));
        }
        Ok(manifest)
    }

    pub async fn load(path: &Path) -> Result<Self, ProvisionerError> {
        let json = tokio::fs::read_to_string(path).await?;
        let manifest = Self::from_json(&json)?;
        tracing::debug!(path = %path.display(), pools = manifest.pools.len(), "manifest loaded");
        Ok(manifest)
    }

    /// Declared pools with their addresses, in address order.
    pub fn entries(&self) -> impl Iterator<Item = (ResourceAddr, &PoolDeclaration)> {
        self.pools
            .iter()
            .map(|(name, decl)| (ResourceAddr::instance_pool(name), decl))
    }

    pub fn get(&self, addr: &ResourceAddr) -> Option<&PoolDeclaration> {
        self.pools.get(&addr.resource_name)
    }

    pub fn contains(&self, addr: &ResourceAddr) -> bool {
        self.get(addr).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pools_by_name() {
        let manifest = Manifest::from_json(
            r#"{
                "version": 1,
                "pools": {
                    "web": {
                        "name": "web",
                        "zone": "ch-gva-2",
                        "template": {"name": "Linux Ubuntu 20.04 LTS 64-bit"},
                        "instance_type": "tiny",
                        "size": 1,
                        "disk_size": 10
                    }
                }
            }"#,
        )
        .unwrap();

        let addrs: Vec<_> = manifest.entries().map(|(addr, _)| addr.to_string()).collect();
        assert_eq!(addrs, vec!["instance_pool.web"]);
        assert!(manifest.contains(&ResourceAddr::instance_pool("web")));
    }

    #[test]
    fn rejects_newer_versions() {
        let err = Manifest::from_json(r#"{"version": 7, "pools": {}}"#).unwrap_err();
        assert!(matches!(err, ProvisionerError::InvalidSpec(_)));
    }
}
