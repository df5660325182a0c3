use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProvisionerError;

pub const INSTANCE_POOL: &str = "instance_pool";

/// Composite key for addressing a managed pool in the manifest and in
/// local state, e.g. `instance_pool.web`.
///
/// Serialized as its display string so it can key a JSON object.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceAddr {
    pub resource_type: String,
    pub resource_name: String,
}

impl ResourceAddr {
    pub fn instance_pool(name: impl Into<String>) -> Self {
        Self {
            resource_type: INSTANCE_POOL.to_string(),
            resource_name: name.into(),
        }
    }
}

impl fmt::Display for ResourceAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.resource_type, self.resource_name)
    }
}

impl FromStr for ResourceAddr {
    type Err = ProvisionerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((ty, name)) if !ty.is_empty() && !name.is_empty() => Ok(Self {
                resource_type: ty.to_string(),
                resource_name: name.to_string(),
            }),
            // A bare name addresses a pool.
            None if !s.is_empty() => Ok(Self::instance_pool(s)),
            _ => Err(ProvisionerError::InvalidSpec(format!(
                "invalid resource address {s:?}"
            ))),
        }
    }
}

impl TryFrom<String> for ResourceAddr {
    type Error = ProvisionerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ResourceAddr> for String {
    fn from(addr: ResourceAddr) -> Self {
        addr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_displays() {
        let addr: ResourceAddr = "instance_pool.web".parse().unwrap();
        assert_eq!(addr, ResourceAddr::instance_pool("web"));
        assert_eq!(addr.to_string(), "instance_pool.web");

        assert_eq!("db".parse::<ResourceAddr>().unwrap().to_string(), "instance_pool.db");
        assert!("instance_pool.".parse::<ResourceAddr>().is_err());
    }
}
