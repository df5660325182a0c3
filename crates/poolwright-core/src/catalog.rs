use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Instance family assumed when an instance type is named by size only.
pub const DEFAULT_FAMILY: &str = "standard";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub name: String,
    /// Login user baked into the image, e.g. "ubuntu".
    pub default_user: Option<String>,
    pub visibility: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceType {
    pub id: String,
    pub family: String,
    pub size: String,
}

impl InstanceType {
    /// Fully qualified name, e.g. "standard.tiny".
    pub fn name(&self) -> String {
        format!("{}.{}", self.family, self.size)
    }

    /// The name a declaration would most likely use: the bare size for the
    /// default family, the qualified name otherwise.
    pub fn short_name(&self) -> String {
        if self.family == DEFAULT_FAMILY {
            self.size.clone()
        } else {
            self.name()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroup {
    pub id: String,
    pub name: String,
}

/// Split an instance type name into `(family, size)`.
///
/// "tiny" → ("standard", "tiny"); "gpu.large" → ("gpu", "large").
pub fn parse_instance_type(name: &str) -> Result<(String, String), CoreError> {
    let name = name.trim().to_ascii_lowercase();
    let (family, size) = match name.split_once('.') {
        Some((family, size)) => (family.to_string(), size.to_string()),
        None => (DEFAULT_FAMILY.to_string(), name.clone()),
    };

    if family.is_empty() || size.is_empty() || size.contains('.') {
        return Err(CoreError::InvalidInstanceType(name));
    }
    Ok((family, size))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_size_defaults_to_standard_family() {
        assert_eq!(
            parse_instance_type("Tiny").unwrap(),
            ("standard".to_string(), "tiny".to_string())
        );
        assert_eq!(
            parse_instance_type("gpu2.large").unwrap(),
            ("gpu2".to_string(), "large".to_string())
        );
        assert!(parse_instance_type("standard.").is_err());
        assert!(parse_instance_type("a.b.c").is_err());
    }

    #[test]
    fn short_name_hides_default_family() {
        let tiny = InstanceType {
            id: "it-1".into(),
            family: "standard".into(),
            size: "tiny".into(),
        };
        let gpu = InstanceType {
            id: "it-2".into(),
            family: "gpu".into(),
            size: "small".into(),
        };
        assert_eq!(tiny.short_name(), "tiny");
        assert_eq!(gpu.short_name(), "gpu.small");
    }
}
