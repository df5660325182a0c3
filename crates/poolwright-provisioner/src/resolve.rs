//! Desired-state normalization: declarations in, canonical [`PoolSpec`]s
//! out. Only lookups are issued here, never a mutating call.

use std::collections::BTreeSet;

use poolwright_api::{ApiError, Gateway};
use poolwright_core::catalog::{Template, parse_instance_type};
use poolwright_core::declaration::{PoolDeclaration, SecurityGroupRef, TemplateFilter, TemplateRef};
use poolwright_core::{PoolSpec, user_data};

use crate::error::ProvisionerError;

pub const MIN_DISK_SIZE: u64 = 10;
pub const MAX_DISK_SIZE: u64 = 50_000;
pub const DEFAULT_INSTANCE_PREFIX: &str = "pool";

/// Result of matching a symbolic reference against a candidate list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
    Ambiguous(Vec<T>),
}

pub fn select_exactly_one<T>(mut candidates: Vec<T>) -> Lookup<T> {
    match candidates.len() {
        0 => Lookup::NotFound,
        1 => match candidates.pop() {
            Some(only) => Lookup::Found(only),
            None => Lookup::NotFound,
        },
        _ => Lookup::Ambiguous(candidates),
    }
}

/// Parameters of a standalone template lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateQuery {
    pub zone: String,
    pub id: Option<String>,
    pub name: Option<String>,
    pub filter: TemplateFilter,
}

/// Find one template in a zone's catalog by ID, name, or both.
///
/// The filter picks the catalog (featured or the account's own); the match
/// must be unique within it.
pub async fn lookup_template(
    gateway: &dyn Gateway,
    query: &TemplateQuery,
) -> Result<Template, ProvisionerError> {
    if query.id.is_none() && query.name.is_none() {
        return Err(ProvisionerError::InvalidSpec(
            "either name or id must be specified".into(),
        ));
    }

    let templates = gateway
        .list_templates(&query.zone, query.filter.visibility())
        .await?;
    let candidates = templates
        .into_iter()
        .filter(|t| query.id.as_ref().is_none_or(|id| &t.id == id))
        .filter(|t| query.name.as_ref().is_none_or(|name| &t.name == name))
        .collect();

    let wanted = query
        .name
        .clone()
        .or_else(|| query.id.clone())
        .unwrap_or_default();
    match select_exactly_one(candidates) {
        Lookup::Found(template) => Ok(template),
        Lookup::NotFound => Err(ProvisionerError::ReferenceNotFound {
            kind: "template",
            name: wanted,
        }),
        Lookup::Ambiguous(matches) => Err(ProvisionerError::AmbiguousReference {
            kind: "template",
            name: wanted,
            candidates: matches.into_iter().map(|t| t.id).collect(),
        }),
    }
}

/// Checks that need no remote call.
pub fn validate(decl: &PoolDeclaration) -> Result<(), ProvisionerError> {
    if decl.name.trim().is_empty() {
        return Err(ProvisionerError::InvalidSpec("name must not be empty".into()));
    }
    if decl.zone.trim().is_empty() {
        return Err(ProvisionerError::InvalidSpec(format!(
            "{}: zone must not be empty",
            decl.name
        )));
    }
    if decl.size == 0 {
        return Err(ProvisionerError::InvalidSpec(format!(
            "{}: size must be at least 1",
            decl.name
        )));
    }
    if !(MIN_DISK_SIZE..=MAX_DISK_SIZE).contains(&decl.disk_size) {
        return Err(ProvisionerError::InvalidSpec(format!(
            "{}: disk_size must be between {MIN_DISK_SIZE} and {MAX_DISK_SIZE} GB, got {}",
            decl.name, decl.disk_size
        )));
    }
    parse_instance_type(&decl.instance_type)?;
    Ok(())
}

/// Resolves declarations against the catalog of the pool's zone.
pub struct Normalizer<'a> {
    gateway: &'a dyn Gateway,
}

impl<'a> Normalizer<'a> {
    pub fn new(gateway: &'a dyn Gateway) -> Self {
        Self { gateway }
    }

    pub async fn normalize(&self, decl: &PoolDeclaration) -> Result<PoolSpec, ProvisionerError> {
        validate(decl)?;
        let user_data = decl.user_data.as_deref().map(user_data::encode).transpose()?;

        let template_id = self.template_id(&decl.zone, &decl.template).await?;
        let instance_type_id = self.instance_type_id(&decl.zone, &decl.instance_type).await?;
        let security_group_ids = self
            .security_group_ids(&decl.zone, &decl.security_groups)
            .await?;

        let spec = PoolSpec {
            name: decl.name.clone(),
            zone: decl.zone.clone(),
            description: decl.description.clone().unwrap_or_default(),
            template_id,
            instance_type_id,
            size: decl.size,
            disk_size: decl.disk_size,
            ipv6_enabled: decl.ipv6,
            ssh_key: decl.key_pair.clone().filter(|k| !k.is_empty()),
            user_data,
            anti_affinity_group_ids: decl.anti_affinity_group_ids.iter().cloned().collect(),
            security_group_ids,
            network_ids: decl.network_ids.iter().cloned().collect(),
            elastic_ip_ids: decl.elastic_ip_ids.iter().cloned().collect(),
            instance_prefix: decl
                .instance_prefix
                .clone()
                .unwrap_or_else(|| DEFAULT_INSTANCE_PREFIX.to_string()),
        };
        tracing::debug!(pool = %spec.name, zone = %spec.zone, template_id = %spec.template_id, "declaration normalized");
        Ok(spec)
    }

    async fn template_id(&self, zone: &str, template: &TemplateRef) -> Result<String, ProvisionerError> {
        match template {
            TemplateRef::Id { id } => match self.gateway.get_template(zone, id).await {
                Ok(found) => Ok(found.id),
                Err(ApiError::NotFound(_)) => Err(ProvisionerError::ReferenceNotFound {
                    kind: "template",
                    name: id.clone(),
                }),
                Err(e) => Err(e.into()),
            },
            TemplateRef::Lookup { name, filter } => {
                let query = TemplateQuery {
                    zone: zone.to_string(),
                    id: None,
                    name: Some(name.clone()),
                    filter: *filter,
                };
                Ok(lookup_template(self.gateway, &query).await?.id)
            }
        }
    }

    async fn instance_type_id(&self, zone: &str, name: &str) -> Result<String, ProvisionerError> {
        let (family, size) = parse_instance_type(name)?;
        let candidates = self
            .gateway
            .list_instance_types(zone)
            .await?
            .into_iter()
            .filter(|t| t.family.eq_ignore_ascii_case(&family) && t.size.eq_ignore_ascii_case(&size))
            .collect();

        match select_exactly_one(candidates) {
            Lookup::Found(t) => Ok(t.id),
            Lookup::NotFound => Err(ProvisionerError::ReferenceNotFound {
                kind: "instance type",
                name: name.to_string(),
            }),
            Lookup::Ambiguous(matches) => Err(ProvisionerError::AmbiguousReference {
                kind: "instance type",
                name: name.to_string(),
                candidates: matches.into_iter().map(|t| t.id).collect(),
            }),
        }
    }

    async fn security_group_ids(
        &self,
        zone: &str,
        refs: &[SecurityGroupRef],
    ) -> Result<BTreeSet<String>, ProvisionerError> {
        let mut ids = BTreeSet::new();
        let mut names = Vec::new();
        for r in refs {
            match r {
                SecurityGroupRef::Id { id } => {
                    ids.insert(id.clone());
                }
                SecurityGroupRef::Name { name } => names.push(name),
            }
        }
        if names.is_empty() {
            return Ok(ids);
        }

        let groups = self.gateway.list_security_groups(zone).await?;
        for name in names {
            let candidates = groups.iter().filter(|g| &g.name == name).collect();
            match select_exactly_one(candidates) {
                Lookup::Found(group) => {
                    ids.insert(group.id.clone());
                }
                Lookup::NotFound => {
                    return Err(ProvisionerError::ReferenceNotFound {
                        kind: "security group",
                        name: name.clone(),
                    });
                }
                Lookup::Ambiguous(matches) => {
                    return Err(ProvisionerError::AmbiguousReference {
                        kind: "security group",
                        name: name.clone(),
                        candidates: matches.into_iter().map(|g| g.id.clone()).collect(),
                    });
                }
            }
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_one_match() {
        assert_eq!(select_exactly_one(vec!["a"]), Lookup::Found("a"));
        assert_eq!(select_exactly_one(Vec::<&str>::new()), Lookup::NotFound);
        assert_eq!(
            select_exactly_one(vec!["a", "b"]),
            Lookup::Ambiguous(vec!["a", "b"])
        );
    }
}
