//! Observed state back to the flat attribute map callers store and compare.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use poolwright_core::catalog::InstanceType;
use poolwright_core::{PoolSpec, PoolState, user_data};

pub type Attributes = BTreeMap<String, String>;

/// Keys only an observation can produce.
const OBSERVED_ONLY: [&str; 3] = ["id", "state", "virtual_machines.#"];

/// Instance type ID → the name a declaration uses for it.
#[derive(Debug, Clone, Default)]
pub struct CatalogNames {
    instance_types: HashMap<String, String>,
}

impl CatalogNames {
    pub fn from_instance_types(types: &[InstanceType]) -> Self {
        Self {
            instance_types: types
                .iter()
                .map(|t| (t.id.clone(), t.short_name()))
                .collect(),
        }
    }

    /// Falls back to the raw ID for types missing from the catalog.
    pub fn instance_type<'a>(&'a self, id: &'a str) -> &'a str {
        self.instance_types.get(id).map_or(id, String::as_str)
    }
}

struct View<'a> {
    zone: &'a str,
    name: &'a str,
    description: &'a str,
    template_id: &'a str,
    instance_type_id: &'a str,
    size: u64,
    disk_size: u64,
    ipv6_enabled: bool,
    ssh_key: Option<&'a str>,
    user_data: Option<&'a str>,
    anti_affinity_group_ids: &'a BTreeSet<String>,
    security_group_ids: &'a BTreeSet<String>,
    network_ids: &'a BTreeSet<String>,
    elastic_ip_ids: &'a BTreeSet<String>,
}

fn common(view: View<'_>, names: &CatalogNames) -> Attributes {
    let mut attrs = Attributes::new();
    let mut put = |key: &str, value: String| {
        attrs.insert(key.to_string(), value);
    };

    put("zone", view.zone.to_string());
    put("name", view.name.to_string());
    put("description", view.description.to_string());
    put("template_id", view.template_id.to_string());
    put(
        "service_offering",
        names.instance_type(view.instance_type_id).to_string(),
    );
    put("size", view.size.to_string());
    put("disk_size", view.disk_size.to_string());
    put("ipv6", view.ipv6_enabled.to_string());
    if let Some(key) = view.ssh_key {
        put("key_pair", key.to_string());
    }
    if let Some(encoded) = view.user_data {
        // payloads that are not UTF-8 stay encoded
        let plain = user_data::decode(encoded).unwrap_or_else(|_| encoded.to_string());
        put("user_data", plain);
    }

    for (key, ids) in [
        ("affinity_group_ids.#", view.anti_affinity_group_ids),
        ("security_group_ids.#", view.security_group_ids),
        ("network_ids.#", view.network_ids),
        ("elastic_ip_ids.#", view.elastic_ip_ids),
    ] {
        if !ids.is_empty() {
            put(key, ids.len().to_string());
        }
    }
    attrs
}

/// Project an observed pool.
pub fn project(state: &PoolState, names: &CatalogNames) -> Attributes {
    let mut attrs = common(
        View {
            zone: &state.zone,
            name: &state.name,
            description: &state.description,
            template_id: &state.template_id,
            instance_type_id: &state.instance_type_id,
            size: state.size,
            disk_size: state.disk_size,
            ipv6_enabled: state.ipv6_enabled,
            ssh_key: state.ssh_key.as_deref(),
            user_data: state.user_data.as_deref(),
            anti_affinity_group_ids: &state.anti_affinity_group_ids,
            security_group_ids: &state.security_group_ids,
            network_ids: &state.network_ids,
            elastic_ip_ids: &state.elastic_ip_ids,
        },
        names,
    );
    attrs.insert("id".into(), state.id.clone());
    attrs.insert("state".into(), state.phase.to_string());
    attrs.insert(
        "virtual_machines.#".into(),
        state.instance_ids.len().to_string(),
    );
    attrs
}

/// The attributes a pool matching `spec` would project to, minus the
/// observation-only keys.
pub fn declared_attributes(spec: &PoolSpec, names: &CatalogNames) -> Attributes {
    common(
        View {
            zone: &spec.zone,
            name: &spec.name,
            description: &spec.description,
            template_id: &spec.template_id,
            instance_type_id: &spec.instance_type_id,
            size: spec.size,
            disk_size: spec.disk_size,
            ipv6_enabled: spec.ipv6_enabled,
            ssh_key: spec.ssh_key.as_deref(),
            user_data: spec.user_data.as_deref(),
            anti_affinity_group_ids: &spec.anti_affinity_group_ids,
            security_group_ids: &spec.security_group_ids,
            network_ids: &spec.network_ids,
            elastic_ip_ids: &spec.elastic_ip_ids,
        },
        names,
    )
}

/// Keys whose values differ between the two maps, present on either side.
pub fn drift(declared: &Attributes, observed: &Attributes) -> Vec<String> {
    let keys: BTreeSet<&String> = declared.keys().chain(observed.keys()).collect();
    keys.into_iter()
        .filter(|k| !OBSERVED_ONLY.contains(&k.as_str()))
        .filter(|k| declared.get(*k) != observed.get(*k))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use poolwright_core::Phase;

    use super::*;

    fn names() -> CatalogNames {
        CatalogNames::from_instance_types(&[
            InstanceType {
                id: "it-tiny".into(),
                family: "standard".into(),
                size: "tiny".into(),
            },
            InstanceType {
                id: "it-gpu".into(),
                family: "gpu".into(),
                size: "large".into(),
            },
        ])
    }

    fn spec() -> PoolSpec {
        PoolSpec {
            name: "web".into(),
            zone: "ch-gva-2".into(),
            description: "frontend".into(),
            template_id: "tpl".into(),
            instance_type_id: "it-tiny".into(),
            size: 2,
            disk_size: 10,
            ipv6_enabled: true,
            ssh_key: Some("ops".into()),
            user_data: Some("dXNlcmRhdGE=".into()),
            anti_affinity_group_ids: BTreeSet::from(["aag".to_string()]),
            security_group_ids: BTreeSet::from(["sg-1".to_string(), "sg-2".to_string()]),
            network_ids: BTreeSet::new(),
            elastic_ip_ids: BTreeSet::new(),
            instance_prefix: "pool".into(),
        }
    }

    #[test]
    fn projects_counts_and_decoded_user_data() {
        let mut state = PoolState::from_spec("pool-1", &spec(), Phase::Running);
        state.instance_ids = vec!["vm-1".into(), "vm-2".into()];

        let attrs = project(&state, &names());
        assert_eq!(attrs["service_offering"], "tiny");
        assert_eq!(attrs["user_data"], "userdata");
        assert_eq!(attrs["ipv6"], "true");
        assert_eq!(attrs["key_pair"], "ops");
        assert_eq!(attrs["security_group_ids.#"], "2");
        assert_eq!(attrs["affinity_group_ids.#"], "1");
        assert_eq!(attrs["virtual_machines.#"], "2");
        assert_eq!(attrs["state"], "running");
        assert!(!attrs.contains_key("network_ids.#"));
    }

    #[test]
    fn settled_pool_has_no_drift() {
        let spec = spec();
        let mut state = PoolState::from_spec("pool-1", &spec, Phase::Running);
        state.instance_ids = vec!["vm-1".into(), "vm-2".into()];

        let declared = declared_attributes(&spec, &names());
        assert!(drift(&declared, &project(&state, &names())).is_empty());
    }

    #[test]
    fn cleared_security_groups_drop_the_count_key() {
        let mut spec = spec();
        let observed = declared_attributes(&spec, &names());
        spec.security_group_ids.clear();
        let declared = declared_attributes(&spec, &names());

        assert!(!declared.contains_key("security_group_ids.#"));
        assert_eq!(drift(&declared, &observed), vec!["security_group_ids.#"]);
    }

    #[test]
    fn non_standard_family_keeps_qualified_name() {
        let mut spec = spec();
        spec.instance_type_id = "it-gpu".into();
        let attrs = declared_attributes(&spec, &names());
        assert_eq!(attrs["service_offering"], "gpu.large");
    }
}
