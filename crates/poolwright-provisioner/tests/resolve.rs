use poolwright_api::memory::{
    Call, DEBIAN_ID, DEFAULT_SG_ID, GVA2, MemoryGateway, SMALL_ID, TINY_ID, UBUNTU_ID,
};
use poolwright_core::catalog::{SecurityGroup, Template};
use poolwright_core::declaration::{PoolDeclaration, SecurityGroupRef, TemplateFilter, TemplateRef};
use poolwright_core::user_data;
use poolwright_provisioner::resolve::{Normalizer, TemplateQuery, lookup_template};
use poolwright_provisioner::{ErrorKind, ProvisionerError};

const CUSTOM_ID: &str = "5d1c9a7e-8f2b-4c6d-a1e3-7b9f0c2d4e68";

fn declaration() -> PoolDeclaration {
    PoolDeclaration {
        name: "web".into(),
        zone: GVA2.into(),
        description: Some("frontend".into()),
        template: TemplateRef::Lookup {
            name: "Linux Ubuntu 20.04 LTS 64-bit".into(),
            filter: TemplateFilter::Featured,
        },
        instance_type: "small".into(),
        size: 2,
        disk_size: 20,
        ipv6: true,
        key_pair: Some("ops".into()),
        user_data: Some("#cloud-config\n".into()),
        anti_affinity_group_ids: vec![],
        security_groups: vec![],
        network_ids: vec![],
        elastic_ip_ids: vec![],
        instance_prefix: None,
    }
}

fn gateway_with_private_template() -> MemoryGateway {
    let gateway = MemoryGateway::with_default_catalog();
    gateway.add_template(
        GVA2,
        Template {
            id: CUSTOM_ID.into(),
            name: "golden-image".into(),
            default_user: None,
            visibility: "private".into(),
        },
    );
    gateway
}

#[tokio::test]
async fn template_lookup_by_name_id_or_both() {
    let gateway = gateway_with_private_template();

    let by_name = TemplateQuery {
        zone: GVA2.into(),
        name: Some("Linux Debian 10 (Buster) 64-bit".into()),
        ..Default::default()
    };
    let found = lookup_template(&gateway, &by_name).await.unwrap();
    assert_eq!(found.id, DEBIAN_ID);
    assert_eq!(found.default_user.as_deref(), Some("debian"));

    let by_id = TemplateQuery {
        zone: GVA2.into(),
        id: Some(UBUNTU_ID.into()),
        ..Default::default()
    };
    assert_eq!(lookup_template(&gateway, &by_id).await.unwrap().name, "Linux Ubuntu 20.04 LTS 64-bit");

    let mismatched = TemplateQuery {
        zone: GVA2.into(),
        id: Some(UBUNTU_ID.into()),
        name: Some("Linux Debian 10 (Buster) 64-bit".into()),
        ..Default::default()
    };
    let err = lookup_template(&gateway, &mismatched).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Reference);
}

#[tokio::test]
async fn mine_filter_searches_private_templates() {
    let gateway = gateway_with_private_template();

    let featured = TemplateQuery {
        zone: GVA2.into(),
        name: Some("golden-image".into()),
        ..Default::default()
    };
    assert!(matches!(
        lookup_template(&gateway, &featured).await,
        Err(ProvisionerError::ReferenceNotFound { kind: "template", .. })
    ));

    let mine = TemplateQuery {
        filter: TemplateFilter::Mine,
        ..featured
    };
    assert_eq!(lookup_template(&gateway, &mine).await.unwrap().id, CUSTOM_ID);
    assert!(gateway.calls().contains(&Call::ListTemplates {
        zone: GVA2.into(),
        visibility: "private".into(),
    }));
}

#[tokio::test]
async fn template_lookup_needs_name_or_id() {
    let gateway = MemoryGateway::with_default_catalog();
    let query = TemplateQuery {
        zone: GVA2.into(),
        ..Default::default()
    };

    let err = lookup_template(&gateway, &query).await.unwrap_err();
    assert_eq!(err.to_string(), "invalid pool declaration: either name or id must be specified");
    assert!(gateway.calls().is_empty());
}

#[tokio::test]
async fn duplicate_template_names_are_ambiguous() {
    let gateway = MemoryGateway::with_default_catalog();
    gateway.add_template(
        GVA2,
        Template {
            id: CUSTOM_ID.into(),
            name: "Linux Ubuntu 20.04 LTS 64-bit".into(),
            default_user: Some("ubuntu".into()),
            visibility: "public".into(),
        },
    );

    let err = Normalizer::new(&gateway)
        .normalize(&declaration())
        .await
        .unwrap_err();
    let ProvisionerError::AmbiguousReference { candidates, .. } = &err else {
        panic!("expected an ambiguous reference, got {err}");
    };
    assert_eq!(candidates.len(), 2);
    assert!(gateway.mutating_calls().is_empty());
}

#[tokio::test]
async fn normalizes_references_to_ids() {
    let gateway = MemoryGateway::with_default_catalog();
    let mut decl = declaration();
    decl.security_groups = vec![
        SecurityGroupRef::Name {
            name: "default".into(),
        },
        SecurityGroupRef::Id {
            id: "e1f2a3b4-c5d6-4e7f-8a9b-0c1d2e3f4a5b".into(),
        },
    ];

    let spec = Normalizer::new(&gateway).normalize(&decl).await.unwrap();

    assert_eq!(spec.template_id, UBUNTU_ID);
    assert_eq!(spec.instance_type_id, SMALL_ID);
    assert_eq!(spec.description, "frontend");
    assert_eq!(spec.ssh_key.as_deref(), Some("ops"));
    assert_eq!(spec.instance_prefix, "pool");
    assert_eq!(spec.security_group_ids.len(), 2);
    assert!(spec.security_group_ids.contains(DEFAULT_SG_ID));
    let encoded = spec.user_data.unwrap();
    assert_eq!(user_data::decode(&encoded).unwrap(), "#cloud-config\n");
    assert!(gateway.mutating_calls().is_empty());
}

#[tokio::test]
async fn instance_type_accepts_family_prefix() {
    let gateway = MemoryGateway::with_default_catalog();
    let mut decl = declaration();
    decl.instance_type = "standard.tiny".into();
    let spec = Normalizer::new(&gateway).normalize(&decl).await.unwrap();
    assert_eq!(spec.instance_type_id, TINY_ID);

    decl.instance_type = "gpu.huge".into();
    let err = Normalizer::new(&gateway).normalize(&decl).await.unwrap_err();
    assert!(matches!(
        err,
        ProvisionerError::ReferenceNotFound {
            kind: "instance type",
            ..
        }
    ));
}

#[tokio::test]
async fn unknown_references_are_reported_by_kind() {
    let gateway = MemoryGateway::with_default_catalog();

    let mut decl = declaration();
    decl.template = TemplateRef::Id {
        id: CUSTOM_ID.into(),
    };
    let err = Normalizer::new(&gateway).normalize(&decl).await.unwrap_err();
    assert_eq!(err.to_string(), format!("template reference {CUSTOM_ID:?} matches nothing"));

    let mut decl = declaration();
    decl.security_groups = vec![SecurityGroupRef::Name {
        name: "web-ingress".into(),
    }];
    gateway.add_security_group(SecurityGroup {
        id: "f0e1d2c3-b4a5-4968-8776-655443322110".into(),
        name: "ssh".into(),
    });
    let err = Normalizer::new(&gateway).normalize(&decl).await.unwrap_err();
    assert!(matches!(
        err,
        ProvisionerError::ReferenceNotFound {
            kind: "security group",
            ..
        }
    ));
}

#[tokio::test]
async fn invalid_declarations_fail_before_any_call() {
    let gateway = MemoryGateway::with_default_catalog();
    let normalizer = Normalizer::new(&gateway);

    let mut zero = declaration();
    zero.size = 0;
    let mut tiny_disk = declaration();
    tiny_disk.disk_size = 5;
    let mut unnamed = declaration();
    unnamed.name = " ".into();
    let mut bad_type = declaration();
    bad_type.instance_type = "standard.".into();

    for decl in [zero, tiny_disk, unnamed, bad_type] {
        let err = normalizer.normalize(&decl).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid, "{err}");
    }
    assert!(gateway.calls().is_empty());
}
