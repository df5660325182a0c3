use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use poolwright_api::memory::{Call, MemoryGateway};
use poolwright_core::retry::RetryPolicy;
use poolwright_provisioner::orchestrate::{apply_all, destroy_all, failures, plan_all};
use poolwright_provisioner::plan::Cause;
use poolwright_provisioner::{
    ApplyOptions, EngineConfig, ErrorKind, Manifest, ProvisionerError, ProvisionerState,
    Reconciler, ResourceAddr, StatePersistence, StateStore, Step,
};

fn manifest(pools: &[(&str, u64)]) -> Manifest {
    let pools: serde_json::Map<String, serde_json::Value> = pools
        .iter()
        .map(|(name, size)| {
            (
                name.to_string(),
                serde_json::json!({
                    "name": name,
                    "zone": "ch-gva-2",
                    "template": {"name": "Linux Ubuntu 20.04 LTS 64-bit"},
                    "instance_type": "tiny",
                    "size": size,
                    "disk_size": 10
                }),
            )
        })
        .collect();
    let json = serde_json::json!({"version": 1, "pools": pools});
    Manifest::from_json(&json.to_string()).unwrap()
}

async fn open(path: &Path) -> Arc<StateStore> {
    Arc::new(StateStore::open(StatePersistence::new(path)).await.unwrap())
}

fn read_state(path: &Path) -> ProvisionerState {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

#[tokio::test]
async fn applies_every_pool_and_records_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let gateway = Arc::new(MemoryGateway::with_default_catalog());
    let reconciler = Reconciler::new(gateway.clone(), EngineConfig::default());
    let cancel = CancellationToken::new();
    let manifest = manifest(&[("web", 2), ("db", 1)]);

    let results = apply_all(&reconciler, &manifest, open(&path).await, ApplyOptions::default(), &cancel)
        .await
        .unwrap();

    assert_eq!(failures(&results).count(), 0);
    let addrs: Vec<String> = results.iter().map(|r| r.addr.to_string()).collect();
    assert_eq!(addrs, vec!["instance_pool.db", "instance_pool.web"]);
    assert_eq!(gateway.pool_count(), 2);

    let state = read_state(&path);
    assert_eq!(state.manifest_version, Some(Manifest::VERSION));
    let web = &state.pools[&ResourceAddr::instance_pool("web")];
    assert_eq!(web.attributes["size"], "2");
    assert_eq!(web.attributes["virtual_machines.#"], "2");
    assert_eq!(web.attributes["id"], web.id);

    gateway.clear_calls();
    let plans = plan_all(&reconciler, &manifest, &*open(&path).await, &cancel)
        .await
        .unwrap();
    assert!(plans.iter().all(|p| p.cause == Cause::InSync));
    assert!(gateway.mutating_calls().is_empty());
}

#[tokio::test]
async fn undeclared_pools_are_deleted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let gateway = Arc::new(MemoryGateway::with_default_catalog());
    let reconciler = Reconciler::new(gateway.clone(), EngineConfig::default());
    let cancel = CancellationToken::new();

    apply_all(&reconciler, &manifest(&[("web", 1), ("db", 1)]), open(&path).await, ApplyOptions::default(), &cancel)
        .await
        .unwrap();
    let db_id = read_state(&path).pools[&ResourceAddr::instance_pool("db")].id.clone();

    let shrunk = manifest(&[("web", 1)]);
    let plans = plan_all(&reconciler, &shrunk, &*open(&path).await, &cancel)
        .await
        .unwrap();
    let orphan = plans
        .iter()
        .find(|p| p.cause == Cause::Orphaned)
        .unwrap();
    assert_eq!(orphan.addr, ResourceAddr::instance_pool("db"));
    assert_eq!(orphan.steps, vec![Step::Delete]);

    gateway.clear_calls();
    let results = apply_all(&reconciler, &shrunk, open(&path).await, ApplyOptions::default(), &cancel)
        .await
        .unwrap();
    assert_eq!(failures(&results).count(), 0);
    assert_eq!(gateway.mutating_calls(), vec![Call::Delete { id: db_id }]);

    let state = read_state(&path);
    assert_eq!(state.pools.len(), 1);
    assert!(state.pools.contains_key(&ResourceAddr::instance_pool("web")));
}

#[tokio::test]
async fn one_failing_pool_does_not_stop_the_others() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let gateway = Arc::new(MemoryGateway::with_default_catalog());
    let reconciler = Reconciler::new(gateway.clone(), EngineConfig::default());

    let mut manifest = manifest(&[("web", 1), ("db", 1)]);
    if let Some(db) = manifest.pools.get_mut("db") {
        db.instance_type = "gpu.huge".into();
    }

    let results = apply_all(
        &reconciler,
        &manifest,
        open(&path).await,
        ApplyOptions::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    let failed: Vec<_> = failures(&results).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].addr, ResourceAddr::instance_pool("db"));
    assert_eq!(failed[0].result.as_ref().unwrap_err().kind(), ErrorKind::Reference);

    let state = read_state(&path);
    assert_eq!(state.manifest_version, None);
    assert_eq!(state.pools.len(), 1);
    assert_eq!(gateway.pool_count(), 1);
}

#[tokio::test]
async fn timed_out_creation_is_tracked_and_not_repeated() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let gateway = Arc::new(MemoryGateway::with_default_catalog());
    let config = EngineConfig {
        create: RetryPolicy::fixed(Duration::from_millis(10), 3),
        ..EngineConfig::default()
    };
    let reconciler = Reconciler::new(gateway.clone(), config);
    let cancel = CancellationToken::new();
    let manifest = manifest(&[("web", 1)]);
    let web = ResourceAddr::instance_pool("web");

    gateway.freeze(true);
    let results = apply_all(&reconciler, &manifest, open(&path).await, ApplyOptions::default(), &cancel)
        .await
        .unwrap();
    let failed: Vec<_> = failures(&results).collect();
    assert_eq!(failed.len(), 1);
    assert!(matches!(
        &failed[0].result,
        Err(ProvisionerError::CreationTimeout { .. })
    ));

    let tracked = read_state(&path).pools[&web].clone();
    assert!(tracked.attributes.is_empty());
    assert!(gateway.peek(&tracked.id).is_some());

    gateway.freeze(false);
    gateway.clear_calls();
    let results = apply_all(&reconciler, &manifest, open(&path).await, ApplyOptions::default(), &cancel)
        .await
        .unwrap();
    assert_eq!(failures(&results).count(), 0);
    assert!(gateway.mutating_calls().is_empty());
    assert_eq!(gateway.pool_count(), 1);

    let state = read_state(&path);
    assert_eq!(state.pools[&web].id, tracked.id);
    assert_eq!(state.pools[&web].attributes["state"], "running");
    assert_eq!(state.manifest_version, Some(Manifest::VERSION));
}

#[tokio::test]
async fn destroy_all_empties_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let gateway = Arc::new(MemoryGateway::with_default_catalog());
    let reconciler = Reconciler::new(gateway.clone(), EngineConfig::default());
    let cancel = CancellationToken::new();

    apply_all(&reconciler, &manifest(&[("web", 1), ("db", 3)]), open(&path).await, ApplyOptions::default(), &cancel)
        .await
        .unwrap();

    let results = destroy_all(&reconciler, open(&path).await, &cancel)
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(failures(&results).count(), 0);
    assert_eq!(gateway.pool_count(), 0);

    let state = read_state(&path);
    assert!(state.pools.is_empty());
    assert_eq!(state.manifest_version, None);
}

#[tokio::test]
async fn provision_reports_the_first_failure() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let gateway = Arc::new(MemoryGateway::with_default_catalog());
    let reconciler = Reconciler::new(gateway.clone(), EngineConfig::default());
    let cancel = CancellationToken::new();

    poolwright_provisioner::provision(
        &reconciler,
        &manifest(&[("web", 1)]),
        StatePersistence::new(&path),
        ApplyOptions::default(),
        &cancel,
    )
    .await
    .unwrap();
    assert_eq!(read_state(&path).pools.len(), 1);

    let mut broken = manifest(&[("web", 1), ("db", 1)]);
    if let Some(db) = broken.pools.get_mut("db") {
        db.disk_size = 5;
    }
    let err = poolwright_provisioner::provision(
        &reconciler,
        &broken,
        StatePersistence::new(&path),
        ApplyOptions::default(),
        &cancel,
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);
    assert_eq!(gateway.pool_count(), 1);
}
