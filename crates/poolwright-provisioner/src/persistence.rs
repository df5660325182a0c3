use std::path::PathBuf;

use tokio::sync::Mutex;

use poolwright_api::BoxFuture;

use crate::addr::ResourceAddr;
use crate::error::ProvisionerError;
use crate::project::Attributes;
use crate::reconcile::{Journal, PoolRef};
use crate::state::{ProvisionerState, TrackedPool};

/// Local state file.
pub struct StatePersistence {
    pub local_path: PathBuf,
}

impl StatePersistence {
    pub fn new(local_path: impl Into<PathBuf>) -> Self {
        Self {
            local_path: local_path.into(),
        }
    }

    /// Write state to disk atomically: tmp + rename.
    pub async fn flush(&self, state: &ProvisionerState) -> Result<(), ProvisionerError> {
        let json = serde_json::to_vec_pretty(state)?;
        if let Some(parent) = self.local_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = self.local_path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &json).await?;
        tokio::fs::rename(&tmp_path, &self.local_path).await?;

        tracing::debug!(path = %self.local_path.display(), pools = state.pools.len(), "state flushed");
        Ok(())
    }

    /// Load state, or start fresh if the file does not exist yet.
    pub async fn load(&self) -> Result<ProvisionerState, ProvisionerError> {
        match tokio::fs::read(&self.local_path).await {
            Ok(json) => {
                let state: ProvisionerState = serde_json::from_slice(&json)?;
                tracing::debug!(path = %self.local_path.display(), "state loaded");
                Ok(state)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("no existing state found, starting fresh");
                Ok(ProvisionerState::default())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// The state document shared by concurrent reconcilers.
///
/// Every change is flushed while the lock is held, so the file always holds
/// a complete document and writes never interleave.
pub struct StateStore {
    persistence: StatePersistence,
    state: Mutex<ProvisionerState>,
}

impl StateStore {
    pub async fn open(persistence: StatePersistence) -> Result<Self, ProvisionerError> {
        let state = persistence.load().await?;
        Ok(Self {
            persistence,
            state: Mutex::new(state),
        })
    }

    pub async fn get(&self, addr: &ResourceAddr) -> Option<TrackedPool> {
        self.state.lock().await.pools.get(addr).cloned()
    }

    pub async fn snapshot(&self) -> ProvisionerState {
        self.state.lock().await.clone()
    }

    pub async fn record(&self, addr: ResourceAddr, pool: TrackedPool) -> Result<(), ProvisionerError> {
        let mut state = self.state.lock().await;
        state.pools.insert(addr, pool);
        self.persistence.flush(&state).await
    }

    pub async fn forget(&self, addr: &ResourceAddr) -> Result<(), ProvisionerError> {
        let mut state = self.state.lock().await;
        if state.pools.remove(addr).is_some() {
            self.persistence.flush(&state).await?;
        }
        Ok(())
    }

    pub async fn stamp_manifest(&self, version: Option<u32>) -> Result<(), ProvisionerError> {
        let mut state = self.state.lock().await;
        state.manifest_version = version;
        self.persistence.flush(&state).await
    }
}

/// New pools are tracked with empty attributes until their first
/// successful apply.
impl Journal for StateStore {
    fn created<'a>(
        &'a self,
        addr: &'a ResourceAddr,
        pool: &'a PoolRef,
    ) -> BoxFuture<'a, Result<(), ProvisionerError>> {
        Box::pin(async move {
            let tracked = TrackedPool {
                id: pool.id.clone(),
                zone: pool.zone.clone(),
                attributes: Attributes::new(),
                updated_at: jiff::Timestamp::now(),
            };
            self.record(addr.clone(), tracked).await?;
            tracing::debug!(addr = %addr, pool_id = %pool.id, "new instance pool tracked");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracked(id: &str) -> TrackedPool {
        TrackedPool {
            id: id.into(),
            zone: "ch-gva-2".into(),
            attributes: Attributes::from([("size".to_string(), "1".to_string())]),
            updated_at: jiff::Timestamp::UNIX_EPOCH,
        }
    }

    #[tokio::test]
    async fn missing_file_is_fresh_state() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = StatePersistence::new(dir.path().join("state.json"));
        assert_eq!(persistence.load().await.unwrap(), ProvisionerState::default());
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let web = ResourceAddr::instance_pool("web");

        let store = StateStore::open(StatePersistence::new(&path)).await.unwrap();
        store.record(web.clone(), tracked("pool-1")).await.unwrap();
        store
            .record(ResourceAddr::instance_pool("db"), tracked("pool-2"))
            .await
            .unwrap();
        store
            .forget(&ResourceAddr::instance_pool("db"))
            .await
            .unwrap();

        let reopened = StateStore::open(StatePersistence::new(&path)).await.unwrap();
        assert_eq!(reopened.get(&web).await, Some(tracked("pool-1")));
        assert_eq!(reopened.snapshot().await.pools.len(), 1);

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["pools"]["instance_pool.web"]["id"], "pool-1");
        assert!(!path.with_extension("json.tmp").exists());
    }
}
