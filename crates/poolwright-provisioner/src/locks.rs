use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::OwnedMutexGuard;

use crate::addr::ResourceAddr;

type Registry = HashMap<ResourceAddr, Arc<tokio::sync::Mutex<()>>>;

/// One async mutex per pool address.
///
/// Holding the guard is what makes a reconciler the only writer of that
/// pool; distinct addresses never contend. An entry lives only while some
/// run holds or waits for it.
#[derive(Debug, Clone, Default)]
pub struct PoolLocks {
    inner: Arc<Mutex<Registry>>,
}

/// Exclusive hold on one pool address.
#[derive(Debug)]
pub struct PoolGuard {
    guard: Option<OwnedMutexGuard<()>>,
    addr: ResourceAddr,
    locks: PoolLocks,
}

impl PoolLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn acquire(&self, addr: &ResourceAddr) -> PoolGuard {
        let lock = Arc::clone(self.registry().entry(addr.clone()).or_default());
        if lock.try_lock().is_err() {
            tracing::debug!(addr = %addr, "waiting for another run on this pool");
        }
        PoolGuard {
            guard: Some(lock.lock_owned().await),
            addr: addr.clone(),
            locks: self.clone(),
        }
    }

    /// Addresses currently held or waited on.
    pub fn len(&self) -> usize {
        self.registry().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for PoolGuard {
    fn drop(&mut self) {
        // Waiters clone the entry under the registry lock, so a count of one
        // after release means nobody else wants this address.
        let mut registry = self.locks.registry();
        drop(self.guard.take());
        if registry
            .get(&self.addr)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            registry.remove(&self.addr);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn same_address_is_serialized() {
        let locks = PoolLocks::new();
        let web = ResourceAddr::instance_pool("web");

        let guard = locks.acquire(&web).await;
        let waiter = tokio::spawn({
            let locks = locks.clone();
            let web = web.clone();
            async move {
                let _g = locks.acquire(&web).await;
            }
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!waiter.is_finished());

        // other pools are not blocked
        let _db = locks.acquire(&ResourceAddr::instance_pool("db")).await;

        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn released_addresses_are_dropped() {
        let locks = PoolLocks::new();
        let web = ResourceAddr::instance_pool("web");

        let first = locks.acquire(&web).await;
        let waiter = tokio::spawn({
            let locks = locks.clone();
            let web = web.clone();
            async move {
                let _g = locks.acquire(&web).await;
            }
        });
        while Arc::strong_count(&locks.registry()[&web]) < 3 {
            tokio::task::yield_now().await;
        }

        // the waiter still holds a reference, so the entry survives
        drop(first);
        assert_eq!(locks.len(), 1);

        waiter.await.unwrap();
        assert!(locks.is_empty());
    }
}
