//! The shared store handle passed to every query function.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;
use tracing::info;

use crate::config::{Backend, StoreConfig};
use crate::error::StoreError;
use crate::kv::{KvStore, MemoryStore, RedisStore};

/// Per-plan async mutexes serializing order-mutating operations.
///
/// The key-value backend only guarantees per-key atomicity. Reorders and
/// compactions touch many task records, so every writer of a plan's task
/// order takes that plan's lock first. Locks are process-local.
#[derive(Debug, Default)]
struct PlanLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl PlanLocks {
    fn handle(&self, plan_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Drop entries nobody else holds so the map does not grow without bound.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(plan_id.to_owned())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

/// Guard returned by [`Store::lock_plan`] and [`Store::lock_plans`].
#[derive(Debug)]
pub struct PlanGuard {
    _guards: Vec<OwnedMutexGuard<()>>,
}

/// Cloneable handle to a key-value backend plus the plan lock table.
#[derive(Clone)]
pub struct Store {
    kv: Arc<dyn KvStore>,
    locks: Arc<PlanLocks>,
}

impl Store {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            locks: Arc::new(PlanLocks::default()),
        }
    }

    /// A store over a fresh [`MemoryStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn kv(&self) -> &dyn KvStore {
        self.kv.as_ref()
    }

    /// Take the order lock for one plan.
    pub async fn lock_plan(&self, plan_id: &str) -> PlanGuard {
        let guard = self.locks.handle(plan_id).lock_owned().await;
        PlanGuard {
            _guards: vec![guard],
        }
    }

    /// Take the order locks for several plans, always in id order so two
    /// callers locking the same pair cannot deadlock.
    pub async fn lock_plans(&self, plan_ids: &[&str]) -> PlanGuard {
        let mut ids: Vec<&str> = plan_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            guards.push(self.locks.handle(id).lock_owned().await);
        }
        PlanGuard { _guards: guards }
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("backend", &self.kv.backend())
            .finish()
    }
}

/// Open the backend named by `config` and verify it answers a ping.
pub async fn create_store(config: &StoreConfig) -> Result<Store, StoreError> {
    let kv: Arc<dyn KvStore> = match config.backend() {
        Some(Backend::Memory) => Arc::new(MemoryStore::new()),
        Some(Backend::Redis) => Arc::new(RedisStore::connect(&config.store_url).await?),
        None => return Err(StoreError::UnsupportedUrl(config.store_url.clone())),
    };
    kv.ping().await?;
    info!(
        backend = kv.backend(),
        url = %config.redacted_url(),
        "connected to store"
    );
    Ok(Store::new(kv))
}
