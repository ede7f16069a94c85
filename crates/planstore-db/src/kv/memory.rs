//! In-process [`KvStore`] used for tests, local runs, and `memory://` URLs.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{KvStore, StoreResult};
use crate::error::StoreError;

#[derive(Debug, Default)]
struct MemoryState {
    strings: HashMap<String, String>,
    hashes: HashMap<String, HashMap<String, String>>,
    sets: HashMap<String, BTreeSet<String>>,
    zsets: HashMap<String, HashMap<String, i64>>,
}

/// A [`KvStore`] held entirely in memory.
///
/// Cloning shares the underlying data. [`MemoryStore::set_offline`] makes
/// every operation fail with [`StoreError::Unavailable`], which lets tests
/// exercise the transport-failure path.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
    offline: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the backend becoming unreachable (or reachable again).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of keys of any type currently held.
    pub async fn key_count(&self) -> usize {
        let state = self.state.read().await;
        state.strings.len() + state.hashes.len() + state.sets.len() + state.zsets.len()
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "memory store is offline".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check_online()?;
        Ok(self.state.read().await.strings.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.check_online()?;
        self.state
            .write()
            .await
            .strings
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.check_online()?;
        let mut state = self.state.write().await;
        state.strings.remove(key);
        state.hashes.remove(key);
        state.sets.remove(key);
        state.zsets.remove(key);
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        self.check_online()?;
        let state = self.state.read().await;
        Ok(state.hashes.get(key).and_then(|h| h.get(field)).cloned())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        self.check_online()?;
        self.state
            .write()
            .await
            .hashes
            .entry(key.to_owned())
            .or_default()
            .insert(field.to_owned(), value.to_owned());
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<()> {
        self.check_online()?;
        self.state
            .write()
            .await
            .sets
            .entry(key.to_owned())
            .or_default()
            .insert(member.to_owned());
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> StoreResult<()> {
        self.check_online()?;
        let mut state = self.state.write().await;
        if let Some(set) = state.sets.get_mut(key) {
            set.remove(member);
            if set.is_empty() {
                state.sets.remove(key);
            }
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        self.check_online()?;
        let state = self.state.read().await;
        Ok(state
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> StoreResult<()> {
        self.check_online()?;
        self.state
            .write()
            .await
            .zsets
            .entry(key.to_owned())
            .or_default()
            .insert(member.to_owned(), score);
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> StoreResult<()> {
        self.check_online()?;
        let mut state = self.state.write().await;
        if let Some(zset) = state.zsets.get_mut(key) {
            zset.remove(member);
            if zset.is_empty() {
                state.zsets.remove(key);
            }
        }
        Ok(())
    }

    async fn zrange_all(&self, key: &str) -> StoreResult<Vec<String>> {
        self.check_online()?;
        let state = self.state.read().await;
        let Some(zset) = state.zsets.get(key) else {
            return Ok(Vec::new());
        };
        let mut entries: Vec<(&String, &i64)> = zset.iter().collect();
        entries.sort_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.cmp(b.0)));
        Ok(entries.into_iter().map(|(m, _)| m.clone()).collect())
    }

    async fn zcard(&self, key: &str) -> StoreResult<i64> {
        self.check_online()?;
        let state = self.state.read().await;
        Ok(state.zsets.get(key).map_or(0, |z| z.len() as i64))
    }

    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.check_online()?;
        let state = self.state.read().await;
        let found: BTreeSet<&String> = state
            .strings
            .keys()
            .chain(state.hashes.keys())
            .chain(state.sets.keys())
            .chain(state.zsets.keys())
            .filter(|k| k.starts_with(prefix))
            .collect();
        Ok(found.into_iter().cloned().collect())
    }

    async fn ping(&self) -> StoreResult<()> {
        self.check_online()
    }
}
