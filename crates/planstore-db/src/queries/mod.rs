//! Query functions over the [`Store`](crate::Store), one module per entity.

pub mod plans;
pub mod tasks;

use futures::future::try_join_all;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{RepoError, RepoResult};
use crate::store::Store;

/// Read and decode the JSON record at `key`.
async fn load<T: DeserializeOwned>(store: &Store, key: &str) -> RepoResult<Option<T>> {
    let Some(raw) = store.kv().get(key).await? else {
        return Ok(None);
    };
    let record = serde_json::from_str(&raw).map_err(|source| RepoError::Corrupt {
        key: key.to_owned(),
        source,
    })?;
    Ok(Some(record))
}

/// Encode `record` as JSON and write it at `key`.
async fn save<T: Serialize>(store: &Store, key: &str, record: &T) -> RepoResult<()> {
    let raw = serde_json::to_string(record).map_err(|source| RepoError::Corrupt {
        key: key.to_owned(),
        source,
    })?;
    store.kv().set(key, &raw).await?;
    Ok(())
}

/// Load the records at `keys` concurrently, in input order. Missing
/// records come back as `None`.
async fn load_all<T: DeserializeOwned>(
    store: &Store,
    keys: &[String],
) -> RepoResult<Vec<Option<T>>> {
    try_join_all(keys.iter().map(|key| load::<T>(store, key))).await
}
