//! Plan and task persistence over a flat key-value store.
//!
//! [`queries::tasks`] owns the ordering engine: the `order` values of a
//! plan's tasks always form `0..N` with no gaps or duplicates.

pub mod config;
pub mod error;
pub mod keys;
pub mod kv;
pub mod models;
pub mod queries;
pub mod store;

pub use error::{RepoError, RepoResult, StoreError};
pub use store::{Store, create_store};
