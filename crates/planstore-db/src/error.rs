//! Error types for the key-value transport and the repositories.
//!
//! Domain errors ([`RepoError::PlanNotFound`], [`RepoError::TaskNotFound`],
//! [`RepoError::InvalidOrder`]) are kept apart from transport failures
//! ([`RepoError::Store`]) so callers can tell "no such record" from "store
//! unreachable".

use thiserror::Error;

/// Failure talking to the key-value backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("unsupported store url {0:?} (expected memory:// or redis://)")]
    UnsupportedUrl(String),
}

/// Errors returned by the plan and task queries.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("plan not found: {0}")]
    PlanNotFound(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error(
        "invalid order {requested}: must be between 0 and {max} for a plan with {count} tasks",
        max = .count.saturating_sub(1)
    )]
    InvalidOrder { requested: i64, count: i64 },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("corrupt record at {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl RepoError {
    /// `true` for the not-found variants.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::PlanNotFound(_) | Self::TaskNotFound(_))
    }
}

pub type RepoResult<T> = Result<T, RepoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_messages_keep_compat_phrases() {
        assert!(RepoError::PlanNotFound("p1".into()).to_string().contains("plan not found"));
        assert!(RepoError::TaskNotFound("t1".into()).to_string().contains("task not found"));
    }

    #[test]
    fn invalid_order_message() {
        let err = RepoError::InvalidOrder { requested: 5, count: 3 };
        let msg = err.to_string();
        assert!(msg.contains("invalid order"), "unexpected message: {msg}");
        assert!(msg.contains("between 0 and 2"), "unexpected message: {msg}");
    }

    #[test]
    fn store_errors_are_not_not_found() {
        let err = RepoError::from(StoreError::Unavailable("down".into()));
        assert!(!err.is_not_found());
        assert_eq!(err.to_string(), "store unavailable: down");
    }
}
