/// Store configuration.
///
/// The CLI resolves the URL from its flags, environment and config file; this
/// type only interprets it.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// `memory://` or a Redis connection URL.
    pub store_url: String,
}

/// Which backend a store URL selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Memory,
    Redis,
}

impl StoreConfig {
    /// The URL used when nothing else names a store.
    pub const DEFAULT_URL: &str = "memory://";

    /// Build a config from an explicit URL (useful for tests and CLI flags).
    pub fn new(store_url: impl Into<String>) -> Self {
        Self {
            store_url: store_url.into(),
        }
    }

    /// Determine the backend from the URL scheme.
    ///
    /// Returns `None` for unrecognized schemes.
    pub fn backend(&self) -> Option<Backend> {
        let scheme = self.store_url.split("://").next()?;
        match scheme {
            "memory" => Some(Backend::Memory),
            "redis" | "rediss" | "redis+unix" => Some(Backend::Redis),
            _ => None,
        }
    }

    /// The URL with any password replaced, for logging.
    pub fn redacted_url(&self) -> String {
        let Some((scheme, rest)) = self.store_url.split_once("://") else {
            return self.store_url.clone();
        };
        match rest.rsplit_once('@') {
            Some((userinfo, host)) => {
                let user = userinfo.split(':').next().unwrap_or_default();
                format!("{scheme}://{user}:***@{host}")
            }
            None => self.store_url.clone(),
        }
    }
}
