//! Configuration file management for planstore.
//!
//! Provides a TOML-based config file at `~/.config/planstore/config.toml`
//! and a resolution chain: CLI flag > env var > config file > default.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use planstore_core::stream::DEFAULT_HEARTBEAT;
use planstore_db::config::StoreConfig;

pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_HEARTBEAT_SECS: u64 = DEFAULT_HEARTBEAT.as_secs();

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub server: ServerSection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StoreSection {
    pub url: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ServerSection {
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub heartbeat_secs: Option<u64>,
}

impl ConfigFile {
    /// The file `planstore init` writes: every setting spelled out.
    pub fn initial(store_url: &str) -> Self {
        Self {
            store: StoreSection {
                url: Some(store_url.to_string()),
            },
            server: ServerSection {
                bind: Some(DEFAULT_BIND.to_string()),
                port: Some(DEFAULT_PORT),
                heartbeat_secs: Some(DEFAULT_HEARTBEAT_SECS),
            },
        }
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the planstore config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/planstore` or
/// `~/.config/planstore`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("planstore");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("planstore")
}

/// Return the path to the planstore config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))?;
    Ok(config)
}

/// Load the config file if there is one. A missing file is not an error;
/// an unreadable or malformed one is.
pub fn load_config_if_present() -> Result<Option<ConfigFile>> {
    if !config_path().exists() {
        return Ok(None);
    }
    load_config().map(Some)
}

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix.
pub fn save_config(config: &ConfigFile) -> Result<PathBuf> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(path)
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Values given on the command line, highest precedence.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub store_url: Option<String>,
    pub bind: Option<String>,
    pub port: Option<u16>,
}

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct PlanstoreConfig {
    pub store: StoreConfig,
    pub bind: String,
    pub port: u16,
    pub heartbeat: Duration,
}

impl PlanstoreConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// - Store URL: `--store-url` > `PLANSTORE_STORE_URL` > `[store] url` > `memory://`
    /// - Bind: `--bind` > `PLANSTORE_BIND` > `[server] bind` > `127.0.0.1`
    /// - Port: `--port` > `PLANSTORE_PORT` > `[server] port` > `8080`
    /// - Heartbeat: `PLANSTORE_HEARTBEAT_SECS` > `[server] heartbeat_secs` > `10`
    pub fn resolve(cli: &CliOverrides) -> Result<Self> {
        let file = load_config_if_present()?.unwrap_or_default();

        let store_url = cli
            .store_url
            .clone()
            .or_else(|| env_var("PLANSTORE_STORE_URL"))
            .or(file.store.url)
            .unwrap_or_else(|| StoreConfig::DEFAULT_URL.to_string());

        let bind = cli
            .bind
            .clone()
            .or_else(|| env_var("PLANSTORE_BIND"))
            .or(file.server.bind)
            .unwrap_or_else(|| DEFAULT_BIND.to_string());

        let port = match cli.port {
            Some(port) => port,
            None => match env_var("PLANSTORE_PORT") {
                Some(raw) => raw
                    .parse()
                    .with_context(|| format!("PLANSTORE_PORT is not a valid port: {raw:?}"))?,
                None => file.server.port.unwrap_or(DEFAULT_PORT),
            },
        };

        let heartbeat_secs = match env_var("PLANSTORE_HEARTBEAT_SECS") {
            Some(raw) => raw.parse().with_context(|| {
                format!("PLANSTORE_HEARTBEAT_SECS is not a whole number of seconds: {raw:?}")
            })?,
            None => file.server.heartbeat_secs.unwrap_or(DEFAULT_HEARTBEAT_SECS),
        };
        anyhow::ensure!(heartbeat_secs > 0, "heartbeat interval must be at least 1 second");

        Ok(Self {
            store: StoreConfig::new(store_url),
            bind,
            port,
            heartbeat: Duration::from_secs(heartbeat_secs),
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
