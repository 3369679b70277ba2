use std::path::{Path, PathBuf};

use {
    serde::{Deserialize, Serialize},
    tracing::{debug, warn},
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["courier.toml"];

/// Top-level courier configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    /// Data directory: SQLite database and durable session artifacts.
    pub data_dir: PathBuf,
    pub backend: BackendConfig,
    pub bridge: BridgeConfig,
    pub cache: CacheConfig,
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            backend: BackendConfig::default(),
            bridge: BridgeConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl CourierConfig {
    /// SQLite database path.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("courier.db")
    }

    /// Base directory for durable session artifacts.
    #[must_use]
    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }
}

/// Remote agent backend connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    pub api_token: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8085".into(),
            api_token: None,
        }
    }
}

/// Channel protocol bridge settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// WebSocket endpoint of the protocol bridge process.
    pub url: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            url: courier_bridge::DEFAULT_BRIDGE_URL.into(),
        }
    }
}

/// Shared cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// When false, dedup and locking run fail-open against a no-op cache.
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "courier")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./courier-data"))
}

/// Load config from an explicit path, or discover one in the standard
/// locations. Falls back to defaults when nothing is found.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<CourierConfig> {
    if let Some(path) = explicit {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
        return Ok(toml::from_str(&raw)?);
    }

    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match std::fs::read_to_string(&path)
            .map_err(anyhow::Error::from)
            .and_then(|raw| Ok(toml::from_str(&raw)?))
        {
            Ok(config) => return Ok(config),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    Ok(CourierConfig::default())
}

/// Find the first config file in standard locations: project-local first,
/// then the user config directory.
fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    if let Some(dirs) = directories::ProjectDirs::from("", "", "courier") {
        for name in CONFIG_FILENAMES {
            let p = dirs.config_dir().join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }

    None
}
