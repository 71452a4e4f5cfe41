//! Server configuration.
//!
//! Stored as TOML next to the working directory by default
//! (`chunkup-server.toml`). Every field has a default, so a partial file
//! is valid.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chunkup_protocol::constants::MAX_CHUNK_SIZE_MB;
use chunkup_server::ServerConfig;
use chunkup_store::StoreConfig;
use serde::{Deserialize, Serialize};

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Address the WebSocket server binds (port 0 = auto-assign).
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Directory holding staging sets and artifacts.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Largest accepted chunk, in MiB.
    #[serde(default = "default_max_chunk_size_mb")]
    pub max_chunk_size_mb: u64,

    /// Re-hash merged files and reject those that do not match.
    #[serde(default = "default_true")]
    pub verify_fingerprint: bool,

    /// Unmerged staging sets older than this are removed.
    #[serde(default = "default_staging_ttl_secs")]
    pub staging_ttl_secs: u64,

    /// How often the expiry sweep runs (0 disables it).
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Prefix of the artifact addresses handed to clients.
    #[serde(default = "default_public_prefix")]
    pub public_prefix: String,
}

fn default_listen() -> SocketAddr {
    ([0, 0, 0, 0], 9400).into()
}

fn default_root() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_max_chunk_size_mb() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_staging_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_sweep_interval_secs() -> u64 {
    60 * 60
}

fn default_public_prefix() -> String {
    "/uploads".into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            root: default_root(),
            max_chunk_size_mb: default_max_chunk_size_mb(),
            verify_fingerprint: default_true(),
            staging_ttl_secs: default_staging_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            public_prefix: default_public_prefix(),
        }
    }
}

impl Config {
    /// Loads configuration from `path`, or writes and returns the defaults
    /// if the file does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let config: Config =
                toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            Ok(config)
        }
    }

    /// Saves the configuration to `path`.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.max_chunk_size_mb == 0 {
            anyhow::bail!("max_chunk_size_mb must be at least 1");
        }
        if self.max_chunk_size_mb > MAX_CHUNK_SIZE_MB {
            anyhow::bail!("max_chunk_size_mb must be at most {MAX_CHUNK_SIZE_MB}");
        }
        Ok(())
    }

    pub fn store_config(&self) -> StoreConfig {
        let mut store = StoreConfig::new(&self.root);
        store.max_chunk_size = (self.max_chunk_size_mb as usize).saturating_mul(1024 * 1024);
        store.verify_fingerprint = self.verify_fingerprint;
        store.staging_ttl = Duration::from_secs(self.staging_ttl_secs);
        store.public_prefix = self.public_prefix.clone();
        store
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            listen: self.listen,
        }
    }

    /// Interval of the expiry sweep, `None` when disabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}
