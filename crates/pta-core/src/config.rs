//! Layered configuration (spec §10.H): compiled-in defaults, overridden by
//! an optional config file, overridden by environment variables prefixed
//! `PTA_`. Business logic elsewhere never reads `std::env` directly; it
//! always goes through this struct.

use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct AgentConfig {
    /// `choria.tasks_spool_dir` — root directory under which each request
    /// gets its own spool directory.
    pub spool_dir: PathBuf,
    /// Root of the content-addressed artifact cache.
    pub cache_dir: PathBuf,
    /// Base URL of the Puppet Server v3 API, e.g. `https://puppet:8140`.
    pub server_base_url: String,
    /// Directory the platform wrapper binary and shim scripts live in.
    pub binary_root: PathBuf,
}

impl AgentConfig {
    fn platform_default_binary_root() -> PathBuf {
        if cfg!(windows) {
            PathBuf::from(r"C:\Program Files\Puppet Labs\Puppet\bin")
        } else {
            PathBuf::from("/opt/puppetlabs/puppet/bin")
        }
    }

    fn defaults() -> Self {
        Self {
            spool_dir: PathBuf::from("/opt/puppetlabs/puppet/cache/tasks-spool"),
            cache_dir: PathBuf::from("/opt/puppetlabs/puppet/cache/tasks"),
            server_base_url: "https://puppet:8140".to_string(),
            binary_root: Self::platform_default_binary_root(),
        }
    }

    /// Load configuration, layering an optional JSON config file and
    /// `PTA_`-prefixed environment variables over the compiled-in
    /// defaults. Later layers win.
    pub fn load(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let defaults = Self::defaults();
        let mut builder = Config::builder()
            .set_default("spool_dir", defaults.spool_dir.to_string_lossy().as_ref())?
            .set_default("cache_dir", defaults.cache_dir.to_string_lossy().as_ref())?
            .set_default("server_base_url", defaults.server_base_url.as_str())?
            .set_default(
                "binary_root",
                defaults.binary_root.to_string_lossy().as_ref(),
            )?;

        if let Some(path) = config_file {
            builder = builder.add_source(
                File::new(&path.to_string_lossy(), FileFormat::Json).required(false),
            );
        }

        let config = builder
            .add_source(Environment::with_prefix("PTA"))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::defaults()
    }
}
