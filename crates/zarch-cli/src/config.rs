//! Configuration file management.
//!
//! Looked up at `$ZARCH_HOME/config.toml`, falling back to
//! `~/.zarch/config.toml`. A missing file means defaults.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Environment override for the zarch home directory.
pub const HOME_ENV: &str = "ZARCH_HOME";

const REGISTRY_FILE: &str = "registry.db";

/// Complete zarch configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Managed storage settings.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Identifier resolution settings.
    #[serde(default)]
    pub resolver: ResolverConfig,
    /// Logging settings.
    #[serde(default)]
    pub log: LogConfig,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root of managed storage. Empty = the zarch home directory.
    /// A leading `~/` is expanded.
    #[serde(default)]
    pub managed_path: String,
    /// `add` keeps files in managed storage unless told otherwise.
    #[serde(default = "default_true")]
    pub use_managed_default: bool,
    /// Days a soft-deleted archive stays in the trash before purge removes it.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

/// Resolver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Inputs shorter than this are never treated as prefixes.
    #[serde(default = "default_min_prefix_length")]
    pub min_prefix_length: usize,
    /// Candidates listed when an input is ambiguous.
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default filter directive; `RUST_LOG` wins when set.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_true() -> bool {
    true
}

fn default_retention_days() -> u32 {
    30
}

fn default_min_prefix_length() -> usize {
    zarch_db::DEFAULT_MIN_PREFIX_LENGTH
}

fn default_max_candidates() -> usize {
    zarch_db::DEFAULT_MAX_CANDIDATES
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            managed_path: String::new(),
            use_managed_default: true,
            retention_days: default_retention_days(),
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            min_prefix_length: default_min_prefix_length(),
            max_candidates: default_max_candidates(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from the default location.
    ///
    /// An explicit path must exist. The default location falls back to
    /// defaults when there is no file.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => {
                let path = Self::config_path()?;
                if path.exists() {
                    Self::load_from(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Root of managed storage.
    pub fn managed_path(&self) -> anyhow::Result<PathBuf> {
        if self.storage.managed_path.is_empty() {
            zarch_home()
        } else {
            expand_home(&self.storage.managed_path)
        }
    }

    /// The registry file inside managed storage.
    pub fn registry_path(&self) -> anyhow::Result<PathBuf> {
        Ok(self.managed_path()?.join(REGISTRY_FILE))
    }

    fn config_path() -> anyhow::Result<PathBuf> {
        Ok(zarch_home()?.join("config.toml"))
    }
}

/// `$ZARCH_HOME`, else `~/.zarch`.
fn zarch_home() -> anyhow::Result<PathBuf> {
    if let Some(dir) = std::env::var_os(HOME_ENV).filter(|d| !d.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    Ok(home_dir()?.join(".zarch"))
}

fn home_dir() -> anyhow::Result<PathBuf> {
    dirs::home_dir().context("cannot determine the home directory")
}

fn expand_home(path: &str) -> anyhow::Result<PathBuf> {
    if path == "~" {
        return home_dir();
    }
    match path.strip_prefix("~/") {
        Some(rest) => Ok(home_dir()?.join(rest)),
        None => Ok(PathBuf::from(path)),
    }
}
