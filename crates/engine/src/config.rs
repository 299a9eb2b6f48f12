//! Engine configuration: worker count, server address and the default
//! plugin chain.

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use dirs_next::config_dir;
use fanfetch_types::PluginSpec;
use fanfetch_util::expand_tilde;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const CONFIG_PATH_ENV: &str = "FANFETCH_CONFIG_PATH";
pub const WORKERS_ENV: &str = "FANFETCH_WORKERS";

const DEFAULT_WORKERS: usize = 10;
const DEFAULT_LISTEN_ADDRESS: &str = "127.0.0.1:8080";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct EngineConfig {
    pub workers: usize,
    pub listen_address: String,
    /// Chain used for tasks that do not declare their own plugins.
    pub default_plugins: Vec<PluginSpec>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            listen_address: DEFAULT_LISTEN_ADDRESS.to_string(),
            default_plugins: vec![PluginSpec::named("http")],
        }
    }
}

/// Returns the default configuration path, honouring `FANFETCH_CONFIG_PATH`.
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = env::var(CONFIG_PATH_ENV)
        && !path.trim().is_empty()
    {
        return expand_tilde(&path);
    }
    config_dir().unwrap_or_else(|| PathBuf::from(".")).join("fanfetch").join("config.json")
}

/// Loads configuration from `path`, or from [`default_config_path`] when
/// `None`, then applies environment overrides. A missing file yields the
/// defaults.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    let mut config = load_config_from_path(&path)?;
    apply_env_overrides(&mut config)?;
    Ok(config)
}

pub fn load_config_from_path(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "no config file, using defaults");
        return Ok(EngineConfig::default());
    }
    let content = fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
    let config = serde_json::from_str(&content).with_context(|| format!("parse config {}", path.display()))?;
    Ok(config)
}

fn apply_env_overrides(config: &mut EngineConfig) -> Result<()> {
    if let Ok(raw) = env::var(WORKERS_ENV)
        && !raw.trim().is_empty()
    {
        config.workers = raw
            .trim()
            .parse()
            .with_context(|| format!("{WORKERS_ENV} must be a number, got '{raw}'"))?;
    }
    Ok(())
}
