use std::path::Path;
use std::sync::RwLock;
use std::time::Duration;

use anyhow::Context;
use once_cell::sync::Lazy;
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Config {
    pub cargo_path: String,
    pub rustc_path: String,
    pub build: BuildConfig,
    pub refresh: RefreshConfig,
    pub discovery: DiscoveryConfig,
}

impl Default for Config {
    fn default() -> Self {
        UserConfig::default().into()
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_task")]
    pub default_task: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            default_task: default_task(),
        }
    }
}

impl BuildConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RefreshConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryConfig {
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_task() -> String {
    "build".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_debounce_ms() -> u64 {
    300
}

fn default_max_depth() -> usize {
    1
}

#[derive(Default, Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UserConfig {
    #[serde(default)]
    pub cargo_path: Option<String>,
    #[serde(default)]
    pub rustc_path: Option<String>,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

impl UserConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }
}

impl From<UserConfig> for Config {
    fn from(config: UserConfig) -> Self {
        let cargo_path = config.cargo_path.unwrap_or_else(|| {
            executable_path_finder::find_with_cargo_home("cargo")
                .map(|p| p.to_string())
                .unwrap_or_else(|| "cargo".to_string())
        });
        Config {
            cargo_path,
            rustc_path: config.rustc_path.unwrap_or_else(|| "rustc".to_string()),
            build: config.build,
            refresh: config.refresh,
            discovery: config.discovery,
        }
    }
}

pub static GLOBAL_CONFIG: Lazy<RwLock<Config>> = Lazy::new(|| RwLock::new(Config::default()));

pub fn initialize_config(config: UserConfig) {
    let mut global_config = GLOBAL_CONFIG.write().unwrap();
    *global_config = config.into();
    debug!("config {:?}", global_config);
}

/// Snapshot of the current configuration.
pub fn current() -> Config {
    GLOBAL_CONFIG.read().unwrap().clone()
}
