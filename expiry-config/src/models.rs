use anyhow::{Context, anyhow};
use expiry_core::{
    DEFAULT_EXPIRING_LIMIT, MetadataMode, SupervisorConfig, SweeperConfig, WatchStrategy,
    WatcherConfig,
};
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::debug;

use crate::validation::{ConfigGuardRailError, ConfigWarnings};

/// Path to a TOML or JSON config file.
pub const CONFIG_PATH_ENV: &str = "EXPIRY_CONFIG_PATH";
/// Inline JSON config.
pub const CONFIG_JSON_ENV: &str = "EXPIRY_CONFIG_JSON";

/// Source that produced the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfigSource {
    #[default]
    Default,
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
}

/// Folder watching knobs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchSettings {
    /// `auto` uses native change notification where available and polls
    /// otherwise. `native` and `polling` force one or the other.
    pub strategy: WatchStrategy,
    /// Quiet period (ms) after a change before the folder is re-listed.
    /// Downloads often land as a temporary file that is renamed a moment
    /// later; a short window keeps those from being announced twice.
    pub debounce_window_ms: u64,
    /// Tick period (ms) when polling.
    pub poll_interval_ms: u64,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            strategy: WatchStrategy::Auto,
            debounce_window_ms: 1_000,
            poll_interval_ms: 5_000,
        }
    }
}

/// Expiration sweep schedule.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SweepSettings {
    pub interval_secs: u64,
    /// Delay after startup before the first sweep.
    pub initial_delay_secs: u64,
    /// Files expiring within this many seconds are reported as expiring
    /// soon.
    pub expiring_soon_secs: u64,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            interval_secs: 3_600,
            initial_delay_secs: 5,
            expiring_soon_secs: 3_600,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Where expiration records live: `auto`, `xattr` or `sidecar`.
    pub metadata_mode: MetadataMode,
    /// Watch list file. Defaults to `<config_dir>/expiry/watched_folders.json`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watch_list_path: Option<PathBuf>,
}

/// Top-level configuration for the expiry daemon and CLI.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ExpiryConfig {
    pub watch: WatchSettings,
    pub sweep: SweepSettings,
    pub storage: StorageSettings,
    /// Folder seeded into an empty watch list. Defaults to the platform
    /// downloads directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_folder: Option<PathBuf>,
    /// How many soonest-expiring files a folder listing shows.
    pub expiring_list_limit: usize,
    /// Events buffered per subscriber before slow readers start missing
    /// some.
    pub event_capacity: usize,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            watch: WatchSettings::default(),
            sweep: SweepSettings::default(),
            storage: StorageSettings::default(),
            default_folder: None,
            expiring_list_limit: DEFAULT_EXPIRING_LIMIT,
            event_capacity: 256,
        }
    }
}

impl ExpiryConfig {
    /// Load configuration using environment variables.
    /// Evaluation order:
    /// 1) `$EXPIRY_CONFIG_PATH` (TOML or JSON file),
    /// 2) `$EXPIRY_CONFIG_JSON` (inline JSON),
    /// 3) the first existing default file,
    /// 4) defaults.
    pub fn load_from_env() -> anyhow::Result<(Self, ConfigSource)> {
        Self::load_with(|key| env::var(key).ok())
    }

    /// [`Self::load_from_env`] with a custom variable lookup.
    pub fn load_with<F>(lookup: F) -> anyhow::Result<(Self, ConfigSource)>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path_str) = lookup(CONFIG_PATH_ENV)
            && !path_str.trim().is_empty()
        {
            let path = PathBuf::from(path_str.trim());
            debug!(path = %path.display(), "loading config named by {CONFIG_PATH_ENV}");
            let config = Self::load_from_file(&path)?;
            return Ok((config, ConfigSource::EnvPath(path)));
        }

        if let Some(raw) = lookup(CONFIG_JSON_ENV)
            && !raw.trim().is_empty()
        {
            debug!("loading inline config from {CONFIG_JSON_ENV}");
            let parsed = Self::parse_json(&raw).context("failed to parse EXPIRY_CONFIG_JSON")?;
            return Ok((parsed, ConfigSource::EnvInline));
        }

        if let Some(path) = Self::find_default_file() {
            debug!(path = %path.display(), "loading config from default location");
            let config = Self::load_from_file(&path)?;
            return Ok((config, ConfigSource::File(path)));
        }

        debug!("no config file found, using defaults");
        Ok((Self::default(), ConfigSource::Default))
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read expiry config from {}", path.display()))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::parse_json(&contents)
                .with_context(|| format!("invalid expiry config {}", path.display())),
            Some("toml") | Some("tml") => toml::from_str(&contents)
                .map_err(|err| anyhow!("invalid expiry config {}: {}", path.display(), err)),
            _ => Self::parse_from_str(&contents, &path.display().to_string()),
        }
    }

    pub fn parse_from_str(contents: &str, origin: &str) -> anyhow::Result<Self> {
        // Try TOML first, then JSON.
        toml::from_str(contents).or_else(|toml_err| {
            serde_json::from_str(contents).map_err(|json_err| {
                anyhow!(
                    "failed to parse expiry config {}: toml error: {}; json error: {}",
                    origin,
                    toml_err,
                    json_err
                )
            })
        })
    }

    pub fn parse_json(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw).map_err(|err| anyhow!("invalid expiry config json: {err}"))
    }

    fn find_default_file() -> Option<PathBuf> {
        const CANDIDATES: &[&str] = &["expiry.toml", "expiry.json", "config/expiry.toml"];

        CANDIDATES
            .iter()
            .map(PathBuf::from)
            .chain(
                expiry_core::WatchListStore::default_path()
                    .parent()
                    .map(|dir| dir.join("config.toml")),
            )
            .find(|path| path.exists())
    }

    /// Clamp out-of-range values and reject unusable paths.
    pub fn normalize(&mut self) -> Result<ConfigWarnings, ConfigGuardRailError> {
        crate::validation::apply_guard_rails(self)
    }

    pub fn into_supervisor_config(self) -> SupervisorConfig {
        SupervisorConfig {
            watcher: WatcherConfig {
                strategy: self.watch.strategy,
                debounce_window: Duration::from_millis(self.watch.debounce_window_ms),
                poll_interval: Duration::from_millis(self.watch.poll_interval_ms),
            },
            sweeper: SweeperConfig {
                interval: Duration::from_secs(self.sweep.interval_secs),
                initial_delay: Duration::from_secs(self.sweep.initial_delay_secs),
                expiring_soon_threshold: Duration::from_secs(self.sweep.expiring_soon_secs),
            },
            watch_list_path: self.storage.watch_list_path,
            default_folder: self.default_folder,
            event_capacity: self.event_capacity,
            expiring_list_limit: self.expiring_list_limit,
        }
    }
}
