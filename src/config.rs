//! Collector configuration.
//!
//! Configuration is discovered from `dockstream.toml` in the working
//! directory, then `~/.dockstream/config.toml`, then
//! `/etc/dockstream/config.toml`; built-in defaults apply when no file is
//! found. `DOCKSTREAM_CONFIG` pins an explicit path and `APP_NAME` overrides
//! the service name used for self-monitoring.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const CONFIG_ENV_KEY: &str = "DOCKSTREAM_CONFIG";
const APP_NAME_ENV_KEY: &str = "APP_NAME";

/// Errors from configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Config file could not be parsed.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Runtime configuration for the collection daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Container names to collect logs from.
    pub monitored_names: Vec<String>,
    /// Prefixes that open a new unstructured block.
    pub unstructured_line_flags: Vec<String>,
    /// chrono format strings tried, in order, against payload timestamps.
    pub time_layouts: Vec<String>,
    /// Whether to also collect this service's own container.
    pub monitor_self: bool,
    /// Name of this service's container, used when `monitor_self` is set.
    pub service_name: Option<String>,
    /// Directory for the embedded checkpoint database.
    pub checkpoint_path: PathBuf,
    /// File the JSON-lines sink appends to.
    pub sink_path: PathBuf,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            monitored_names: Vec::new(),
            unstructured_line_flags: default_line_flags(),
            time_layouts: default_time_layouts(),
            monitor_self: false,
            service_name: None,
            checkpoint_path: PathBuf::from("data/checkpoints"),
            sink_path: PathBuf::from("data/logs.jsonl"),
        }
    }
}

/// Unstructured block openers recognized out of the box.
pub fn default_line_flags() -> Vec<String> {
    ["fatal error:", "[GIN-debug]", "[GIN-warning]", "panic:"]
        .map(String::from)
        .to_vec()
}

/// Payload time layouts recognized out of the box.
///
/// RFC-3339 is always tried first by the parser itself; these cover the
/// zap-style numeric offset and the plain date forms the Go standard logger
/// emits.
pub fn default_time_layouts() -> Vec<String> {
    [
        "%Y-%m-%dT%H:%M:%S%.f%z",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y/%m/%d %H:%M:%S%.f",
        "%Y/%m/%d %H:%M:%S",
        "%Y/%m/%d",
    ]
    .map(String::from)
    .to_vec()
}

impl CollectorConfig {
    /// Discover and load configuration, falling back to defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match Self::find_config_file() {
            Some(path) => {
                info!(path = %path.display(), "loading configuration");
                Self::from_toml_file(&path)?
            }
            None => {
                info!("no configuration file found, using defaults");
                Self::default()
            }
        };

        if let Ok(name) = std::env::var(APP_NAME_ENV_KEY) {
            if !name.is_empty() {
                config.service_name = Some(name);
            }
        }

        config.apply_self_monitoring();
        Ok(config)
    }

    /// Load from an explicit TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Append this service's own container name when self-monitoring is
    /// enabled and we are actually running inside a container.
    pub fn apply_self_monitoring(&mut self) {
        if !self.monitor_self {
            return;
        }
        let Some(name) = self.service_name.clone() else {
            return;
        };
        if !running_in_container() {
            debug!("monitor_self set but not running in a container, skipping");
            return;
        }
        if !self.monitored_names.contains(&name) {
            self.monitored_names.push(name);
        }
    }

    fn find_config_file() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV_KEY) {
            if !path.is_empty() {
                return Some(PathBuf::from(path));
            }
        }

        let mut candidates = Vec::new();
        if let Ok(current_dir) = std::env::current_dir() {
            candidates.push(current_dir.join("dockstream.toml"));
        }
        if let Ok(home) = std::env::var("HOME") {
            candidates.push(PathBuf::from(home).join(".dockstream").join("config.toml"));
        }
        candidates.push(PathBuf::from("/etc/dockstream/config.toml"));

        candidates.into_iter().find(|p| p.is_file())
    }
}

/// Whether the current process runs inside a container.
///
/// Checks the `container` environment marker, `/.dockerenv`, and the
/// cgroup metadata of pid 1.
pub fn running_in_container() -> bool {
    if std::env::var_os("container").is_some() {
        return true;
    }
    if Path::new("/.dockerenv").exists() {
        return true;
    }
    match std::fs::read_to_string("/proc/1/cgroup") {
        Ok(data) => data.contains("docker"),
        Err(_) => false,
    }
}
