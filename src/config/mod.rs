//! Configuration module for the sensor hub
//!
//! This module handles daemon configuration:
//! - The hub configuration file (`sensorhub.toml`)
//! - Drop-in override files in a `conf.d` directory
//! - Per-adaptor interval and data-range settings
//!
//! # Config Location
//!
//! The default configuration lives in the platform config directory:
//! - **Linux**: `~/.config/sensorhub/sensorhub.toml`
//! - **macOS**: `~/Library/Application Support/sensorhub/sensorhub.toml`
//! - **Windows**: `%APPDATA%\sensorhub\sensorhub.toml`
//!
//! # Layering
//!
//! [`HubConfig::load_layered`] reads the main file first and then every
//! `*.toml` in the drop-in directory, in file name order. A key set by an
//! earlier file wins over the same key in a later one; tables are merged
//! key by key.
//!
//! # Example
//!
//! ```ignore
//! use sensorhub_rs::config::HubConfig;
//!
//! let config = HubConfig::load_layered(
//!     "/etc/sensorhub/sensorhub.toml",
//!     "/etc/sensorhub/conf.d",
//! )?;
//! println!("device: {}", config.device_id);
//! ```

pub mod settings;

pub use settings::*;

use crate::error::{HubError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Application identifier for config directories
pub const APP_ID: &str = "sensorhub";

/// Main config filename
pub const CONFIG_FILE: &str = "sensorhub.toml";

/// Drop-in directory name, next to the main file
pub const DROP_IN_DIR: &str = "conf.d";

/// Default ring buffer capacity
pub const DEFAULT_BUFFER_CAPACITY: usize = 128;

/// Default reader chunk size
pub const DEFAULT_READER_CHUNK: usize = 128;

/// Default capacity of the client frame channel
pub const DEFAULT_FRAME_CHANNEL_CAPACITY: usize = 1024;

/// Get the platform config directory for the hub
pub fn config_dir() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID))
}

/// Get the path to the default config file
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join(CONFIG_FILE))
}

/// Hub configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Device identifier used to resolve plugin aliases
    pub device_id: String,

    /// Capacity of every ring buffer the hub creates
    pub buffer_capacity: usize,

    /// Items moved per reader chunk
    pub reader_chunk: usize,

    /// Frames buffered for the client layer before dropping
    pub frame_channel_capacity: usize,

    /// Plugins loaded at startup
    pub plugins: Vec<String>,

    /// `"<device_id>/<plugin>"` or `"<plugin>"` mapped to the real plugin name
    pub plugin_aliases: BTreeMap<String, String>,

    /// Adaptor instances by id
    pub adaptors: BTreeMap<String, AdaptorSettings>,

    /// Chain instances: id -> type
    pub chains: BTreeMap<String, String>,

    /// Sensor instances: id -> type
    pub sensors: BTreeMap<String, String>,

    /// Mounting transforms
    pub transforms: TransformSettings,

    /// Directory for rolling log files; no file logging when unset
    pub log_dir: Option<PathBuf>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            device_id: String::new(),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            reader_chunk: DEFAULT_READER_CHUNK,
            frame_channel_capacity: DEFAULT_FRAME_CHANNEL_CAPACITY,
            plugins: Vec::new(),
            plugin_aliases: BTreeMap::new(),
            adaptors: BTreeMap::new(),
            chains: BTreeMap::new(),
            sensors: BTreeMap::new(),
            transforms: TransformSettings::default(),
            log_dir: None,
        }
    }
}

impl HubConfig {
    /// Parse a config from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| HubError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load a config file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            HubError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        toml::from_str(&content).map_err(|e| {
            HubError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })
    }

    /// Load a config file, returning defaults on any error
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Load `main` and then every `*.toml` in `drop_in_dir`, earlier keys
    /// winning. A missing main file or drop-in directory is skipped.
    pub fn load_layered(main: impl AsRef<Path>, drop_in_dir: impl AsRef<Path>) -> Result<Self> {
        let mut files = Vec::new();
        if main.as_ref().exists() {
            files.push(main.as_ref().to_path_buf());
        }
        files.extend(drop_in_files(drop_in_dir.as_ref())?);

        let mut merged = toml::Table::new();
        for file in &files {
            let content = std::fs::read_to_string(file).map_err(|e| {
                HubError::Config(format!("Failed to read config file {:?}: {}", file, e))
            })?;
            let table: toml::Table = content.parse().map_err(|e| {
                HubError::Config(format!("Failed to parse config file {:?}: {}", file, e))
            })?;
            tracing::debug!("Config layer {:?}", file);
            merge_first_wins(&mut merged, table);
        }

        toml::Value::Table(merged)
            .try_into()
            .map_err(|e| HubError::Config(format!("Invalid layered config: {}", e)))
    }

    /// Load from the default location, with its drop-in directory
    pub fn load_default() -> Self {
        let Some(dir) = config_dir() else {
            tracing::warn!("Could not determine config directory, using defaults");
            return Self::default();
        };
        Self::load_layered(dir.join(CONFIG_FILE), dir.join(DROP_IN_DIR)).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save config to disk as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                HubError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| HubError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content).map_err(|e| {
            HubError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }

    /// Resolve a plugin name through the alias table: the device-specific
    /// alias first, then the plain one, else the name itself.
    pub fn resolve_plugin_name<'a>(&'a self, name: &'a str) -> &'a str {
        let device_key = format!("{}/{}", self.device_id, name);
        self.plugin_aliases
            .get(&device_key)
            .or_else(|| self.plugin_aliases.get(name))
            .map(String::as_str)
            .unwrap_or(name)
    }
}

fn drop_in_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "toml"))
        .collect();
    files.sort();
    Ok(files)
}

fn merge_first_wins(base: &mut toml::Table, layer: toml::Table) {
    for (key, value) in layer {
        match (base.get_mut(&key), value) {
            (None, value) => {
                base.insert(key, value);
            }
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_first_wins(existing, incoming);
            }
            (Some(_), _) => {}
        }
    }
}
