//! TOML configuration file loading
//!
//! Supports `~/.config/omni/plugin-host/config.toml` as a persistent config
//! source. All fields are optional; the file is a partial overlay on top of
//! defaults.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct HostConfigFile {
    /// Folders to scan for packages
    #[serde(default)]
    pub roots: Vec<RootFileConfig>,

    /// Plugin names that are never loaded
    #[serde(default)]
    pub ignore: Vec<String>,

    /// Quiet period before a burst of changes is reported as one update
    pub update_delay_ms: Option<u64>,

    /// Manifest file name looked up at each package root
    pub manifest_file: Option<String>,

    /// Top-level manifest key that marks a folder as a package
    pub namespace: Option<String>,

    /// Server/runtime configuration
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Per-plugin config overrides keyed by plugin name
    #[serde(default)]
    pub plugins: HashMap<String, serde_json::Value>,
}

/// One `[[roots]]` entry
#[derive(Debug, Deserialize)]
pub struct RootFileConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub watch: bool,
}

/// Server/runtime configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// Port the plugin pipeline and admin API listen on
    pub port: Option<u16>,

    /// Bind address (e.g. "127.0.0.1")
    pub bind: Option<String>,
}

/// Parse a config file at an explicit path
///
/// # Errors
///
/// Returns error if the file cannot be read or is not valid TOML
pub fn read_config_file(path: &Path) -> Result<HostConfigFile> {
    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Load the TOML config file from the standard path
///
/// Returns `HostConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> HostConfigFile {
    let Some(path) = config_file_path() else {
        return HostConfigFile::default();
    };

    if !path.exists() {
        return HostConfigFile::default();
    }

    match read_config_file(&path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            HostConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/omni/plugin-host/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("omni")
            .join("plugin-host")
            .join("config.toml")
    })
}
