//! Configuration management for the plugin host

pub mod file;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::Result;

/// Default manifest file name at a package root
pub const DEFAULT_MANIFEST_FILE: &str = "package.json";

/// Default top-level manifest key marking a folder as a package
pub const DEFAULT_NAMESPACE: &str = "omni";

/// Default quiet period for update coalescing
pub const DEFAULT_UPDATE_DELAY: Duration = Duration::from_millis(2000);

/// Default listen port
pub const DEFAULT_PORT: u16 = 18790;

/// A folder scanned for packages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootFolder {
    /// Folder path; either a package itself or a parent of packages
    pub path: PathBuf,
    /// Watch the folder for changes after the initial scan
    pub watch: bool,
}

impl RootFolder {
    /// Create a root folder entry
    pub fn new(path: impl Into<PathBuf>, watch: bool) -> Self {
        Self {
            path: path.into(),
            watch,
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,
    /// Address to bind
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: "0.0.0.0".to_string(),
        }
    }
}

/// Plugin host configuration
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Folders to scan for packages
    pub roots: Vec<RootFolder>,

    /// Plugin names that are filtered out of every package
    pub ignored_plugins: Vec<String>,

    /// Quiet period before a burst of file changes becomes one update
    pub update_delay: Duration,

    /// Manifest file name at each package root
    pub manifest_file: String,

    /// Manifest key that marks a folder as a package
    pub namespace: String,

    /// Config overrides keyed by plugin name, applied last
    pub overrides: HashMap<String, serde_json::Value>,

    /// HTTP server configuration
    pub server: ServerConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            ignored_plugins: Vec::new(),
            update_delay: DEFAULT_UPDATE_DELAY,
            manifest_file: DEFAULT_MANIFEST_FILE.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            overrides: HashMap::new(),
            server: ServerConfig::default(),
        }
    }
}

impl HostConfig {
    /// Load configuration
    ///
    /// An explicit path must exist and parse. Without one, the standard
    /// config file is used when present. When no roots are configured, the
    /// default plugin directories are scanned and watched.
    ///
    /// # Errors
    ///
    /// Returns error if an explicitly given config file cannot be loaded
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => file::read_config_file(path)?,
            None => file::load_config_file(),
        };

        let mut config = Self::from_file(file);
        if config.roots.is_empty() {
            config.roots = default_plugin_roots()
                .into_iter()
                .map(|path| RootFolder::new(path, true))
                .collect();
        }
        Ok(config)
    }

    /// Overlay a parsed config file onto defaults
    #[must_use]
    pub fn from_file(file: file::HostConfigFile) -> Self {
        let defaults = Self::default();
        Self {
            roots: file
                .roots
                .into_iter()
                .map(|root| RootFolder::new(root.path, root.watch))
                .collect(),
            ignored_plugins: file.ignore,
            update_delay: file
                .update_delay_ms
                .map_or(defaults.update_delay, Duration::from_millis),
            manifest_file: file.manifest_file.unwrap_or(defaults.manifest_file),
            namespace: file.namespace.unwrap_or(defaults.namespace),
            overrides: file.plugins,
            server: ServerConfig {
                port: file.server.port.unwrap_or(defaults.server.port),
                bind: file.server.bind.unwrap_or(defaults.server.bind),
            },
        }
    }
}

/// Default package search directories
#[must_use]
pub fn default_plugin_roots() -> Vec<PathBuf> {
    directories::BaseDirs::new()
        .map(|d| vec![d.data_dir().join("omni").join("plugins")])
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = HostConfig::default();
        assert_eq!(config.update_delay, Duration::from_millis(2000));
        assert_eq!(config.manifest_file, "package.json");
        assert_eq!(config.namespace, "omni");
        assert_eq!(config.server.port, DEFAULT_PORT);
    }

    #[test]
    fn file_overlays_defaults() {
        let file: file::HostConfigFile = toml::from_str(
            r#"
            update_delay_ms = 250
            [[roots]]
            path = "plugins"
            watch = true
            [server]
            bind = "127.0.0.1"
            "#,
        )
        .unwrap();

        let config = HostConfig::from_file(file);
        assert_eq!(config.roots, vec![RootFolder::new("plugins", true)]);
        assert_eq!(config.update_delay, Duration::from_millis(250));
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.namespace, DEFAULT_NAMESPACE);
    }

    #[test]
    fn explicit_path_must_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "roots = 3").unwrap();

        assert!(HostConfig::load(Some(&path)).is_err());
    }

    #[test]
    fn explicit_path_keeps_configured_roots() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[[roots]]\npath = \"/srv/plugins\"\n").unwrap();

        let config = HostConfig::load(Some(&path)).unwrap();
        assert_eq!(config.roots, vec![RootFolder::new("/srv/plugins", false)]);
    }
}
