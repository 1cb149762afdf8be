//! Error types for the plugin host

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for plugin host operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the plugin host
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Package manifest could not be read, parsed, or is structurally invalid
    #[error("manifest error in {}: {message}", .path.display())]
    Manifest { path: PathBuf, message: String },

    /// Build collaborator reported a failure
    #[error("build failed for {}: {message}", .path.display())]
    Build { path: PathBuf, message: String },

    /// A plugin bootstrap could not be resolved
    ///
    /// Kept distinct from [`Error::Loader`] so a bad entry point is never
    /// mistaken for a loader rejecting a plugin.
    #[error("bootstrap error for plugin {plugin}: {reason}")]
    Bootstrap { plugin: String, reason: String },

    /// A loader rejected a plugin
    #[error("{0}")]
    Loader(String),

    /// No loader is registered for the plugin type
    #[error("no loader registered for type {0}")]
    NoLoader(String),

    /// One or more `requires` entries are not loaded yet
    #[error("missing required plugins: {}", .0.join(", "))]
    MissingRequirements(Vec<String>),

    /// Another package already has a loaded plugin with this name
    #[error("duplicate name: {name} already loaded from {}", .other.display())]
    DuplicateName { name: String, other: PathBuf },

    /// File watcher error
    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Build a loader error from any displayable message
    pub fn loader(message: impl Into<String>) -> Self {
        Self::Loader(message.into())
    }

    /// Whether this is a bootstrap resolution failure
    #[must_use]
    pub const fn is_bootstrap(&self) -> bool {
        matches!(self, Self::Bootstrap { .. })
    }
}
