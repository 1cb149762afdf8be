//! Plugins: the addressable unit loaders operate on
//!
//! A [`Plugin`] keeps its identity across reloads of the same logical plugin
//! (same name, same package). Its observable state only changes through the
//! registry, which owns the crate-private mutators.

pub mod bootstrap;

pub use bootstrap::{Bootstrap, BootstrapResolver, CodeLocator, ExportTable, ExportValue};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::package::PluginDefinition;
use crate::{Error, Result};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique plugin identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct PluginId(u64);

impl PluginId {
    fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for PluginId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Plugin lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginStatus {
    /// Constructed, no load attempted yet
    Pending,
    /// Accepted by its loader
    Loaded,
    /// Rejected, or blocked on a loader or dependency
    Error,
}

/// Serializable snapshot of a plugin
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginInfo {
    pub id: PluginId,
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    #[serde(rename = "type")]
    pub plugin_type: String,
    pub requires: Vec<String>,
    pub package_path: PathBuf,
    pub package_name: String,
    pub status: PluginStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_reload: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug)]
struct PluginState {
    definition: Arc<PluginDefinition>,
    config: Option<Value>,
    status: PluginStatus,
    last_reload: Option<DateTime<Utc>>,
    error_message: Option<String>,
    /// Loader holds state from a load that has not been undone
    active: bool,
}

/// One plugin contributed by a package
pub struct Plugin {
    id: PluginId,
    name: String,
    plugin_type: String,
    package_path: PathBuf,
    package_name: String,
    state: Mutex<PluginState>,
}

impl Plugin {
    /// Create a pending plugin from a definition
    #[must_use]
    pub fn new(
        definition: Arc<PluginDefinition>,
        package_path: PathBuf,
        package_name: String,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: PluginId::next(),
            name: definition.name.clone(),
            plugin_type: definition.plugin_type.clone(),
            package_path,
            package_name,
            state: Mutex::new(PluginState {
                definition,
                config: None,
                status: PluginStatus::Pending,
                last_reload: None,
                error_message: None,
                active: false,
            }),
        })
    }

    #[must_use]
    pub const fn id(&self) -> PluginId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Loader routing key; fixed for the lifetime of the plugin
    #[must_use]
    pub fn plugin_type(&self) -> &str {
        &self.plugin_type
    }

    /// Folder of the owning package
    #[must_use]
    pub fn package_path(&self) -> &Path {
        &self.package_path
    }

    #[must_use]
    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    /// Current definition
    #[must_use]
    pub fn definition(&self) -> Arc<PluginDefinition> {
        Arc::clone(&self.lock().definition)
    }

    /// Names this plugin requires to be loaded first
    #[must_use]
    pub fn requires(&self) -> Vec<String> {
        self.lock().definition.requires.clone()
    }

    #[must_use]
    pub fn status(&self) -> PluginStatus {
        self.lock().status
    }

    /// Effective config of the last successful load
    #[must_use]
    pub fn config(&self) -> Option<Value> {
        self.lock().config.clone()
    }

    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        self.lock().error_message.clone()
    }

    /// Snapshot for introspection
    #[must_use]
    pub fn info(&self) -> PluginInfo {
        let state = self.lock();
        PluginInfo {
            id: self.id,
            name: self.name.clone(),
            description: state.definition.description.clone(),
            tags: state.definition.tags.clone(),
            plugin_type: self.plugin_type.clone(),
            requires: state.definition.requires.clone(),
            package_path: self.package_path.clone(),
            package_name: self.package_name.clone(),
            status: state.status,
            config: state.config.clone(),
            last_reload: state.last_reload,
            error_message: state.error_message.clone(),
        }
    }

    /// Parse the declared bootstrap reference
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bootstrap`] if no reference is declared or it is invalid
    pub fn locator(&self) -> Result<CodeLocator> {
        let reference = self.definition().bootstrap.clone().ok_or_else(|| Error::Bootstrap {
            plugin: self.name.clone(),
            reason: "no bootstrap declared".to_string(),
        })?;
        CodeLocator::parse(&reference, &self.package_path).map_err(|reason| Error::Bootstrap {
            plugin: self.name.clone(),
            reason,
        })
    }

    /// Resolve the plugin's executable entry point
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bootstrap`] if the reference is missing or invalid,
    /// or the resolver cannot find it
    pub fn load_bootstrap(&self, resolver: &dyn BootstrapResolver) -> Result<Bootstrap> {
        let locator = self.locator()?;
        let export = resolver.resolve(&locator).map_err(|reason| Error::Bootstrap {
            plugin: self.name.clone(),
            reason,
        })?;
        Ok(Bootstrap::new(locator, export))
    }

    /// True from a successful load until the loader unloads the plugin,
    /// including while a failed reload leaves it in `error`
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    pub(crate) fn mark_loaded(&self, config: Value) {
        let mut state = self.lock();
        state.status = PluginStatus::Loaded;
        state.config = Some(config);
        state.last_reload = Some(Utc::now());
        state.error_message = None;
        state.active = true;
    }

    pub(crate) fn mark_unloaded(&self) {
        self.lock().active = false;
    }

    pub(crate) fn mark_error(&self, message: impl Into<String>) {
        let mut state = self.lock();
        state.status = PluginStatus::Error;
        state.error_message = Some(message.into());
    }

    /// Swap in a new definition for the same logical plugin
    pub(crate) fn replace_definition(&self, definition: Arc<PluginDefinition>) {
        debug_assert_eq!(definition.name, self.name);
        self.lock().definition = definition;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PluginState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("type", &self.plugin_type)
            .field("package", &self.package_path)
            .field("status", &self.status())
            .finish()
    }
}
