//! Registry: reconciles packages, plugins and loaders
//!
//! The registry is the only component that drives plugin state. It keeps the
//! loader map, decides when a plugin may be handed to its loader, and
//! retries plugins blocked on a missing loader or dependency whenever the
//! blocker may have cleared.
//!
//! State lives behind a `std::sync::Mutex` that is never held across an
//! `.await`, so loaders may call back into the registry from `load`.

mod merge;
mod reconcile;

pub use merge::deep_merge;
pub use reconcile::MAX_RECONCILE_PASSES;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::BoxFuture;
use serde_json::Value;

use crate::Error;
use crate::events::Publisher;
use crate::loader::{LoadContext, Loader};
use crate::package::{Package, PackageEvent, PackageInfo, PluginDefinition};
use crate::plugin::{BootstrapResolver, Plugin, PluginId, PluginInfo, PluginStatus};

/// Events emitted as plugins come and go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// A plugin was accepted by its loader
    Loaded { name: String },
    /// A loaded plugin is about to be reloaded or removed
    Unload { name: String },
}

#[derive(Default)]
struct RegistryState {
    packages: HashMap<PathBuf, Arc<Package>>,
    plugins: BTreeMap<PluginId, Arc<Plugin>>,
    loaders: HashMap<String, Arc<dyn Loader>>,
    no_loader: Vec<Arc<Plugin>>,
    unmet: Vec<Arc<Plugin>>,
}

impl RegistryState {
    fn loaded_names(&self) -> HashSet<String> {
        self.plugins
            .values()
            .filter(|p| p.status() == PluginStatus::Loaded)
            .map(|p| p.name().to_string())
            .collect()
    }

    fn find(&self, name: &str, package_path: &Path) -> Option<Arc<Plugin>> {
        self.plugins
            .values()
            .find(|p| p.name() == name && p.package_path() == package_path)
            .cloned()
    }

    /// Decide whether a plugin may be handed to its loader
    ///
    /// Blocked plugins are parked on the matching retry list; a plugin that
    /// gets past both checks leaves them.
    fn prepare_load(&mut self, plugin: &Arc<Plugin>) -> Result<Arc<dyn Loader>, Error> {
        let Some(loader) = self.loaders.get(plugin.plugin_type()).cloned() else {
            if !self.no_loader.iter().any(|p| Arc::ptr_eq(p, plugin)) {
                self.no_loader.push(Arc::clone(plugin));
            }
            return Err(Error::NoLoader(plugin.plugin_type().to_string()));
        };

        let loaded = self.loaded_names();
        let missing: Vec<String> = plugin
            .requires()
            .into_iter()
            .filter(|name| !loaded.contains(name))
            .collect();
        if !missing.is_empty() {
            if !self.unmet.iter().any(|p| Arc::ptr_eq(p, plugin)) {
                self.unmet.push(Arc::clone(plugin));
            }
            return Err(Error::MissingRequirements(missing));
        }
        self.no_loader.retain(|p| !Arc::ptr_eq(p, plugin));
        self.unmet.retain(|p| !Arc::ptr_eq(p, plugin));

        let duplicate = self.plugins.values().find(|other| {
            other.id() != plugin.id()
                && other.name() == plugin.name()
                && other.package_path() != plugin.package_path()
                && other.status() == PluginStatus::Loaded
        });
        if let Some(other) = duplicate {
            tracing::warn!(
                plugin = %plugin.name(),
                package = %plugin.package_path().display(),
                loaded_from = %other.package_path().display(),
                "duplicate plugin name"
            );
            return Err(Error::DuplicateName {
                name: plugin.name().to_string(),
                other: other.package_path().to_path_buf(),
            });
        }

        Ok(loader)
    }
}

struct RegistryInner {
    state: Mutex<RegistryState>,
    events: Publisher<RegistryEvent>,
    resolver: Arc<dyn BootstrapResolver>,
    overrides: HashMap<String, Value>,
}

/// Shared handle to the plugin registry
///
/// Cloning is cheap; every clone operates on the same state.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    /// Create an empty registry
    ///
    /// `overrides` are per-plugin config objects merged last into every
    /// effective config, keyed by plugin name.
    #[must_use]
    pub fn new(resolver: Arc<dyn BootstrapResolver>, overrides: HashMap<String, Value>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                state: Mutex::new(RegistryState::default()),
                events: Publisher::new(),
                resolver,
                overrides,
            }),
        }
    }

    /// `loaded` / `unload` notifications
    #[must_use]
    pub fn events(&self) -> &Publisher<RegistryEvent> {
        &self.inner.events
    }

    /// Context handed to loaders
    #[must_use]
    pub fn context(&self) -> LoadContext {
        LoadContext {
            registry: self.clone(),
            resolver: Arc::clone(&self.inner.resolver),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Loaders

    /// Install the loader for a plugin type
    ///
    /// When the type had no loader, plugins waiting for one are retried.
    /// Every plugin of this type that was loaded beforehand is re-loaded
    /// with the new instance.
    pub async fn register_loader(&self, plugin_type: &str, loader: Arc<dyn Loader>) {
        let (replaced, previously_loaded) = {
            let mut state = self.lock();
            let previously_loaded: Vec<Arc<Plugin>> = state
                .plugins
                .values()
                .filter(|p| p.plugin_type() == plugin_type && p.status() == PluginStatus::Loaded)
                .cloned()
                .collect();
            let replaced = state
                .loaders
                .insert(plugin_type.to_string(), Arc::clone(&loader))
                .is_some();
            (replaced, previously_loaded)
        };

        tracing::info!(
            plugin_type,
            loader = loader.name(),
            replaced,
            reloading = previously_loaded.len(),
            "loader registered"
        );

        if !replaced {
            self.reconcile_no_loader().await;
        }

        for plugin in previously_loaded {
            if self.is_tracked(&plugin) {
                self.attempt_load(plugin).await;
            }
        }
    }

    /// Remove the loader for a plugin type
    ///
    /// Only removes it if `loader` is still the registered instance, so a
    /// stale owner cannot remove its replacement. Plugins stay loaded.
    pub fn unregister_loader(&self, plugin_type: &str, loader: &Arc<dyn Loader>) -> bool {
        let mut state = self.lock();
        let is_current = state
            .loaders
            .get(plugin_type)
            .is_some_and(|current| Arc::ptr_eq(current, loader));
        if is_current {
            state.loaders.remove(plugin_type);
            tracing::info!(plugin_type, "loader unregistered");
        }
        is_current
    }

    // Loading

    /// Try to hand a plugin to its loader
    ///
    /// Blocked plugins are parked on the no-loader or unmet-requirements
    /// list; a successful load retries everything waiting on requirements.
    pub fn attempt_load(&self, plugin: Arc<Plugin>) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let name = plugin.name().to_string();

            let prepared = self.lock().prepare_load(&plugin);
            let loader = match prepared {
                Ok(loader) => loader,
                Err(e) => {
                    tracing::debug!(plugin = %name, reason = %e, "plugin not loadable yet");
                    plugin.mark_error(e.to_string());
                    return;
                }
            };

            if plugin.status() == PluginStatus::Loaded {
                self.inner.events.emit(&RegistryEvent::Unload { name: name.clone() });
            }

            let config = self.effective_config(loader.as_ref(), &plugin);
            let ctx = self.context();
            match loader.load(&plugin, &config, &ctx).await {
                Ok(()) => {
                    plugin.mark_loaded(config);
                    tracing::info!(
                        plugin = %name,
                        plugin_type = %plugin.plugin_type(),
                        package = %plugin.package_name(),
                        "plugin loaded"
                    );
                    self.inner.events.emit(&RegistryEvent::Loaded { name });
                    self.reconcile_unmet_requirements().await;
                }
                Err(e) => {
                    tracing::warn!(plugin = %name, error = %e, "plugin failed to load");
                    plugin.mark_error(e.to_string());
                }
            }
        })
    }

    /// Minimum config, then `defaultConfig`, then the override for the name
    fn effective_config(&self, loader: &dyn Loader, plugin: &Plugin) -> Value {
        let mut config = loader.generate_minimum_config(plugin);
        if let Some(defaults) = &plugin.definition().default_config {
            deep_merge(&mut config, defaults);
        }
        if let Some(overrides) = self.inner.overrides.get(plugin.name()) {
            deep_merge(&mut config, overrides);
        }
        config
    }

    fn is_tracked(&self, plugin: &Arc<Plugin>) -> bool {
        self.lock().plugins.contains_key(&plugin.id())
    }

    // Package events

    /// Apply one package event
    pub async fn handle_package_event(&self, event: &PackageEvent) {
        match event {
            PackageEvent::Ready { diff, package } => {
                let path = package.path().to_path_buf();
                self.lock()
                    .packages
                    .insert(path.clone(), Arc::clone(package));

                for definition in &diff.removed {
                    self.remove_definition(&path, definition).await;
                }
                for definition in diff.updated.iter().chain(&diff.added) {
                    self.upsert_definition(package, definition).await;
                }
            }
            PackageEvent::Removed { diff, package } => {
                let path = package.path().to_path_buf();
                for definition in &diff.removed {
                    self.remove_definition(&path, definition).await;
                }

                let leftovers: Vec<Arc<Plugin>> = self
                    .lock()
                    .plugins
                    .values()
                    .filter(|p| p.package_path() == path)
                    .cloned()
                    .collect();
                for plugin in leftovers {
                    self.remove_plugin(&plugin).await;
                }

                self.lock().packages.remove(&path);
                tracing::info!(package = %path.display(), "package forgotten");
            }
            PackageEvent::Error { message, package } => {
                let path = package.path();
                let loaded = {
                    let mut state = self.lock();
                    state
                        .packages
                        .insert(path.to_path_buf(), Arc::clone(package));
                    state
                        .plugins
                        .values()
                        .filter(|p| p.package_path() == path && p.status() == PluginStatus::Loaded)
                        .count()
                };
                if loaded > 0 {
                    tracing::warn!(
                        package = %path.display(),
                        error = %message,
                        loaded,
                        "package failed to rebuild, keeping previously loaded plugins"
                    );
                } else {
                    tracing::warn!(package = %path.display(), error = %message, "package failed to build");
                }
            }
        }
    }

    /// Add a plugin for a definition, or update the one already tracked
    ///
    /// A changed type is handled as remove then add, since the plugin has to
    /// move to a different loader.
    async fn upsert_definition(&self, package: &Arc<Package>, definition: &Arc<PluginDefinition>) {
        let existing = self.lock().find(&definition.name, package.path());
        match existing {
            Some(plugin) if plugin.plugin_type() == definition.plugin_type => {
                plugin.replace_definition(Arc::clone(definition));
                self.attempt_load(plugin).await;
            }
            Some(plugin) => {
                tracing::info!(
                    plugin = %plugin.name(),
                    from = %plugin.plugin_type(),
                    to = %definition.plugin_type,
                    "plugin type changed, re-adding"
                );
                self.remove_plugin(&plugin).await;
                self.insert_plugin(package, definition).await;
            }
            None => self.insert_plugin(package, definition).await,
        }
    }

    async fn insert_plugin(&self, package: &Arc<Package>, definition: &Arc<PluginDefinition>) {
        let plugin = Plugin::new(
            Arc::clone(definition),
            package.path().to_path_buf(),
            package.name(),
        );
        self.lock().plugins.insert(plugin.id(), Arc::clone(&plugin));
        tracing::debug!(plugin = %plugin.name(), id = %plugin.id(), "plugin added");
        self.attempt_load(plugin).await;
    }

    async fn remove_definition(&self, package_path: &Path, definition: &PluginDefinition) {
        let plugin = self.lock().find(&definition.name, package_path);
        if let Some(plugin) = plugin {
            self.remove_plugin(&plugin).await;
        }
    }

    /// Unload a plugin if needed and drop it from every collection
    ///
    /// A plugin whose reload failed is in `error` but its loader may still
    /// serve the previous load, so unloading follows [`Plugin::is_active`].
    async fn remove_plugin(&self, plugin: &Arc<Plugin>) {
        if plugin.status() == PluginStatus::Loaded {
            self.inner.events.emit(&RegistryEvent::Unload {
                name: plugin.name().to_string(),
            });
        }
        if plugin.is_active() {
            let loader = self.lock().loaders.get(plugin.plugin_type()).cloned();
            if let Some(loader) = loader {
                let ctx = self.context();
                if let Err(e) = loader.unload(plugin, &ctx).await {
                    tracing::warn!(plugin = %plugin.name(), error = %e, "plugin failed to unload");
                }
            }
            plugin.mark_unloaded();
        }

        let mut state = self.lock();
        state.plugins.remove(&plugin.id());
        state.no_loader.retain(|p| !Arc::ptr_eq(p, plugin));
        state.unmet.retain(|p| !Arc::ptr_eq(p, plugin));
        tracing::debug!(plugin = %plugin.name(), id = %plugin.id(), "plugin removed");
    }

    // Introspection

    /// Every tracked plugin, oldest first
    #[must_use]
    pub fn plugins(&self) -> Vec<PluginInfo> {
        self.lock().plugins.values().map(|p| p.info()).collect()
    }

    /// Plugin by name, preferring the loaded one
    #[must_use]
    pub fn plugin(&self, name: &str) -> Option<Arc<Plugin>> {
        let state = self.lock();
        let mut matching = state.plugins.values().filter(|p| p.name() == name);
        let first = matching.next()?;
        if first.status() == PluginStatus::Loaded {
            return Some(Arc::clone(first));
        }
        Some(Arc::clone(
            matching
                .find(|p| p.status() == PluginStatus::Loaded)
                .unwrap_or(first),
        ))
    }

    /// Every known package, sorted by path
    #[must_use]
    pub fn packages(&self) -> Vec<PackageInfo> {
        let mut packages: Vec<PackageInfo> =
            self.lock().packages.values().map(|p| p.info()).collect();
        packages.sort_by(|a, b| a.path.cmp(&b.path));
        packages
    }

    /// Registered loader types, sorted
    #[must_use]
    pub fn loader_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.lock().loaders.keys().cloned().collect();
        types.sort();
        types
    }

    /// Loader for a type
    #[must_use]
    pub fn loader(&self, plugin_type: &str) -> Option<Arc<dyn Loader>> {
        self.lock().loaders.get(plugin_type).cloned()
    }

    /// Names of plugins waiting for a loader
    #[must_use]
    pub fn plugins_with_no_loader(&self) -> Vec<String> {
        self.lock().no_loader.iter().map(|p| p.name().to_string()).collect()
    }

    /// Names of plugins waiting for their requirements
    #[must_use]
    pub fn plugins_with_unmet_requirements(&self) -> Vec<String> {
        self.lock().unmet.iter().map(|p| p.name().to_string()).collect()
    }

    /// Names of loaded plugins, sorted
    #[must_use]
    pub fn loaded_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().loaded_names().into_iter().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Registry")
            .field("packages", &state.packages.len())
            .field("plugins", &state.plugins.len())
            .field("loaders", &state.loaders.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
