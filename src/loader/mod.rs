//! Loader contract and reference loaders
//!
//! A [`Loader`] turns a plugin of one type plus its effective config into
//! running behavior. The registry holds at most one loader per type and is
//! the only caller of `load`/`unload`.

pub mod builtin;
pub mod endpoint;
pub mod loader_plugin;
pub mod middleware;
pub mod static_files;

pub use endpoint::EndpointLoader;
pub use loader_plugin::LoaderPluginLoader;
pub use middleware::MiddlewareLoader;
pub use static_files::StaticLoader;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::pipeline::{MiddlewareChain, Pipeline, RequestHandler};
use crate::plugin::{Bootstrap, BootstrapResolver, Plugin};
use crate::registry::Registry;
use crate::{Error, Result};

/// Type-specific plugin loader
#[async_trait]
pub trait Loader: Send + Sync {
    /// Human-readable loader name for logs and introspection
    fn name(&self) -> &str;

    /// Baseline config, before `defaultConfig` and overrides are merged in
    fn generate_minimum_config(&self, plugin: &Plugin) -> Value;

    /// Start or restart a plugin with its effective config
    ///
    /// Called again for a plugin that is already loaded when its definition
    /// changes or the loader is replaced; implementations must treat that as
    /// an in-place reload.
    async fn load(&self, plugin: &Arc<Plugin>, config: &Value, ctx: &LoadContext) -> Result<()>;

    /// Stop a loaded plugin
    async fn unload(&self, plugin: &Arc<Plugin>, ctx: &LoadContext) -> Result<()>;
}

/// What the registry hands a loader on every call
#[derive(Clone)]
pub struct LoadContext {
    pub registry: Registry,
    pub resolver: Arc<dyn BootstrapResolver>,
}

impl std::fmt::Debug for LoadContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadContext").finish_non_exhaustive()
    }
}

/// Inputs to a [`HandlerFactory`]
pub struct HandlerContext<'a> {
    pub plugin: &'a Plugin,
    pub config: &'a Value,
    pub bootstrap: &'a Bootstrap,
}

/// Bootstrap export that builds a request handler
pub type HandlerFactory =
    Arc<dyn Fn(&HandlerContext<'_>) -> Result<Arc<dyn RequestHandler>> + Send + Sync>;

/// Inputs to a [`LoaderFactory`]
pub struct LoaderFactoryContext<'a> {
    pub plugin: &'a Plugin,
    pub config: &'a Value,
    pub pipeline: &'a Arc<Pipeline>,
    pub middleware: &'a Arc<MiddlewareChain>,
}

/// Bootstrap export that builds a loader
pub type LoaderFactory =
    Arc<dyn Fn(&LoaderFactoryContext<'_>) -> Result<Arc<dyn Loader>> + Send + Sync>;

/// Wrap a closure as a [`HandlerFactory`] export
pub fn handler_factory<F>(f: F) -> HandlerFactory
where
    F: Fn(&HandlerContext<'_>) -> Result<Arc<dyn RequestHandler>> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap a closure as a [`LoaderFactory`] export
pub fn loader_factory<F>(f: F) -> LoaderFactory
where
    F: Fn(&LoaderFactoryContext<'_>) -> Result<Arc<dyn Loader>> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// The loaders every host starts with, keyed by plugin type
#[must_use]
pub fn reference_loaders(
    pipeline: &Arc<Pipeline>,
    middleware: &Arc<MiddlewareChain>,
) -> Vec<(&'static str, Arc<dyn Loader>)> {
    vec![
        (
            endpoint::PLUGIN_TYPE,
            Arc::new(EndpointLoader::new(Arc::clone(pipeline))),
        ),
        (
            middleware::PLUGIN_TYPE,
            Arc::new(MiddlewareLoader::new(Arc::clone(middleware))),
        ),
        (
            static_files::PLUGIN_TYPE,
            Arc::new(StaticLoader::new(Arc::clone(pipeline))),
        ),
        (
            loader_plugin::PLUGIN_TYPE,
            Arc::new(LoaderPluginLoader::new(
                Arc::clone(pipeline),
                Arc::clone(middleware),
            )),
        ),
    ]
}

/// Resolve a plugin's bootstrap and build its request handler
///
/// # Errors
///
/// Returns [`Error::Bootstrap`] if the export is missing or is not a
/// [`HandlerFactory`], or whatever the factory returns
pub fn resolve_handler(
    plugin: &Plugin,
    config: &Value,
    ctx: &LoadContext,
) -> Result<Arc<dyn RequestHandler>> {
    let bootstrap = plugin.load_bootstrap(ctx.resolver.as_ref())?;
    let factory = bootstrap
        .get::<HandlerFactory>()
        .ok_or_else(|| Error::Bootstrap {
            plugin: plugin.name().to_string(),
            reason: format!("export {} is not a request handler", bootstrap.locator.export),
        })?;
    factory(&HandlerContext {
        plugin,
        config,
        bootstrap: &bootstrap,
    })
}

/// Type-specific manifest field, falling back to `default`
fn definition_field(plugin: &Plugin, key: &str, default: Value) -> Value {
    plugin
        .definition()
        .extra
        .get(key)
        .cloned()
        .unwrap_or(default)
}

/// Default mount path for a plugin: `/` plus its name, spaces as dashes
fn default_mount_path(plugin: &Plugin) -> String {
    format!("/{}", plugin.name().trim().replace(' ', "-"))
}

/// Mount path from config
fn mount_path(plugin: &Plugin, config: &Value) -> Result<String> {
    match config.get("path").and_then(Value::as_str) {
        Some(path) if path.starts_with('/') => Ok(path.to_string()),
        Some(path) => Err(Error::loader(format!(
            "plugin {}: path {path} must start with /",
            plugin.name()
        ))),
        None => Err(Error::loader(format!(
            "plugin {}: config.path is required",
            plugin.name()
        ))),
    }
}
