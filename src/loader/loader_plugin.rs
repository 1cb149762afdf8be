//! `loader` loader: plugins that contribute loaders for other types

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{LoadContext, Loader, LoaderFactory, LoaderFactoryContext, definition_field};
use crate::pipeline::{MiddlewareChain, Pipeline};
use crate::plugin::{Plugin, PluginId};
use crate::{Error, Result};

pub const PLUGIN_TYPE: &str = "loader";

/// Registers the loader a plugin's bootstrap produces
///
/// The produced loader is installed for `config.loaderType` and removed
/// again when the plugin unloads, unless something else replaced it in the
/// meantime.
pub struct LoaderPluginLoader {
    pipeline: Arc<Pipeline>,
    middleware: Arc<MiddlewareChain>,
    installed: Mutex<HashMap<PluginId, (String, Arc<dyn Loader>)>>,
}

impl LoaderPluginLoader {
    #[must_use]
    pub fn new(pipeline: Arc<Pipeline>, middleware: Arc<MiddlewareChain>) -> Self {
        Self {
            pipeline,
            middleware,
            installed: Mutex::new(HashMap::new()),
        }
    }

    fn installed(&self) -> std::sync::MutexGuard<'_, HashMap<PluginId, (String, Arc<dyn Loader>)>> {
        self.installed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl Loader for LoaderPluginLoader {
    fn name(&self) -> &str {
        PLUGIN_TYPE
    }

    fn generate_minimum_config(&self, plugin: &Plugin) -> Value {
        json!({
            "loaderType": definition_field(plugin, "loaderType", Value::String(plugin.name().to_string())),
        })
    }

    async fn load(&self, plugin: &Arc<Plugin>, config: &Value, ctx: &LoadContext) -> Result<()> {
        let loader_type = config
            .get("loaderType")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                Error::loader(format!("plugin {}: config.loaderType is required", plugin.name()))
            })?
            .to_string();
        if loader_type == PLUGIN_TYPE {
            return Err(Error::loader(format!(
                "plugin {}: cannot replace the {PLUGIN_TYPE} loader",
                plugin.name()
            )));
        }

        let bootstrap = plugin.load_bootstrap(ctx.resolver.as_ref())?;
        let factory = bootstrap.get::<LoaderFactory>().ok_or_else(|| Error::Bootstrap {
            plugin: plugin.name().to_string(),
            reason: format!("export {} is not a loader factory", bootstrap.locator.export),
        })?;
        let loader = factory(&LoaderFactoryContext {
            plugin,
            config,
            pipeline: &self.pipeline,
            middleware: &self.middleware,
        })?;

        let previous = self
            .installed()
            .insert(plugin.id(), (loader_type.clone(), Arc::clone(&loader)));
        if let Some((previous_type, previous_loader)) = previous
            && previous_type != loader_type
        {
            ctx.registry.unregister_loader(&previous_type, &previous_loader);
        }

        tracing::info!(plugin = %plugin.name(), loader_type = %loader_type, "registering plugin loader");
        ctx.registry.register_loader(&loader_type, loader).await;
        Ok(())
    }

    async fn unload(&self, plugin: &Arc<Plugin>, ctx: &LoadContext) -> Result<()> {
        let removed = self.installed().remove(&plugin.id());
        if let Some((loader_type, loader)) = removed {
            ctx.registry.unregister_loader(&loader_type, &loader);
        }
        Ok(())
    }
}

impl std::fmt::Debug for LoaderPluginLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let installed: Vec<String> = self.installed().values().map(|(t, _)| t.clone()).collect();
        f.debug_struct("LoaderPluginLoader")
            .field("installed", &installed)
            .finish_non_exhaustive()
    }
}
