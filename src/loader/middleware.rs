//! `middleware` loader: handlers in the ordered middleware chain

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{LoadContext, Loader, definition_field, resolve_handler};
use crate::pipeline::MiddlewareChain;
use crate::plugin::Plugin;
use crate::{Error, Result};

pub const PLUGIN_TYPE: &str = "middleware";

/// Installs plugin handlers into a [`MiddlewareChain`] by plugin name
#[derive(Debug)]
pub struct MiddlewareLoader {
    chain: Arc<MiddlewareChain>,
}

impl MiddlewareLoader {
    #[must_use]
    pub const fn new(chain: Arc<MiddlewareChain>) -> Self {
        Self { chain }
    }
}

#[async_trait]
impl Loader for MiddlewareLoader {
    fn name(&self) -> &str {
        PLUGIN_TYPE
    }

    fn generate_minimum_config(&self, plugin: &Plugin) -> Value {
        json!({ "order": definition_field(plugin, "order", Value::from(0)) })
    }

    async fn load(&self, plugin: &Arc<Plugin>, config: &Value, ctx: &LoadContext) -> Result<()> {
        let order = match config.get("order") {
            None | Some(Value::Null) => 0,
            Some(value) => value.as_i64().ok_or_else(|| {
                Error::loader(format!(
                    "plugin {}: order must be an integer, got {value}",
                    plugin.name()
                ))
            })?,
        };
        let handler = resolve_handler(plugin, config, ctx)?;
        self.chain.insert(plugin.name(), order, handler);
        tracing::debug!(plugin = %plugin.name(), order, "middleware installed");
        Ok(())
    }

    async fn unload(&self, plugin: &Arc<Plugin>, _ctx: &LoadContext) -> Result<()> {
        self.chain.remove(plugin.name());
        Ok(())
    }
}
