//! `endpoint` loader: one request handler mounted at a path

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{LoadContext, Loader, default_mount_path, definition_field, mount_path, resolve_handler};
use crate::Result;
use crate::pipeline::Pipeline;
use crate::plugin::Plugin;

pub const PLUGIN_TYPE: &str = "endpoint";

/// Mounts each plugin's handler into a hot-swap slot
///
/// Reloading with the same path re-points the slot; a changed path
/// unmounts the old one first.
#[derive(Debug)]
pub struct EndpointLoader {
    pipeline: Arc<Pipeline>,
}

impl EndpointLoader {
    #[must_use]
    pub const fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }

    fn owner(plugin: &Plugin) -> String {
        format!("{PLUGIN_TYPE}:{}", plugin.name())
    }
}

#[async_trait]
impl Loader for EndpointLoader {
    fn name(&self) -> &str {
        PLUGIN_TYPE
    }

    fn generate_minimum_config(&self, plugin: &Plugin) -> Value {
        json!({
            "path": definition_field(plugin, "path", Value::String(default_mount_path(plugin))),
        })
    }

    async fn load(&self, plugin: &Arc<Plugin>, config: &Value, ctx: &LoadContext) -> Result<()> {
        let path = mount_path(plugin, config)?;
        let handler = resolve_handler(plugin, config, ctx)?;
        self.pipeline.mount(&Self::owner(plugin), &path, handler);
        tracing::debug!(plugin = %plugin.name(), path = %path, "endpoint mounted");
        Ok(())
    }

    async fn unload(&self, plugin: &Arc<Plugin>, _ctx: &LoadContext) -> Result<()> {
        if self.pipeline.unmount(&Self::owner(plugin)) {
            tracing::debug!(plugin = %plugin.name(), "endpoint unmounted");
        }
        Ok(())
    }
}
