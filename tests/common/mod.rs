//! Shared test utilities

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use omni_plugin_host::config::RootFolder;
use omni_plugin_host::{HostConfig, LoadContext, Loader, Plugin, PluginHost, PluginStatus};
use serde_json::{Value, json};
use tower::ServiceExt;

/// Write `<root>/<dir>/package.json` listing `plugins`, returning the folder
pub fn write_package(root: &Path, dir: &str, plugins: &Value) -> PathBuf {
    let path = root.join(dir);
    std::fs::create_dir_all(&path).expect("failed to create package dir");
    let manifest = json!({
        "name": dir,
        "version": "1.0.0",
        "omni": { "plugins": plugins },
    });
    std::fs::write(
        path.join("package.json"),
        serde_json::to_string_pretty(&manifest).expect("manifest serializes"),
    )
    .expect("failed to write manifest");
    path
}

/// An endpoint plugin answering `text` at `/name`
pub fn text_endpoint(name: &str, text: &str) -> Value {
    json!({
        "type": "endpoint",
        "name": name,
        "bootstrap": "#text",
        "defaultConfig": { "text": text },
    })
}

/// Config scanning `root` once, without watching
pub fn test_config(root: &Path) -> HostConfig {
    HostConfig {
        roots: vec![RootFolder::new(root, false)],
        ..HostConfig::default()
    }
}

/// Host with reference loaders and a running dispatcher, but no scan
pub async fn test_host(root: &Path) -> PluginHost {
    let host = PluginHost::new(test_config(root));
    host.init().await;
    host
}

/// Status of the plugin called `name`
pub fn status_of(host: &PluginHost, name: &str) -> Option<PluginStatus> {
    host.registry().plugin(name).map(|p| p.status())
}

/// GET `uri` through the host's full router
pub async fn get(host: &PluginHost, uri: &str) -> (StatusCode, String) {
    let router = omni_plugin_host::api::ApiServer::new(host).router();
    let response = router
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

/// Loader that records every call as `"load <name>"` / `"unload <name>"`
#[derive(Default)]
pub struct RecordingLoader {
    calls: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingLoader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A loader whose `load` always fails
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            fail: true,
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }
}

#[async_trait]
impl Loader for RecordingLoader {
    fn name(&self) -> &str {
        "recording"
    }

    fn generate_minimum_config(&self, plugin: &Plugin) -> Value {
        json!({ "name": plugin.name() })
    }

    async fn load(
        &self,
        plugin: &Arc<Plugin>,
        _config: &Value,
        _ctx: &LoadContext,
    ) -> omni_plugin_host::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("load {}", plugin.name()));
        if self.fail {
            return Err(omni_plugin_host::Error::loader("refused"));
        }
        Ok(())
    }

    async fn unload(&self, plugin: &Arc<Plugin>, _ctx: &LoadContext) -> omni_plugin_host::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("unload {}", plugin.name()));
        Ok(())
    }
}
