//! `static` loader: a package folder served under a mount path

use std::convert::Infallible;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{StatusCode, Uri};
use serde_json::{Value, json};
use tower::{Service, ServiceExt};
use tower_http::services::ServeDir;
use tower_http::services::fs::ServeFileSystemResponseBody;

use super::{LoadContext, Loader, default_mount_path, definition_field, mount_path};
use crate::pipeline::{Next, Pipeline, Request, RequestHandler, Response};
use crate::plugin::Plugin;
use crate::{Error, Result};

pub const PLUGIN_TYPE: &str = "static";

/// Serves files from a package folder
#[derive(Debug)]
pub struct StaticLoader {
    pipeline: Arc<Pipeline>,
}

impl StaticLoader {
    #[must_use]
    pub const fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }

    fn owner(plugin: &Plugin) -> String {
        format!("{PLUGIN_TYPE}:{}", plugin.name())
    }
}

#[async_trait]
impl Loader for StaticLoader {
    fn name(&self) -> &str {
        PLUGIN_TYPE
    }

    fn generate_minimum_config(&self, plugin: &Plugin) -> Value {
        json!({
            "path": definition_field(plugin, "path", Value::String(default_mount_path(plugin))),
            "dir": definition_field(plugin, "dir", Value::String(".".to_string())),
        })
    }

    async fn load(&self, plugin: &Arc<Plugin>, config: &Value, _ctx: &LoadContext) -> Result<()> {
        let path = mount_path(plugin, config)?;
        let dir = config.get("dir").and_then(Value::as_str).unwrap_or(".");
        let root = package_subdir(plugin.package_path(), dir).ok_or_else(|| {
            Error::loader(format!("plugin {}: dir {dir} escapes the package", plugin.name()))
        })?;

        if !tokio::fs::metadata(&root).await.is_ok_and(|m| m.is_dir()) {
            return Err(Error::loader(format!(
                "plugin {}: {} is not a directory",
                plugin.name(),
                root.display()
            )));
        }

        tracing::debug!(plugin = %plugin.name(), path = %path, dir = %root.display(), "serving static files");
        let handler = StaticFiles {
            prefix: path.clone(),
            serve: ServeDir::new(root),
        };
        self.pipeline
            .mount(&Self::owner(plugin), &path, Arc::new(handler));
        Ok(())
    }

    async fn unload(&self, plugin: &Arc<Plugin>, _ctx: &LoadContext) -> Result<()> {
        self.pipeline.unmount(&Self::owner(plugin));
        Ok(())
    }
}

/// Join a relative folder onto the package root, refusing to leave it
fn package_subdir(package: &Path, dir: &str) -> Option<PathBuf> {
    let relative = Path::new(dir);
    relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        .then(|| package.join(relative))
}

struct StaticFiles {
    prefix: String,
    serve: ServeDir,
}

#[async_trait]
impl RequestHandler for StaticFiles {
    async fn handle(&self, request: Request, next: Next) -> Response {
        let Some(uri) = strip_prefix(request.uri(), &self.prefix) else {
            return next.run(request).await;
        };
        serve_or_next(self.serve.clone(), request, uri, next).await
    }
}

/// Rewrite a request URI relative to a mount prefix
fn strip_prefix(uri: &Uri, prefix: &str) -> Option<Uri> {
    let rest = uri.path().strip_prefix(prefix.trim_end_matches('/'))?;
    let path = if rest.is_empty() { "/" } else { rest };
    let rewritten = match uri.query() {
        Some(query) => format!("{path}?{query}"),
        None => path.to_string(),
    };
    rewritten.parse().ok()
}

/// Answer from a file service, passing the original request on when it 404s
pub(crate) async fn serve_or_next<S>(service: S, request: Request, uri: Uri, next: Next) -> Response
where
    S: Service<
            axum::http::Request<Body>,
            Response = axum::http::Response<ServeFileSystemResponseBody>,
            Error = Infallible,
        >,
{
    let (parts, body) = request.into_parts();

    let mut probe = axum::http::Request::new(Body::empty());
    *probe.method_mut() = parts.method.clone();
    *probe.uri_mut() = uri;
    *probe.headers_mut() = parts.headers.clone();

    let response = match service.oneshot(probe).await {
        Ok(response) => response,
        Err(never) => match never {},
    };

    if response.status() == StatusCode::NOT_FOUND {
        return next.run(Request::from_parts(parts, body)).await;
    }
    response.map(Body::new)
}
