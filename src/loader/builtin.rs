//! Compiled-in bootstrap exports
//!
//! | export      | kind    | config                             |
//! |-------------|---------|------------------------------------|
//! | `file`      | handler | none; serves the referenced file   |
//! | `json`      | handler | `body`, optional `status`          |
//! | `text`      | handler | `text`, optional `status`          |
//! | `header`    | handler | `name`, `value` (middleware)       |
//! | `endpoints` | loader  | none; builds an endpoint loader    |

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Json;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use serde_json::Value;
use tower_http::services::ServeFile;

use super::static_files::serve_or_next;
use super::{EndpointLoader, HandlerContext, handler_factory, loader_factory};
use crate::pipeline::{Next, Request, RequestHandler, Response};
use crate::plugin::ExportTable;
use crate::{Error, Result};

impl ExportTable {
    /// Table preloaded with the built-in exports
    #[must_use]
    pub fn with_builtins() -> Self {
        Self::new()
            .with("file", handler_factory(file))
            .with("json", handler_factory(json))
            .with("text", handler_factory(text))
            .with("header", handler_factory(header))
            .with(
                "endpoints",
                loader_factory(|ctx| Ok(Arc::new(EndpointLoader::new(Arc::clone(ctx.pipeline))))),
            )
    }
}

fn config_error(ctx: &HandlerContext<'_>, message: &str) -> Error {
    Error::loader(format!("plugin {}: {message}", ctx.plugin.name()))
}

fn status(ctx: &HandlerContext<'_>) -> Result<StatusCode> {
    match ctx.config.get("status") {
        None | Some(Value::Null) => Ok(StatusCode::OK),
        Some(value) => value
            .as_u64()
            .and_then(|code| u16::try_from(code).ok())
            .and_then(|code| StatusCode::from_u16(code).ok())
            .ok_or_else(|| config_error(ctx, &format!("invalid status {value}"))),
    }
}

fn file(ctx: &HandlerContext<'_>) -> Result<Arc<dyn RequestHandler>> {
    let path = ctx
        .bootstrap
        .locator
        .file
        .clone()
        .ok_or_else(|| config_error(ctx, "the file export needs a file in its bootstrap reference"))?;
    Ok(Arc::new(FileResponder { path }))
}

fn json(ctx: &HandlerContext<'_>) -> Result<Arc<dyn RequestHandler>> {
    Ok(Arc::new(JsonResponder {
        status: status(ctx)?,
        body: ctx.config.get("body").cloned().unwrap_or(Value::Null),
    }))
}

fn text(ctx: &HandlerContext<'_>) -> Result<Arc<dyn RequestHandler>> {
    let text = ctx
        .config
        .get("text")
        .and_then(Value::as_str)
        .ok_or_else(|| config_error(ctx, "config.text must be a string"))?;
    Ok(Arc::new(TextResponder {
        status: status(ctx)?,
        text: text.to_string(),
    }))
}

fn header(ctx: &HandlerContext<'_>) -> Result<Arc<dyn RequestHandler>> {
    let name = ctx
        .config
        .get("name")
        .and_then(Value::as_str)
        .and_then(|name| HeaderName::try_from(name).ok())
        .ok_or_else(|| config_error(ctx, "config.name must be a valid header name"))?;
    let value = ctx
        .config
        .get("value")
        .and_then(Value::as_str)
        .and_then(|value| HeaderValue::try_from(value).ok())
        .ok_or_else(|| config_error(ctx, "config.value must be a valid header value"))?;
    Ok(Arc::new(HeaderMiddleware { name, value }))
}

struct FileResponder {
    path: PathBuf,
}

#[async_trait]
impl RequestHandler for FileResponder {
    async fn handle(&self, request: Request, next: Next) -> Response {
        let uri = request.uri().clone();
        serve_or_next(ServeFile::new(&self.path), request, uri, next).await
    }
}

struct JsonResponder {
    status: StatusCode,
    body: Value,
}

#[async_trait]
impl RequestHandler for JsonResponder {
    async fn handle(&self, _request: Request, _next: Next) -> Response {
        (self.status, Json(self.body.clone())).into_response()
    }
}

struct TextResponder {
    status: StatusCode,
    text: String,
}

#[async_trait]
impl RequestHandler for TextResponder {
    async fn handle(&self, _request: Request, _next: Next) -> Response {
        (self.status, self.text.clone()).into_response()
    }
}

/// Adds a fixed header to every response that passes through
struct HeaderMiddleware {
    name: HeaderName,
    value: HeaderValue,
}

#[async_trait]
impl RequestHandler for HeaderMiddleware {
    async fn handle(&self, request: Request, next: Next) -> Response {
        let mut response = next.run(request).await;
        response
            .headers_mut()
            .insert(self.name.clone(), self.value.clone());
        response
    }
}
