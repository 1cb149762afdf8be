//! HTTP surface of the plugin host
//!
//! Admin routes live under `/api`; every other request falls through to the
//! hot-swap pipeline, where plugin-mounted handlers answer it.

pub mod health;
pub mod loaders;
pub mod plugins;

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use axum::extract::Request;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::Result;
use crate::host::PluginHost;
use crate::pipeline::{MiddlewareChain, Pipeline};
use crate::registry::Registry;

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub registry: Registry,
    pub pipeline: Arc<Pipeline>,
    pub middleware: Arc<MiddlewareChain>,
}

impl ApiState {
    /// State backed by a host's live components
    #[must_use]
    pub fn from_host(host: &PluginHost) -> Self {
        Self {
            registry: host.registry().clone(),
            pipeline: Arc::clone(host.pipeline()),
            middleware: Arc::clone(host.middleware()),
        }
    }
}

/// Build the full router: admin API, health, then the plugin pipeline
pub fn router(state: ApiState) -> Router {
    let state = Arc::new(state);
    let pipeline = Arc::clone(&state.pipeline);

    let router = Router::new()
        .nest("/api/plugins", plugins::router(state.clone()))
        .nest("/api/packages", plugins::packages_router(state.clone()))
        .nest("/api/loaders", loaders::router(state.clone()))
        .merge(health::router())
        .merge(health::status_router(state))
        .fallback(move |request: Request| pipeline.dispatch(request));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    router.layer(cors).layer(TraceLayer::new_for_http())
}

/// HTTP server for a plugin host
pub struct ApiServer {
    state: ApiState,
    bind: String,
    port: u16,
}

impl ApiServer {
    #[must_use]
    pub fn new(host: &PluginHost) -> Self {
        Self {
            state: ApiState::from_host(host),
            bind: host.config().server.bind.clone(),
            port: host.config().server.port,
        }
    }

    /// Override the listen port
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Serve until `shutdown` resolves
    ///
    /// # Errors
    ///
    /// Returns error if the listener cannot be bound or the server fails
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = format!("{}:{}", self.bind, self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(addr = %addr, "API server listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }
}
