//! Plugin and package inspection endpoints

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};

use super::ApiState;
use crate::package::PackageInfo;
use crate::plugin::PluginInfo;

/// Build plugin routes
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/", get(list_plugins))
        .route("/{name}", get(get_plugin))
        .with_state(state)
}

/// Build package routes
pub fn packages_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/", get(list_packages))
        .with_state(state)
}

/// List every tracked plugin
async fn list_plugins(State(state): State<Arc<ApiState>>) -> Json<Vec<PluginInfo>> {
    Json(state.registry.plugins())
}

/// Get one plugin by name, preferring the loaded instance
async fn get_plugin(
    State(state): State<Arc<ApiState>>,
    Path(name): Path<String>,
) -> Result<Json<PluginInfo>, StatusCode> {
    state
        .registry
        .plugin(&name)
        .map(|plugin| Json(plugin.info()))
        .ok_or(StatusCode::NOT_FOUND)
}

async fn list_packages(State(state): State<Arc<ApiState>>) -> Json<Vec<PackageInfo>> {
    Json(state.registry.packages())
}
