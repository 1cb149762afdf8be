//! Loader endpoints

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use super::ApiState;

/// Registered loader types and the plugins still waiting on something
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadersResponse {
    pub types: Vec<String>,
    pub no_loader: Vec<String>,
    pub unmet_requirements: Vec<String>,
}

/// Build loader routes
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/", get(list_loaders))
        .with_state(state)
}

async fn list_loaders(State(state): State<Arc<ApiState>>) -> Json<LoadersResponse> {
    Json(LoadersResponse {
        types: state.registry.loader_types(),
        no_loader: state.registry.plugins_with_no_loader(),
        unmet_requirements: state.registry.plugins_with_unmet_requirements(),
    })
}
