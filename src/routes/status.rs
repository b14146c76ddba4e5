//! Health, status and model configuration endpoints.

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, Json};
use chrono::Utc;
use serde_json::{json, Map, Value};

use crate::server::AppState;

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
        "connections": state.manager.client_count(),
    }))
}

pub async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let table = state.providers.all_configs();
    let models: Vec<Value> = table
        .configs
        .iter()
        .map(|(name, config)| json!({ "name": name, "config": config.as_ref() }))
        .collect();

    Json(json!({
        "server": {
            "uptime": state.started_at.elapsed().as_secs_f64(),
            "timestamp": Utc::now().to_rfc3339(),
            "connections": state.manager.client_count(),
            "totalConnections": state.manager.total_connections(),
        },
        "sessions": state.sessions.stats(),
        "queue": state.manager.queue_load(),
        "providers": { "version": table.version },
        "models": models,
    }))
}

pub async fn client_count(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "count": state.manager.client_count() }))
}

/// Public subset of the provider table.
pub(crate) fn model_config_map(state: &AppState) -> Map<String, Value> {
    state
        .providers
        .all_configs()
        .configs
        .iter()
        .map(|(name, config)| {
            (
                name.clone(),
                json!({
                    "maxTokens": config.max_tokens,
                    "temperatureRange": config.temperature_range,
                }),
            )
        })
        .collect()
}

pub async fn model_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "modelConfigs": model_config_map(&state) }))
}
