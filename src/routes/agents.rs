use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use super::error::{bad_request, internal_error};
use crate::{
    agents::{AgentPayload, AgentStoreError},
    server::AppState,
};

pub async fn save_agent(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    payload: Result<Json<AgentPayload>, JsonRejection>,
) -> Response {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return bad_request("invalid_agent_config", rejection.body_text());
        }
    };

    match state.agents.save(&user_id, payload).await {
        Ok(_) => Json(json!({ "success": true })).into_response(),
        Err(e) => store_error(&user_id, e),
    }
}

pub async fn list_agents(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Response {
    match state.agents.list_for_user(&user_id).await {
        Ok(agents) => Json(json!({ "agents": agents })).into_response(),
        Err(e) => store_error(&user_id, e),
    }
}

fn store_error(user_id: &str, err: AgentStoreError) -> Response {
    match err {
        AgentStoreError::InvalidUserId(_) => bad_request("invalid_user_id", err.to_string()),
        other => {
            error!(user_id, error = %other, "Agent store failure");
            internal_error("agent_store_error", "Failed to access AI agent store")
        }
    }
}
