use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use subtle::ConstantTimeEq;

use super::{error, status::model_config_map};
use crate::server::AppState;

#[derive(Clone)]
pub struct AdminAuth {
    pub api_key: Option<String>,
}

/// Bearer check for admin routes. Open when no key is configured.
pub async fn admin_auth_middleware(
    State(auth): State<AdminAuth>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if let Some(expected) = &auth.api_key {
        let token = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "));

        let authorized = match token {
            Some(token) => {
                token.len() == expected.len()
                    && token.as_bytes().ct_eq(expected.as_bytes()).unwrap_u8() == 1
            }
            None => false,
        };
        if !authorized {
            return error::unauthorized("invalid_admin_key", "Missing or invalid admin API key");
        }
    }

    next.run(request).await
}

/// Re-read provider credentials and publish a new table.
pub async fn reload_model_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let version = state.providers.reload();
    Json(json!({
        "version": version,
        "models": model_config_map(&state),
    }))
}
