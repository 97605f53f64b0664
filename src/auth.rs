//! Bearer-token authentication
//!
//! Every `/api/v1` endpoint except the resumable-upload protocol requires
//! `Authorization: Bearer {API_KEY}`. The TUS routes are guarded by their
//! session preconditions instead (a valid upload id minted at session
//! creation).

use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use common::response::ApiError;
use std::sync::Arc;

pub async fn require_bearer(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match token {
        Some(token) if token == state.config.api_key => Ok(next.run(request).await),
        _ => Err(ApiError::Unauthorized),
    }
}
