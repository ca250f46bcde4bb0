use axum::{
    extract::{Extension, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::sync::Arc;

use crate::models::user::Claims;
use crate::AppState;

#[utoipa::path(
    get,
    path = "/api/auth/me",
    responses(
        (status = 200, description = "Caller identity and what it may do")
    ),
    security(
        ("jwt" = [])
    )
)]
pub async fn me(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<Claims>,
) -> impl IntoResponse {
    let elevated = state.gatekeeper.is_elevated(&user);
    (StatusCode::OK, Json(json!({ "user": user, "elevated": elevated })))
}
