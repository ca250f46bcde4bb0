use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;

use crate::error::{ApiError, RegistryError};
use crate::models::server::{
    CreateServerRequest, PlayerCounts, PlayerInfo, ServerDetails, ServerRecord, UpdateServerRequest,
};
use crate::models::user::Claims;
use crate::services::aggregator::AggregationResult;
use crate::AppState;

fn require_elevated(state: &AppState, user: &Claims, what: &str) -> Result<(), ApiError> {
    if state.gatekeeper.is_elevated(user) {
        Ok(())
    } else {
        tracing::warn!("{} tried to {} without the elevated role", user.sub, what);
        Err(ApiError::Forbidden(format!("You are not allowed to {}", what)))
    }
}

// --- Registry ---

#[utoipa::path(
    get,
    path = "/api/servers",
    responses(
        (status = 200, description = "Registered servers in insertion order", body = Vec<ServerRecord>)
    ),
    security(
        ("jwt" = [])
    )
)]
pub async fn list_servers(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.registry.list().await))
}

#[utoipa::path(
    get,
    path = "/api/servers/{name}",
    params(
        ("name" = String, Path, description = "Server name")
    ),
    responses(
        (status = 200, description = "Server record", body = ServerRecord),
        (status = 404, description = "Server not found")
    ),
    security(
        ("jwt" = [])
    )
)]
pub async fn get_server(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    match state.registry.get(&name).await {
        Some(record) => Ok((StatusCode::OK, Json(record)).into_response()),
        None => Err(RegistryError::NotFound(name).into()),
    }
}

#[utoipa::path(
    post,
    path = "/api/servers",
    request_body = CreateServerRequest,
    responses(
        (status = 201, description = "Server added", body = ServerRecord),
        (status = 400, description = "Invalid address, port or type"),
        (status = 409, description = "Name already registered")
    ),
    security(
        ("jwt" = [])
    )
)]
pub async fn create_server(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<Claims>,
    Json(payload): Json<CreateServerRequest>,
) -> Result<Response, ApiError> {
    require_elevated(&state, &user, "add servers")?;

    let record = state
        .registry
        .add(
            &payload.name,
            &payload.ip_address,
            payload.port,
            &payload.server_type,
            payload.password.as_deref().unwrap_or_default(),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(record)).into_response())
}

#[utoipa::path(
    put,
    path = "/api/servers/{name}",
    params(
        ("name" = String, Path, description = "Server name")
    ),
    request_body = UpdateServerRequest,
    responses(
        (status = 200, description = "Server updated", body = ServerRecord),
        (status = 400, description = "Invalid address, port or type"),
        (status = 404, description = "Server not found")
    ),
    security(
        ("jwt" = [])
    )
)]
pub async fn update_server(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<Claims>,
    Path(name): Path<String>,
    Json(payload): Json<UpdateServerRequest>,
) -> Result<Response, ApiError> {
    require_elevated(&state, &user, "edit servers")?;

    let record = state
        .registry
        .update(
            &name,
            &payload.ip_address,
            payload.port,
            &payload.server_type,
            payload.password.as_deref().unwrap_or_default(),
        )
        .await?;

    Ok((StatusCode::OK, Json(record)).into_response())
}

#[utoipa::path(
    delete,
    path = "/api/servers/{name}",
    params(
        ("name" = String, Path, description = "Server name, or * to clear the registry")
    ),
    responses(
        (status = 200, description = "Removed servers", body = Vec<ServerRecord>),
        (status = 404, description = "Server not found")
    ),
    security(
        ("jwt" = [])
    )
)]
pub async fn delete_server(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<Claims>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    require_elevated(&state, &user, "remove servers")?;

    let removed = state.registry.delete(&name).await?;
    Ok((StatusCode::OK, Json(removed)).into_response())
}

#[utoipa::path(
    post,
    path = "/api/registry/save",
    responses(
        (status = 200, description = "Registry written to disk"),
        (status = 500, description = "Could not write the registry file")
    ),
    security(
        ("jwt" = [])
    )
)]
pub async fn save_registry(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<Claims>,
) -> Result<Response, ApiError> {
    require_elevated(&state, &user, "save the registry")?;

    let count = state.registry.save().await?;
    Ok((StatusCode::OK, Json(json!({ "msg": format!("Saved {} servers", count), "count": count }))).into_response())
}

#[utoipa::path(
    post,
    path = "/api/registry/load",
    responses(
        (status = 200, description = "Registry merged from disk"),
        (status = 400, description = "File contains an invalid entry"),
        (status = 500, description = "Could not read the registry file")
    ),
    security(
        ("jwt" = [])
    )
)]
pub async fn load_registry(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<Claims>,
) -> Result<Response, ApiError> {
    require_elevated(&state, &user, "load the registry")?;

    let count = state.registry.load().await?;
    Ok((StatusCode::OK, Json(json!({ "msg": format!("Loaded {} servers", count), "count": count }))).into_response())
}

#[utoipa::path(
    get,
    path = "/api/registry/activity",
    responses(
        (status = 200, description = "Whether anybody is playing on any registered server", body = AggregationResult)
    ),
    security(
        ("jwt" = [])
    )
)]
pub async fn registry_activity(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.aggregator.is_anyone_active().await))
}

// --- Single server queries ---

#[utoipa::path(
    get,
    path = "/api/servers/{name}/players",
    params(
        ("name" = String, Path, description = "Server name")
    ),
    responses(
        (status = 200, description = "Player counts", body = PlayerCounts),
        (status = 404, description = "Server not found"),
        (status = 502, description = "Server did not answer")
    ),
    security(
        ("jwt" = [])
    )
)]
pub async fn get_server_players(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let counts = state.aggregator.server_players(&name).await?;
    let players: Vec<PlayerInfo> = state.aggregator.player_details(&name).await.unwrap_or_else(|e| {
        tracing::debug!("No player list for '{}': {}", name, e);
        Vec::new()
    });

    Ok((StatusCode::OK, Json(json!({ "counts": counts, "players": players }))).into_response())
}

#[utoipa::path(
    get,
    path = "/api/servers/{name}/details",
    params(
        ("name" = String, Path, description = "Server name")
    ),
    responses(
        (status = 200, description = "Server details", body = ServerDetails),
        (status = 404, description = "Server not found"),
        (status = 502, description = "Server did not answer")
    ),
    security(
        ("jwt" = [])
    )
)]
pub async fn get_server_details(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let details = state.aggregator.server_details(&name).await?;
    Ok((StatusCode::OK, Json(details)).into_response())
}
