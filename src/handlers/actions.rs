use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::action::{ActionOutcome, ActionResponse, CooldownState, PowerAction};
use crate::models::user::Claims;
use crate::services::aggregator::AggregationResult;
use crate::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct StatusReport {
    pub message: String,
    pub host_online: bool,
    pub cooldown: CooldownState,
    pub activity: AggregationResult,
}

fn parse_action(raw: &str) -> Result<PowerAction, ApiError> {
    raw.parse::<PowerAction>().map_err(ApiError::BadRequest)
}

fn respond(outcome: ActionOutcome) -> Response {
    let status = match outcome {
        ActionOutcome::AwaitingConfirmation(_) => StatusCode::ACCEPTED,
        _ => StatusCode::OK,
    };
    (status, Json(ActionResponse::from(outcome))).into_response()
}

#[utoipa::path(
    post,
    path = "/api/actions/{action}",
    params(
        ("action" = String, Path, description = "boot, shutdown or reboot")
    ),
    responses(
        (status = 200, description = "Executed, on cooldown, or refused because players are online", body = ActionResponse),
        (status = 202, description = "Elevated caller on cooldown, confirmation prompt issued", body = ActionResponse),
        (status = 403, description = "Missing role"),
        (status = 502, description = "Power endpoint failed")
    ),
    security(
        ("jwt" = [])
    )
)]
pub async fn run_action(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<Claims>,
    Path(action): Path<String>,
) -> Result<Response, ApiError> {
    let action = parse_action(&action)?;
    let outcome = state.gatekeeper.request(&user, action).await?;
    Ok(respond(outcome))
}

#[utoipa::path(
    post,
    path = "/api/actions/{action}/override",
    params(
        ("action" = String, Path, description = "boot, shutdown or reboot")
    ),
    responses(
        (status = 202, description = "Confirmation prompt issued", body = ActionResponse),
        (status = 403, description = "Missing elevated role"),
        (status = 409, description = "Another override is awaiting confirmation")
    ),
    security(
        ("jwt" = [])
    )
)]
pub async fn override_action(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<Claims>,
    Path(action): Path<String>,
) -> Result<Response, ApiError> {
    let action = parse_action(&action)?;
    let outcome = state.gatekeeper.request_override(&user, action).await?;
    Ok(respond(outcome))
}

#[utoipa::path(
    post,
    path = "/api/overrides/{id}/confirm",
    params(
        ("id" = Uuid, Path, description = "Prompt id returned by the override request")
    ),
    responses(
        (status = 200, description = "Override executed", body = ActionResponse),
        (status = 403, description = "Only the requester may confirm"),
        (status = 410, description = "Prompt expired or unknown"),
        (status = 502, description = "Power endpoint failed")
    ),
    security(
        ("jwt" = [])
    )
)]
pub async fn confirm_override(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let outcome = state.gatekeeper.confirm_override(id, &user).await?;
    Ok(respond(outcome))
}

#[utoipa::path(
    get,
    path = "/api/status",
    responses(
        (status = 200, description = "Host liveness, player activity and cooldown", body = StatusReport)
    ),
    security(
        ("jwt" = [])
    )
)]
pub async fn status(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<Claims>,
) -> impl IntoResponse {
    let (host_online, activity, cooldown) = tokio::join!(
        state.gatekeeper.host_status(),
        state.aggregator.is_anyone_active(),
        state.gatekeeper.cooldown_state(&user.guild),
    );

    let message = if host_online { "Server is up!" } else { "Server is offline" };
    let report = StatusReport {
        message: message.to_string(),
        host_online,
        cooldown,
        activity,
    };

    (StatusCode::OK, Json(report))
}
