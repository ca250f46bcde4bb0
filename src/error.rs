use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::models::action::PowerAction;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Server name '{0}' is already taken")]
    DuplicateName(String),

    #[error("Server '{0}' not found")]
    NotFound(String),

    #[error("Registry storage error: {0}")]
    Storage(String),
}

/// A single game-server query that could not produce a player count.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("Invalid query target: {0}")]
    InvalidTarget(String),

    #[error("Connection failed: {0}")]
    Transport(String),

    #[error("Query timed out")]
    Timeout,

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Server returned an error: {0}")]
    ErrorResponse(String),
}

impl From<std::io::Error> for QueryError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::UnexpectedEof => QueryError::Malformed("truncated packet".to_string()),
            _ => QueryError::Transport(e.to_string()),
        }
    }
}

/// A power endpoint call that did not succeed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActionError {
    #[error("Power endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("Power endpoint answered with status {0}")]
    Status(u16),

    #[error("Power endpoint sent an unreadable acknowledgement: {0}")]
    MalformedAck(String),

    #[error("Power endpoint refused the request")]
    Rejected,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GateError {
    #[error("Missing the required role for `/{0}`")]
    Forbidden(String),

    #[error("`/{action}` failed: {source}")]
    ActionFailed {
        action: PowerAction,
        #[source]
        source: ActionError,
    },

    #[error("An override is already waiting for confirmation")]
    OverridePending,

    #[error("Override prompt expired or does not exist")]
    OverrideExpired,

    #[error("Only the user who requested the override can confirm it")]
    NotRequester,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error type returned by the HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Gate(#[from] GateError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),
}

const INTERNAL_MESSAGE: &str = "Something went wrong, have an adult check the logs";

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Registry(RegistryError::Validation(_)) => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::Registry(RegistryError::DuplicateName(_)) => (StatusCode::CONFLICT, self.to_string()),
            ApiError::Registry(RegistryError::NotFound(_)) => (StatusCode::NOT_FOUND, self.to_string()),
            ApiError::Registry(RegistryError::Storage(e)) => {
                tracing::error!("Registry storage failure: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_MESSAGE.to_string())
            }
            ApiError::Query(e) => (StatusCode::BAD_GATEWAY, format!("Server query failed: {}", e)),
            ApiError::Gate(GateError::Forbidden(_)) => (StatusCode::FORBIDDEN, self.to_string()),
            ApiError::Gate(GateError::ActionFailed { action, .. }) => {
                (StatusCode::BAD_GATEWAY, action.failure_message().to_string())
            }
            ApiError::Gate(GateError::OverridePending) => (StatusCode::CONFLICT, self.to_string()),
            ApiError::Gate(GateError::OverrideExpired) => (StatusCode::GONE, self.to_string()),
            ApiError::Gate(GateError::NotRequester) => (StatusCode::FORBIDDEN, self.to_string()),
            ApiError::Gate(GateError::Internal(e)) => {
                tracing::error!("Gatekeeper internal error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_MESSAGE.to_string())
            }
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ApiError::Forbidden(m) => (StatusCode::FORBIDDEN, m.clone()),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
