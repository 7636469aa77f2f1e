use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::models::trip::TripStatus;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
    #[error("illegal transition: {action} is not allowed while {from}")]
    IllegalTransition { from: String, action: &'static str },
    #[error("trip already assigned to another driver")]
    AlreadyAssigned,
    #[error("invalid location: {0}")]
    InvalidLocation(String),
    #[error("promo rejected: {0}")]
    PromoInvalid(String),
    #[error("split mismatch: {0}")]
    SplitMismatch(String),
    #[error("split already has paid participants")]
    SplitAlreadySettled,
    #[error("session superseded by a newer connection")]
    SessionSuperseded,
    #[error("session is not subscribed to trip")]
    NotSubscribed,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
}

impl AppError {
    pub fn illegal(from: TripStatus, action: &'static str) -> Self {
        AppError::IllegalTransition {
            from: from.to_string(),
            action,
        }
    }

    pub fn illegal_state(from: impl Into<String>, action: &'static str) -> Self {
        AppError::IllegalTransition {
            from: from.into(),
            action,
        }
    }

    /// Stable machine-readable kind, used in HTTP bodies and websocket error frames.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config",
            AppError::Io(_) => "io",
            AppError::Database(_) | AppError::Migration(_) => "database",
            AppError::Other(_) => "internal",
            AppError::IllegalTransition { .. } => "illegal_transition",
            AppError::AlreadyAssigned => "already_assigned",
            AppError::InvalidLocation(_) => "invalid_location",
            AppError::PromoInvalid(_) => "promo_invalid",
            AppError::SplitMismatch(_) => "split_mismatch",
            AppError::SplitAlreadySettled => "split_already_settled",
            AppError::SessionSuperseded => "session_superseded",
            AppError::NotSubscribed => "not_subscribed",
            AppError::BadRequest(_) => "bad_request",
            AppError::NotFound => "not_found",
            AppError::Unauthorized => "unauthorized",
            AppError::Forbidden => "forbidden",
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Other(err.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::Config(_)
            | AppError::Io(_)
            | AppError::Database(_)
            | AppError::Migration(_)
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::IllegalTransition { .. }
            | AppError::AlreadyAssigned
            | AppError::SplitAlreadySettled
            | AppError::SessionSuperseded => StatusCode::CONFLICT,
            AppError::InvalidLocation(_)
            | AppError::PromoInvalid(_)
            | AppError::SplitMismatch(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::NotSubscribed | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = Json(json!({ "error": self.kind(), "message": self.to_string() }));
        (status, body).into_response()
    }
}
