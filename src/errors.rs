use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::models::{Period, TransitionError};
use crate::services::payment::GatewayError;
use crate::services::validator::ReservationError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("period already booked")]
    Conflict { conflicting_periods: Vec<Period> },

    #[error("{0}")]
    Validation(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("payment gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        match e.downcast::<rusqlite::Error>() {
            Ok(db) => AppError::Database(db),
            Err(other) => AppError::Internal(format!("{other:#}")),
        }
    }
}

impl From<TransitionError> for AppError {
    fn from(e: TransitionError) -> Self {
        AppError::Validation(e.to_string())
    }
}

impl From<ReservationError> for AppError {
    fn from(e: ReservationError) -> Self {
        match e {
            ReservationError::Conflict(periods) => AppError::Conflict {
                conflicting_periods: periods.into_iter().collect(),
            },
            ReservationError::ServiceNotFound(id) => AppError::NotFound(format!("service {id}")),
            ReservationError::Invalid(reason) => AppError::Validation(reason),
            ReservationError::Storage(e) => AppError::from(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Gateway(GatewayError::InvalidCallback(_)) => StatusCode::BAD_REQUEST,
            AppError::Gateway(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = match &self {
            AppError::Conflict {
                conflicting_periods,
            } => serde_json::json!({
                "error": self.to_string(),
                "conflictingPeriods": conflicting_periods,
            }),
            _ => serde_json::json!({ "error": self.to_string() }),
        };
        (status, axum::Json(body)).into_response()
    }
}
