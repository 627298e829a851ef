use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use crate::errors::AppError;
use crate::models::{Principal, Service};
use crate::services::catalog::{self, ServiceDraft};
use crate::state::AppState;

// POST /services
pub async fn create_service(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Json(draft): Json<ServiceDraft>,
) -> Result<(StatusCode, Json<Service>), AppError> {
    let service = catalog::create_service(&state, &principal, draft)?;
    Ok((StatusCode::CREATED, Json(service)))
}

// GET /services/:id
pub async fn get_service(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Service>, AppError> {
    Ok(Json(catalog::get_service(&state, &id)?))
}
