use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::db::queries;
use crate::errors::AppError;
use crate::models::period::{format_day, normalize_day};
use crate::models::Period;
use crate::services::availability::{self, BlockingScope};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct AvailabilityQuery {
    pub date: String,
    #[serde(default)]
    pub scope: BlockingScope,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityResponse {
    service_id: String,
    date: String,
    booked_periods: Vec<Period>,
}

// GET /availability/:service_id?date=YYYY-MM-DD
pub async fn get_availability(
    State(state): State<Arc<AppState>>,
    Path(service_id): Path<String>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<AvailabilityResponse>, AppError> {
    let date = normalize_day(&query.date).map_err(|e| AppError::Validation(e.to_string()))?;

    let booked = {
        let conn = state.conn()?;
        if queries::get_service(&conn, &service_id)?.is_none() {
            return Err(AppError::NotFound(format!("service {service_id}")));
        }
        availability::booked_periods(&conn, &service_id, &date, query.scope)?
    };

    Ok(Json(AvailabilityResponse {
        service_id,
        date: format_day(&date),
        booked_periods: booked.into_iter().collect(),
    }))
}
