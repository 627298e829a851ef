use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Serialize;

use crate::errors::AppError;
use crate::services::booking;
use crate::services::payment::GatewayStatus;
use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackResponse {
    booking_id: String,
    status: &'static str,
    gateway_status: GatewayStatus,
}

// GET /payments/:gateway/callback
//
// Where the gateway sends the customer after checkout. Query fields other
// than the reference are ignored; the outcome always comes from a lookup.
pub async fn payment_callback(
    State(state): State<Arc<AppState>>,
    Path(gateway): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<CallbackResponse>, AppError> {
    if gateway != state.gateway.name() {
        return Err(AppError::NotFound(format!("payment gateway {gateway}")));
    }

    let provider_ref = state.gateway.callback_reference(&params)?;
    tracing::info!(gateway = %gateway, provider_ref = %provider_ref, "payment callback received");

    let result = booking::verify_by_reference(&state, &provider_ref).await?;
    Ok(Json(CallbackResponse {
        booking_id: result.booking.id.clone(),
        status: result.booking.state.status_str(),
        gateway_status: result.gateway_status,
    }))
}
