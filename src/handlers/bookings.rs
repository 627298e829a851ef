use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::models::period::format_day;
use crate::models::{
    Booking, BookingState, CancelledBy, CateringSelection, PaymentView, Period, Principal,
};
use crate::services::booking::{self, NewBooking, VendorAction};
use crate::services::payment::{GatewayStatus, PaymentInitiation};
use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingResponse {
    id: String,
    user_id: String,
    vendor_id: String,
    service_id: String,
    date: String,
    periods: Vec<Period>,
    #[serde(skip_serializing_if = "Option::is_none")]
    catering_package: Option<CateringSelection>,
    total_price: i64,
    status: &'static str,
    payment: Option<PaymentView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cancelled_by: Option<CancelledBy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cancelled_at: Option<DateTime<Utc>>,
    special_requests: Option<String>,
    created_at: String,
    updated_at: String,
}

impl From<Booking> for BookingResponse {
    fn from(b: Booking) -> Self {
        let status = b.state.status_str();
        let payment = b.state.payment_view();
        let (cancelled_by, cancelled_at) = match &b.state {
            BookingState::Cancelled { by, at } => (Some(*by), Some(*at)),
            _ => (None, None),
        };
        BookingResponse {
            id: b.id,
            user_id: b.user_id,
            vendor_id: b.vendor_id,
            service_id: b.service_id,
            date: format_day(&b.date),
            periods: b.periods.into_iter().collect(),
            catering_package: b.catering,
            total_price: b.total_price,
            status,
            payment,
            cancelled_by,
            cancelled_at,
            special_requests: b.special_requests,
            created_at: b.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            updated_at: b.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

// POST /bookings

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingRequest {
    pub service_id: String,
    pub date: String,
    pub periods: Vec<Period>,
    #[serde(default)]
    pub special_requests: Option<String>,
    #[serde(default, alias = "catering")]
    pub catering_package: Option<CateringSelection>,
    #[serde(default)]
    pub total_price: Option<i64>,
}

pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Json(req): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<BookingResponse>), AppError> {
    let booking = booking::create_booking(
        &state,
        &principal,
        NewBooking {
            service_id: req.service_id,
            date: req.date,
            periods: req.periods,
            special_requests: req.special_requests,
            catering: req.catering_package,
            client_total: req.total_price,
        },
    )?;
    Ok((StatusCode::CREATED, Json(booking.into())))
}

// GET /bookings/user
pub async fn list_user_bookings(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> Result<Json<Vec<BookingResponse>>, AppError> {
    let bookings = booking::list_for_user(&state, &principal)?;
    Ok(Json(bookings.into_iter().map(Into::into).collect()))
}

// GET /bookings/vendor
pub async fn list_vendor_bookings(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> Result<Json<Vec<BookingResponse>>, AppError> {
    let bookings = booking::list_for_vendor(&state, &principal)?;
    Ok(Json(bookings.into_iter().map(Into::into).collect()))
}

// GET /bookings/:id
pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<String>,
) -> Result<Json<BookingResponse>, AppError> {
    Ok(Json(booking::get_booking(&state, &principal, &id)?.into()))
}

// PUT /bookings/:id/status

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusResponse {
    booking: BookingResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    payment_initiation: Option<PaymentInitiation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payment_error: Option<String>,
}

pub async fn update_status(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<String>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<UpdateStatusResponse>, AppError> {
    let action = match req.status.as_str() {
        "confirmed" => VendorAction::Confirm,
        "cancelled" => VendorAction::Cancel,
        other => {
            return Err(AppError::Validation(format!(
                "status must be confirmed or cancelled, got {other}"
            )))
        }
    };

    let update = booking::vendor_update(&state, &principal, &id, action).await?;
    Ok(Json(UpdateStatusResponse {
        booking: update.booking.into(),
        payment_initiation: update.payment,
        payment_error: update.payment_error,
    }))
}

// PUT /bookings/:id/cancel
pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<String>,
) -> Result<Json<BookingResponse>, AppError> {
    Ok(Json(booking::cancel_by_user(&state, &principal, &id)?.into()))
}

// POST /bookings/:id/verify-payment

#[derive(Deserialize)]
pub struct VerifyPaymentRequest {
    pub pidx: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentResponse {
    success: bool,
    gateway_status: GatewayStatus,
    already_paid: bool,
    booking: BookingResponse,
}

pub async fn verify_payment(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<String>,
    Json(req): Json<VerifyPaymentRequest>,
) -> Result<Json<VerifyPaymentResponse>, AppError> {
    let pidx = req.pidx.trim();
    if pidx.is_empty() {
        return Err(AppError::Validation("pidx is required".to_string()));
    }

    let result = booking::verify_payment(&state, Some(&principal), &id, pidx).await?;
    Ok(Json(VerifyPaymentResponse {
        success: result.gateway_status == GatewayStatus::Complete,
        gateway_status: result.gateway_status,
        already_paid: result.already_paid,
        booking: result.booking.into(),
    }))
}

// POST /bookings/:id/retry-payment

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPaymentResponse {
    booking: BookingResponse,
    payment_initiation: PaymentInitiation,
}

pub async fn retry_payment(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<String>,
) -> Result<Json<RetryPaymentResponse>, AppError> {
    let (booking, initiation) = booking::retry_payment(&state, &principal, &id).await?;
    Ok(Json(RetryPaymentResponse {
        booking: booking.into(),
        payment_initiation: initiation,
    }))
}
