use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::db::queries::{self, ClaimOutcome};
use crate::errors::AppError;
use crate::models::period::periods_to_string;
use crate::models::{
    AttemptStatus, Booking, BookingState, CancelledBy, CateringSelection, Period, Principal, Role,
    Transaction, TransactionStatus,
};
use crate::services::payment::{
    to_paisa, GatewayError, GatewayStatus, PaymentInitiation, PaymentRequest, VerifyRequest,
};
use crate::services::validator::{self, ReservationRequest};
use crate::state::AppState;

#[derive(Debug, Clone)]
pub struct NewBooking {
    pub service_id: String,
    pub date: String,
    pub periods: Vec<Period>,
    pub special_requests: Option<String>,
    pub catering: Option<CateringSelection>,
    /// Client-side preview of the price; the server value always wins.
    pub client_total: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VendorAction {
    Confirm,
    Cancel,
}

#[derive(Debug)]
pub struct VendorUpdate {
    pub booking: Booking,
    pub payment: Option<PaymentInitiation>,
    /// Set when the booking was confirmed but the gateway could not start a payment.
    pub payment_error: Option<String>,
}

#[derive(Debug)]
pub struct Verification {
    pub booking: Booking,
    pub gateway_status: GatewayStatus,
    pub already_paid: bool,
}

async fn bounded<T>(
    limit: Duration,
    gateway: &'static str,
    call: impl Future<Output = Result<T, GatewayError>>,
) -> Result<T, GatewayError> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| GatewayError::Timeout { gateway })?
}

fn load_booking(state: &AppState, id: &str) -> Result<Booking, AppError> {
    let conn = state.conn()?;
    queries::get_booking_by_id(&conn, id)?.ok_or_else(|| AppError::NotFound(format!("booking {id}")))
}

fn can_view(principal: &Principal, booking: &Booking) -> bool {
    if principal.is_admin() {
        return true;
    }
    match principal.role {
        Role::Vendor => booking.vendor_id == principal.id,
        _ => booking.user_id == principal.id,
    }
}

pub fn create_booking(
    state: &AppState,
    principal: &Principal,
    request: NewBooking,
) -> Result<Booking, AppError> {
    principal.require(Role::User)?;

    let reservation = ReservationRequest {
        service_id: request.service_id,
        date: request.date,
        periods: request.periods,
        catering: request.catering,
    };

    let mut conn = state.conn()?;
    let validated = validator::validate_reservation(&conn, &reservation)?;

    if let Some(client_total) = request.client_total {
        if client_total != validated.total_price {
            tracing::warn!(
                service_id = %validated.service.id,
                client_total,
                server_total = validated.total_price,
                "client price preview disagrees with server total"
            );
        }
    }

    let now = Utc::now().naive_utc();
    let booking = Booking {
        id: Uuid::new_v4().to_string(),
        user_id: principal.id.clone(),
        vendor_id: validated.service.vendor_id.clone(),
        service_id: validated.service.id.clone(),
        date: validated.date,
        periods: validated.periods,
        catering: validated.catering,
        total_price: validated.total_price,
        state: BookingState::Pending,
        special_requests: request
            .special_requests
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        created_at: now,
        updated_at: now,
    };

    match queries::insert_booking(&mut conn, &booking)? {
        ClaimOutcome::Inserted => {}
        ClaimOutcome::Conflict(periods) => {
            tracing::warn!(
                service_id = %booking.service_id,
                date = %booking.date,
                conflicting = %periods_to_string(&periods),
                "period claimed concurrently"
            );
            return Err(AppError::Conflict {
                conflicting_periods: periods.into_iter().collect(),
            });
        }
    }

    tracing::info!(
        booking_id = %booking.id,
        service_id = %booking.service_id,
        date = %booking.date,
        periods = %periods_to_string(&booking.periods),
        total = booking.total_price,
        "booking created"
    );
    Ok(booking)
}

pub fn get_booking(state: &AppState, principal: &Principal, id: &str) -> Result<Booking, AppError> {
    let booking = load_booking(state, id)?;
    if !can_view(principal, &booking) {
        return Err(AppError::Forbidden("not your booking".to_string()));
    }
    Ok(booking)
}

pub fn list_for_user(state: &AppState, principal: &Principal) -> Result<Vec<Booking>, AppError> {
    principal.require(Role::User)?;
    let conn = state.conn()?;
    Ok(queries::get_bookings_for_user(&conn, &principal.id)?)
}

pub fn list_for_vendor(state: &AppState, principal: &Principal) -> Result<Vec<Booking>, AppError> {
    principal.require(Role::Vendor)?;
    let conn = state.conn()?;
    Ok(queries::get_bookings_for_vendor(&conn, &principal.id)?)
}

pub async fn vendor_update(
    state: &AppState,
    principal: &Principal,
    booking_id: &str,
    action: VendorAction,
) -> Result<VendorUpdate, AppError> {
    principal.require(Role::Vendor)?;

    let booking = {
        let mut conn = state.conn()?;
        let mut booking = queries::get_booking_by_id(&conn, booking_id)?
            .ok_or_else(|| AppError::NotFound(format!("booking {booking_id}")))?;
        if booking.vendor_id != principal.id {
            return Err(AppError::Forbidden(
                "only the vendor of this service can update the booking".to_string(),
            ));
        }

        let next = match action {
            VendorAction::Confirm => booking.state.confirm()?,
            VendorAction::Cancel => booking.state.cancel(CancelledBy::Vendor, Utc::now())?,
        };
        queries::update_booking_state(&mut conn, booking_id, &next)?;
        booking.state = next;
        booking
    };

    tracing::info!(
        booking_id = %booking.id,
        status = booking.state.status_str(),
        "vendor updated booking"
    );

    if action == VendorAction::Cancel {
        return Ok(VendorUpdate {
            booking,
            payment: None,
            payment_error: None,
        });
    }

    // The confirmation stands even if the gateway is down; the customer can
    // retry the payment later.
    match start_payment(state, &booking).await {
        Ok(initiation) => Ok(VendorUpdate {
            booking: load_booking(state, booking_id)?,
            payment: Some(initiation),
            payment_error: None,
        }),
        Err(e) => {
            tracing::warn!(booking_id = %booking.id, error = %e, "payment initiation failed after confirm");
            Ok(VendorUpdate {
                booking: load_booking(state, booking_id)?,
                payment: None,
                payment_error: Some(e.to_string()),
            })
        }
    }
}

/// Start a new payment attempt for a confirmed booking that has none running.
pub async fn retry_payment(
    state: &AppState,
    principal: &Principal,
    booking_id: &str,
) -> Result<(Booking, PaymentInitiation), AppError> {
    principal.require(Role::User)?;
    let booking = load_booking(state, booking_id)?;
    if booking.user_id != principal.id {
        return Err(AppError::Forbidden("not your booking".to_string()));
    }

    let retryable = match &booking.state {
        BookingState::Confirmed { payment: None } => true,
        BookingState::Confirmed {
            payment: Some(attempt),
        } => attempt.status == AttemptStatus::Failed,
        _ => false,
    };
    if !retryable {
        return Err(AppError::Validation(format!(
            "payment cannot be retried for a {} booking{}",
            booking.state.status_str(),
            if booking.state.payment_view().is_some() {
                " with a payment in progress"
            } else {
                ""
            }
        )));
    }

    let initiation = start_payment(state, &booking).await?;
    Ok((load_booking(state, booking_id)?, initiation))
}

async fn start_payment(state: &AppState, booking: &Booking) -> Result<PaymentInitiation, AppError> {
    let gateway = state.gateway.as_ref();
    let product_id = Uuid::new_v4().to_string();
    let return_url = state.config.payment_return_url(gateway.name());
    let request = PaymentRequest {
        order_id: product_id.clone(),
        order_name: format!("Booking {}", booking.id),
        amount: booking.total_price,
        success_url: return_url.clone(),
        failure_url: return_url,
    };

    let initiation = bounded(
        state.config.gateway_timeout(),
        gateway.name(),
        gateway.initiate(&request),
    )
    .await?;

    let mut conn = state.conn()?;
    // Re-read: the booking may have been cancelled while the gateway was busy.
    let current = queries::get_booking_by_id(&conn, &booking.id)?
        .ok_or_else(|| AppError::NotFound(format!("booking {}", booking.id)))?;
    let next = current
        .state
        .attach_payment(&initiation.provider_ref, current.total_price)?;

    let now = Utc::now().naive_utc();
    let txn = Transaction {
        id: Uuid::new_v4().to_string(),
        product_id,
        booking_id: booking.id.clone(),
        gateway: gateway.name().to_string(),
        provider_ref: initiation.provider_ref.clone(),
        amount: current.total_price,
        status: TransactionStatus::Pending,
        external_txn_id: None,
        created_at: now,
        updated_at: now,
    };
    queries::record_payment_initiation(&mut conn, &txn, &next)?;

    tracing::info!(
        booking_id = %booking.id,
        provider_ref = %initiation.provider_ref,
        amount = current.total_price,
        gateway = gateway.name(),
        "payment initiated"
    );
    Ok(initiation)
}

pub fn cancel_by_user(
    state: &AppState,
    principal: &Principal,
    booking_id: &str,
) -> Result<Booking, AppError> {
    principal.require(Role::User)?;
    let mut conn = state.conn()?;
    let mut booking = queries::get_booking_by_id(&conn, booking_id)?
        .ok_or_else(|| AppError::NotFound(format!("booking {booking_id}")))?;
    if booking.user_id != principal.id {
        return Err(AppError::Forbidden("not your booking".to_string()));
    }

    let next = booking.state.cancel(CancelledBy::User, Utc::now())?;
    queries::update_booking_state(&mut conn, booking_id, &next)?;
    booking.state = next;

    tracing::info!(booking_id = %booking.id, "booking cancelled by user");
    Ok(booking)
}

/// Ask the gateway about a payment and fold the answer into the booking and
/// its ledger entry. Safe to repeat: a paid booking is returned untouched.
/// `principal` is `None` for gateway return callbacks, which act only on the
/// gateway's own lookup.
pub async fn verify_payment(
    state: &AppState,
    principal: Option<&Principal>,
    booking_id: &str,
    provider_ref: &str,
) -> Result<Verification, AppError> {
    let (booking, txn) = {
        let conn = state.conn()?;
        let booking = queries::get_booking_by_id(&conn, booking_id)?
            .ok_or_else(|| AppError::NotFound(format!("booking {booking_id}")))?;
        if let Some(principal) = principal {
            if !can_view(principal, &booking) {
                return Err(AppError::Forbidden("not your booking".to_string()));
            }
        }
        if let Some(done) = already_settled(&booking, provider_ref)? {
            return Ok(done);
        }
        let txn = queries::get_transaction_by_provider_ref(&conn, provider_ref)?
            .filter(|t| t.booking_id == booking.id)
            .ok_or_else(|| AppError::NotFound(format!("payment {provider_ref}")))?;
        (booking, txn)
    };

    let gateway = state.gateway.as_ref();
    let verification = bounded(
        state.config.gateway_timeout(),
        gateway.name(),
        gateway.verify(&VerifyRequest {
            provider_ref,
            order_id: &txn.product_id,
            amount: txn.amount,
        }),
    )
    .await
    .map_err(|e| {
        tracing::warn!(booking_id = %booking.id, provider_ref, error = %e, "payment verification failed");
        e
    })?;

    let mut conn = state.conn()?;
    let current = queries::get_booking_by_id(&conn, booking_id)?
        .ok_or_else(|| AppError::NotFound(format!("booking {booking_id}")))?;
    if let Some(done) = already_settled(&current, provider_ref)? {
        return Ok(done);
    }

    let (txn_status, next) = match verification.status {
        GatewayStatus::Complete => {
            let expected = to_paisa(current.total_price)?;
            if verification.paisa != expected {
                return Err(GatewayError::Malformed {
                    gateway: gateway.name(),
                    message: format!(
                        "paid {} paisa does not match booking total of {} paisa",
                        verification.paisa, expected
                    ),
                }
                .into());
            }
            (
                TransactionStatus::Complete,
                Some(current.state.mark_paid(provider_ref, Utc::now())?),
            )
        }
        GatewayStatus::Failed => (
            TransactionStatus::Failed,
            Some(current.state.mark_payment_failed(provider_ref)?),
        ),
        GatewayStatus::Refunded => (
            TransactionStatus::Refunded,
            Some(current.state.mark_payment_failed(provider_ref)?),
        ),
        GatewayStatus::Pending => {
            tracing::info!(booking_id = %current.id, provider_ref, "payment still pending");
            return Ok(Verification {
                booking: current,
                gateway_status: GatewayStatus::Pending,
                already_paid: false,
            });
        }
    };

    queries::reconcile_payment(
        &mut conn,
        &txn.id,
        txn_status,
        verification.external_txn_id.as_deref(),
        &current.id,
        next.as_ref(),
    )?;

    let booking = queries::get_booking_by_id(&conn, booking_id)?
        .ok_or_else(|| AppError::NotFound(format!("booking {booking_id}")))?;
    tracing::info!(
        booking_id = %booking.id,
        provider_ref,
        transaction = txn_status.as_str(),
        status = booking.state.status_str(),
        "payment reconciled"
    );

    Ok(Verification {
        booking,
        gateway_status: verification.status,
        already_paid: false,
    })
}

/// Short-circuit for bookings that cannot take a verification result.
fn already_settled(booking: &Booking, provider_ref: &str) -> Result<Option<Verification>, AppError> {
    match &booking.state {
        BookingState::Paid { payment_id, .. } if payment_id == provider_ref => Ok(Some(Verification {
            booking: booking.clone(),
            gateway_status: GatewayStatus::Complete,
            already_paid: true,
        })),
        BookingState::Paid { .. } => Err(AppError::Validation(
            "booking was paid with a different payment".to_string(),
        )),
        BookingState::Confirmed {
            payment: Some(attempt),
        } if attempt.payment_id == provider_ref => Ok(None),
        BookingState::Confirmed { .. } => Err(AppError::Validation(format!(
            "payment {provider_ref} is not the booking's current payment"
        ))),
        other => Err(AppError::Validation(format!(
            "cannot verify payment for a {} booking",
            other.status_str()
        ))),
    }
}

/// Verify by the reference a gateway hands back on its return redirect.
pub async fn verify_by_reference(
    state: &AppState,
    provider_ref: &str,
) -> Result<Verification, AppError> {
    let booking_id = {
        let conn = state.conn()?;
        queries::get_transaction_by_provider_ref(&conn, provider_ref)?
            .map(|t| t.booking_id)
            .ok_or_else(|| AppError::NotFound(format!("payment {provider_ref}")))?
    };
    verify_payment(state, None, &booking_id, provider_ref).await
}
