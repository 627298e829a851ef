use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use super::period::PeriodSet;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SelectedItem {
    pub menu_item_id: String,
    pub quantity: u32,
    #[serde(default)]
    pub is_optional: bool,
    #[serde(default)]
    pub is_section_item: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CateringSelection {
    pub package_id: String,
    pub guest_count: u32,
    #[serde(default)]
    pub selected_items: Vec<SelectedItem>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    Pending,
    Failed,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Pending => "pending",
            AttemptStatus::Failed => "failed",
        }
    }
}

/// A payment the gateway has been asked to collect for a confirmed booking.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentAttempt {
    pub payment_id: String,
    pub amount: i64,
    pub status: AttemptStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CancelledBy {
    User,
    Vendor,
}

impl CancelledBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelledBy::User => "user",
            CancelledBy::Vendor => "vendor",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(CancelledBy::User),
            "vendor" => Some(CancelledBy::Vendor),
            _ => None,
        }
    }
}

/// Lifecycle of a booking. Payment progress lives inside the variants so the
/// booking status and the payment status can never disagree.
#[derive(Debug, Clone, PartialEq)]
pub enum BookingState {
    Pending,
    /// `payment` is `None` until initiation succeeds at the gateway.
    Confirmed { payment: Option<PaymentAttempt> },
    Paid {
        payment_id: String,
        amount: i64,
        paid_at: DateTime<Utc>,
    },
    Cancelled {
        by: CancelledBy,
        at: DateTime<Utc>,
    },
    Completed,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransitionError {
    #[error("cannot {action} a booking that is {from}")]
    NotAllowed {
        action: &'static str,
        from: &'static str,
    },

    #[error("payment {0} does not belong to this booking")]
    PaymentMismatch(String),

    #[error("booking has no payment in progress")]
    NoPaymentInProgress,

    #[error("payment {0} is still in progress; verify it before cancelling")]
    PaymentInProgress(String),
}

impl BookingState {
    pub fn status_str(&self) -> &'static str {
        match self {
            BookingState::Pending => "pending",
            BookingState::Confirmed { .. } => "confirmed",
            BookingState::Paid { .. } => "paid",
            BookingState::Cancelled { .. } => "cancelled",
            BookingState::Completed => "completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingState::Paid { .. } | BookingState::Cancelled { .. } | BookingState::Completed
        )
    }

    /// Whether the booking still occupies its periods.
    pub fn is_blocking(&self) -> bool {
        !matches!(self, BookingState::Cancelled { .. })
    }

    fn refuse(&self, action: &'static str) -> TransitionError {
        TransitionError::NotAllowed {
            action,
            from: self.status_str(),
        }
    }

    pub fn confirm(&self) -> Result<BookingState, TransitionError> {
        match self {
            BookingState::Pending => Ok(BookingState::Confirmed { payment: None }),
            _ => Err(self.refuse("confirm")),
        }
    }

    /// Record a freshly initiated payment. Allowed while no attempt is
    /// running, i.e. before the first initiation or after a failure.
    pub fn attach_payment(
        &self,
        payment_id: &str,
        amount: i64,
    ) -> Result<BookingState, TransitionError> {
        match self {
            BookingState::Confirmed { payment: None } => Ok(pending_attempt(payment_id, amount)),
            BookingState::Confirmed {
                payment: Some(attempt),
            } if attempt.status == AttemptStatus::Failed => Ok(pending_attempt(payment_id, amount)),
            BookingState::Confirmed { .. } => Err(self.refuse("start another payment for")),
            _ => Err(self.refuse("start a payment for")),
        }
    }

    pub fn cancel(&self, by: CancelledBy, at: DateTime<Utc>) -> Result<BookingState, TransitionError> {
        // A running attempt may still settle at the gateway; its outcome must
        // land on a booking that can record it.
        if let BookingState::Confirmed {
            payment: Some(attempt),
        } = self
        {
            if by == CancelledBy::User && attempt.status == AttemptStatus::Pending {
                return Err(TransitionError::PaymentInProgress(attempt.payment_id.clone()));
            }
        }
        let allowed = match by {
            CancelledBy::User => {
                matches!(self, BookingState::Pending | BookingState::Confirmed { .. })
            }
            CancelledBy::Vendor => matches!(self, BookingState::Pending),
        };
        if allowed {
            Ok(BookingState::Cancelled { by, at })
        } else {
            Err(self.refuse("cancel"))
        }
    }

    /// Settle the running attempt. Settling an already paid booking with the
    /// same payment id returns it unchanged, keeping the original `paid_at`.
    pub fn mark_paid(
        &self,
        payment_id: &str,
        paid_at: DateTime<Utc>,
    ) -> Result<BookingState, TransitionError> {
        match self {
            BookingState::Confirmed {
                payment: Some(attempt),
            } => {
                if attempt.payment_id != payment_id {
                    return Err(TransitionError::PaymentMismatch(payment_id.to_string()));
                }
                Ok(BookingState::Paid {
                    payment_id: attempt.payment_id.clone(),
                    amount: attempt.amount,
                    paid_at,
                })
            }
            BookingState::Confirmed { payment: None } => Err(TransitionError::NoPaymentInProgress),
            BookingState::Paid {
                payment_id: paid_id,
                ..
            } if paid_id == payment_id => Ok(self.clone()),
            BookingState::Paid { .. } => Err(TransitionError::PaymentMismatch(payment_id.to_string())),
            _ => Err(self.refuse("settle payment for")),
        }
    }

    pub fn mark_payment_failed(&self, payment_id: &str) -> Result<BookingState, TransitionError> {
        match self {
            BookingState::Confirmed {
                payment: Some(attempt),
            } => {
                if attempt.payment_id != payment_id {
                    return Err(TransitionError::PaymentMismatch(payment_id.to_string()));
                }
                Ok(BookingState::Confirmed {
                    payment: Some(PaymentAttempt {
                        status: AttemptStatus::Failed,
                        ..attempt.clone()
                    }),
                })
            }
            BookingState::Confirmed { payment: None } => Err(TransitionError::NoPaymentInProgress),
            _ => Err(self.refuse("fail payment for")),
        }
    }

    pub fn payment_view(&self) -> Option<PaymentView> {
        match self {
            BookingState::Confirmed {
                payment: Some(attempt),
            } => Some(PaymentView {
                payment_id: attempt.payment_id.clone(),
                status: attempt.status.as_str(),
                amount: attempt.amount,
                paid_at: None,
            }),
            BookingState::Paid {
                payment_id,
                amount,
                paid_at,
            } => Some(PaymentView {
                payment_id: payment_id.clone(),
                status: "completed",
                amount: *amount,
                paid_at: Some(*paid_at),
            }),
            _ => None,
        }
    }
}

fn pending_attempt(payment_id: &str, amount: i64) -> BookingState {
    BookingState::Confirmed {
        payment: Some(PaymentAttempt {
            payment_id: payment_id.to_string(),
            amount,
            status: AttemptStatus::Pending,
        }),
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentView {
    pub payment_id: String,
    pub status: &'static str,
    pub amount: i64,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct Booking {
    pub id: String,
    pub user_id: String,
    pub vendor_id: String,
    pub service_id: String,
    pub date: NaiveDate,
    pub periods: PeriodSet,
    pub catering: Option<CateringSelection>,
    pub total_price: i64,
    pub state: BookingState,
    pub special_requests: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}
