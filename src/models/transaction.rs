use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionStatus {
    Pending,
    Complete,
    Failed,
    Refunded,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Complete => "COMPLETE",
            TransactionStatus::Failed => "FAILED",
            TransactionStatus::Refunded => "REFUNDED",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "COMPLETE" => TransactionStatus::Complete,
            "FAILED" => TransactionStatus::Failed,
            "REFUNDED" => TransactionStatus::Refunded,
            _ => TransactionStatus::Pending,
        }
    }
}

/// Ledger row for one payment attempt against a booking.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    /// Correlation key sent to the gateway as the order id.
    pub product_id: String,
    pub booking_id: String,
    pub gateway: String,
    /// Gateway handle used for verification (Khalti `pidx`, eSewa transaction uuid).
    pub provider_ref: String,
    pub amount: i64,
    pub status: TransactionStatus,
    pub external_txn_id: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}
