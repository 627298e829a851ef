pub mod esewa;
pub mod khalti;

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("{gateway} did not answer in time")]
    Timeout { gateway: &'static str },

    #[error("{gateway} is unreachable: {message}")]
    Unreachable {
        gateway: &'static str,
        message: String,
    },

    #[error("{gateway} rejected the request ({status}): {message}")]
    Rejected {
        gateway: &'static str,
        status: u16,
        message: String,
    },

    #[error("malformed response from {gateway}: {message}")]
    Malformed {
        gateway: &'static str,
        message: String,
    },

    #[error("invalid callback: {0}")]
    InvalidCallback(String),

    #[error("amount {0} cannot be expressed in paisa")]
    AmountOutOfRange(i64),
}

impl GatewayError {
    pub(crate) fn from_reqwest(gateway: &'static str, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GatewayError::Timeout { gateway }
        } else if e.is_decode() {
            GatewayError::Malformed {
                gateway,
                message: e.to_string(),
            }
        } else {
            GatewayError::Unreachable {
                gateway,
                message: e.to_string(),
            }
        }
    }
}

/// Rupees to paisa, the minor unit gateways report settled amounts in.
pub fn to_paisa(rupees: i64) -> Result<i64, GatewayError> {
    rupees
        .checked_mul(100)
        .ok_or(GatewayError::AmountOutOfRange(rupees))
}

#[derive(Debug, Clone)]
pub struct PaymentRequest {
    /// Our correlation key, sent as the gateway's order / transaction id.
    pub order_id: String,
    pub order_name: String,
    /// Whole rupees.
    pub amount: i64,
    pub success_url: String,
    pub failure_url: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInitiation {
    /// Handle later passed to `verify`.
    pub provider_ref: String,
    pub redirect_url: String,
    /// Signed fields the browser must post to `redirect_url`, for form-based gateways.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form_fields: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GatewayStatus {
    Complete,
    Pending,
    Failed,
    Refunded,
}

#[derive(Debug, Clone)]
pub struct PaymentVerification {
    pub status: GatewayStatus,
    /// Settled amount in paisa, as reported by the gateway.
    pub paisa: i64,
    pub external_txn_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct VerifyRequest<'a> {
    pub provider_ref: &'a str,
    pub order_id: &'a str,
    pub amount: i64,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> &'static str;

    async fn initiate(&self, request: &PaymentRequest) -> Result<PaymentInitiation, GatewayError>;

    async fn verify(&self, request: &VerifyRequest<'_>) -> Result<PaymentVerification, GatewayError>;

    /// Extract the provider reference from the query string the gateway
    /// redirects the customer back with.
    fn callback_reference(&self, query: &HashMap<String, String>) -> Result<String, GatewayError> {
        query
            .get("pidx")
            .filter(|v| !v.is_empty())
            .cloned()
            .ok_or_else(|| GatewayError::InvalidCallback("missing pidx".to_string()))
    }
}
