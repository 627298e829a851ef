use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use super::{
    GatewayError, GatewayStatus, PaymentGateway, PaymentInitiation, PaymentRequest,
    PaymentVerification, VerifyRequest,
};

const NAME: &str = "esewa";
const SIGNED_FIELDS: &str = "total_amount,transaction_uuid,product_code";

pub struct EsewaGateway {
    product_code: String,
    secret_key: String,
    form_url: String,
    status_url: String,
    client: reqwest::Client,
}

impl EsewaGateway {
    pub fn new(
        product_code: String,
        secret_key: String,
        form_url: String,
        status_url: String,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build eSewa HTTP client")?;
        Ok(Self {
            product_code,
            secret_key,
            form_url,
            status_url,
            client,
        })
    }

    fn mac(&self) -> Result<Hmac<Sha256>, GatewayError> {
        Hmac::<Sha256>::new_from_slice(self.secret_key.as_bytes())
            .map_err(|e| GatewayError::InvalidCallback(format!("bad signing key: {e}")))
    }

    /// Base64 HMAC-SHA256 over `message`, as eSewa expects in `signature`.
    pub fn sign(&self, message: &str) -> Result<String, GatewayError> {
        let mut mac = self.mac()?;
        mac.update(message.as_bytes());
        Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
    }

    /// Decode the `data` parameter eSewa appends to the return URL and check
    /// its signature. Returns the transaction uuid.
    pub fn decode_callback(&self, data: &str) -> Result<String, GatewayError> {
        let raw = base64::engine::general_purpose::STANDARD
            .decode(data.trim())
            .map_err(|_| GatewayError::InvalidCallback("data is not base64".to_string()))?;
        let payload: HashMap<String, serde_json::Value> = serde_json::from_slice(&raw)
            .map_err(|_| GatewayError::InvalidCallback("data is not a JSON object".to_string()))?;

        let field = |name: &str| -> Option<String> {
            payload.get(name).map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
        };

        let signed_names = field("signed_field_names")
            .ok_or_else(|| GatewayError::InvalidCallback("missing signed_field_names".to_string()))?;
        let signature = field("signature")
            .ok_or_else(|| GatewayError::InvalidCallback("missing signature".to_string()))?;

        let mut parts = Vec::new();
        for name in signed_names.split(',') {
            let value = field(name).ok_or_else(|| {
                GatewayError::InvalidCallback(format!("signed field {name} is missing"))
            })?;
            parts.push(format!("{name}={value}"));
        }

        let provided = base64::engine::general_purpose::STANDARD
            .decode(signature)
            .map_err(|_| GatewayError::InvalidCallback("signature is not base64".to_string()))?;
        let mut mac = self.mac()?;
        mac.update(parts.join(",").as_bytes());
        mac.verify_slice(&provided)
            .map_err(|_| GatewayError::InvalidCallback("signature mismatch".to_string()))?;

        field("transaction_uuid")
            .ok_or_else(|| GatewayError::InvalidCallback("missing transaction_uuid".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    total_amount: serde_json::Value,
    ref_id: Option<String>,
}

fn map_status(status: &str) -> GatewayStatus {
    match status {
        "COMPLETE" => GatewayStatus::Complete,
        "PENDING" | "AMBIGUOUS" => GatewayStatus::Pending,
        "FULL_REFUND" | "PARTIAL_REFUND" => GatewayStatus::Refunded,
        _ => GatewayStatus::Failed,
    }
}

/// eSewa reports rupees with decimals; keep them as paisa.
fn parse_paisa(value: &serde_json::Value) -> Option<i64> {
    let amount = match value {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s.replace(',', "").parse::<f64>().ok()?,
        _ => return None,
    };
    let paisa = (amount * 100.0).round();
    (paisa.is_finite() && paisa >= 0.0 && paisa < i64::MAX as f64).then_some(paisa as i64)
}

#[async_trait]
impl PaymentGateway for EsewaGateway {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn initiate(&self, request: &PaymentRequest) -> Result<PaymentInitiation, GatewayError> {
        let total = request.amount.to_string();
        let message = format!(
            "total_amount={total},transaction_uuid={},product_code={}",
            request.order_id, self.product_code
        );
        let signature = self.sign(&message)?;

        let fields: BTreeMap<String, String> = [
            ("amount", total.clone()),
            ("tax_amount", "0".to_string()),
            ("product_service_charge", "0".to_string()),
            ("product_delivery_charge", "0".to_string()),
            ("total_amount", total),
            ("transaction_uuid", request.order_id.clone()),
            ("product_code", self.product_code.clone()),
            ("success_url", request.success_url.clone()),
            ("failure_url", request.failure_url.clone()),
            ("signed_field_names", SIGNED_FIELDS.to_string()),
            ("signature", signature),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Ok(PaymentInitiation {
            provider_ref: request.order_id.clone(),
            redirect_url: self.form_url.clone(),
            form_fields: Some(fields),
        })
    }

    async fn verify(&self, request: &VerifyRequest<'_>) -> Result<PaymentVerification, GatewayError> {
        let amount = request.amount.to_string();
        let resp = self
            .client
            .get(&self.status_url)
            .query(&[
                ("product_code", self.product_code.as_str()),
                ("total_amount", amount.as_str()),
                ("transaction_uuid", request.provider_ref),
            ])
            .send()
            .await
            .map_err(|e| GatewayError::from_reqwest(NAME, e))?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected {
                gateway: NAME,
                status: status.as_u16(),
                message,
            });
        }

        let parsed: StatusResponse = resp
            .json()
            .await
            .map_err(|e| GatewayError::from_reqwest(NAME, e))?;
        let paid = parse_paisa(&parsed.total_amount).ok_or_else(|| GatewayError::Malformed {
            gateway: NAME,
            message: format!("unreadable total_amount {}", parsed.total_amount),
        })?;

        Ok(PaymentVerification {
            status: map_status(&parsed.status),
            paisa: paid,
            external_txn_id: parsed.ref_id.filter(|r| !r.is_empty()),
        })
    }

    fn callback_reference(&self, query: &HashMap<String, String>) -> Result<String, GatewayError> {
        let data = query
            .get("data")
            .ok_or_else(|| GatewayError::InvalidCallback("missing data".to_string()))?;
        self.decode_callback(data)
    }
}
