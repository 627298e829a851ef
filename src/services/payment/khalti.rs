use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{
    to_paisa, GatewayError, GatewayStatus, PaymentGateway, PaymentInitiation, PaymentRequest,
    PaymentVerification, VerifyRequest,
};

const NAME: &str = "khalti";

pub struct KhaltiGateway {
    secret_key: String,
    base_url: String,
    website_url: String,
    client: reqwest::Client,
}

impl KhaltiGateway {
    pub fn new(
        secret_key: String,
        base_url: String,
        website_url: String,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build Khalti HTTP client")?;
        Ok(Self {
            secret_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            website_url,
            client,
        })
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<String, GatewayError> {
        let resp = self
            .client
            .post(format!("{}{path}", self.base_url))
            .header("Authorization", format!("Key {}", self.secret_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::from_reqwest(NAME, e))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| GatewayError::from_reqwest(NAME, e))?;

        if !status.is_success() {
            return Err(GatewayError::Rejected {
                gateway: NAME,
                status: status.as_u16(),
                message: text,
            });
        }
        Ok(text)
    }
}

#[derive(Debug, Deserialize)]
struct InitiateResponse {
    pidx: String,
    payment_url: String,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    status: String,
    /// Paisa.
    total_amount: i64,
    transaction_id: Option<String>,
}

fn parse<'a, T: Deserialize<'a>>(text: &'a str) -> Result<T, GatewayError> {
    serde_json::from_str(text).map_err(|e| GatewayError::Malformed {
        gateway: NAME,
        message: e.to_string(),
    })
}

fn map_status(status: &str) -> GatewayStatus {
    match status {
        "Completed" => GatewayStatus::Complete,
        "Pending" | "Initiated" => GatewayStatus::Pending,
        "Refunded" | "Partially refunded" => GatewayStatus::Refunded,
        _ => GatewayStatus::Failed,
    }
}

#[async_trait]
impl PaymentGateway for KhaltiGateway {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn initiate(&self, request: &PaymentRequest) -> Result<PaymentInitiation, GatewayError> {
        // Khalti has a single return URL for every outcome; the lookup decides.
        let amount = to_paisa(request.amount)?;
        let body = json!({
            "return_url": request.success_url,
            "website_url": self.website_url,
            "amount": amount,
            "purchase_order_id": request.order_id,
            "purchase_order_name": request.order_name,
        });
        let text = self.post("/epayment/initiate/", body).await?;
        let parsed: InitiateResponse = parse(&text)?;

        tracing::info!(pidx = %parsed.pidx, order_id = %request.order_id, "khalti payment initiated");

        Ok(PaymentInitiation {
            provider_ref: parsed.pidx,
            redirect_url: parsed.payment_url,
            form_fields: None,
        })
    }

    async fn verify(&self, request: &VerifyRequest<'_>) -> Result<PaymentVerification, GatewayError> {
        let text = self
            .post("/epayment/lookup/", json!({ "pidx": request.provider_ref }))
            .await?;
        let parsed: LookupResponse = parse(&text)?;

        Ok(PaymentVerification {
            status: map_status(&parsed.status),
            paisa: parsed.total_amount,
            external_txn_id: parsed.transaction_id.filter(|t| !t.is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(map_status("Completed"), GatewayStatus::Complete);
        assert_eq!(map_status("Pending"), GatewayStatus::Pending);
        assert_eq!(map_status("Initiated"), GatewayStatus::Pending);
        assert_eq!(map_status("Refunded"), GatewayStatus::Refunded);
        assert_eq!(map_status("Expired"), GatewayStatus::Failed);
        assert_eq!(map_status("User canceled"), GatewayStatus::Failed);
    }

    #[test]
    fn test_lookup_parse() {
        let text = r#"{"pidx":"HT6o6PEZRWFJ5ygavzHWd5","total_amount":200000,"status":"Completed","transaction_id":"GFq9PFS7b2iYvL8Lir9oXe","fee":0,"refunded":false}"#;
        let parsed: LookupResponse = parse(text).unwrap();
        assert_eq!(parsed.total_amount, 200000);
        assert_eq!(parsed.transaction_id.as_deref(), Some("GFq9PFS7b2iYvL8Lir9oXe"));
    }

    #[test]
    fn test_lookup_parse_malformed() {
        let err = parse::<LookupResponse>("<html>bad gateway</html>").unwrap_err();
        assert!(matches!(err, GatewayError::Malformed { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_gateway_error() {
        let gateway = KhaltiGateway::new(
            "test-key".to_string(),
            "http://127.0.0.1:9".to_string(),
            "http://localhost".to_string(),
            Duration::from_secs(2),
        )
        .unwrap();
        let err = gateway
            .verify(&VerifyRequest {
                provider_ref: "pidx",
                order_id: "order",
                amount: 10,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Unreachable { .. } | GatewayError::Timeout { .. }
        ));
    }

    #[tokio::test]
    async fn test_oversized_amount_is_refused_before_sending() {
        let gateway = KhaltiGateway::new(
            "test-key".to_string(),
            "http://127.0.0.1:9".to_string(),
            "http://localhost".to_string(),
            Duration::from_secs(2),
        )
        .unwrap();
        let err = gateway
            .initiate(&PaymentRequest {
                order_id: "order".to_string(),
                order_name: "Booking".to_string(),
                amount: 4_000_000_000_000_000_000,
                success_url: "http://localhost/ok".to_string(),
                failure_url: "http://localhost/fail".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::AmountOutOfRange(_)));
    }
}
