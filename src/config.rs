use std::env;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub public_base_url: String,
    pub payment_gateway: String,
    pub khalti_secret_key: String,
    pub khalti_base_url: String,
    pub esewa_product_code: String,
    pub esewa_secret_key: String,
    pub esewa_form_url: String,
    pub esewa_status_url: String,
    pub gateway_timeout_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "eventbook.db".to_string()),
            public_base_url: env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            payment_gateway: env::var("PAYMENT_GATEWAY")
                .map(|v| v.to_lowercase())
                .unwrap_or_else(|_| "khalti".to_string()),
            khalti_secret_key: env::var("KHALTI_SECRET_KEY").unwrap_or_default(),
            khalti_base_url: env::var("KHALTI_BASE_URL")
                .unwrap_or_else(|_| "https://dev.khalti.com/api/v2".to_string()),
            esewa_product_code: env::var("ESEWA_PRODUCT_CODE")
                .unwrap_or_else(|_| "EPAYTEST".to_string()),
            esewa_secret_key: env::var("ESEWA_SECRET_KEY").unwrap_or_default(),
            esewa_form_url: env::var("ESEWA_FORM_URL").unwrap_or_else(|_| {
                "https://rc-epay.esewa.com.np/api/epay/main/v2/form".to_string()
            }),
            esewa_status_url: env::var("ESEWA_STATUS_URL").unwrap_or_else(|_| {
                "https://rc.esewa.com.np/api/epay/transaction/status/".to_string()
            }),
            gateway_timeout_secs: env::var("GATEWAY_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
        }
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway_timeout_secs.max(1))
    }

    /// Return URL the gateway redirects the customer to after checkout.
    pub fn payment_return_url(&self, gateway: &str) -> String {
        format!(
            "{}/payments/{gateway}/callback",
            self.public_base_url.trim_end_matches('/')
        )
    }
}
