use std::sync::{Arc, Mutex};

use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use eventbook::config::AppConfig;
use eventbook::db;
use eventbook::handlers;
use eventbook::services::payment::esewa::EsewaGateway;
use eventbook::services::payment::khalti::KhaltiGateway;
use eventbook::services::payment::PaymentGateway;
use eventbook::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    let conn = db::init_db(&config.database_url)?;

    let gateway: Box<dyn PaymentGateway> = match config.payment_gateway.as_str() {
        "esewa" => {
            anyhow::ensure!(
                !config.esewa_secret_key.is_empty(),
                "ESEWA_SECRET_KEY must be set when PAYMENT_GATEWAY=esewa"
            );
            tracing::info!("using eSewa payment gateway (product: {})", config.esewa_product_code);
            Box::new(EsewaGateway::new(
                config.esewa_product_code.clone(),
                config.esewa_secret_key.clone(),
                config.esewa_form_url.clone(),
                config.esewa_status_url.clone(),
                config.gateway_timeout(),
            )?)
        }
        "khalti" => {
            anyhow::ensure!(
                !config.khalti_secret_key.is_empty(),
                "KHALTI_SECRET_KEY must be set when PAYMENT_GATEWAY=khalti"
            );
            tracing::info!("using Khalti payment gateway (url: {})", config.khalti_base_url);
            Box::new(KhaltiGateway::new(
                config.khalti_secret_key.clone(),
                config.khalti_base_url.clone(),
                config.public_base_url.clone(),
                config.gateway_timeout(),
            )?)
        }
        other => anyhow::bail!("unknown PAYMENT_GATEWAY {other}, expected khalti or esewa"),
    };

    let state = Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        config: config.clone(),
        gateway,
    });

    let app = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/services", post(handlers::services::create_service))
        .route("/services/:id", get(handlers::services::get_service))
        .route(
            "/availability/:service_id",
            get(handlers::availability::get_availability),
        )
        .route("/bookings", post(handlers::bookings::create_booking))
        .route("/bookings/user", get(handlers::bookings::list_user_bookings))
        .route(
            "/bookings/vendor",
            get(handlers::bookings::list_vendor_bookings),
        )
        .route("/bookings/:id", get(handlers::bookings::get_booking))
        .route("/bookings/:id/status", put(handlers::bookings::update_status))
        .route("/bookings/:id/cancel", put(handlers::bookings::cancel_booking))
        .route(
            "/bookings/:id/verify-payment",
            post(handlers::bookings::verify_payment),
        )
        .route(
            "/bookings/:id/retry-payment",
            post(handlers::bookings::retry_payment),
        )
        .route(
            "/payments/:gateway/callback",
            get(handlers::payments::payment_callback),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
