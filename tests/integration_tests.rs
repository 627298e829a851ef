use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::{get, post, put};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use eventbook::config::AppConfig;
use eventbook::db;
use eventbook::handlers;
use eventbook::services::payment::{
    GatewayError, GatewayStatus, PaymentGateway, PaymentInitiation, PaymentRequest,
    PaymentVerification, VerifyRequest,
};
use eventbook::state::AppState;

const DAY: &str = "2099-06-20";

// ── Mock Gateway ──

/// Settled amounts are scripted in rupees and reported in paisa.
#[derive(Clone)]
enum Outcome {
    Status(GatewayStatus, i64),
    Unreachable,
}

struct MockGateway {
    outcome: Arc<Mutex<Outcome>>,
    initiated: Arc<Mutex<Vec<PaymentRequest>>>,
}

#[async_trait]
impl PaymentGateway for MockGateway {
    fn name(&self) -> &'static str {
        "khalti"
    }

    async fn initiate(&self, request: &PaymentRequest) -> Result<PaymentInitiation, GatewayError> {
        let mut initiated = self.initiated.lock().unwrap();
        initiated.push(request.clone());
        Ok(PaymentInitiation {
            provider_ref: format!("pidx-{}", initiated.len()),
            redirect_url: "https://test-pay.khalti.com/?pidx=mock".to_string(),
            form_fields: None,
        })
    }

    async fn verify(&self, _request: &VerifyRequest<'_>) -> Result<PaymentVerification, GatewayError> {
        match self.outcome.lock().unwrap().clone() {
            Outcome::Status(status, rupees) => Ok(PaymentVerification {
                status,
                paisa: rupees * 100,
                external_txn_id: Some("txn-mock".to_string()),
            }),
            Outcome::Unreachable => Err(GatewayError::Unreachable {
                gateway: "khalti",
                message: "connection reset".to_string(),
            }),
        }
    }
}

// ── Helpers ──

fn test_config() -> AppConfig {
    AppConfig {
        port: 3000,
        database_url: ":memory:".to_string(),
        public_base_url: "http://localhost:3000".to_string(),
        payment_gateway: "khalti".to_string(),
        khalti_secret_key: "test-key".to_string(),
        khalti_base_url: "http://127.0.0.1:9".to_string(),
        esewa_product_code: "EPAYTEST".to_string(),
        esewa_secret_key: "".to_string(),
        esewa_form_url: "".to_string(),
        esewa_status_url: "".to_string(),
        gateway_timeout_secs: 2,
    }
}

struct Harness {
    app: Router,
    outcome: Arc<Mutex<Outcome>>,
    initiated: Arc<Mutex<Vec<PaymentRequest>>>,
}

impl Harness {
    fn new() -> Self {
        let conn = db::init_db(":memory:").unwrap();
        let outcome = Arc::new(Mutex::new(Outcome::Status(GatewayStatus::Complete, 2000)));
        let initiated = Arc::new(Mutex::new(vec![]));
        let state = Arc::new(AppState {
            db: Arc::new(Mutex::new(conn)),
            config: test_config(),
            gateway: Box::new(MockGateway {
                outcome: Arc::clone(&outcome),
                initiated: Arc::clone(&initiated),
            }),
        });
        Self {
            app: test_app(state),
            outcome,
            initiated,
        }
    }

    fn set_outcome(&self, outcome: Outcome) {
        *self.outcome.lock().unwrap() = outcome;
    }

    async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
        let res = self.app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    async fn create_venue(&self, vendor: &str) -> String {
        let (status, body) = self
            .send(request(
                "POST",
                "/services",
                Some((vendor, "vendor")),
                Some(venue_payload()),
            ))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["id"].as_str().unwrap().to_string()
    }

    async fn book(&self, user: &str, payload: Value) -> (StatusCode, Value) {
        self.send(request("POST", "/bookings", Some((user, "user")), Some(payload)))
            .await
    }

    async fn confirm(&self, booking_id: &str, vendor: &str) -> (StatusCode, Value) {
        self.send(request(
            "PUT",
            &format!("/bookings/{booking_id}/status"),
            Some((vendor, "vendor")),
            Some(json!({ "status": "confirmed" })),
        ))
        .await
    }

    async fn verify(&self, booking_id: &str, user: &str, pidx: &str) -> (StatusCode, Value) {
        self.send(request(
            "POST",
            &format!("/bookings/{booking_id}/verify-payment"),
            Some((user, "user")),
            Some(json!({ "pidx": pidx })),
        ))
        .await
    }
}

fn request(method: &str, uri: &str, who: Option<(&str, &str)>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some((id, role)) = who {
        builder = builder.header("X-User-Id", id).header("X-User-Role", role);
    }
    match body {
        Some(body) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

fn venue_payload() -> Value {
    json!({
        "name": "Royal Garden Banquet",
        "category": "venue",
        "price": 1000,
        "capacity": 300,
        "cateringMenu": [
            { "id": "dal", "name": "Dal Makhani", "price": 0 },
            { "id": "sekuwa", "name": "Sekuwa", "price": 50 }
        ],
        "cateringPackages": [{
            "id": "pkg-classic",
            "name": "Classic",
            "basePrice": 500,
            "minGuests": 10,
            "maxGuests": 200,
            "includedItems": [{ "menuItemId": "dal" }],
            "optionalItems": [{ "menuItemId": "sekuwa", "maxSelection": 2 }],
            "menuSections": [{
                "title": "Starters",
                "groups": [{ "name": "Veg", "maxSelection": 1, "items": ["Pakoda", "Chatpate"] }]
            }]
        }]
    })
}

fn booking_payload(service_id: &str, periods: &[&str]) -> Value {
    json!({
        "serviceId": service_id,
        "date": DAY,
        "periods": periods,
        "totalPrice": 1000 * periods.len() as i64,
    })
}

fn test_app(state: Arc<AppState>) -> Router {
    Router::new()
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
        .with_state(state)
}

// ── Tests ──

#[tokio::test]
async fn test_health() {
    let h = Harness::new();
    let (status, body) = h.send(request("GET", "/health", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_end_to_end_booking_and_payment() {
    let h = Harness::new();
    let service_id = h.create_venue("vendor-1").await;

    let (status, booking) = h
        .book("user-1", booking_payload(&service_id, &["morning", "evening"]))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{booking}");
    assert_eq!(booking["totalPrice"], 2000);
    assert_eq!(booking["status"], "pending");
    assert_eq!(booking["periods"], json!(["morning", "evening"]));
    let booking_id = booking["id"].as_str().unwrap().to_string();

    let (status, body) = h.confirm(&booking_id, "vendor-1").await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["booking"]["status"], "confirmed");
    assert_eq!(body["booking"]["payment"]["status"], "pending");
    assert_eq!(body["paymentInitiation"]["providerRef"], "pidx-1");
    {
        let initiated = h.initiated.lock().unwrap();
        assert_eq!(initiated.len(), 1);
        assert_eq!(initiated[0].amount, 2000);
        assert_eq!(
            initiated[0].success_url,
            "http://localhost:3000/payments/khalti/callback"
        );
    }

    let (status, body) = h.verify(&booking_id, "user-1", "pidx-1").await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["booking"]["status"], "paid");
    assert_eq!(body["booking"]["payment"]["status"], "completed");
    assert!(body["booking"]["payment"]["paidAt"].is_string());
}

#[tokio::test]
async fn test_catering_total_is_server_computed() {
    let h = Harness::new();
    let service_id = h.create_venue("vendor-1").await;

    let (status, booking) = h
        .book(
            "user-1",
            json!({
                "serviceId": service_id,
                "date": DAY,
                "periods": ["evening"],
                "totalPrice": 1,
                "cateringPackage": {
                    "packageId": "pkg-classic",
                    "guestCount": 10,
                    "selectedItems": [
                        { "menuItemId": "dal", "quantity": 1 },
                        { "menuItemId": "sekuwa", "quantity": 2, "isOptional": true },
                        { "menuItemId": "section-0-0-1", "quantity": 1, "isSectionItem": true }
                    ]
                }
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{booking}");
    assert_eq!(booking["totalPrice"], 1000 + 5100);
    assert_eq!(booking["cateringPackage"]["guestCount"], 10);
}

#[tokio::test]
async fn test_catering_rules_rejected() {
    let h = Harness::new();
    let service_id = h.create_venue("vendor-1").await;

    let with_selection = |guests: u32, items: Value| {
        json!({
            "serviceId": service_id,
            "date": DAY,
            "periods": ["day"],
            "cateringPackage": { "packageId": "pkg-classic", "guestCount": guests, "selectedItems": items }
        })
    };

    let (status, _) = h.book("user-1", with_selection(9, json!([]))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = h.book("user-1", with_selection(201, json!([]))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = h
        .book(
            "user-1",
            with_selection(20, json!([{ "menuItemId": "sekuwa", "quantity": 3, "isOptional": true }])),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // two picks from a "choose 1" group
    let (status, _) = h
        .book(
            "user-1",
            with_selection(
                20,
                json!([
                    { "menuItemId": "section-0-0-0", "quantity": 1, "isSectionItem": true },
                    { "menuItemId": "section-0-0-1", "quantity": 1, "isSectionItem": true }
                ]),
            ),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // nothing was persisted by the rejected requests
    let (_, bookings) = h
        .send(request("GET", "/bookings/user", Some(("user-1", "user")), None))
        .await;
    assert_eq!(bookings.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_conflict_reports_only_taken_periods() {
    let h = Harness::new();
    let service_id = h.create_venue("vendor-1").await;

    let (status, _) = h.book("user-1", booking_payload(&service_id, &["morning"])).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = h
        .book("user-2", booking_payload(&service_id, &["morning", "day"]))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["conflictingPeriods"], json!(["morning"]));

    let (status, _) = h.book("user-2", booking_payload(&service_id, &["day"])).await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_concurrent_requests_book_a_period_once() {
    let h = Harness::new();
    let service_id = h.create_venue("vendor-1").await;

    let mut handles = vec![];
    for i in 0..8 {
        let app = h.app.clone();
        let payload = booking_payload(&service_id, &["evening"]);
        handles.push(tokio::spawn(async move {
            let user = format!("user-{i}");
            let res = app
                .oneshot(request("POST", "/bookings", Some((user.as_str(), "user")), Some(payload)))
                .await
                .unwrap();
            res.status()
        }));
    }

    let mut created = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            StatusCode::CREATED => created += 1,
            StatusCode::CONFLICT => conflicts += 1,
            other => panic!("unexpected status {other}"),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(conflicts, 7);
}

#[tokio::test]
async fn test_availability_scopes() {
    let h = Harness::new();
    let service_id = h.create_venue("vendor-1").await;

    let (_, pending) = h.book("user-1", booking_payload(&service_id, &["morning"])).await;
    let (_, other) = h.book("user-2", booking_payload(&service_id, &["evening"])).await;
    h.confirm(other["id"].as_str().unwrap(), "vendor-1").await;

    let (status, body) = h
        .send(request(
            "GET",
            &format!("/availability/{service_id}?date={DAY}"),
            None,
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["bookedPeriods"], json!(["morning", "evening"]));

    let (_, body) = h
        .send(request(
            "GET",
            &format!("/availability/{service_id}?date={DAY}&scope=confirmed"),
            None,
            None,
        ))
        .await;
    assert_eq!(body["bookedPeriods"], json!(["evening"]));

    // cancelling frees the period
    h.send(request(
        "PUT",
        &format!("/bookings/{}/cancel", pending["id"].as_str().unwrap()),
        Some(("user-1", "user")),
        None,
    ))
    .await;
    let (_, body) = h
        .send(request(
            "GET",
            &format!("/availability/{service_id}?date={DAY}"),
            None,
            None,
        ))
        .await;
    assert_eq!(body["bookedPeriods"], json!(["evening"]));
}

#[tokio::test]
async fn test_identity_and_ownership_guards() {
    let h = Harness::new();
    let service_id = h.create_venue("vendor-1").await;

    let (status, _) = h
        .send(request(
            "POST",
            "/bookings",
            None,
            Some(booking_payload(&service_id, &["day"])),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (_, booking) = h.book("user-1", booking_payload(&service_id, &["day"])).await;
    let booking_id = booking["id"].as_str().unwrap();

    let (status, _) = h.confirm(booking_id, "vendor-2").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = h
        .send(request(
            "PUT",
            &format!("/bookings/{booking_id}/status"),
            Some(("user-1", "user")),
            Some(json!({ "status": "confirmed" })),
        ))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = h
        .send(request(
            "PUT",
            &format!("/bookings/{booking_id}/cancel"),
            Some(("user-2", "user")),
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = h
        .send(request(
            "GET",
            &format!("/bookings/{booking_id}"),
            Some(("user-2", "user")),
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = h
        .send(request(
            "GET",
            &format!("/bookings/{booking_id}"),
            Some(("admin-1", "admin")),
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "pending");
}

#[tokio::test]
async fn test_second_service_for_vendor_rejected() {
    let h = Harness::new();
    h.create_venue("vendor-1").await;
    let (status, _) = h
        .send(request(
            "POST",
            "/services",
            Some(("vendor-1", "vendor")),
            Some(venue_payload()),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = h
        .send(request("GET", "/services/missing", None, None))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_verify_twice_keeps_paid_at() {
    let h = Harness::new();
    let service_id = h.create_venue("vendor-1").await;
    let (_, booking) = h
        .book("user-1", booking_payload(&service_id, &["morning", "evening"]))
        .await;
    let booking_id = booking["id"].as_str().unwrap();
    h.confirm(booking_id, "vendor-1").await;

    let (status, first) = h.verify(booking_id, "user-1", "pidx-1").await;
    assert_eq!(status, StatusCode::OK);
    let (status, second) = h.verify(booking_id, "user-1", "pidx-1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["success"], true);
    assert_eq!(second["alreadyPaid"], true);
    assert_eq!(
        first["booking"]["payment"]["paidAt"],
        second["booking"]["payment"]["paidAt"]
    );
}

#[tokio::test]
async fn test_gateway_failure_is_non_committal() {
    let h = Harness::new();
    let service_id = h.create_venue("vendor-1").await;
    let (_, booking) = h
        .book("user-1", booking_payload(&service_id, &["morning", "evening"]))
        .await;
    let booking_id = booking["id"].as_str().unwrap();
    h.confirm(booking_id, "vendor-1").await;

    h.set_outcome(Outcome::Unreachable);
    let (status, body) = h.verify(booking_id, "user-1", "pidx-1").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("unreachable"));

    let (_, current) = h
        .send(request(
            "GET",
            &format!("/bookings/{booking_id}"),
            Some(("user-1", "user")),
            None,
        ))
        .await;
    assert_eq!(current["status"], "confirmed");
    assert_eq!(current["payment"]["status"], "pending");

    // once the gateway recovers the same reference settles normally
    h.set_outcome(Outcome::Status(GatewayStatus::Complete, 2000));
    let (status, body) = h.verify(booking_id, "user-1", "pidx-1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["booking"]["status"], "paid");
}

#[tokio::test]
async fn test_failed_payment_then_retry() {
    let h = Harness::new();
    let service_id = h.create_venue("vendor-1").await;
    let (_, booking) = h
        .book("user-1", booking_payload(&service_id, &["morning", "evening"]))
        .await;
    let booking_id = booking["id"].as_str().unwrap();
    h.confirm(booking_id, "vendor-1").await;

    h.set_outcome(Outcome::Status(GatewayStatus::Failed, 2000));
    let (status, body) = h.verify(booking_id, "user-1", "pidx-1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["booking"]["status"], "confirmed");
    assert_eq!(body["booking"]["payment"]["status"], "failed");

    let (status, body) = h
        .send(request(
            "POST",
            &format!("/bookings/{booking_id}/retry-payment"),
            Some(("user-1", "user")),
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["paymentInitiation"]["providerRef"], "pidx-2");
    assert_eq!(body["booking"]["payment"]["status"], "pending");

    // the stale reference is no longer accepted
    let (status, _) = h.verify(booking_id, "user-1", "pidx-1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_terminal_states_stay_put() {
    let h = Harness::new();
    let service_id = h.create_venue("vendor-1").await;

    let (_, cancelled) = h.book("user-1", booking_payload(&service_id, &["morning"])).await;
    let cancelled_id = cancelled["id"].as_str().unwrap();
    let (status, body) = h
        .send(request(
            "PUT",
            &format!("/bookings/{cancelled_id}/cancel"),
            Some(("user-1", "user")),
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");
    assert_eq!(body["cancelledBy"], "user");

    let (status, _) = h.confirm(cancelled_id, "vendor-1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    h.set_outcome(Outcome::Status(GatewayStatus::Complete, 1000));
    let (_, paid) = h.book("user-1", booking_payload(&service_id, &["day"])).await;
    let paid_id = paid["id"].as_str().unwrap();
    h.confirm(paid_id, "vendor-1").await;
    let (status, _) = h.verify(paid_id, "user-1", "pidx-1").await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = h
        .send(request(
            "PUT",
            &format!("/bookings/{paid_id}/cancel"),
            Some(("user-1", "user")),
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = h
        .send(request(
            "PUT",
            &format!("/bookings/{paid_id}/status"),
            Some(("vendor-1", "vendor")),
            Some(json!({ "status": "cancelled" })),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, vendor_view) = h
        .send(request("GET", "/bookings/vendor", Some(("vendor-1", "vendor")), None))
        .await;
    let statuses: Vec<&str> = vendor_view
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["status"].as_str().unwrap())
        .collect();
    assert_eq!(statuses.len(), 2);
    assert!(statuses.contains(&"paid"));
    assert!(statuses.contains(&"cancelled"));
}

#[tokio::test]
async fn test_gateway_callback_settles_booking() {
    let h = Harness::new();
    let service_id = h.create_venue("vendor-1").await;
    let (_, booking) = h
        .book("user-1", booking_payload(&service_id, &["morning", "evening"]))
        .await;
    let booking_id = booking["id"].as_str().unwrap();
    h.confirm(booking_id, "vendor-1").await;

    // the query's own status is ignored; the lookup decides
    let (status, body) = h
        .send(request(
            "GET",
            "/payments/khalti/callback?pidx=pidx-1&status=Completed",
            None,
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["bookingId"], booking_id);
    assert_eq!(body["status"], "paid");

    let (status, _) = h
        .send(request("GET", "/payments/khalti/callback", None, None))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = h
        .send(request("GET", "/payments/esewa/callback?data=abc", None, None))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_past_date_and_bad_periods_rejected() {
    let h = Harness::new();
    let service_id = h.create_venue("vendor-1").await;

    let (status, _) = h
        .book(
            "user-1",
            json!({ "serviceId": service_id, "date": "2001-01-01", "periods": ["day"] }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = h
        .book(
            "user-1",
            json!({ "serviceId": service_id, "date": DAY, "periods": [] }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = h
        .book(
            "user-1",
            json!({ "serviceId": "nope", "date": DAY, "periods": ["day"] }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_extreme_prices_are_rejected_without_harming_the_store() {
    let h = Harness::new();

    let mut huge = venue_payload();
    huge["price"] = json!(4_000_000_000_000_000_000_i64);
    let (status, body) = h
        .send(request("POST", "/services", Some(("vendor-1", "vendor")), Some(huge)))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    // largest accepted price: one period fits, three do not
    let mut capped = venue_payload();
    capped["price"] = json!(i64::MAX / 100);
    let (status, body) = h
        .send(request("POST", "/services", Some(("vendor-2", "vendor")), Some(capped)))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let service_id = body["id"].as_str().unwrap().to_string();

    let (status, body) = h
        .book("user-1", booking_payload(&service_id, &["morning", "day", "evening"]))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    let (status, body) = h.book("user-1", booking_payload(&service_id, &["day"])).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["totalPrice"], json!(i64::MAX / 100));

    // an unlimited optional item at the largest quantity is priced, not overflowed
    let mut unlimited = venue_payload();
    unlimited["cateringPackages"][0]["optionalItems"][0]["maxSelection"] = json!(0);
    let (status, body) = h
        .send(request("POST", "/services", Some(("vendor-3", "vendor")), Some(unlimited)))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let venue_id = body["id"].as_str().unwrap().to_string();
    let (status, body) = h
        .book(
            "user-2",
            json!({
                "serviceId": venue_id,
                "date": DAY,
                "periods": ["evening"],
                "cateringPackage": {
                    "packageId": "pkg-classic",
                    "guestCount": 10,
                    "selectedItems": [
                        { "menuItemId": "sekuwa", "quantity": u32::MAX, "isOptional": true }
                    ]
                }
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["totalPrice"], json!(1000 + 5000 + 50 * i64::from(u32::MAX)));
}

#[tokio::test]
async fn test_user_cannot_cancel_while_payment_is_running() {
    let h = Harness::new();
    let service_id = h.create_venue("vendor-1").await;
    let (_, booking) = h
        .book("user-1", booking_payload(&service_id, &["morning", "evening"]))
        .await;
    let booking_id = booking["id"].as_str().unwrap();
    h.confirm(booking_id, "vendor-1").await;

    let (status, body) = h
        .send(request(
            "PUT",
            &format!("/bookings/{booking_id}/cancel"),
            Some(("user-1", "user")),
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("pidx-1"));

    // the gateway reports the payment went through; it is recorded
    let (status, body) = h.verify(booking_id, "user-1", "pidx-1").await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["booking"]["status"], "paid");
    assert_eq!(body["booking"]["payment"]["status"], "completed");
}
