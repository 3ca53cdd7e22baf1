use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use marquee_api::middleware::auth::StaffClaims;
use marquee_api::app;
use marquee_api::state::{AppState, AuthConfig};
use marquee_booking::ReservationPolicy;
use marquee_catalog::{Seat, SeatType, Showtime, StaticCatalog};
use marquee_store::MemoryStore;

const TEST_SECRET: &str = "test-secret";

struct Fixture {
    app: axum::Router,
    showtime: Showtime,
    seats: Vec<Seat>,
}

fn fixture() -> Fixture {
    let room_id = Uuid::new_v4();
    let showtime = Showtime {
        id: Uuid::new_v4(),
        movie_id: Uuid::new_v4(),
        room_id,
        starts_at: Utc::now() + Duration::hours(12),
        price_minor: 90_000,
        total_seats: 4,
        is_active: true,
    };
    let seats: Vec<Seat> = ["A1", "A2", "A3", "B1"]
        .iter()
        .enumerate()
        .map(|(i, n)| Seat {
            id: Uuid::new_v4(),
            room_id,
            seat_number: n.to_string(),
            row: n[..1].to_string(),
            column: (i % 3 + 1) as i32,
            seat_type: SeatType::Regular,
            price_minor: None,
            is_active: true,
        })
        .collect();

    let store = Arc::new(MemoryStore::new(ReservationPolicy::default()));
    store.register_showtime(showtime.clone(), seats.clone());

    let mut catalog = StaticCatalog::new();
    catalog.add_showtime(showtime.clone());
    for seat in &seats {
        catalog.add_seat(seat.clone());
    }

    let (sse_tx, _) = tokio::sync::broadcast::channel(100);
    let state = AppState {
        reservations: store.clone(),
        tickets: store.clone(),
        payments: store,
        catalog: Arc::new(catalog),
        sse_tx,
        auth: AuthConfig {
            secret: TEST_SECRET.to_string(),
            expiration: 3600,
        },
    };

    Fixture {
        app: app(state),
        showtime,
        seats,
    }
}

fn staff_token() -> String {
    let claims = StaffClaims {
        sub: "staff-1".to_string(),
        role: "STAFF".to_string(),
        exp: (Utc::now() + Duration::hours(1)).timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
    )
    .unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_json_staff(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {}", staff_token()))
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn hold(fx: &Fixture, seat_indices: &[usize]) -> (StatusCode, Value) {
    let seat_ids: Vec<Uuid> = seat_indices.iter().map(|&i| fx.seats[i].id).collect();
    let response = fx
        .app
        .clone()
        .oneshot(post_json(
            "/v1/bookings/hold",
            json!({ "showtime_id": fx.showtime.id, "seat_ids": seat_ids }),
        ))
        .await
        .unwrap();
    let status = response.status();
    (status, body_json(response).await)
}

async fn confirm_via_webhook(fx: &Fixture, booking_id: &str, txn: &str) {
    let response = fx
        .app
        .clone()
        .oneshot(post_json(
            "/v1/payments/intent",
            json!({ "booking_id": booking_id, "method": "VNPAY", "transaction_id": txn }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = fx
        .app
        .clone()
        .oneshot(post_json(
            "/v1/webhooks/payments",
            json!({ "transaction_id": txn, "status": "PAID" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_full_booking_flow_hold_pay_ticket_scan() {
    let fx = fixture();

    let (status, receipt) = hold(&fx, &[0, 1]).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(receipt["status"], "PENDING");
    assert_eq!(receipt["total_minor"], 180_000);
    assert_eq!(receipt["items"].as_array().unwrap().len(), 2);
    let booking_id = receipt["booking_id"].as_str().unwrap().to_string();

    // Intent parks the booking in AWAITING_PAYMENT.
    let response = fx
        .app
        .clone()
        .oneshot(post_json(
            "/v1/payments/intent",
            json!({ "booking_id": booking_id, "method": "VNPAY", "transaction_id": "TXN-1" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let intent = body_json(response).await;
    assert_eq!(intent["amount_minor"], 180_000);
    assert_eq!(intent["status"], "PENDING");

    let response = fx
        .app
        .clone()
        .oneshot(get(&format!("/v1/bookings/{booking_id}")))
        .await
        .unwrap();
    let booking = body_json(response).await;
    assert_eq!(booking["status"], "AWAITING_PAYMENT");

    // Gateway settles the payment.
    let response = fx
        .app
        .clone()
        .oneshot(post_json(
            "/v1/webhooks/payments",
            json!({ "transaction_id": "TXN-1", "status": "PAID" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = fx
        .app
        .clone()
        .oneshot(get(&format!("/v1/bookings/{booking_id}")))
        .await
        .unwrap();
    let booking = body_json(response).await;
    assert_eq!(booking["status"], "CONFIRMED");
    assert_eq!(booking["payment_status"], "PAID");
    assert!(booking["seats"]
        .as_array()
        .unwrap()
        .iter()
        .all(|s| s["source"] == "booked"));

    // One ticket per seat.
    let response = fx
        .app
        .clone()
        .oneshot(get(&format!("/v1/bookings/{booking_id}/tickets")))
        .await
        .unwrap();
    let tickets = body_json(response).await;
    let tickets = tickets.as_array().unwrap();
    assert_eq!(tickets.len(), 2);
    let qr_token = tickets[0]["qr_token"].as_str().unwrap().to_string();

    // Gate scan, then a repeat scan of the same token.
    let response = fx
        .app
        .clone()
        .oneshot(post_json_staff(
            "/v1/tickets/scan",
            json!({ "qr_token": qr_token, "gate": "G2" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let scan = body_json(response).await;
    assert_eq!(scan["first_scan"], true);
    assert_eq!(scan["status"], "CHECKED_IN");

    let response = fx
        .app
        .clone()
        .oneshot(post_json_staff(
            "/v1/tickets/scan",
            json!({ "qr_token": qr_token }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let rescan = body_json(response).await;
    assert_eq!(rescan["first_scan"], false);
}

#[tokio::test]
async fn test_contested_seat_returns_conflict_with_seat_ids() {
    let fx = fixture();

    let (status, _) = hold(&fx, &[0, 1]).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = hold(&fx, &[1, 2]).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let contested: Vec<String> = body["seat_ids"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    assert_eq!(contested, vec![fx.seats[1].id.to_string()]);
}

#[tokio::test]
async fn test_webhook_retry_does_not_duplicate_tickets() {
    let fx = fixture();

    let (_, receipt) = hold(&fx, &[0, 1]).await;
    let booking_id = receipt["booking_id"].as_str().unwrap().to_string();
    confirm_via_webhook(&fx, &booking_id, "TXN-RETRY").await;

    // Gateway retries the delivery.
    let response = fx
        .app
        .clone()
        .oneshot(post_json(
            "/v1/webhooks/payments",
            json!({ "transaction_id": "TXN-RETRY", "status": "PAID" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = fx
        .app
        .clone()
        .oneshot(get(&format!("/v1/bookings/{booking_id}/tickets")))
        .await
        .unwrap();
    let tickets = body_json(response).await;
    assert_eq!(tickets.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_cancel_pending_booking_frees_the_seats() {
    let fx = fixture();

    let (_, receipt) = hold(&fx, &[0]).await;
    let booking_id = receipt["booking_id"].as_str().unwrap().to_string();

    let response = fx
        .app
        .clone()
        .oneshot(post_json(
            &format!("/v1/bookings/{booking_id}/cancel"),
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let outcome = body_json(response).await;
    assert_eq!(outcome["status"], "CANCELLED");
    assert_eq!(outcome["released_seats"], 1);

    // Seat is immediately acquirable again.
    let (status, _) = hold(&fx, &[0]).await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_cancel_confirmed_booking_refunds_with_compensation() {
    let fx = fixture();

    let (_, receipt) = hold(&fx, &[0, 1]).await;
    let booking_id = receipt["booking_id"].as_str().unwrap().to_string();
    let total = receipt["total_minor"].as_i64().unwrap();
    confirm_via_webhook(&fx, &booking_id, "TXN-REFUND").await;

    let response = fx
        .app
        .clone()
        .oneshot(post_json(
            &format!("/v1/bookings/{booking_id}/cancel"),
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let outcome = body_json(response).await;
    assert_eq!(outcome["status"], "REFUNDED");
    assert_eq!(outcome["released_seats"], 2);
    assert_eq!(outcome["compensation"]["amount_minor"], -total);
    assert_eq!(outcome["compensation"]["status"], "REFUNDED");

    // Tickets of the refunded booking no longer admit entry.
    let response = fx
        .app
        .clone()
        .oneshot(get(&format!("/v1/bookings/{booking_id}/tickets")))
        .await
        .unwrap();
    let tickets = body_json(response).await;
    assert!(tickets
        .as_array()
        .unwrap()
        .iter()
        .all(|t| t["status"] == "REFUNDED"));
}

#[tokio::test]
async fn test_second_cancel_conflicts() {
    let fx = fixture();

    let (_, receipt) = hold(&fx, &[0]).await;
    let booking_id = receipt["booking_id"].as_str().unwrap().to_string();

    let uri = format!("/v1/bookings/{booking_id}/cancel");
    let response = fx.app.clone().oneshot(post_json(&uri, json!({}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = fx.app.clone().oneshot(post_json(&uri, json!({}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_hold_with_empty_seat_ids_is_rejected() {
    let fx = fixture();
    let response = fx
        .app
        .clone()
        .oneshot(post_json(
            "/v1/bookings/hold",
            json!({ "showtime_id": fx.showtime.id, "seat_ids": [] }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_booking_is_404() {
    let fx = fixture();
    let response = fx
        .app
        .clone()
        .oneshot(get(&format!("/v1/bookings/{}", Uuid::new_v4())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_scan_and_sweep_require_staff_token() {
    let fx = fixture();

    let response = fx
        .app
        .clone()
        .oneshot(post_json(
            "/v1/tickets/scan",
            json!({ "qr_token": "deadbeef" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = fx
        .app
        .clone()
        .oneshot(post_json("/v1/admin/sweep", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = fx
        .app
        .clone()
        .oneshot(post_json_staff("/v1/admin/sweep", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let report = body_json(response).await;
    assert_eq!(report["expired"], 0);
}

#[tokio::test]
async fn test_guest_login_attributes_bookings() {
    let fx = fixture();

    let response = fx
        .app
        .clone()
        .oneshot(post_json("/v1/auth/guest", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let auth = body_json(response).await;
    let token = auth["token"].as_str().unwrap().to_string();
    let user_id = auth["user_id"].as_str().unwrap().to_string();

    let seat_ids = vec![fx.seats[0].id];
    let request = Request::builder()
        .method("POST")
        .uri("/v1/bookings/hold")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::from(
            json!({ "showtime_id": fx.showtime.id, "seat_ids": seat_ids }).to_string(),
        ))
        .unwrap();
    let response = fx.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = fx
        .app
        .clone()
        .oneshot(get(&format!("/v1/bookings?user_id={user_id}")))
        .await
        .unwrap();
    let bookings = body_json(response).await;
    assert_eq!(bookings.as_array().unwrap().len(), 1);
    assert_eq!(bookings[0]["user_id"].as_str().unwrap(), user_id);
}

#[tokio::test]
async fn test_failed_webhook_marks_payment_failed_without_confirming() {
    let fx = fixture();

    let (_, receipt) = hold(&fx, &[0]).await;
    let booking_id = receipt["booking_id"].as_str().unwrap().to_string();

    let response = fx
        .app
        .clone()
        .oneshot(post_json(
            "/v1/payments/intent",
            json!({ "booking_id": booking_id, "method": "MOMO", "transaction_id": "TXN-F" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = fx
        .app
        .clone()
        .oneshot(post_json(
            "/v1/webhooks/payments",
            json!({ "transaction_id": "TXN-F", "status": "FAILED", "failed_reason": "card declined" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = fx
        .app
        .clone()
        .oneshot(get(&format!("/v1/bookings/{booking_id}")))
        .await
        .unwrap();
    let booking = body_json(response).await;
    assert_eq!(booking["status"], "AWAITING_PAYMENT");
    assert_eq!(booking["payment_status"], "FAILED");
}
