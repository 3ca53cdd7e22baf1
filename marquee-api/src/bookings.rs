use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use marquee_core::repository::{
    BookingDetail, BookingFilters, CancelOutcome, HoldReceipt, HoldRequest,
};
use marquee_shared::models::events::SeatHeldEvent;

use crate::{error::ApiError, middleware::auth::optional_user_id, state::AppState};

#[derive(Debug, Deserialize)]
pub struct HoldBody {
    pub showtime_id: Uuid,
    pub seat_ids: Vec<Uuid>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/bookings/hold", post(hold_seats))
        .route("/v1/bookings", get(list_bookings))
        .route("/v1/bookings/{id}", get(get_booking))
        .route("/v1/bookings/{id}/cancel", post(cancel_booking))
}

/// POST /v1/bookings/hold
/// Claim seats for a showtime. All requested seats are held or none are;
/// losers of a seat race get the contested ids back in the 409 body.
async fn hold_seats(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<HoldBody>,
) -> Result<(StatusCode, Json<HoldReceipt>), ApiError> {
    let req = HoldRequest {
        showtime_id: body.showtime_id,
        seat_ids: body.seat_ids,
        user_id: optional_user_id(&state, &headers),
    };

    let receipt = state.reservations.hold_seats(req).await?;

    // Fan out to seat-map subscribers so contested seats grey out live.
    let held_at = Utc::now().timestamp();
    for item in &receipt.items {
        let _ = state.sse_tx.send(SeatHeldEvent {
            showtime_id: body.showtime_id,
            seat_id: item.seat_id,
            seat_number: item.seat_number.clone(),
            booking_id: receipt.booking_id,
            held_at,
            expires_at: receipt.expires_at.timestamp(),
        });
    }

    Ok((StatusCode::CREATED, Json(receipt)))
}

/// GET /v1/bookings/{id}
async fn get_booking(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<BookingDetail>, ApiError> {
    let detail = state
        .reservations
        .get_booking(booking_id)
        .await?
        .ok_or_else(|| marquee_core::CoreError::not_found("Booking not found"))?;
    Ok(Json(detail))
}

/// GET /v1/bookings
/// Filterable listing; anonymous callers see their own bookings by passing
/// the user_id the guest login handed them.
async fn list_bookings(
    State(state): State<AppState>,
    Query(filters): Query<BookingFilters>,
) -> Result<Json<Vec<BookingDetail>>, ApiError> {
    let bookings = state.reservations.list_bookings(filters).await?;
    Ok(Json(bookings))
}

/// POST /v1/bookings/{id}/cancel
/// Pending bookings release their holds; confirmed bookings are refunded
/// when outside the cutoff window.
async fn cancel_booking(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<CancelOutcome>, ApiError> {
    let outcome = state.reservations.cancel_booking(booking_id).await?;
    Ok(Json(outcome))
}
