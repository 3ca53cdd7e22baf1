use axum::{
    extract::{Path, State},
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use marquee_core::repository::{ReissueOutcome, ScanOutcome, TicketDetail};
use marquee_core::CoreError;

use crate::{
    error::ApiError, middleware::auth::staff_auth_middleware, state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub qr_token: String,
    pub gate: Option<String>,
}

pub fn routes(state: AppState) -> Router<AppState> {
    let staff = Router::new()
        .route("/v1/tickets/scan", post(scan_ticket))
        .route("/v1/tickets/{id}/reissue", post(reissue_ticket))
        .route("/v1/tickets/{id}/void", post(void_ticket))
        .route_layer(middleware::from_fn_with_state(
            state,
            staff_auth_middleware,
        ));

    Router::new()
        .route("/v1/tickets/{id}", get(get_ticket))
        .route("/v1/bookings/{id}/tickets", get(list_booking_tickets))
        .merge(staff)
}

/// POST /v1/tickets/scan
/// Gate check-in by QR token. The first scan admits; repeats report the
/// original check-in without mutating; voided and refunded tokens 409.
async fn scan_ticket(
    State(state): State<AppState>,
    Json(req): Json<ScanRequest>,
) -> Result<Json<ScanOutcome>, ApiError> {
    let outcome = state
        .tickets
        .scan(&req.qr_token, req.gate.as_deref())
        .await?;
    tracing::info!(
        ticket_id = %outcome.ticket_id,
        first_scan = outcome.first_scan,
        "Ticket scanned"
    );
    Ok(Json(outcome))
}

/// GET /v1/tickets/{id}
async fn get_ticket(
    State(state): State<AppState>,
    Path(ticket_id): Path<Uuid>,
) -> Result<Json<TicketDetail>, ApiError> {
    let ticket = state
        .tickets
        .get_ticket(ticket_id)
        .await?
        .ok_or_else(|| CoreError::not_found("Ticket not found"))?;
    Ok(Json(ticket))
}

/// GET /v1/bookings/{id}/tickets
async fn list_booking_tickets(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<Vec<TicketDetail>>, ApiError> {
    let tickets = state.tickets.list_by_booking(booking_id).await?;
    Ok(Json(tickets))
}

/// POST /v1/tickets/{id}/reissue
/// Void the ticket and hand out a replacement with a fresh QR token.
async fn reissue_ticket(
    State(state): State<AppState>,
    Path(ticket_id): Path<Uuid>,
) -> Result<Json<ReissueOutcome>, ApiError> {
    let outcome = state.tickets.reissue(ticket_id).await?;
    Ok(Json(outcome))
}

/// POST /v1/tickets/{id}/void
async fn void_ticket(
    State(state): State<AppState>,
    Path(ticket_id): Path<Uuid>,
) -> Result<Json<TicketDetail>, ApiError> {
    let ticket = state.tickets.void(ticket_id).await?;
    Ok(Json(ticket))
}
