use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

use marquee_core::payment::{CreateIntentRequest, PaymentRecord, PaymentStatus, WebhookUpdate};
use marquee_core::CoreError;

use crate::{error::ApiError, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/payments/intent", post(create_intent))
        .route("/v1/payments/{id}", get(get_payment))
        .route("/v1/webhooks/payments", post(handle_payment_webhook))
}

/// POST /v1/payments/intent
/// Open a payment attempt against a pending booking and park the booking in
/// AWAITING_PAYMENT so it is clear a gateway round-trip is in flight.
async fn create_intent(
    State(state): State<AppState>,
    Json(req): Json<CreateIntentRequest>,
) -> Result<(StatusCode, Json<PaymentRecord>), ApiError> {
    let booking_id = req.booking_id;
    let record = state.payments.create_intent(req).await?;
    state.reservations.mark_awaiting_payment(booking_id).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /v1/payments/{id}
async fn get_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<PaymentRecord>, ApiError> {
    let record = state
        .payments
        .get_payment(payment_id)
        .await?
        .ok_or_else(|| CoreError::not_found("Payment not found"))?;
    Ok(Json(record))
}

/// POST /v1/webhooks/payments
/// Gateway callback. Applies the payment outcome, then reconciles the
/// booking: PAID finalizes the seats and issues tickets, FAILED and
/// REFUNDED are recorded on the booking. Retries are harmless end to end.
async fn handle_payment_webhook(
    State(state): State<AppState>,
    Json(update): Json<WebhookUpdate>,
) -> Result<Json<PaymentRecord>, ApiError> {
    tracing::info!(
        transaction_id = ?update.transaction_id,
        booking_id = ?update.booking_id,
        status = update.status.as_str(),
        "Received payment webhook"
    );

    let record = state.payments.record_webhook(update).await?;

    match record.status {
        PaymentStatus::Paid => {
            let outcome = state.reservations.finalize_booking(record.booking_id).await?;
            let issued = state.tickets.issue_for_booking(record.booking_id).await?;
            tracing::info!(
                booking_id = %record.booking_id,
                newly_assigned = outcome.newly_assigned,
                already_finalized = outcome.already_finalized,
                tickets_issued = issued.len(),
                "Booking confirmed via webhook"
            );
        }
        PaymentStatus::Failed => {
            state
                .reservations
                .set_payment_status(
                    record.booking_id,
                    marquee_core::status::BookingPaymentStatus::Failed,
                )
                .await?;
        }
        PaymentStatus::Refunded => {
            state
                .reservations
                .set_payment_status(
                    record.booking_id,
                    marquee_core::status::BookingPaymentStatus::Refunded,
                )
                .await?;
        }
        PaymentStatus::Pending | PaymentStatus::Processing => {}
    }

    Ok(Json(record))
}
