use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreResult;
use crate::payment::{CreateIntentRequest, PaymentRecord, WebhookUpdate};
use crate::status::{BookingPaymentStatus, BookingStatus, TicketStatus};

// ============================================================================
// Reservation DTOs
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct HoldRequest {
    pub showtime_id: Uuid,
    pub seat_ids: Vec<Uuid>,
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HoldItem {
    pub seat_id: Uuid,
    pub seat_number: String,
    pub row: String,
    pub column: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct HoldReceipt {
    pub booking_id: Uuid,
    pub booking_number: String,
    pub status: BookingStatus,
    pub expires_at: DateTime<Utc>,
    pub total_minor: i64,
    pub currency: String,
    pub items: Vec<HoldItem>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SeatSource {
    Booked,
    Hold,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookingSeatEntry {
    pub seat_id: Uuid,
    pub seat_number: String,
    pub row: String,
    pub column: i32,
    /// Set for permanent assignments; holds have no charged price yet.
    pub unit_price_minor: Option<i64>,
    pub source: SeatSource,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShowtimeContext {
    pub id: Uuid,
    pub room_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub reference_price_minor: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookingDetail {
    pub id: Uuid,
    pub booking_number: String,
    pub user_id: Option<Uuid>,
    pub status: BookingStatus,
    pub payment_status: BookingPaymentStatus,
    pub currency: String,
    pub subtotal_minor: i64,
    pub discount_minor: i64,
    pub tax_minor: i64,
    pub fee_minor: i64,
    pub total_minor: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub showtime: ShowtimeContext,
    /// Permanent assignments when present, live holds otherwise.
    pub seats: Vec<BookingSeatEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookingFilters {
    pub user_id: Option<Uuid>,
    pub status: Option<BookingStatus>,
    pub payment_status: Option<BookingPaymentStatus>,
    pub showtime_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelOutcome {
    pub booking_id: Uuid,
    pub status: BookingStatus,
    pub released_seats: usize,
    /// Compensating payment created when a confirmed booking is refunded.
    pub compensation: Option<PaymentRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FinalizeOutcome {
    pub booking_id: Uuid,
    pub showtime_id: Uuid,
    pub status: BookingStatus,
    pub seat_ids: Vec<Uuid>,
    pub newly_assigned: usize,
    /// True when this call was a retry against an already-confirmed booking.
    pub already_finalized: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub expired: usize,
    pub released_holds: usize,
}

// ============================================================================
// Ticket DTOs
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct TicketDetail {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub showtime_id: Uuid,
    pub seat_id: Uuid,
    pub status: TicketStatus,
    pub qr_token: String,
    pub issued_at: DateTime<Utc>,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub checked_in_gate: Option<String>,
    pub version: i32,
    pub reissued_from_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanOutcome {
    pub ticket_id: Uuid,
    pub status: TicketStatus,
    pub first_scan: bool,
    pub checked_in_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReissueOutcome {
    pub new_ticket_id: Uuid,
    pub qr_token: String,
    pub version: i32,
}

// ============================================================================
// Repository traits
// ============================================================================

/// Seat holds, booking lifecycle, finalization, sweeping. Implementations
/// must run every multi-step mutation as a single atomic unit and rely on
/// the live-hold and assignment uniqueness keys for conflict arbitration.
#[async_trait]
pub trait ReservationRepository: Send + Sync {
    async fn hold_seats(&self, req: HoldRequest) -> CoreResult<HoldReceipt>;

    async fn get_booking(&self, id: Uuid) -> CoreResult<Option<BookingDetail>>;

    async fn list_bookings(&self, filters: BookingFilters) -> CoreResult<Vec<BookingDetail>>;

    async fn cancel_booking(&self, id: Uuid) -> CoreResult<CancelOutcome>;

    /// Convert live holds into permanent assignments. Idempotent: a retry
    /// against a confirmed booking reports `already_finalized` instead of
    /// duplicating rows.
    async fn finalize_booking(&self, id: Uuid) -> CoreResult<FinalizeOutcome>;

    /// Expire bookings whose holds outlived their TTL. Safe to re-run and
    /// to race against finalize.
    async fn sweep_expired(&self) -> CoreResult<SweepReport>;

    /// Record a payment outcome on the booking without touching seats.
    async fn set_payment_status(
        &self,
        booking_id: Uuid,
        status: BookingPaymentStatus,
    ) -> CoreResult<()>;

    /// CAS PENDING -> AWAITING_PAYMENT once a payment intent exists. A no-op
    /// when the booking already moved on.
    async fn mark_awaiting_payment(&self, booking_id: Uuid) -> CoreResult<()>;
}

/// Per-seat ticket issuance and check-in.
#[async_trait]
pub trait TicketRepository: Send + Sync {
    /// One ticket per confirmed seat. Seats that already carry a live
    /// ticket for this booking are skipped, making webhook retries safe.
    async fn issue_for_booking(&self, booking_id: Uuid) -> CoreResult<Vec<TicketDetail>>;

    async fn get_ticket(&self, id: Uuid) -> CoreResult<Option<TicketDetail>>;

    async fn list_by_booking(&self, booking_id: Uuid) -> CoreResult<Vec<TicketDetail>>;

    async fn scan(&self, qr_token: &str, gate: Option<&str>) -> CoreResult<ScanOutcome>;

    async fn reissue(&self, ticket_id: Uuid) -> CoreResult<ReissueOutcome>;

    async fn void(&self, ticket_id: Uuid) -> CoreResult<TicketDetail>;
}

/// Payment intents and webhook bookkeeping. Status side-effects on the
/// booking (finalize, payment-status updates) are orchestrated by the
/// caller; this trait only owns payment rows.
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn create_intent(&self, req: CreateIntentRequest) -> CoreResult<PaymentRecord>;

    async fn get_payment(&self, id: Uuid) -> CoreResult<Option<PaymentRecord>>;

    /// Locate the payment by transaction id (preferred) or latest-for-booking
    /// and apply the gateway status. Returns the updated row.
    async fn record_webhook(&self, update: WebhookUpdate) -> CoreResult<PaymentRecord>;
}
