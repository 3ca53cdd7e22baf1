use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use marquee_booking::{ReservationLedger, ReservationPolicy};
use marquee_catalog::{Seat, Showtime};
use marquee_core::error::{CoreError, CoreResult};
use marquee_core::payment::{
    CreateIntentRequest, PaymentMethod, PaymentRecord, PaymentStatus, WebhookUpdate,
};
use marquee_core::repository::{
    BookingDetail, BookingFilters, CancelOutcome, FinalizeOutcome, HoldReceipt, HoldRequest,
    PaymentRepository, ReissueOutcome, ReservationRepository, ScanOutcome, SweepReport,
    TicketDetail, TicketRepository,
};
use marquee_core::status::{BookingPaymentStatus, BookingStatus};
use marquee_ticket::TicketLedger;

struct Inner {
    reservations: ReservationLedger,
    tickets: TicketLedger,
    payments: HashMap<Uuid, PaymentRecord>,
    payments_by_txn: HashMap<String, Uuid>,
}

/// Single-process store backed by the in-memory ledgers. Implements all
/// three repository traits behind one mutex so every operation is atomic,
/// mirroring the per-transaction atomicity of the Postgres store. Used by
/// the API tests and for local runs without a database.
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new(policy: ReservationPolicy) -> Self {
        Self {
            inner: Mutex::new(Inner {
                reservations: ReservationLedger::new(policy),
                tickets: TicketLedger::new(),
                payments: HashMap::new(),
                payments_by_txn: HashMap::new(),
            }),
        }
    }

    pub fn register_showtime(&self, showtime: Showtime, seats: Vec<Seat>) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.reservations.register_showtime(showtime, seats);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Inner {
    /// Latest PAID payment for a booking, used to shape the compensating
    /// refund row.
    fn latest_paid_payment(&self, booking_id: Uuid) -> Option<&PaymentRecord> {
        self.payments
            .values()
            .filter(|p| p.booking_id == booking_id && p.status == PaymentStatus::Paid)
            .max_by_key(|p| p.created_at)
    }
}

#[async_trait]
impl ReservationRepository for MemoryStore {
    async fn hold_seats(&self, req: HoldRequest) -> CoreResult<HoldReceipt> {
        let mut inner = self.lock();
        inner.reservations.hold_seats(&req, Utc::now())
    }

    async fn get_booking(&self, id: Uuid) -> CoreResult<Option<BookingDetail>> {
        let inner = self.lock();
        Ok(inner.reservations.booking_detail(id, Utc::now()))
    }

    async fn list_bookings(&self, filters: BookingFilters) -> CoreResult<Vec<BookingDetail>> {
        let inner = self.lock();
        Ok(inner.reservations.list(&filters, Utc::now()))
    }

    async fn cancel_booking(&self, id: Uuid) -> CoreResult<CancelOutcome> {
        let now = Utc::now();
        let mut inner = self.lock();
        let mut outcome = inner.reservations.cancel(id, now)?;

        if outcome.status == BookingStatus::Refunded {
            let total = inner.reservations.booking_total(id).unwrap_or(0);
            let currency = inner
                .reservations
                .booking_currency(id)
                .unwrap_or_else(|| "VND".to_string());
            let method = inner
                .latest_paid_payment(id)
                .map(|p| p.method)
                .unwrap_or(PaymentMethod::Card);

            let compensation = PaymentRecord {
                id: Uuid::new_v4(),
                booking_id: id,
                amount_minor: -total,
                currency,
                method,
                status: PaymentStatus::Refunded,
                transaction_id: None,
                failed_reason: None,
                processed_at: Some(now),
                created_at: now,
            };
            inner.payments.insert(compensation.id, compensation.clone());
            inner.tickets.refund_for_booking(id);
            outcome.compensation = Some(compensation);
        }

        Ok(outcome)
    }

    async fn finalize_booking(&self, id: Uuid) -> CoreResult<FinalizeOutcome> {
        let mut inner = self.lock();
        inner.reservations.finalize(id, Utc::now())
    }

    async fn sweep_expired(&self) -> CoreResult<SweepReport> {
        let mut inner = self.lock();
        Ok(inner.reservations.sweep(Utc::now()))
    }

    async fn set_payment_status(
        &self,
        booking_id: Uuid,
        status: BookingPaymentStatus,
    ) -> CoreResult<()> {
        let mut inner = self.lock();
        inner.reservations.set_payment_status(booking_id, status)
    }

    async fn mark_awaiting_payment(&self, booking_id: Uuid) -> CoreResult<()> {
        let mut inner = self.lock();
        inner.reservations.mark_awaiting_payment(booking_id)
    }
}

#[async_trait]
impl TicketRepository for MemoryStore {
    async fn issue_for_booking(&self, booking_id: Uuid) -> CoreResult<Vec<TicketDetail>> {
        let now = Utc::now();
        let mut inner = self.lock();
        let detail = inner
            .reservations
            .booking_detail(booking_id, now)
            .ok_or_else(|| CoreError::not_found("Booking not found"))?;
        if detail.status != BookingStatus::Confirmed {
            return Err(CoreError::conflict("Booking is not confirmed"));
        }
        let seat_ids = inner.reservations.confirmed_seats(booking_id);
        Ok(inner
            .tickets
            .issue(booking_id, detail.showtime.id, &seat_ids, now))
    }

    async fn get_ticket(&self, id: Uuid) -> CoreResult<Option<TicketDetail>> {
        let inner = self.lock();
        Ok(inner.tickets.get(id))
    }

    async fn list_by_booking(&self, booking_id: Uuid) -> CoreResult<Vec<TicketDetail>> {
        let inner = self.lock();
        Ok(inner.tickets.list_by_booking(booking_id))
    }

    async fn scan(&self, qr_token: &str, gate: Option<&str>) -> CoreResult<ScanOutcome> {
        let mut inner = self.lock();
        inner.tickets.scan(qr_token, gate, Utc::now())
    }

    async fn reissue(&self, ticket_id: Uuid) -> CoreResult<ReissueOutcome> {
        let mut inner = self.lock();
        inner.tickets.reissue(ticket_id, Utc::now())
    }

    async fn void(&self, ticket_id: Uuid) -> CoreResult<TicketDetail> {
        let mut inner = self.lock();
        inner.tickets.void(ticket_id)
    }
}

#[async_trait]
impl PaymentRepository for MemoryStore {
    async fn create_intent(&self, req: CreateIntentRequest) -> CoreResult<PaymentRecord> {
        let now = Utc::now();
        let mut inner = self.lock();

        let status = inner
            .reservations
            .booking_status(req.booking_id)
            .ok_or_else(|| CoreError::not_found("Booking not found"))?;
        if !matches!(
            status,
            BookingStatus::Pending | BookingStatus::AwaitingPayment
        ) {
            return Err(CoreError::conflict(format!(
                "Booking is {} and cannot accept payment",
                status.as_str()
            )));
        }
        if inner.reservations.booking_payment_status(req.booking_id)
            == Some(BookingPaymentStatus::Paid)
        {
            return Err(CoreError::conflict("Booking already paid"));
        }

        if let Some(txn) = &req.transaction_id {
            if inner.payments_by_txn.contains_key(txn) {
                return Err(CoreError::conflict("transaction_id already used"));
            }
        }

        let amount_minor = match req.amount_minor {
            Some(amount) => amount,
            None => inner
                .reservations
                .booking_total(req.booking_id)
                .unwrap_or(0),
        };
        let currency = inner
            .reservations
            .booking_currency(req.booking_id)
            .unwrap_or_else(|| "VND".to_string());

        let record = PaymentRecord {
            id: Uuid::new_v4(),
            booking_id: req.booking_id,
            amount_minor,
            currency,
            method: req.method,
            status: PaymentStatus::Pending,
            transaction_id: req.transaction_id.clone(),
            failed_reason: None,
            processed_at: None,
            created_at: now,
        };
        if let Some(txn) = &record.transaction_id {
            inner.payments_by_txn.insert(txn.clone(), record.id);
        }
        inner.payments.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_payment(&self, id: Uuid) -> CoreResult<Option<PaymentRecord>> {
        let inner = self.lock();
        Ok(inner.payments.get(&id).cloned())
    }

    async fn record_webhook(&self, update: WebhookUpdate) -> CoreResult<PaymentRecord> {
        let now = Utc::now();
        let mut inner = self.lock();

        let payment_id = if let Some(txn) = update
            .transaction_id
            .as_ref()
            .and_then(|t| inner.payments_by_txn.get(t))
        {
            *txn
        } else if let Some(booking_id) = update.booking_id {
            // Fall back to the latest payment attempt for the booking.
            inner
                .payments
                .values()
                .filter(|p| p.booking_id == booking_id)
                .max_by_key(|p| p.created_at)
                .map(|p| p.id)
                .ok_or_else(|| CoreError::not_found("No payment found for booking"))?
        } else {
            return Err(CoreError::validation(
                "transaction_id or booking_id is required",
            ));
        };

        let record = inner
            .payments
            .get_mut(&payment_id)
            .ok_or_else(|| CoreError::not_found("Payment not found"))?;

        record.status = update.status;
        record.failed_reason = update.failed_reason.clone();
        if update.status.is_settled() {
            record.processed_at = Some(update.processed_at.unwrap_or(now));
        }
        // The gateway may assign the transaction id at settlement time.
        if record.transaction_id.is_none() {
            record.transaction_id = update.transaction_id.clone();
        }
        let record = record.clone();
        if let Some(txn) = &record.transaction_id {
            inner
                .payments_by_txn
                .entry(txn.clone())
                .or_insert(payment_id);
        }

        Ok(record)
    }
}
