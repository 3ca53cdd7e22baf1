use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use marquee_booking::{next_booking_number, ReservationPolicy, Totals};
use marquee_core::error::{CoreError, CoreResult};
use marquee_core::payment::{PaymentMethod, PaymentRecord, PaymentStatus};
use marquee_core::repository::{
    BookingDetail, BookingFilters, BookingSeatEntry, CancelOutcome, FinalizeOutcome, HoldItem,
    HoldReceipt, HoldRequest, ReservationRepository, SeatSource, ShowtimeContext, SweepReport,
};
use marquee_core::status::{BookingPaymentStatus, BookingStatus};

use crate::{db_err, is_unique_violation};

const BOOKING_COLS: &str = "id, booking_number, user_id, showtime_id, status, payment_status, \
     currency, subtotal_minor, discount_minor, tax_minor, fee_minor, total_minor, \
     expires_at, confirmed_at, cancelled_at, refunded_at, created_at";

pub struct PgReservationRepository {
    pool: PgPool,
    policy: ReservationPolicy,
}

impl PgReservationRepository {
    pub fn new(pool: PgPool, policy: ReservationPolicy) -> Self {
        Self { pool, policy }
    }
}

// Internal structs for type-safe querying
#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    booking_number: String,
    user_id: Option<Uuid>,
    showtime_id: Uuid,
    status: String,
    payment_status: String,
    currency: String,
    subtotal_minor: i64,
    discount_minor: i64,
    tax_minor: i64,
    fee_minor: i64,
    total_minor: i64,
    expires_at: Option<DateTime<Utc>>,
    confirmed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    refunded_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct ShowtimeRow {
    id: Uuid,
    room_id: Uuid,
    starts_at: DateTime<Utc>,
    price_minor: i64,
}

#[derive(sqlx::FromRow)]
struct SeatPriceRow {
    id: Uuid,
    seat_number: String,
    row_label: String,
    col: i32,
    price_minor: Option<i64>,
}

#[derive(sqlx::FromRow)]
struct SeatEntryRow {
    seat_id: Uuid,
    seat_number: String,
    row_label: String,
    col: i32,
    unit_price_minor: Option<i64>,
}

fn parse_status(s: &str) -> CoreResult<BookingStatus> {
    BookingStatus::parse(s)
        .ok_or_else(|| CoreError::internal(format!("unknown booking status: {s}")))
}

fn parse_payment_status(s: &str) -> CoreResult<BookingPaymentStatus> {
    BookingPaymentStatus::parse(s)
        .ok_or_else(|| CoreError::internal(format!("unknown payment status: {s}")))
}

impl PgReservationRepository {
    async fn load_detail(&self, row: BookingRow) -> CoreResult<BookingDetail> {
        let showtime = sqlx::query_as::<_, ShowtimeRow>(
            "SELECT id, room_id, starts_at, price_minor FROM showtimes WHERE id = $1",
        )
        .bind(row.showtime_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        let booked = sqlx::query_as::<_, SeatEntryRow>(
            "SELECT bs.seat_id, s.seat_number, s.row_label, s.col, \
                    bs.unit_price_minor AS unit_price_minor \
             FROM booking_seats bs JOIN seats s ON s.id = bs.seat_id \
             WHERE bs.booking_id = $1 ORDER BY s.row_label, s.col",
        )
        .bind(row.id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let (rows, source) = if booked.is_empty() {
            let holds = sqlx::query_as::<_, SeatEntryRow>(
                "SELECT h.seat_id, s.seat_number, s.row_label, s.col, \
                        NULL::bigint AS unit_price_minor \
                 FROM booking_seat_holds h JOIN seats s ON s.id = h.seat_id \
                 WHERE h.booking_id = $1 AND h.expires_at > $2 \
                 ORDER BY s.row_label, s.col",
            )
            .bind(row.id)
            .bind(Utc::now())
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
            (holds, SeatSource::Hold)
        } else {
            (booked, SeatSource::Booked)
        };

        Ok(BookingDetail {
            id: row.id,
            booking_number: row.booking_number,
            user_id: row.user_id,
            status: parse_status(&row.status)?,
            payment_status: parse_payment_status(&row.payment_status)?,
            currency: row.currency,
            subtotal_minor: row.subtotal_minor,
            discount_minor: row.discount_minor,
            tax_minor: row.tax_minor,
            fee_minor: row.fee_minor,
            total_minor: row.total_minor,
            expires_at: row.expires_at,
            confirmed_at: row.confirmed_at,
            cancelled_at: row.cancelled_at,
            refunded_at: row.refunded_at,
            created_at: row.created_at,
            showtime: ShowtimeContext {
                id: showtime.id,
                room_id: showtime.room_id,
                starts_at: showtime.starts_at,
                reference_price_minor: showtime.price_minor,
            },
            seats: rows
                .into_iter()
                .map(|r| BookingSeatEntry {
                    seat_id: r.seat_id,
                    seat_number: r.seat_number,
                    row: r.row_label,
                    column: r.col,
                    unit_price_minor: r.unit_price_minor,
                    source,
                })
                .collect(),
        })
    }
}

#[async_trait]
impl ReservationRepository for PgReservationRepository {
    async fn hold_seats(&self, req: HoldRequest) -> CoreResult<HoldReceipt> {
        if req.seat_ids.is_empty() {
            return Err(CoreError::validation("seat_ids is required"));
        }
        let mut deduped = req.seat_ids.clone();
        deduped.sort();
        deduped.dedup();
        if deduped.len() != req.seat_ids.len() {
            return Err(CoreError::validation("seat_ids contains duplicates"));
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // Lazy cleanup so the unique key only ever covers live holds.
        sqlx::query("DELETE FROM booking_seat_holds WHERE expires_at <= $1")
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        let showtime = sqlx::query_as::<_, ShowtimeRow>(
            "SELECT id, room_id, starts_at, price_minor FROM showtimes \
             WHERE id = $1 AND is_active = TRUE",
        )
        .bind(req.showtime_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .ok_or_else(|| CoreError::validation("Showtime not found or inactive"))?;

        let seats = sqlx::query_as::<_, SeatPriceRow>(
            "SELECT id, seat_number, row_label, col, price_minor FROM seats \
             WHERE id = ANY($1) AND room_id = $2 AND is_active = TRUE",
        )
        .bind(&req.seat_ids)
        .bind(showtime.room_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_err)?;
        if seats.len() != req.seat_ids.len() {
            return Err(CoreError::validation(
                "Some seats are invalid for this room or inactive",
            ));
        }

        let booked: Vec<Uuid> = sqlx::query_scalar(
            "SELECT seat_id FROM booking_seats WHERE showtime_id = $1 AND seat_id = ANY($2)",
        )
        .bind(req.showtime_id)
        .bind(&req.seat_ids)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_err)?;
        if !booked.is_empty() {
            return Err(CoreError::seat_conflict("Some seats already booked", booked));
        }

        let held: Vec<Uuid> = sqlx::query_scalar(
            "SELECT seat_id FROM booking_seat_holds \
             WHERE showtime_id = $1 AND seat_id = ANY($2) AND expires_at > $3",
        )
        .bind(req.showtime_id)
        .bind(&req.seat_ids)
        .bind(now)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_err)?;
        if !held.is_empty() {
            return Err(CoreError::seat_conflict("Some seats currently held", held));
        }

        let unit_prices: Vec<i64> = seats
            .iter()
            .map(|s| s.price_minor.unwrap_or(showtime.price_minor))
            .collect();
        let totals = Totals::compute(&unit_prices, &self.policy.pricing);

        let booking_id = Uuid::new_v4();
        let booking_number = next_booking_number();
        let expires_at = now + self.policy.hold_ttl;

        sqlx::query(
            "INSERT INTO bookings (id, booking_number, user_id, showtime_id, status, \
                 payment_status, currency, subtotal_minor, discount_minor, tax_minor, \
                 fee_minor, total_minor, expires_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, 'PENDING', 'PENDING', $5, $6, $7, $8, $9, $10, $11, $12, $12)",
        )
        .bind(booking_id)
        .bind(&booking_number)
        .bind(req.user_id)
        .bind(req.showtime_id)
        .bind(&self.policy.currency)
        .bind(totals.subtotal_minor)
        .bind(totals.discount_minor)
        .bind(totals.tax_minor)
        .bind(totals.fee_minor)
        .bind(totals.total_minor)
        .bind(expires_at)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        for seat in &seats {
            let result = sqlx::query(
                "INSERT INTO booking_seat_holds (id, booking_id, showtime_id, seat_id, \
                     expires_at, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(Uuid::new_v4())
            .bind(booking_id)
            .bind(req.showtime_id)
            .bind(seat.id)
            .bind(expires_at)
            .bind(now)
            .execute(&mut *tx)
            .await;
            // A racing transaction won the (showtime, seat) key between our
            // pre-check and this insert. First committer wins.
            if let Err(e) = result {
                if is_unique_violation(&e) {
                    return Err(CoreError::seat_conflict(
                        "Some seats currently held",
                        vec![seat.id],
                    ));
                }
                return Err(db_err(e));
            }
        }

        tx.commit().await.map_err(db_err)?;

        Ok(HoldReceipt {
            booking_id,
            booking_number,
            status: BookingStatus::Pending,
            expires_at,
            total_minor: totals.total_minor,
            currency: self.policy.currency.clone(),
            items: seats
                .into_iter()
                .map(|s| HoldItem {
                    seat_id: s.id,
                    seat_number: s.seat_number,
                    row: s.row_label,
                    column: s.col,
                })
                .collect(),
        })
    }

    async fn get_booking(&self, id: Uuid) -> CoreResult<Option<BookingDetail>> {
        let row = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {BOOKING_COLS} FROM bookings WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match row {
            Some(row) => Ok(Some(self.load_detail(row).await?)),
            None => Ok(None),
        }
    }

    async fn list_bookings(&self, filters: BookingFilters) -> CoreResult<Vec<BookingDetail>> {
        let rows = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {BOOKING_COLS} FROM bookings \
             WHERE ($1::uuid IS NULL OR user_id = $1) \
               AND ($2::text IS NULL OR status = $2) \
               AND ($3::text IS NULL OR payment_status = $3) \
               AND ($4::uuid IS NULL OR showtime_id = $4) \
             ORDER BY created_at DESC"
        ))
        .bind(filters.user_id)
        .bind(filters.status.map(|s| s.as_str()))
        .bind(filters.payment_status.map(|s| s.as_str()))
        .bind(filters.showtime_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut details = Vec::with_capacity(rows.len());
        for row in rows {
            details.push(self.load_detail(row).await?);
        }
        Ok(details)
    }

    async fn cancel_booking(&self, id: Uuid) -> CoreResult<CancelOutcome> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {BOOKING_COLS} FROM bookings WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .ok_or_else(|| CoreError::not_found("Booking not found"))?;
        let status = parse_status(&row.status)?;

        match status {
            BookingStatus::Cancelled | BookingStatus::Expired | BookingStatus::Refunded => {
                Err(CoreError::conflict(format!(
                    "Booking already {}",
                    status.as_str()
                )))
            }
            BookingStatus::Confirmed => {
                let starts_at: DateTime<Utc> =
                    sqlx::query_scalar("SELECT starts_at FROM showtimes WHERE id = $1")
                        .bind(row.showtime_id)
                        .fetch_one(&mut *tx)
                        .await
                        .map_err(db_err)?;
                if now + self.policy.refund_cutoff > starts_at {
                    return Err(CoreError::conflict(
                        "Too close to showtime start to refund",
                    ));
                }

                let released = sqlx::query("DELETE FROM booking_seats WHERE booking_id = $1")
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err)?
                    .rows_affected() as usize;

                sqlx::query("UPDATE showtimes SET booked_seats = booked_seats - $1 WHERE id = $2")
                    .bind(released as i32)
                    .bind(row.showtime_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err)?;

                sqlx::query(
                    "UPDATE bookings SET status = 'REFUNDED', payment_status = 'REFUNDED', \
                         cancelled_at = $2, refunded_at = $2, updated_at = $2 \
                     WHERE id = $1",
                )
                .bind(id)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;

                sqlx::query(
                    "UPDATE tickets SET status = 'REFUNDED' \
                     WHERE booking_id = $1 AND status = 'ISSUED'",
                )
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;

                // Compensating payment row, negative amount, shaped after the
                // settled payment when there is one.
                let method: Option<String> = sqlx::query_scalar(
                    "SELECT method FROM payments \
                     WHERE booking_id = $1 AND status = 'PAID' \
                     ORDER BY created_at DESC LIMIT 1",
                )
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err)?;
                let method = method
                    .as_deref()
                    .and_then(PaymentMethod::parse)
                    .unwrap_or(PaymentMethod::Card);

                let compensation = PaymentRecord {
                    id: Uuid::new_v4(),
                    booking_id: id,
                    amount_minor: -row.total_minor,
                    currency: row.currency.clone(),
                    method,
                    status: PaymentStatus::Refunded,
                    transaction_id: None,
                    failed_reason: None,
                    processed_at: Some(now),
                    created_at: now,
                };
                sqlx::query(
                    "INSERT INTO payments (id, booking_id, amount_minor, currency, method, \
                         status, processed_at, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $5, 'REFUNDED', $6, $6, $6)",
                )
                .bind(compensation.id)
                .bind(id)
                .bind(compensation.amount_minor)
                .bind(&compensation.currency)
                .bind(method.as_str())
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;

                tx.commit().await.map_err(db_err)?;

                Ok(CancelOutcome {
                    booking_id: id,
                    status: BookingStatus::Refunded,
                    released_seats: released,
                    compensation: Some(compensation),
                })
            }
            BookingStatus::Pending | BookingStatus::AwaitingPayment => {
                let released = sqlx::query("DELETE FROM booking_seat_holds WHERE booking_id = $1")
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err)?
                    .rows_affected() as usize;

                sqlx::query(
                    "UPDATE bookings SET status = 'CANCELLED', cancelled_at = $2, updated_at = $2 \
                     WHERE id = $1",
                )
                .bind(id)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;

                tx.commit().await.map_err(db_err)?;

                Ok(CancelOutcome {
                    booking_id: id,
                    status: BookingStatus::Cancelled,
                    released_seats: released,
                    compensation: None,
                })
            }
        }
    }

    async fn finalize_booking(&self, id: Uuid) -> CoreResult<FinalizeOutcome> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {BOOKING_COLS} FROM bookings WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .ok_or_else(|| CoreError::not_found("Booking not found"))?;
        let status = parse_status(&row.status)?;

        let live: Vec<Uuid> = sqlx::query_scalar(
            "SELECT seat_id FROM booking_seat_holds WHERE booking_id = $1 AND expires_at > $2",
        )
        .bind(id)
        .bind(now)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_err)?;

        if live.is_empty() {
            let existing: Vec<Uuid> =
                sqlx::query_scalar("SELECT seat_id FROM booking_seats WHERE booking_id = $1")
                    .bind(id)
                    .fetch_all(&mut *tx)
                    .await
                    .map_err(db_err)?;
            if !existing.is_empty() {
                return Ok(FinalizeOutcome {
                    booking_id: id,
                    showtime_id: row.showtime_id,
                    status,
                    seat_ids: existing,
                    newly_assigned: 0,
                    already_finalized: true,
                });
            }
            return Err(CoreError::conflict("holds expired before payment completed"));
        }

        if !status.can_transition_to(BookingStatus::Confirmed) {
            return Err(CoreError::conflict(format!(
                "Booking is {} and cannot be confirmed",
                status.as_str()
            )));
        }

        // Insert-or-ignore on the (showtime, seat) key; the seat's own price
        // wins over the showtime reference price.
        let newly_assigned = sqlx::query(
            "INSERT INTO booking_seats (booking_id, showtime_id, seat_id, unit_price_minor) \
             SELECT h.booking_id, h.showtime_id, h.seat_id, \
                    COALESCE(s.price_minor, st.price_minor) \
             FROM booking_seat_holds h \
             JOIN seats s ON s.id = h.seat_id \
             JOIN showtimes st ON st.id = h.showtime_id \
             WHERE h.booking_id = $1 AND h.expires_at > $2 \
             ON CONFLICT (showtime_id, seat_id) DO NOTHING",
        )
        .bind(id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?
        .rows_affected() as usize;

        sqlx::query("DELETE FROM booking_seat_holds WHERE booking_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        sqlx::query("UPDATE showtimes SET booked_seats = booked_seats + $1 WHERE id = $2")
            .bind(newly_assigned as i32)
            .bind(row.showtime_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        sqlx::query(
            "UPDATE bookings SET status = 'CONFIRMED', payment_status = 'PAID', \
                 confirmed_at = $2, updated_at = $2 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        Ok(FinalizeOutcome {
            booking_id: id,
            showtime_id: row.showtime_id,
            status: BookingStatus::Confirmed,
            seat_ids: live,
            newly_assigned,
            already_finalized: false,
        })
    }

    async fn sweep_expired(&self) -> CoreResult<SweepReport> {
        let now = Utc::now();

        let overdue: Vec<Uuid> = sqlx::query_scalar(
            "SELECT id FROM bookings \
             WHERE status IN ('PENDING', 'AWAITING_PAYMENT') AND expires_at < $1",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut report = SweepReport {
            examined: overdue.len(),
            ..SweepReport::default()
        };

        // One short transaction per booking so the sweeper never holds locks
        // across the whole batch and loses gracefully to a racing finalize.
        for booking_id in overdue {
            let mut tx = self.pool.begin().await.map_err(db_err)?;

            let expired = sqlx::query(
                "UPDATE bookings SET status = 'EXPIRED', updated_at = $2 \
                 WHERE id = $1 AND status IN ('PENDING', 'AWAITING_PAYMENT')",
            )
            .bind(booking_id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?
            .rows_affected();

            if expired == 1 {
                report.expired += 1;
                report.released_holds +=
                    sqlx::query("DELETE FROM booking_seat_holds WHERE booking_id = $1")
                        .bind(booking_id)
                        .execute(&mut *tx)
                        .await
                        .map_err(db_err)?
                        .rows_affected() as usize;
            }

            tx.commit().await.map_err(db_err)?;
        }

        Ok(report)
    }

    async fn set_payment_status(
        &self,
        booking_id: Uuid,
        status: BookingPaymentStatus,
    ) -> CoreResult<()> {
        let updated = sqlx::query(
            "UPDATE bookings SET payment_status = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(booking_id)
        .bind(status.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_err)?
        .rows_affected();
        if updated == 0 {
            return Err(CoreError::not_found("Booking not found"));
        }
        Ok(())
    }

    async fn mark_awaiting_payment(&self, booking_id: Uuid) -> CoreResult<()> {
        let updated = sqlx::query(
            "UPDATE bookings SET status = 'AWAITING_PAYMENT', updated_at = $2 \
             WHERE id = $1 AND status = 'PENDING'",
        )
        .bind(booking_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_err)?
        .rows_affected();
        if updated == 0 {
            // No-op when the booking already moved on, error when it does
            // not exist at all.
            let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM bookings WHERE id = $1")
                .bind(booking_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
            if exists.is_none() {
                return Err(CoreError::not_found("Booking not found"));
            }
        }
        Ok(())
    }
}
