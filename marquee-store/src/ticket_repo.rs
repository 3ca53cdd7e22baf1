use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use marquee_core::error::{CoreError, CoreResult};
use marquee_core::repository::{ReissueOutcome, ScanOutcome, TicketDetail, TicketRepository};
use marquee_core::status::TicketStatus;
use marquee_ticket::generate_qr_token;

use crate::db_err;

const TICKET_COLS: &str = "id, booking_id, showtime_id, seat_id, status, qr_token, \
     issued_at, checked_in_at, checked_in_gate, version, reissued_from_id";

pub struct PgTicketRepository {
    pool: PgPool,
}

impl PgTicketRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct TicketRow {
    id: Uuid,
    booking_id: Uuid,
    showtime_id: Uuid,
    seat_id: Uuid,
    status: String,
    qr_token: String,
    issued_at: DateTime<Utc>,
    checked_in_at: Option<DateTime<Utc>>,
    checked_in_gate: Option<String>,
    version: i32,
    reissued_from_id: Option<Uuid>,
}

impl TicketRow {
    fn into_detail(self) -> CoreResult<TicketDetail> {
        let status = TicketStatus::parse(&self.status)
            .ok_or_else(|| CoreError::internal(format!("unknown ticket status: {}", self.status)))?;
        Ok(TicketDetail {
            id: self.id,
            booking_id: self.booking_id,
            showtime_id: self.showtime_id,
            seat_id: self.seat_id,
            status,
            qr_token: self.qr_token,
            issued_at: self.issued_at,
            checked_in_at: self.checked_in_at,
            checked_in_gate: self.checked_in_gate,
            version: self.version,
            reissued_from_id: self.reissued_from_id,
        })
    }
}

#[async_trait]
impl TicketRepository for PgTicketRepository {
    async fn issue_for_booking(&self, booking_id: Uuid) -> CoreResult<Vec<TicketDetail>> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let booking: Option<(String, Uuid)> =
            sqlx::query_as("SELECT status, showtime_id FROM bookings WHERE id = $1 FOR UPDATE")
                .bind(booking_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err)?;
        let (status, showtime_id) =
            booking.ok_or_else(|| CoreError::not_found("Booking not found"))?;
        if status != "CONFIRMED" {
            return Err(CoreError::conflict("Booking is not confirmed"));
        }

        // Seats of the booking that do not yet carry a live ticket. Skipping
        // ticketed seats makes webhook retries safe.
        let seat_ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT bs.seat_id FROM booking_seats bs \
             WHERE bs.booking_id = $1 \
               AND NOT EXISTS ( \
                 SELECT 1 FROM tickets t \
                 WHERE t.booking_id = bs.booking_id AND t.seat_id = bs.seat_id \
                   AND t.status <> 'VOIDED')",
        )
        .bind(booking_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_err)?;

        let mut issued = Vec::with_capacity(seat_ids.len());
        for seat_id in seat_ids {
            let ticket_id = Uuid::new_v4();
            let qr_token = generate_qr_token();
            sqlx::query(
                "INSERT INTO tickets (id, booking_id, showtime_id, seat_id, status, \
                     qr_token, issued_at, version) \
                 VALUES ($1, $2, $3, $4, 'ISSUED', $5, $6, 1)",
            )
            .bind(ticket_id)
            .bind(booking_id)
            .bind(showtime_id)
            .bind(seat_id)
            .bind(&qr_token)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

            issued.push(TicketDetail {
                id: ticket_id,
                booking_id,
                showtime_id,
                seat_id,
                status: TicketStatus::Issued,
                qr_token,
                issued_at: now,
                checked_in_at: None,
                checked_in_gate: None,
                version: 1,
                reissued_from_id: None,
            });
        }

        tx.commit().await.map_err(db_err)?;
        Ok(issued)
    }

    async fn get_ticket(&self, id: Uuid) -> CoreResult<Option<TicketDetail>> {
        let row = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {TICKET_COLS} FROM tickets WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(TicketRow::into_detail).transpose()
    }

    async fn list_by_booking(&self, booking_id: Uuid) -> CoreResult<Vec<TicketDetail>> {
        let rows = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {TICKET_COLS} FROM tickets WHERE booking_id = $1 \
             ORDER BY issued_at DESC, version DESC"
        ))
        .bind(booking_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(TicketRow::into_detail).collect()
    }

    async fn scan(&self, qr_token: &str, gate: Option<&str>) -> CoreResult<ScanOutcome> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {TICKET_COLS} FROM tickets WHERE qr_token = $1 FOR UPDATE"
        ))
        .bind(qr_token)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .ok_or_else(|| CoreError::not_found("Invalid QR token"))?;
        let ticket = row.into_detail()?;

        match ticket.status {
            TicketStatus::Voided | TicketStatus::Refunded => {
                Err(CoreError::conflict("Ticket is not valid for entry"))
            }
            TicketStatus::CheckedIn => Ok(ScanOutcome {
                ticket_id: ticket.id,
                status: TicketStatus::CheckedIn,
                first_scan: false,
                checked_in_at: ticket.checked_in_at.unwrap_or(now),
            }),
            TicketStatus::Issued => {
                sqlx::query(
                    "UPDATE tickets SET status = 'CHECKED_IN', checked_in_at = $2, \
                         checked_in_gate = $3 \
                     WHERE id = $1",
                )
                .bind(ticket.id)
                .bind(now)
                .bind(gate)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
                tx.commit().await.map_err(db_err)?;

                Ok(ScanOutcome {
                    ticket_id: ticket.id,
                    status: TicketStatus::CheckedIn,
                    first_scan: true,
                    checked_in_at: now,
                })
            }
        }
    }

    async fn reissue(&self, ticket_id: Uuid) -> CoreResult<ReissueOutcome> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {TICKET_COLS} FROM tickets WHERE id = $1 FOR UPDATE"
        ))
        .bind(ticket_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .ok_or_else(|| CoreError::not_found("Ticket not found"))?;
        let old = row.into_detail()?;
        if old.status == TicketStatus::CheckedIn {
            return Err(CoreError::conflict("Cannot reissue a checked-in ticket"));
        }

        sqlx::query("UPDATE tickets SET status = 'VOIDED' WHERE id = $1")
            .bind(ticket_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        let new_ticket_id = Uuid::new_v4();
        let qr_token = generate_qr_token();
        let version = old.version + 1;
        sqlx::query(
            "INSERT INTO tickets (id, booking_id, showtime_id, seat_id, status, qr_token, \
                 issued_at, version, reissued_from_id) \
             VALUES ($1, $2, $3, $4, 'ISSUED', $5, $6, $7, $8)",
        )
        .bind(new_ticket_id)
        .bind(old.booking_id)
        .bind(old.showtime_id)
        .bind(old.seat_id)
        .bind(&qr_token)
        .bind(now)
        .bind(version)
        .bind(old.id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        Ok(ReissueOutcome {
            new_ticket_id,
            qr_token,
            version,
        })
    }

    async fn void(&self, ticket_id: Uuid) -> CoreResult<TicketDetail> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {TICKET_COLS} FROM tickets WHERE id = $1 FOR UPDATE"
        ))
        .bind(ticket_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .ok_or_else(|| CoreError::not_found("Ticket not found"))?;
        let mut ticket = row.into_detail()?;
        if ticket.status == TicketStatus::CheckedIn {
            return Err(CoreError::conflict("Cannot void a checked-in ticket"));
        }

        sqlx::query("UPDATE tickets SET status = 'VOIDED' WHERE id = $1")
            .bind(ticket_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;

        ticket.status = TicketStatus::Voided;
        Ok(ticket)
    }
}
