use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use marquee_core::error::{CoreError, CoreResult};
use marquee_core::repository::{ReissueOutcome, ScanOutcome, TicketDetail};
use marquee_core::status::TicketStatus;

use crate::token::generate_qr_token;

#[derive(Debug, Clone)]
struct TicketRow {
    id: Uuid,
    booking_id: Uuid,
    showtime_id: Uuid,
    seat_id: Uuid,
    status: TicketStatus,
    qr_token: String,
    issued_at: DateTime<Utc>,
    checked_in_at: Option<DateTime<Utc>>,
    checked_in_gate: Option<String>,
    version: i32,
    reissued_from_id: Option<Uuid>,
}

/// In-memory ticket issuer. `by_token` mirrors the unique index on
/// `qr_token`.
#[derive(Default)]
pub struct TicketLedger {
    tickets: HashMap<Uuid, TicketRow>,
    by_token: HashMap<String, Uuid>,
}

impl TicketLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue one ticket per seat. Seats of this booking that already carry
    /// a live (non-voided) ticket are skipped so a retried finalize never
    /// duplicates tickets.
    pub fn issue(
        &mut self,
        booking_id: Uuid,
        showtime_id: Uuid,
        seat_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> Vec<TicketDetail> {
        let mut issued = Vec::new();
        for &seat_id in seat_ids {
            let already_live = self.tickets.values().any(|t| {
                t.booking_id == booking_id
                    && t.seat_id == seat_id
                    && t.status != TicketStatus::Voided
            });
            if already_live {
                continue;
            }

            let mut qr_token = generate_qr_token();
            while self.by_token.contains_key(&qr_token) {
                qr_token = generate_qr_token();
            }

            let row = TicketRow {
                id: Uuid::new_v4(),
                booking_id,
                showtime_id,
                seat_id,
                status: TicketStatus::Issued,
                qr_token: qr_token.clone(),
                issued_at: now,
                checked_in_at: None,
                checked_in_gate: None,
                version: 1,
                reissued_from_id: None,
            };
            self.by_token.insert(qr_token, row.id);
            issued.push(detail(&row));
            self.tickets.insert(row.id, row);
        }
        issued
    }

    pub fn get(&self, id: Uuid) -> Option<TicketDetail> {
        self.tickets.get(&id).map(detail)
    }

    pub fn list_by_booking(&self, booking_id: Uuid) -> Vec<TicketDetail> {
        let mut rows: Vec<&TicketRow> = self
            .tickets
            .values()
            .filter(|t| t.booking_id == booking_id)
            .collect();
        rows.sort_by(|a, b| b.issued_at.cmp(&a.issued_at).then(b.version.cmp(&a.version)));
        rows.into_iter().map(detail).collect()
    }

    /// Idempotent check-in. First scan moves ISSUED to CHECKED_IN; a repeat
    /// scan reports `first_scan = false` without mutating; voided and
    /// refunded tickets are rejected.
    pub fn scan(
        &mut self,
        qr_token: &str,
        gate: Option<&str>,
        now: DateTime<Utc>,
    ) -> CoreResult<ScanOutcome> {
        let id = *self
            .by_token
            .get(qr_token)
            .ok_or_else(|| CoreError::not_found("Invalid QR token"))?;
        let ticket = self.tickets.get_mut(&id).expect("token index out of sync");

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
                ticket.status = TicketStatus::CheckedIn;
                ticket.checked_in_at = Some(now);
                ticket.checked_in_gate = gate.map(str::to_string);
                Ok(ScanOutcome {
                    ticket_id: ticket.id,
                    status: TicketStatus::CheckedIn,
                    first_scan: true,
                    checked_in_at: now,
                })
            }
        }
    }

    /// Void the old ticket and issue a replacement with a fresh token and
    /// incremented version, linked back to the original.
    pub fn reissue(&mut self, ticket_id: Uuid, now: DateTime<Utc>) -> CoreResult<ReissueOutcome> {
        let old = self
            .tickets
            .get(&ticket_id)
            .ok_or_else(|| CoreError::not_found("Ticket not found"))?
            .clone();
        if old.status == TicketStatus::CheckedIn {
            return Err(CoreError::conflict("Cannot reissue a checked-in ticket"));
        }

        let mut qr_token = generate_qr_token();
        while self.by_token.contains_key(&qr_token) {
            qr_token = generate_qr_token();
        }

        let replacement = TicketRow {
            id: Uuid::new_v4(),
            booking_id: old.booking_id,
            showtime_id: old.showtime_id,
            seat_id: old.seat_id,
            status: TicketStatus::Issued,
            qr_token: qr_token.clone(),
            issued_at: now,
            checked_in_at: None,
            checked_in_gate: None,
            version: old.version + 1,
            reissued_from_id: Some(old.id),
        };

        self.tickets
            .get_mut(&ticket_id)
            .expect("fetched above")
            .status = TicketStatus::Voided;
        let outcome = ReissueOutcome {
            new_ticket_id: replacement.id,
            qr_token: qr_token.clone(),
            version: replacement.version,
        };
        self.by_token.insert(qr_token, replacement.id);
        self.tickets.insert(replacement.id, replacement);
        Ok(outcome)
    }

    pub fn void(&mut self, ticket_id: Uuid) -> CoreResult<TicketDetail> {
        let ticket = self
            .tickets
            .get_mut(&ticket_id)
            .ok_or_else(|| CoreError::not_found("Ticket not found"))?;
        if ticket.status == TicketStatus::CheckedIn {
            return Err(CoreError::conflict("Cannot void a checked-in ticket"));
        }
        ticket.status = TicketStatus::Voided;
        Ok(detail(ticket))
    }

    /// Mark every live ticket of the booking REFUNDED. Used by the
    /// cancellation path when a confirmed booking is refunded.
    pub fn refund_for_booking(&mut self, booking_id: Uuid) -> usize {
        let mut refunded = 0;
        for ticket in self.tickets.values_mut() {
            if ticket.booking_id == booking_id && ticket.status == TicketStatus::Issued {
                ticket.status = TicketStatus::Refunded;
                refunded += 1;
            }
        }
        refunded
    }
}

fn detail(row: &TicketRow) -> TicketDetail {
    TicketDetail {
        id: row.id,
        booking_id: row.booking_id,
        showtime_id: row.showtime_id,
        seat_id: row.seat_id,
        status: row.status,
        qr_token: row.qr_token.clone(),
        issued_at: row.issued_at,
        checked_in_at: row.checked_in_at,
        checked_in_gate: row.checked_in_gate.clone(),
        version: row.version,
        reissued_from_id: row.reissued_from_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap()
    }

    fn issue_one(ledger: &mut TicketLedger) -> TicketDetail {
        let booking_id = Uuid::new_v4();
        let showtime_id = Uuid::new_v4();
        let seat_id = Uuid::new_v4();
        ledger
            .issue(booking_id, showtime_id, &[seat_id], t0())
            .pop()
            .unwrap()
    }

    #[test]
    fn test_issue_one_ticket_per_seat_with_distinct_tokens() {
        let mut ledger = TicketLedger::new();
        let booking_id = Uuid::new_v4();
        let showtime_id = Uuid::new_v4();
        let seats = [Uuid::new_v4(), Uuid::new_v4()];

        let issued = ledger.issue(booking_id, showtime_id, &seats, t0());
        assert_eq!(issued.len(), 2);
        assert_ne!(issued[0].qr_token, issued[1].qr_token);
        assert!(issued.iter().all(|t| t.status == TicketStatus::Issued));
        assert!(issued.iter().all(|t| t.version == 1));
    }

    #[test]
    fn test_issue_retry_skips_ticketed_seats() {
        let mut ledger = TicketLedger::new();
        let booking_id = Uuid::new_v4();
        let showtime_id = Uuid::new_v4();
        let seats = [Uuid::new_v4(), Uuid::new_v4()];

        ledger.issue(booking_id, showtime_id, &seats, t0());
        // Retried webhook calls issue again.
        let second = ledger.issue(booking_id, showtime_id, &seats, t0());
        assert!(second.is_empty());
        assert_eq!(ledger.list_by_booking(booking_id).len(), 2);
    }

    #[test]
    fn test_scan_is_idempotent() {
        let mut ledger = TicketLedger::new();
        let ticket = issue_one(&mut ledger);

        let first = ledger.scan(&ticket.qr_token, Some("G2"), t0()).unwrap();
        assert!(first.first_scan);
        assert_eq!(first.status, TicketStatus::CheckedIn);

        let later = t0() + chrono::Duration::minutes(5);
        let second = ledger.scan(&ticket.qr_token, Some("G2"), later).unwrap();
        assert!(!second.first_scan);
        // Original check-in time preserved.
        assert_eq!(second.checked_in_at, first.checked_in_at);
    }

    #[test]
    fn test_scan_voided_ticket_rejected() {
        let mut ledger = TicketLedger::new();
        let ticket = issue_one(&mut ledger);
        ledger.void(ticket.id).unwrap();

        let err = ledger.scan(&ticket.qr_token, None, t0()).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_scan_unknown_token_not_found() {
        let mut ledger = TicketLedger::new();
        let err = ledger.scan("deadbeef", None, t0()).unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[test]
    fn test_reissue_voids_old_and_links_new() {
        let mut ledger = TicketLedger::new();
        let ticket = issue_one(&mut ledger);

        let out = ledger.reissue(ticket.id, t0()).unwrap();
        assert_eq!(out.version, 2);
        assert_ne!(out.qr_token, ticket.qr_token);

        let old = ledger.get(ticket.id).unwrap();
        assert_eq!(old.status, TicketStatus::Voided);

        let new = ledger.get(out.new_ticket_id).unwrap();
        assert_eq!(new.reissued_from_id, Some(ticket.id));
        assert_eq!(new.seat_id, ticket.seat_id);

        // Old token no longer admits entry.
        let err = ledger.scan(&ticket.qr_token, None, t0()).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_checked_in_ticket_cannot_be_reissued_or_voided() {
        let mut ledger = TicketLedger::new();
        let ticket = issue_one(&mut ledger);
        ledger.scan(&ticket.qr_token, None, t0()).unwrap();

        assert!(ledger.reissue(ticket.id, t0()).unwrap_err().is_conflict());
        assert!(ledger.void(ticket.id).unwrap_err().is_conflict());
    }

    #[test]
    fn test_refund_marks_live_tickets() {
        let mut ledger = TicketLedger::new();
        let booking_id = Uuid::new_v4();
        let seats = [Uuid::new_v4(), Uuid::new_v4()];
        ledger.issue(booking_id, Uuid::new_v4(), &seats, t0());

        assert_eq!(ledger.refund_for_booking(booking_id), 2);
        assert!(ledger
            .list_by_booking(booking_id)
            .iter()
            .all(|t| t.status == TicketStatus::Refunded));
    }
}
