use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use marquee_catalog::{Seat, Showtime};
use marquee_core::error::{CoreError, CoreResult};
use marquee_core::repository::{
    BookingDetail, BookingFilters, BookingSeatEntry, CancelOutcome, FinalizeOutcome, HoldItem,
    HoldReceipt, HoldRequest, SeatSource, ShowtimeContext, SweepReport,
};
use marquee_core::status::{BookingPaymentStatus, BookingStatus};

use crate::number::next_booking_number;
use crate::totals::{PricingPolicy, Totals};

/// Domain-level timeouts and pricing knobs for the reservation engine.
#[derive(Debug, Clone)]
pub struct ReservationPolicy {
    /// Lifetime of a seat hold before it becomes sweepable.
    pub hold_ttl: Duration,
    /// A confirmed booking may only be refunded this long before the
    /// showtime starts.
    pub refund_cutoff: Duration,
    pub pricing: PricingPolicy,
    pub currency: String,
}

impl Default for ReservationPolicy {
    fn default() -> Self {
        Self {
            hold_ttl: Duration::minutes(5),
            refund_cutoff: Duration::hours(2),
            pricing: PricingPolicy::default(),
            currency: "VND".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct BookingRow {
    id: Uuid,
    booking_number: String,
    user_id: Option<Uuid>,
    showtime_id: Uuid,
    status: BookingStatus,
    payment_status: BookingPaymentStatus,
    totals: Totals,
    currency: String,
    expires_at: Option<DateTime<Utc>>,
    confirmed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    refunded_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct HoldRow {
    booking_id: Uuid,
    showtime_id: Uuid,
    seat_id: Uuid,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct AssignmentRow {
    booking_id: Uuid,
    #[allow(dead_code)]
    showtime_id: Uuid,
    seat_id: Uuid,
    unit_price_minor: i64,
}

/// In-memory reservation engine. Keyed maps play the role of the database
/// uniqueness constraints: `holds` admits at most one live hold per
/// (showtime, seat), `assignments` at most one permanent row ever.
///
/// Callers pass `now` explicitly so expiry behavior is deterministic under
/// test; every method is a complete, all-or-nothing mutation.
pub struct ReservationLedger {
    policy: ReservationPolicy,
    showtimes: HashMap<Uuid, Showtime>,
    seats: HashMap<Uuid, Seat>,
    bookings: HashMap<Uuid, BookingRow>,
    holds: HashMap<(Uuid, Uuid), HoldRow>,
    assignments: HashMap<(Uuid, Uuid), AssignmentRow>,
    booked_counts: HashMap<Uuid, i32>,
}

impl ReservationLedger {
    pub fn new(policy: ReservationPolicy) -> Self {
        Self {
            policy,
            showtimes: HashMap::new(),
            seats: HashMap::new(),
            bookings: HashMap::new(),
            holds: HashMap::new(),
            assignments: HashMap::new(),
            booked_counts: HashMap::new(),
        }
    }

    pub fn policy(&self) -> &ReservationPolicy {
        &self.policy
    }

    /// Register catalog records the engine may reserve against.
    pub fn register_showtime(&mut self, showtime: Showtime, seats: Vec<Seat>) {
        for seat in seats {
            self.seats.insert(seat.id, seat);
        }
        self.booked_counts.entry(showtime.id).or_insert(0);
        self.showtimes.insert(showtime.id, showtime);
    }

    /// Delete globally expired holds. Lazy cleanup; reduces contention on
    /// the (showtime, seat) key but is not required for correctness.
    pub fn purge_expired_holds(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.holds.len();
        self.holds.retain(|_, h| h.expires_at > now);
        before - self.holds.len()
    }

    pub fn hold_seats(&mut self, req: &HoldRequest, now: DateTime<Utc>) -> CoreResult<HoldReceipt> {
        if req.seat_ids.is_empty() {
            return Err(CoreError::validation("seat_ids is required"));
        }
        let mut deduped = req.seat_ids.clone();
        deduped.sort();
        deduped.dedup();
        if deduped.len() != req.seat_ids.len() {
            return Err(CoreError::validation("seat_ids contains duplicates"));
        }

        self.purge_expired_holds(now);

        let showtime = self
            .showtimes
            .get(&req.showtime_id)
            .filter(|st| st.is_active)
            .ok_or_else(|| CoreError::validation("Showtime not found or inactive"))?
            .clone();

        let mut valid_seats = Vec::with_capacity(req.seat_ids.len());
        for seat_id in &req.seat_ids {
            match self.seats.get(seat_id) {
                Some(seat) if seat.room_id == showtime.room_id && seat.is_active => {
                    valid_seats.push(seat.clone());
                }
                _ => {
                    return Err(CoreError::validation(
                        "Some seats are invalid for this room or inactive",
                    ));
                }
            }
        }

        let booked: Vec<Uuid> = req
            .seat_ids
            .iter()
            .filter(|sid| self.assignments.contains_key(&(req.showtime_id, **sid)))
            .copied()
            .collect();
        if !booked.is_empty() {
            return Err(CoreError::seat_conflict("Some seats already booked", booked));
        }

        let held: Vec<Uuid> = req
            .seat_ids
            .iter()
            .filter(|sid| {
                self.holds
                    .get(&(req.showtime_id, **sid))
                    .map(|h| h.expires_at > now)
                    .unwrap_or(false)
            })
            .copied()
            .collect();
        if !held.is_empty() {
            return Err(CoreError::seat_conflict("Some seats currently held", held));
        }

        let unit_prices: Vec<i64> = valid_seats
            .iter()
            .map(|s| s.unit_price(showtime.price_minor))
            .collect();
        let totals = Totals::compute(&unit_prices, &self.policy.pricing);

        let booking_id = Uuid::new_v4();
        let expires_at = now + self.policy.hold_ttl;
        let booking = BookingRow {
            id: booking_id,
            booking_number: next_booking_number(),
            user_id: req.user_id,
            showtime_id: req.showtime_id,
            status: BookingStatus::Pending,
            payment_status: BookingPaymentStatus::Pending,
            totals,
            currency: self.policy.currency.clone(),
            expires_at: Some(expires_at),
            confirmed_at: None,
            cancelled_at: None,
            refunded_at: None,
            created_at: now,
        };

        for seat in &valid_seats {
            self.holds.insert(
                (req.showtime_id, seat.id),
                HoldRow {
                    booking_id,
                    showtime_id: req.showtime_id,
                    seat_id: seat.id,
                    expires_at,
                },
            );
        }
        let booking_number = booking.booking_number.clone();
        self.bookings.insert(booking_id, booking);

        Ok(HoldReceipt {
            booking_id,
            booking_number,
            status: BookingStatus::Pending,
            expires_at,
            total_minor: totals.total_minor,
            currency: self.policy.currency.clone(),
            items: valid_seats
                .iter()
                .map(|s| HoldItem {
                    seat_id: s.id,
                    seat_number: s.seat_number.clone(),
                    row: s.row.clone(),
                    column: s.column,
                })
                .collect(),
        })
    }

    /// Convert the booking's live holds into permanent assignments.
    /// Idempotent for webhook retries: a second call observes assignments
    /// and reports `already_finalized`.
    pub fn finalize(&mut self, booking_id: Uuid, now: DateTime<Utc>) -> CoreResult<FinalizeOutcome> {
        let booking = self
            .bookings
            .get(&booking_id)
            .ok_or_else(|| CoreError::not_found("Booking not found"))?;
        let showtime_id = booking.showtime_id;
        let status = booking.status;

        let live: Vec<HoldRow> = self
            .holds
            .values()
            .filter(|h| h.booking_id == booking_id && h.expires_at > now)
            .cloned()
            .collect();

        if live.is_empty() {
            let existing: Vec<Uuid> = self
                .assignments
                .values()
                .filter(|a| a.booking_id == booking_id)
                .map(|a| a.seat_id)
                .collect();
            if !existing.is_empty() {
                return Ok(FinalizeOutcome {
                    booking_id,
                    showtime_id,
                    status,
                    seat_ids: existing,
                    newly_assigned: 0,
                    already_finalized: true,
                });
            }
            return Err(CoreError::conflict("holds expired before payment completed"));
        }

        // CAS guard: only PENDING/AWAITING_PAYMENT may be confirmed. A
        // concurrent sweeper that got here first left no live holds, so
        // reaching this point with a terminal status means cancel raced us
        // and the caller must not re-acquire the seats.
        if !status.can_transition_to(BookingStatus::Confirmed) {
            return Err(CoreError::conflict(format!(
                "Booking is {} and cannot be confirmed",
                status.as_str()
            )));
        }

        let reference_price = self
            .showtimes
            .get(&showtime_id)
            .map(|st| st.price_minor)
            .unwrap_or(0);

        let mut newly_assigned = 0;
        let mut seat_ids = Vec::with_capacity(live.len());
        for hold in &live {
            seat_ids.push(hold.seat_id);
            let unit_price_minor = self
                .seats
                .get(&hold.seat_id)
                .map(|s| s.unit_price(reference_price))
                .unwrap_or(reference_price);
            // Insert-or-ignore on the (showtime, seat) key.
            self.assignments
                .entry((hold.showtime_id, hold.seat_id))
                .or_insert_with(|| {
                    newly_assigned += 1;
                    AssignmentRow {
                        booking_id,
                        showtime_id: hold.showtime_id,
                        seat_id: hold.seat_id,
                        unit_price_minor,
                    }
                });
        }

        self.holds.retain(|_, h| h.booking_id != booking_id);
        *self.booked_counts.entry(showtime_id).or_insert(0) += newly_assigned as i32;

        let booking = self.bookings.get_mut(&booking_id).expect("checked above");
        booking.status = BookingStatus::Confirmed;
        booking.payment_status = BookingPaymentStatus::Paid;
        booking.confirmed_at = Some(now);

        Ok(FinalizeOutcome {
            booking_id,
            showtime_id,
            status: BookingStatus::Confirmed,
            seat_ids,
            newly_assigned,
            already_finalized: false,
        })
    }

    /// Expire overdue PENDING/AWAITING_PAYMENT bookings and release their
    /// holds. Re-runnable; never touches confirmed or terminal bookings,
    /// and holds never count toward `booked_seats`, so the permanent
    /// counter is left untouched.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> SweepReport {
        let overdue: Vec<Uuid> = self
            .bookings
            .values()
            .filter(|b| b.status.is_sweepable())
            .filter(|b| b.expires_at.map(|e| e < now).unwrap_or(false))
            .map(|b| b.id)
            .collect();

        let mut report = SweepReport {
            examined: overdue.len(),
            ..SweepReport::default()
        };

        for booking_id in overdue {
            let booking = match self.bookings.get_mut(&booking_id) {
                Some(b) if b.status.is_sweepable() => b,
                _ => continue,
            };
            booking.status = BookingStatus::Expired;
            report.expired += 1;

            let before = self.holds.len();
            self.holds.retain(|_, h| h.booking_id != booking_id);
            report.released_holds += before - self.holds.len();
        }

        report
    }

    /// Cancel a booking. Pending bookings release their holds and become
    /// CANCELLED; confirmed bookings pass the refund-cutoff policy, release
    /// their permanent seats and become REFUNDED. The caller records the
    /// compensating payment for the refund case.
    pub fn cancel(&mut self, booking_id: Uuid, now: DateTime<Utc>) -> CoreResult<CancelOutcome> {
        let booking = self
            .bookings
            .get(&booking_id)
            .ok_or_else(|| CoreError::not_found("Booking not found"))?;

        match booking.status {
            BookingStatus::Cancelled | BookingStatus::Expired | BookingStatus::Refunded => {
                Err(CoreError::conflict(format!(
                    "Booking already {}",
                    booking.status.as_str()
                )))
            }
            BookingStatus::Confirmed => {
                let showtime_id = booking.showtime_id;
                let starts_at = self
                    .showtimes
                    .get(&showtime_id)
                    .map(|st| st.starts_at)
                    .ok_or_else(|| CoreError::internal("showtime missing for confirmed booking"))?;
                if now + self.policy.refund_cutoff > starts_at {
                    return Err(CoreError::conflict(
                        "Too close to showtime start to refund",
                    ));
                }

                let before = self.assignments.len();
                self.assignments.retain(|_, a| a.booking_id != booking_id);
                let released = before - self.assignments.len();
                if let Some(count) = self.booked_counts.get_mut(&showtime_id) {
                    *count -= released as i32;
                }

                let booking = self.bookings.get_mut(&booking_id).expect("checked above");
                booking.status = BookingStatus::Refunded;
                booking.payment_status = BookingPaymentStatus::Refunded;
                booking.cancelled_at = Some(now);
                booking.refunded_at = Some(now);

                Ok(CancelOutcome {
                    booking_id,
                    status: BookingStatus::Refunded,
                    released_seats: released,
                    compensation: None,
                })
            }
            BookingStatus::Pending | BookingStatus::AwaitingPayment => {
                let before = self.holds.len();
                self.holds.retain(|_, h| h.booking_id != booking_id);
                let released = before - self.holds.len();

                let booking = self.bookings.get_mut(&booking_id).expect("checked above");
                booking.status = BookingStatus::Cancelled;
                booking.cancelled_at = Some(now);

                Ok(CancelOutcome {
                    booking_id,
                    status: BookingStatus::Cancelled,
                    released_seats: released,
                    compensation: None,
                })
            }
        }
    }

    pub fn set_payment_status(
        &mut self,
        booking_id: Uuid,
        status: BookingPaymentStatus,
    ) -> CoreResult<()> {
        let booking = self
            .bookings
            .get_mut(&booking_id)
            .ok_or_else(|| CoreError::not_found("Booking not found"))?;
        booking.payment_status = status;
        Ok(())
    }

    /// CAS PENDING -> AWAITING_PAYMENT; no-op if the booking moved on.
    pub fn mark_awaiting_payment(&mut self, booking_id: Uuid) -> CoreResult<()> {
        let booking = self
            .bookings
            .get_mut(&booking_id)
            .ok_or_else(|| CoreError::not_found("Booking not found"))?;
        if booking.status == BookingStatus::Pending {
            booking.status = BookingStatus::AwaitingPayment;
        }
        Ok(())
    }

    // ========================================================================
    // Read side
    // ========================================================================

    pub fn booking_detail(&self, booking_id: Uuid, now: DateTime<Utc>) -> Option<BookingDetail> {
        let b = self.bookings.get(&booking_id)?;
        Some(self.to_detail(b, now))
    }

    pub fn list(&self, filters: &BookingFilters, now: DateTime<Utc>) -> Vec<BookingDetail> {
        let mut rows: Vec<&BookingRow> = self
            .bookings
            .values()
            .filter(|b| filters.user_id.map_or(true, |u| b.user_id == Some(u)))
            .filter(|b| filters.status.map_or(true, |s| b.status == s))
            .filter(|b| filters.payment_status.map_or(true, |s| b.payment_status == s))
            .filter(|b| filters.showtime_id.map_or(true, |s| b.showtime_id == s))
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.into_iter().map(|b| self.to_detail(b, now)).collect()
    }

    fn to_detail(&self, b: &BookingRow, now: DateTime<Utc>) -> BookingDetail {
        let booked: Vec<BookingSeatEntry> = self
            .assignments
            .values()
            .filter(|a| a.booking_id == b.id)
            .filter_map(|a| {
                self.seats.get(&a.seat_id).map(|s| BookingSeatEntry {
                    seat_id: s.id,
                    seat_number: s.seat_number.clone(),
                    row: s.row.clone(),
                    column: s.column,
                    unit_price_minor: Some(a.unit_price_minor),
                    source: SeatSource::Booked,
                })
            })
            .collect();

        let seats = if booked.is_empty() {
            self.holds
                .values()
                .filter(|h| h.booking_id == b.id && h.expires_at > now)
                .filter_map(|h| {
                    self.seats.get(&h.seat_id).map(|s| BookingSeatEntry {
                        seat_id: s.id,
                        seat_number: s.seat_number.clone(),
                        row: s.row.clone(),
                        column: s.column,
                        unit_price_minor: None,
                        source: SeatSource::Hold,
                    })
                })
                .collect()
        } else {
            booked
        };

        let showtime = self
            .showtimes
            .get(&b.showtime_id)
            .map(|st| ShowtimeContext {
                id: st.id,
                room_id: st.room_id,
                starts_at: st.starts_at,
                reference_price_minor: st.price_minor,
            })
            .unwrap_or(ShowtimeContext {
                id: b.showtime_id,
                room_id: Uuid::nil(),
                starts_at: now,
                reference_price_minor: 0,
            });

        BookingDetail {
            id: b.id,
            booking_number: b.booking_number.clone(),
            user_id: b.user_id,
            status: b.status,
            payment_status: b.payment_status,
            currency: b.currency.clone(),
            subtotal_minor: b.totals.subtotal_minor,
            discount_minor: b.totals.discount_minor,
            tax_minor: b.totals.tax_minor,
            fee_minor: b.totals.fee_minor,
            total_minor: b.totals.total_minor,
            expires_at: b.expires_at,
            confirmed_at: b.confirmed_at,
            cancelled_at: b.cancelled_at,
            refunded_at: b.refunded_at,
            created_at: b.created_at,
            showtime,
            seats,
        }
    }

    /// Derived counter: permanently-assigned seats for the showtime.
    pub fn booked_seats(&self, showtime_id: Uuid) -> i32 {
        self.booked_counts.get(&showtime_id).copied().unwrap_or(0)
    }

    /// Ground truth the counter must match at all times.
    pub fn assignment_count(&self, showtime_id: Uuid) -> usize {
        self.assignments
            .keys()
            .filter(|(st, _)| *st == showtime_id)
            .count()
    }

    pub fn booking_total(&self, booking_id: Uuid) -> Option<i64> {
        self.bookings.get(&booking_id).map(|b| b.totals.total_minor)
    }

    pub fn booking_status(&self, booking_id: Uuid) -> Option<BookingStatus> {
        self.bookings.get(&booking_id).map(|b| b.status)
    }

    pub fn booking_payment_status(&self, booking_id: Uuid) -> Option<BookingPaymentStatus> {
        self.bookings.get(&booking_id).map(|b| b.payment_status)
    }

    pub fn booking_currency(&self, booking_id: Uuid) -> Option<String> {
        self.bookings.get(&booking_id).map(|b| b.currency.clone())
    }

    pub fn confirmed_seats(&self, booking_id: Uuid) -> Vec<Uuid> {
        self.assignments
            .values()
            .filter(|a| a.booking_id == booking_id)
            .map(|a| a.seat_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use marquee_catalog::SeatType;

    fn fixture() -> (ReservationLedger, Showtime, Vec<Seat>) {
        let room_id = Uuid::new_v4();
        let showtime = Showtime {
            id: Uuid::new_v4(),
            movie_id: Uuid::new_v4(),
            room_id,
            starts_at: Utc.with_ymd_and_hms(2026, 3, 1, 20, 0, 0).unwrap(),
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

        let mut ledger = ReservationLedger::new(ReservationPolicy::default());
        ledger.register_showtime(showtime.clone(), seats.clone());
        (ledger, showtime, seats)
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap()
    }

    fn hold_req(showtime: &Showtime, seats: &[&Seat]) -> HoldRequest {
        HoldRequest {
            showtime_id: showtime.id,
            seat_ids: seats.iter().map(|s| s.id).collect(),
            user_id: None,
        }
    }

    #[test]
    fn test_hold_two_seats() {
        let (mut ledger, showtime, seats) = fixture();
        let receipt = ledger
            .hold_seats(&hold_req(&showtime, &[&seats[0], &seats[1]]), t0())
            .unwrap();

        assert_eq!(receipt.status, BookingStatus::Pending);
        assert_eq!(receipt.expires_at, t0() + Duration::minutes(5));
        assert_eq!(receipt.items.len(), 2);
        assert_eq!(receipt.total_minor, 180_000);
        assert!(receipt.booking_number.starts_with("BK"));
        // Holds never count as booked.
        assert_eq!(ledger.booked_seats(showtime.id), 0);
    }

    #[test]
    fn test_second_hold_on_same_seat_conflicts() {
        let (mut ledger, showtime, seats) = fixture();
        ledger
            .hold_seats(&hold_req(&showtime, &[&seats[0], &seats[1]]), t0())
            .unwrap();

        let err = ledger
            .hold_seats(&hold_req(&showtime, &[&seats[0]]), t0() + Duration::minutes(1))
            .unwrap_err();
        match err {
            CoreError::Conflict { seat_ids, .. } => assert_eq!(seat_ids, vec![seats[0].id]),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_expired_hold_is_reacquirable_after_sweep() {
        let (mut ledger, showtime, seats) = fixture();
        let receipt = ledger
            .hold_seats(&hold_req(&showtime, &[&seats[0]]), t0())
            .unwrap();

        let later = t0() + Duration::minutes(6);
        let report = ledger.sweep(later);
        assert_eq!(report.expired, 1);
        assert_eq!(report.released_holds, 1);
        assert_eq!(
            ledger.booking_status(receipt.booking_id),
            Some(BookingStatus::Expired)
        );

        ledger
            .hold_seats(&hold_req(&showtime, &[&seats[0]]), later)
            .unwrap();
    }

    #[test]
    fn test_lazy_purge_allows_rehold_without_sweep() {
        let (mut ledger, showtime, seats) = fixture();
        ledger
            .hold_seats(&hold_req(&showtime, &[&seats[0]]), t0())
            .unwrap();

        // No sweep ran, but the hold is past its TTL.
        ledger
            .hold_seats(&hold_req(&showtime, &[&seats[0]]), t0() + Duration::minutes(6))
            .unwrap();
    }

    #[test]
    fn test_finalize_confirms_and_counts_seats() {
        let (mut ledger, showtime, seats) = fixture();
        let receipt = ledger
            .hold_seats(&hold_req(&showtime, &[&seats[0], &seats[1]]), t0())
            .unwrap();

        let out = ledger
            .finalize(receipt.booking_id, t0() + Duration::minutes(2))
            .unwrap();
        assert_eq!(out.status, BookingStatus::Confirmed);
        assert_eq!(out.newly_assigned, 2);
        assert!(!out.already_finalized);
        assert_eq!(ledger.booked_seats(showtime.id), 2);
        assert_eq!(ledger.assignment_count(showtime.id), 2);

        let detail = ledger
            .booking_detail(receipt.booking_id, t0() + Duration::minutes(3))
            .unwrap();
        assert_eq!(detail.status, BookingStatus::Confirmed);
        assert_eq!(detail.payment_status, BookingPaymentStatus::Paid);
        assert!(detail.seats.iter().all(|s| s.source == SeatSource::Booked));
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let (mut ledger, showtime, seats) = fixture();
        let receipt = ledger
            .hold_seats(&hold_req(&showtime, &[&seats[0], &seats[1]]), t0())
            .unwrap();
        ledger
            .finalize(receipt.booking_id, t0() + Duration::minutes(1))
            .unwrap();

        // Retried webhook.
        let again = ledger
            .finalize(receipt.booking_id, t0() + Duration::minutes(2))
            .unwrap();
        assert!(again.already_finalized);
        assert_eq!(again.newly_assigned, 0);
        // No double count.
        assert_eq!(ledger.booked_seats(showtime.id), 2);
        assert_eq!(ledger.assignment_count(showtime.id), 2);
    }

    #[test]
    fn test_finalize_after_expiry_conflicts() {
        let (mut ledger, showtime, seats) = fixture();
        let receipt = ledger
            .hold_seats(&hold_req(&showtime, &[&seats[0]]), t0())
            .unwrap();

        let err = ledger
            .finalize(receipt.booking_id, t0() + Duration::minutes(10))
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(ledger.booked_seats(showtime.id), 0);
    }

    #[test]
    fn test_sweep_never_expires_confirmed() {
        let (mut ledger, showtime, seats) = fixture();
        let receipt = ledger
            .hold_seats(&hold_req(&showtime, &[&seats[0]]), t0())
            .unwrap();
        ledger
            .finalize(receipt.booking_id, t0() + Duration::minutes(1))
            .unwrap();

        let report = ledger.sweep(t0() + Duration::hours(1));
        assert_eq!(report.expired, 0);
        assert_eq!(
            ledger.booking_status(receipt.booking_id),
            Some(BookingStatus::Confirmed)
        );
        assert_eq!(ledger.booked_seats(showtime.id), 1);
    }

    #[test]
    fn test_cancel_pending_frees_seats_immediately() {
        let (mut ledger, showtime, seats) = fixture();
        let receipt = ledger
            .hold_seats(&hold_req(&showtime, &[&seats[0], &seats[1]]), t0())
            .unwrap();

        let out = ledger.cancel(receipt.booking_id, t0() + Duration::minutes(1)).unwrap();
        assert_eq!(out.status, BookingStatus::Cancelled);
        assert_eq!(out.released_seats, 2);

        // Seats acquirable right away, before any sweep.
        ledger
            .hold_seats(&hold_req(&showtime, &[&seats[0], &seats[1]]), t0() + Duration::minutes(1))
            .unwrap();
    }

    #[test]
    fn test_cancel_confirmed_refunds_and_releases() {
        let (mut ledger, showtime, seats) = fixture();
        let receipt = ledger
            .hold_seats(&hold_req(&showtime, &[&seats[0], &seats[1]]), t0())
            .unwrap();
        ledger
            .finalize(receipt.booking_id, t0() + Duration::minutes(1))
            .unwrap();
        assert_eq!(ledger.booked_seats(showtime.id), 2);

        let out = ledger.cancel(receipt.booking_id, t0() + Duration::hours(1)).unwrap();
        assert_eq!(out.status, BookingStatus::Refunded);
        assert_eq!(out.released_seats, 2);
        assert_eq!(ledger.booked_seats(showtime.id), 0);
        assert_eq!(ledger.assignment_count(showtime.id), 0);
    }

    #[test]
    fn test_refund_rejected_inside_cutoff() {
        let (mut ledger, showtime, seats) = fixture();
        let receipt = ledger
            .hold_seats(&hold_req(&showtime, &[&seats[0]]), t0())
            .unwrap();
        ledger
            .finalize(receipt.booking_id, t0() + Duration::minutes(1))
            .unwrap();

        // Showtime starts 20:00; cutoff is 2h; 19:00 is too late.
        let too_late = Utc.with_ymd_and_hms(2026, 3, 1, 19, 0, 0).unwrap();
        let err = ledger.cancel(receipt.booking_id, too_late).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(ledger.booked_seats(showtime.id), 1);
    }

    #[test]
    fn test_cancel_terminal_booking_conflicts() {
        let (mut ledger, showtime, seats) = fixture();
        let receipt = ledger
            .hold_seats(&hold_req(&showtime, &[&seats[0]]), t0())
            .unwrap();
        ledger.cancel(receipt.booking_id, t0()).unwrap();

        let err = ledger.cancel(receipt.booking_id, t0()).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_duplicate_seat_ids_rejected() {
        let (mut ledger, showtime, seats) = fixture();
        let mut req = hold_req(&showtime, &[&seats[0]]);
        req.seat_ids.push(seats[0].id);
        let err = ledger.hold_seats(&req, t0()).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn test_seat_from_other_room_rejected() {
        let (mut ledger, showtime, _seats) = fixture();
        let foreign = Uuid::new_v4();
        let req = HoldRequest {
            showtime_id: showtime.id,
            seat_ids: vec![foreign],
            user_id: None,
        };
        let err = ledger.hold_seats(&req, t0()).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn test_booked_counter_matches_assignments_through_lifecycle() {
        let (mut ledger, showtime, seats) = fixture();

        let r1 = ledger
            .hold_seats(&hold_req(&showtime, &[&seats[0], &seats[1]]), t0())
            .unwrap();
        let r2 = ledger
            .hold_seats(&hold_req(&showtime, &[&seats[2]]), t0())
            .unwrap();

        ledger.finalize(r1.booking_id, t0() + Duration::minutes(1)).unwrap();
        ledger.sweep(t0() + Duration::minutes(10)); // expires r2
        assert_eq!(
            ledger.booking_status(r2.booking_id),
            Some(BookingStatus::Expired)
        );

        assert_eq!(
            ledger.booked_seats(showtime.id) as usize,
            ledger.assignment_count(showtime.id)
        );

        ledger.cancel(r1.booking_id, t0() + Duration::hours(1)).unwrap();
        assert_eq!(
            ledger.booked_seats(showtime.id) as usize,
            ledger.assignment_count(showtime.id)
        );
    }

    #[test]
    fn test_awaiting_payment_still_sweepable() {
        let (mut ledger, showtime, seats) = fixture();
        let receipt = ledger
            .hold_seats(&hold_req(&showtime, &[&seats[0]]), t0())
            .unwrap();
        ledger.mark_awaiting_payment(receipt.booking_id).unwrap();
        assert_eq!(
            ledger.booking_status(receipt.booking_id),
            Some(BookingStatus::AwaitingPayment)
        );

        let report = ledger.sweep(t0() + Duration::minutes(6));
        assert_eq!(report.expired, 1);
    }
}
