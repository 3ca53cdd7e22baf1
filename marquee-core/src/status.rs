use serde::{Deserialize, Serialize};

/// Booking lifecycle. Transitions are guarded with compare-and-swap updates
/// in the stores so a concurrent sweeper and finalizer can never both win
/// on the same booking.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    AwaitingPayment,
    Confirmed,
    Cancelled,
    Expired,
    Refunded,
}

impl BookingStatus {
    /// Whether a transition to `next` is allowed from this state.
    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        match self {
            Pending => matches!(next, AwaitingPayment | Cancelled | Expired | Confirmed),
            AwaitingPayment => matches!(next, Confirmed | Cancelled | Expired),
            Confirmed => matches!(next, Refunded),
            Cancelled | Expired | Refunded => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BookingStatus::Cancelled | BookingStatus::Expired | BookingStatus::Refunded
        )
    }

    /// States in which the booking still occupies seats through holds and
    /// is therefore subject to expiry sweeping.
    pub fn is_sweepable(self) -> bool {
        matches!(
            self,
            BookingStatus::Pending | BookingStatus::AwaitingPayment
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::AwaitingPayment => "AWAITING_PAYMENT",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Cancelled => "CANCELLED",
            BookingStatus::Expired => "EXPIRED",
            BookingStatus::Refunded => "REFUNDED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(BookingStatus::Pending),
            "AWAITING_PAYMENT" => Some(BookingStatus::AwaitingPayment),
            "CONFIRMED" => Some(BookingStatus::Confirmed),
            "CANCELLED" => Some(BookingStatus::Cancelled),
            "EXPIRED" => Some(BookingStatus::Expired),
            "REFUNDED" => Some(BookingStatus::Refunded),
            _ => None,
        }
    }
}

/// Payment posture of a booking as a whole, distinct from the status of
/// individual payment rows.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingPaymentStatus {
    Pending,
    Processing,
    Paid,
    Failed,
    Refunded,
}

impl BookingPaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BookingPaymentStatus::Pending => "PENDING",
            BookingPaymentStatus::Processing => "PROCESSING",
            BookingPaymentStatus::Paid => "PAID",
            BookingPaymentStatus::Failed => "FAILED",
            BookingPaymentStatus::Refunded => "REFUNDED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(BookingPaymentStatus::Pending),
            "PROCESSING" => Some(BookingPaymentStatus::Processing),
            "PAID" => Some(BookingPaymentStatus::Paid),
            "FAILED" => Some(BookingPaymentStatus::Failed),
            "REFUNDED" => Some(BookingPaymentStatus::Refunded),
            _ => None,
        }
    }
}

/// Per-seat ticket lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Issued,
    CheckedIn,
    Voided,
    Refunded,
}

impl TicketStatus {
    /// A checked-in ticket is frozen: it can neither be voided nor reissued.
    pub fn is_mutable(self) -> bool {
        !matches!(self, TicketStatus::CheckedIn)
    }

    pub fn is_valid_for_entry(self) -> bool {
        matches!(self, TicketStatus::Issued | TicketStatus::CheckedIn)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TicketStatus::Issued => "ISSUED",
            TicketStatus::CheckedIn => "CHECKED_IN",
            TicketStatus::Voided => "VOIDED",
            TicketStatus::Refunded => "REFUNDED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ISSUED" => Some(TicketStatus::Issued),
            "CHECKED_IN" => Some(TicketStatus::CheckedIn),
            "VOIDED" => Some(TicketStatus::Voided),
            "REFUNDED" => Some(TicketStatus::Refunded),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_transitions() {
        use BookingStatus::*;
        assert!(Pending.can_transition_to(AwaitingPayment));
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Pending.can_transition_to(Expired));
        assert!(!Pending.can_transition_to(Refunded));
    }

    #[test]
    fn test_confirmed_only_escapes_via_refund() {
        use BookingStatus::*;
        assert!(Confirmed.can_transition_to(Refunded));
        assert!(!Confirmed.can_transition_to(Cancelled));
        assert!(!Confirmed.can_transition_to(Expired));
        assert!(!Confirmed.can_transition_to(Pending));
    }

    #[test]
    fn test_terminal_states_are_dead_ends() {
        use BookingStatus::*;
        for terminal in [Cancelled, Expired, Refunded] {
            assert!(terminal.is_terminal());
            for next in [Pending, AwaitingPayment, Confirmed, Cancelled, Expired, Refunded] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_status_round_trip() {
        use BookingStatus::*;
        for s in [Pending, AwaitingPayment, Confirmed, Cancelled, Expired, Refunded] {
            assert_eq!(BookingStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(BookingStatus::parse("pending"), None);
    }

    #[test]
    fn test_checked_in_ticket_is_frozen() {
        assert!(!TicketStatus::CheckedIn.is_mutable());
        assert!(TicketStatus::Issued.is_mutable());
        assert!(TicketStatus::Voided.is_mutable());
    }
}
