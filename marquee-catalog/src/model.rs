use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatType {
    Regular,
    Vip,
    Couple,
    Disabled,
}

/// A physical seat. Identity is immutable once referenced by a hold or an
/// assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Seat {
    pub id: Uuid,
    pub room_id: Uuid,
    pub seat_number: String,
    pub row: String,
    pub column: i32,
    pub seat_type: SeatType,
    /// Per-seat price in minor units; falls back to the showtime's
    /// reference price when unset.
    pub price_minor: Option<i64>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: Uuid,
    pub cinema_id: Uuid,
    pub name: String,
}

/// A scheduled screening of a movie in a room. `total_seats` is the room
/// capacity snapshot; the booked-seat counter itself is owned by the
/// reservation engine, not the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Showtime {
    pub id: Uuid,
    pub movie_id: Uuid,
    pub room_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub price_minor: i64,
    pub total_seats: i32,
    pub is_active: bool,
}

impl Seat {
    /// Effective unit price against a showtime's reference price.
    pub fn unit_price(&self, reference_price_minor: i64) -> i64 {
        self.price_minor.unwrap_or(reference_price_minor)
    }
}
