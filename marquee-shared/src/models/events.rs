use uuid::Uuid;

/// Pushed to seat-map subscribers the moment a hold is taken, so open
/// seat maps grey the seats out live.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct SeatHeldEvent {
    pub showtime_id: Uuid,
    pub seat_id: Uuid,
    pub seat_number: String,
    pub booking_id: Uuid,
    pub held_at: i64,
    pub expires_at: i64,
}
