use async_trait::async_trait;
use std::collections::HashMap;
use uuid::Uuid;

use crate::model::{Seat, Showtime};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Showtime not found: {0}")]
    ShowtimeNotFound(Uuid),

    #[error("Catalog backend error: {0}")]
    Backend(String),
}

/// Read access to showtime and seat definitions. The catalog is an external
/// collaborator; the reservation engine only consumes it.
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    async fn get_showtime(&self, id: Uuid) -> Result<Option<Showtime>, CatalogError>;

    /// Seats of a room, narrowed to the requested ids when given.
    async fn get_seats(
        &self,
        room_id: Uuid,
        seat_ids: Option<&[Uuid]>,
    ) -> Result<Vec<Seat>, CatalogError>;
}

/// In-memory catalog fixture used by tests and the memory store.
#[derive(Default)]
pub struct StaticCatalog {
    showtimes: HashMap<Uuid, Showtime>,
    seats: HashMap<Uuid, Seat>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_showtime(&mut self, showtime: Showtime) {
        self.showtimes.insert(showtime.id, showtime);
    }

    pub fn add_seat(&mut self, seat: Seat) {
        self.seats.insert(seat.id, seat);
    }

    pub fn showtime(&self, id: Uuid) -> Option<&Showtime> {
        self.showtimes.get(&id)
    }

    pub fn seat(&self, id: Uuid) -> Option<&Seat> {
        self.seats.get(&id)
    }

    pub fn seats_in_room(&self, room_id: Uuid) -> Vec<&Seat> {
        self.seats.values().filter(|s| s.room_id == room_id).collect()
    }
}

#[async_trait]
impl CatalogProvider for StaticCatalog {
    async fn get_showtime(&self, id: Uuid) -> Result<Option<Showtime>, CatalogError> {
        Ok(self.showtimes.get(&id).cloned())
    }

    async fn get_seats(
        &self,
        room_id: Uuid,
        seat_ids: Option<&[Uuid]>,
    ) -> Result<Vec<Seat>, CatalogError> {
        let seats = self
            .seats
            .values()
            .filter(|s| s.room_id == room_id)
            .filter(|s| seat_ids.map_or(true, |ids| ids.contains(&s.id)))
            .cloned()
            .collect();
        Ok(seats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SeatType;

    fn seat(room_id: Uuid, number: &str) -> Seat {
        Seat {
            id: Uuid::new_v4(),
            room_id,
            seat_number: number.to_string(),
            row: number[..1].to_string(),
            column: number[1..].parse().unwrap_or(1),
            seat_type: SeatType::Regular,
            price_minor: None,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn test_seat_lookup_scoped_to_room() {
        let room_a = Uuid::new_v4();
        let room_b = Uuid::new_v4();
        let mut catalog = StaticCatalog::new();
        let a1 = seat(room_a, "A1");
        let a1_id = a1.id;
        catalog.add_seat(a1);
        catalog.add_seat(seat(room_b, "A1"));

        let found = catalog.get_seats(room_a, Some(&[a1_id])).await.unwrap();
        assert_eq!(found.len(), 1);

        let wrong_room = catalog.get_seats(room_b, Some(&[a1_id])).await.unwrap();
        assert!(wrong_room.is_empty());
    }

    #[tokio::test]
    async fn test_missing_showtime_is_none() {
        let catalog = StaticCatalog::new();
        assert!(catalog.get_showtime(Uuid::new_v4()).await.unwrap().is_none());
    }
}
