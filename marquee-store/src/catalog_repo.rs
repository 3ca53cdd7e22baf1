use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use marquee_catalog::{CatalogError, CatalogProvider, Seat, SeatType, Showtime};

pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ShowtimeRow {
    id: Uuid,
    movie_id: Uuid,
    room_id: Uuid,
    starts_at: DateTime<Utc>,
    price_minor: i64,
    total_seats: i32,
    is_active: bool,
}

#[derive(sqlx::FromRow)]
struct SeatRow {
    id: Uuid,
    room_id: Uuid,
    seat_number: String,
    row_label: String,
    col: i32,
    seat_type: String,
    price_minor: Option<i64>,
    is_active: bool,
}

fn parse_seat_type(s: &str) -> SeatType {
    match s {
        "VIP" => SeatType::Vip,
        "COUPLE" => SeatType::Couple,
        "DISABLED" => SeatType::Disabled,
        _ => SeatType::Regular,
    }
}

fn backend(e: sqlx::Error) -> CatalogError {
    CatalogError::Backend(e.to_string())
}

#[async_trait]
impl CatalogProvider for PgCatalog {
    async fn get_showtime(&self, id: Uuid) -> Result<Option<Showtime>, CatalogError> {
        let row = sqlx::query_as::<_, ShowtimeRow>(
            "SELECT id, movie_id, room_id, starts_at, price_minor, total_seats, is_active \
             FROM showtimes WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        Ok(row.map(|r| Showtime {
            id: r.id,
            movie_id: r.movie_id,
            room_id: r.room_id,
            starts_at: r.starts_at,
            price_minor: r.price_minor,
            total_seats: r.total_seats,
            is_active: r.is_active,
        }))
    }

    async fn get_seats(
        &self,
        room_id: Uuid,
        seat_ids: Option<&[Uuid]>,
    ) -> Result<Vec<Seat>, CatalogError> {
        let rows = sqlx::query_as::<_, SeatRow>(
            "SELECT id, room_id, seat_number, row_label, col, seat_type, price_minor, is_active \
             FROM seats \
             WHERE room_id = $1 AND ($2::uuid[] IS NULL OR id = ANY($2)) \
             ORDER BY row_label, col",
        )
        .bind(room_id)
        .bind(seat_ids.map(|ids| ids.to_vec()))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        Ok(rows
            .into_iter()
            .map(|r| Seat {
                id: r.id,
                room_id: r.room_id,
                seat_number: r.seat_number,
                row: r.row_label,
                column: r.col,
                seat_type: parse_seat_type(&r.seat_type),
                price_minor: r.price_minor,
                is_active: r.is_active,
            })
            .collect())
    }
}
