pub mod app_config;
pub mod booking_repo;
pub mod catalog_repo;
pub mod database;
pub mod memory;
pub mod payment_repo;
pub mod ticket_repo;

pub use booking_repo::PgReservationRepository;
pub use catalog_repo::PgCatalog;
pub use database::DbClient;
pub use memory::MemoryStore;
pub use payment_repo::PgPaymentRepository;
pub use ticket_repo::PgTicketRepository;

use marquee_core::error::CoreError;

pub(crate) fn db_err(e: sqlx::Error) -> CoreError {
    CoreError::internal(format!("database error: {e}"))
}

pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}
