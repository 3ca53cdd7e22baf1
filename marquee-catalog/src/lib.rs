pub mod model;
pub mod provider;

pub use model::{Room, Seat, SeatType, Showtime};
pub use provider::{CatalogError, CatalogProvider, StaticCatalog};
