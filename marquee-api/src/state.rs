use std::sync::Arc;

use tokio::sync::broadcast;

use marquee_catalog::CatalogProvider;
use marquee_core::repository::{PaymentRepository, ReservationRepository, TicketRepository};
use marquee_shared::models::events::SeatHeldEvent;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
    pub expiration: u64,
}

#[derive(Clone)]
pub struct AppState {
    pub reservations: Arc<dyn ReservationRepository>,
    pub tickets: Arc<dyn TicketRepository>,
    pub payments: Arc<dyn PaymentRepository>,
    pub catalog: Arc<dyn CatalogProvider>,
    pub sse_tx: broadcast::Sender<SeatHeldEvent>,
    pub auth: AuthConfig,
}
