use std::sync::Arc;

use tokio::time::{interval, Duration};
use tracing::{error, info};

use marquee_core::repository::ReservationRepository;

/// Background expiry sweeper. Ticks on a fixed interval and expires
/// bookings whose holds outlived their TTL, releasing the seats.
pub async fn start_sweeper(reservations: Arc<dyn ReservationRepository>, interval_seconds: u64) {
    let mut ticker = interval(Duration::from_secs(interval_seconds));
    info!("Expiry sweeper started, interval {}s", interval_seconds);

    loop {
        ticker.tick().await;
        match reservations.sweep_expired().await {
            Ok(report) if report.expired > 0 => {
                info!(
                    expired = report.expired,
                    released_holds = report.released_holds,
                    "Sweeper expired overdue bookings"
                );
            }
            Ok(_) => {}
            Err(e) => error!("Sweep failed: {}", e),
        }
    }
}
