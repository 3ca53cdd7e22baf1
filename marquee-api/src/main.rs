use std::net::SocketAddr;
use std::sync::Arc;

use marquee_api::{
    app,
    state::{AppState, AuthConfig},
    worker,
};
use marquee_core::repository::ReservationRepository;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "marquee_api=debug,tower_http=debug,axum::rejection=trace".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = marquee_store::app_config::Config::load().expect("Failed to load config");
    tracing::info!("Starting Marquee API on port {}", config.server.port);

    let db = marquee_store::DbClient::new(&config.database.url)
        .await
        .expect("Failed to connect to Postgres");
    db.migrate().await.expect("Failed to run migrations");

    let policy = config.business_rules.reservation_policy();
    let reservations: Arc<dyn ReservationRepository> = Arc::new(
        marquee_store::PgReservationRepository::new(db.pool.clone(), policy),
    );

    // SSE Broadcast Channel
    let (sse_tx, _) = tokio::sync::broadcast::channel(100);

    let app_state = AppState {
        reservations: reservations.clone(),
        tickets: Arc::new(marquee_store::PgTicketRepository::new(db.pool.clone())),
        payments: Arc::new(marquee_store::PgPaymentRepository::new(db.pool.clone())),
        catalog: Arc::new(marquee_store::PgCatalog::new(db.pool.clone())),
        sse_tx,
        auth: AuthConfig {
            secret: config.auth.jwt_secret.clone(),
            expiration: config.auth.jwt_expiration_seconds,
        },
    };

    tokio::spawn(worker::start_sweeper(
        reservations,
        config.sweeper.interval_seconds,
    ));

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
