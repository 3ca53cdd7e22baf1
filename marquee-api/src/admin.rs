use axum::{extract::State, middleware, routing::post, Json, Router};

use marquee_core::repository::SweepReport;

use crate::{
    error::ApiError, middleware::auth::staff_auth_middleware, state::AppState,
};

pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/v1/admin/sweep", post(run_sweep))
        .route_layer(middleware::from_fn_with_state(
            state,
            staff_auth_middleware,
        ))
}

/// POST /v1/admin/sweep
/// Run the expiry sweep on demand. The same pass the background worker
/// runs on its interval; useful in ops runbooks and tests.
async fn run_sweep(State(state): State<AppState>) -> Result<Json<SweepReport>, ApiError> {
    let report = state.reservations.sweep_expired().await?;
    if report.expired > 0 {
        tracing::info!(
            expired = report.expired,
            released_holds = report.released_holds,
            "Manual sweep expired overdue bookings"
        );
    }
    Ok(Json(report))
}
