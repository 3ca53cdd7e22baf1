use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures_util::{Stream, StreamExt};
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use marquee_core::CoreError;

use crate::{error::ApiError, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/showtimes/{id}/stream", get(showtime_stream))
}

/// GET /v1/showtimes/{id}/stream
/// Live seat-map feed. Every hold taken on the showtime is pushed as a
/// `seat_held` event so open seat maps grey seats out in real time.
async fn showtime_stream(
    State(state): State<AppState>,
    Path(showtime_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    state
        .catalog
        .get_showtime(showtime_id)
        .await
        .map_err(|e| CoreError::internal(e.to_string()))?
        .ok_or_else(|| CoreError::not_found("Showtime not found"))?;

    let rx = state.sse_tx.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |result| async move {
        match result {
            Ok(event) if event.showtime_id == showtime_id => {
                let data = serde_json::to_string(&event).unwrap_or_default();
                Some(Ok(Event::default().event("seat_held").data(data)))
            }
            // Other showtimes and lagged receivers are skipped.
            _ => None,
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
