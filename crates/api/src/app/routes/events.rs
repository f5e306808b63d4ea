use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    response::IntoResponse,
    routing::get,
    Router,
};

use crate::app::routes::common::parse_store_id;
use crate::app::services::{self, AppServices};

pub fn router() -> Router {
    Router::new().route("/events", get(stream_events))
}

/// GET /stores/:store_id/events
///
/// Server-sent stream of the store's engine events (price changes, sync transitions, stage
/// failures, run summaries). Lossy: a slow client misses events rather than slowing the engine.
pub async fn stream_events(
    Extension(services): Extension<Arc<AppServices>>,
    Path(store_id): Path<String>,
) -> axum::response::Response {
    let store_id = match parse_store_id(&store_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let subscription = services.subscribe_events();
    tracing::debug!(store = %store_id, subscribers = services.event_subscribers(), "event stream opened");
    services::store_sse_stream(subscription, store_id).into_response()
}
