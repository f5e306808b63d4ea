use axum::Router;

pub mod automation;
pub mod catalog;
pub mod common;
pub mod correlations;
pub mod events;
pub mod pricing;
pub mod sync_queue;
pub mod system;
pub mod waste;

/// Router for all store-scoped endpoints.
pub fn router() -> Router {
    let store = Router::new()
        .merge(automation::router())
        .merge(catalog::router())
        .merge(sync_queue::router())
        .merge(pricing::router())
        .merge(waste::router())
        .merge(correlations::router())
        .merge(events::router());

    Router::new().nest("/stores/:store_id", store)
}
