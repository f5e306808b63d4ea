use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use shelflife_pricing::find_overlaps;

use crate::app::errors;
use crate::app::routes::common::parse_store_id;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/pricing-rules", get(list_rules))
        .route("/pricing-rules/overlaps", get(list_overlaps))
}

/// Active rules (the default set is seeded on first access).
pub async fn list_rules(
    Extension(services): Extension<Arc<AppServices>>,
    Path(store_id): Path<String>,
) -> axum::response::Response {
    let store_id = match parse_store_id(&store_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.engine().load_rules(store_id).await {
        Ok(rules) => (StatusCode::OK, Json(rules)).into_response(),
        Err(e) => errors::stage_error_to_response(e),
    }
}

pub async fn list_overlaps(
    Extension(services): Extension<Arc<AppServices>>,
    Path(store_id): Path<String>,
) -> axum::response::Response {
    let store_id = match parse_store_id(&store_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.engine().load_rules(store_id).await {
        Ok(rules) => (StatusCode::OK, Json(find_overlaps(&rules))).into_response(),
        Err(e) => errors::stage_error_to_response(e),
    }
}
