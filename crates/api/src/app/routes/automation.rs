use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};

use shelflife_infra::automation::StageSet;

use crate::app::routes::common::parse_store_id;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/automation/run", post(run_automation))
        .route("/automation/trigger", post(trigger_automation))
}

/// Run every stage now and return the report.
pub async fn run_automation(
    Extension(services): Extension<Arc<AppServices>>,
    Path(store_id): Path<String>,
) -> axum::response::Response {
    let store_id = match parse_store_id(&store_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let report = services
        .engine()
        .run_once(store_id, StageSet::ALL, services.shutdown_token())
        .await;

    (StatusCode::OK, Json(report)).into_response()
}

/// Ask the store's background runner for a run; returns immediately.
pub async fn trigger_automation(
    Extension(services): Extension<Arc<AppServices>>,
    Path(store_id): Path<String>,
) -> axum::response::Response {
    let store_id = match parse_store_id(&store_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    services.trigger(store_id);
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "store_id": store_id.to_string(), "triggered": true })),
    )
        .into_response()
}
