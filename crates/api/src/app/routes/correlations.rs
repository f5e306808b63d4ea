use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use shelflife_analytics::DEFAULT_TOP_N;
use shelflife_infra::repository::CorrelationRepository;

use crate::app::dto::LimitQuery;
use crate::app::errors;
use crate::app::routes::common::parse_store_id;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new().route("/correlations", get(top_correlations))
}

pub async fn top_correlations(
    Extension(services): Extension<Arc<AppServices>>,
    Path(store_id): Path<String>,
    Query(query): Query<LimitQuery>,
) -> axum::response::Response {
    let store_id = match parse_store_id(&store_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let limit = query.limit.unwrap_or(DEFAULT_TOP_N).min(500);

    match services
        .engine()
        .repositories()
        .correlations
        .top(store_id, limit)
        .await
    {
        Ok(rows) => (StatusCode::OK, Json(rows)).into_response(),
        Err(e) => errors::repository_error_to_response(e),
    }
}
