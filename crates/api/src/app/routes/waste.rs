use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::Utc;

use shelflife_infra::repository::PredictionRepository;

use crate::app::dto::TrendQuery;
use crate::app::errors;
use crate::app::routes::common::parse_store_id;
use crate::app::services::AppServices;

const DEFAULT_TREND_WEEKS: u32 = 8;
const MAX_TREND_WEEKS: u32 = 104;

pub fn router() -> Router {
    Router::new()
        .route("/waste/predictions", get(latest_predictions))
        .route("/waste/trend", get(trend))
}

pub async fn latest_predictions(
    Extension(services): Extension<Arc<AppServices>>,
    Path(store_id): Path<String>,
) -> axum::response::Response {
    let store_id = match parse_store_id(&store_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services
        .engine()
        .repositories()
        .predictions
        .latest_run(store_id)
        .await
    {
        Ok(Some(run)) => (StatusCode::OK, Json(run)).into_response(),
        Ok(None) => errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            "no waste prediction run yet",
        ),
        Err(e) => errors::repository_error_to_response(e),
    }
}

pub async fn trend(
    Extension(services): Extension<Arc<AppServices>>,
    Path(store_id): Path<String>,
    Query(query): Query<TrendQuery>,
) -> axum::response::Response {
    let store_id = match parse_store_id(&store_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let weeks = query.weeks.unwrap_or(DEFAULT_TREND_WEEKS);
    if weeks == 0 || weeks > MAX_TREND_WEEKS {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            format!("weeks must be between 1 and {MAX_TREND_WEEKS}"),
        );
    }

    match services.engine().waste_trend(store_id, weeks, Utc::now()).await {
        Ok(points) => (StatusCode::OK, Json(points)).into_response(),
        Err(e) => errors::stage_error_to_response(e),
    }
}
