use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use shelflife_infra::sync::SyncStatus;

use crate::app::dto::{BatchResponse, ProcessQueueRequest, SyncQueueQuery};
use crate::app::errors;
use crate::app::routes::common::{parse_item_id, parse_store_id};
use crate::app::services::AppServices;

const DEFAULT_LIST_LIMIT: usize = 100;
const MAX_LIST_LIMIT: usize = 1000;
const MAX_PROCESS_BATCH: usize = 500;

pub fn router() -> Router {
    Router::new()
        .route("/sync-queue", get(list_items))
        .route("/sync-queue/stats", get(stats))
        .route("/sync-queue/process", post(process_queue))
        .route("/sync-queue/:item_id/retry", post(retry_item))
}

pub async fn process_queue(
    Extension(services): Extension<Arc<AppServices>>,
    Path(store_id): Path<String>,
    body: Option<Json<ProcessQueueRequest>>,
) -> axum::response::Response {
    let store_id = match parse_store_id(&store_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let max_batch = match body.and_then(|Json(b)| b.max_batch) {
        None => services.engine().settings().sync_batch,
        Some(n) if (1..=MAX_PROCESS_BATCH).contains(&n) => n,
        Some(_) => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "validation_error",
                format!("max_batch must be between 1 and {MAX_PROCESS_BATCH}"),
            );
        }
    };

    match services
        .engine()
        .run_sync(store_id, max_batch, services.shutdown_token())
        .await
    {
        Ok(outcome) => (StatusCode::OK, Json(BatchResponse::from(outcome))).into_response(),
        Err(e) => errors::stage_error_to_response(e),
    }
}

pub async fn list_items(
    Extension(services): Extension<Arc<AppServices>>,
    Path(store_id): Path<String>,
    Query(query): Query<SyncQueueQuery>,
) -> axum::response::Response {
    let store_id = match parse_store_id(&store_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let status = match query.status.as_deref() {
        None | Some("") => None,
        Some(raw) => match SyncStatus::parse(raw) {
            Some(s) => Some(s),
            None => {
                return errors::json_error(
                    StatusCode::BAD_REQUEST,
                    "invalid_status",
                    "status must be one of: pending, syncing, completed, failed",
                );
            }
        },
    };
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT);

    match services
        .engine()
        .processor()
        .store()
        .list(store_id, status, limit)
        .await
    {
        Ok(items) => (StatusCode::OK, Json(items)).into_response(),
        Err(e) => errors::sync_error_to_response(e),
    }
}

pub async fn stats(
    Extension(services): Extension<Arc<AppServices>>,
    Path(store_id): Path<String>,
) -> axum::response::Response {
    let store_id = match parse_store_id(&store_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.engine().processor().stats(store_id).await {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(e) => errors::sync_error_to_response(e),
    }
}

pub async fn retry_item(
    Extension(services): Extension<Arc<AppServices>>,
    Path((store_id, item_id)): Path<(String, String)>,
) -> axum::response::Response {
    let store_id = match parse_store_id(&store_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let item_id = match parse_item_id(&item_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.engine().processor().retry_item(store_id, item_id).await {
        Ok(item) => (StatusCode::OK, Json(item)).into_response(),
        Err(e) => errors::sync_error_to_response(e),
    }
}
