//! Feeds from the inventory and sales subsystems.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use shelflife_catalog::LineItem;
use shelflife_infra::repository::ProductRepository;

use crate::app::dto::{AcceptedResponse, ProductInput};
use crate::app::errors;
use crate::app::routes::common::parse_store_id;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/products", get(list_products).put(upsert_products))
        .route("/orders", post(append_order_lines))
}

pub async fn list_products(
    Extension(services): Extension<Arc<AppServices>>,
    Path(store_id): Path<String>,
) -> axum::response::Response {
    let store_id = match parse_store_id(&store_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.products().list_products(store_id).await {
        Ok(products) => (StatusCode::OK, Json(products)).into_response(),
        Err(e) => errors::repository_error_to_response(e),
    }
}

/// Replace product snapshots; the whole batch is validated before anything is written.
pub async fn upsert_products(
    Extension(services): Extension<Arc<AppServices>>,
    Path(store_id): Path<String>,
    Json(body): Json<Vec<ProductInput>>,
) -> axum::response::Response {
    let store_id = match parse_store_id(&store_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let products: Vec<_> = body.into_iter().map(|p| p.into_product(store_id)).collect();
    if let Some(err) = products.iter().find_map(|p| p.validate().err()) {
        return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", err.to_string());
    }

    let accepted = products.len();
    for product in products {
        if let Err(e) = services.products().insert(product) {
            return errors::repository_error_to_response(e);
        }
    }
    (StatusCode::OK, Json(AcceptedResponse { accepted })).into_response()
}

pub async fn append_order_lines(
    Extension(services): Extension<Arc<AppServices>>,
    Path(store_id): Path<String>,
    Json(body): Json<Vec<LineItem>>,
) -> axum::response::Response {
    let store_id = match parse_store_id(&store_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let accepted = body.len();
    match services.orders().extend(store_id, body) {
        Ok(()) => (StatusCode::OK, Json(AcceptedResponse { accepted })).into_response(),
        Err(e) => errors::repository_error_to_response(e),
    }
}
