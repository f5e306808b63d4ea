use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use shelflife_infra::automation::StageError;
use shelflife_infra::repository::RepositoryError;
use shelflife_infra::sync::SyncStoreError;

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn sync_error_to_response(err: SyncStoreError) -> axum::response::Response {
    let message = err.to_string();
    match err {
        SyncStoreError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", message),
        SyncStoreError::StoreIsolation => {
            json_error(StatusCode::FORBIDDEN, "store_isolation", message)
        }
        SyncStoreError::AttemptsExhausted(_) => {
            json_error(StatusCode::CONFLICT, "attempts_exhausted", message)
        }
        SyncStoreError::InvalidTransition(_) | SyncStoreError::ClaimLost(_) => {
            json_error(StatusCode::CONFLICT, "invalid_transition", message)
        }
        SyncStoreError::AlreadyExists(_) => json_error(StatusCode::CONFLICT, "conflict", message),
        SyncStoreError::Storage(_) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", message)
        }
    }
}

pub fn repository_error_to_response(err: RepositoryError) -> axum::response::Response {
    let message = err.to_string();
    match err {
        RepositoryError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", message),
        RepositoryError::StoreIsolation => {
            json_error(StatusCode::FORBIDDEN, "store_isolation", message)
        }
        RepositoryError::Validation(_) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", message)
        }
        RepositoryError::Storage(_) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", message)
        }
    }
}

pub fn stage_error_to_response(err: StageError) -> axum::response::Response {
    match err {
        StageError::Repository(e) => repository_error_to_response(e),
        StageError::Queue(e) => sync_error_to_response(e),
        StageError::Analysis(e) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "analysis_error", e.to_string())
        }
        StageError::Aborted(msg) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "aborted", msg),
    }
}

pub fn invalid_id(what: &str, raw: &str) -> axum::response::Response {
    json_error(
        StatusCode::BAD_REQUEST,
        "invalid_id",
        format!("{what} is not a valid id: {raw}"),
    )
}
