use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use authors_core::DomainError;
use authors_infra::author_store::StoreError;
use authors_infra::blob_store::BlobError;
use authors_infra::publisher::PublishError;

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    match err {
        DomainError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DomainError::InvalidId(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_id", msg),
        DomainError::NotFound => not_found(),
    }
}

pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    tracing::error!(error = %err, "author store failure");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", err.to_string())
}

pub fn publish_error_to_response(err: PublishError) -> axum::response::Response {
    json_error(StatusCode::BAD_GATEWAY, "publish_error", err.to_string())
}

pub fn blob_error_to_response(err: BlobError) -> axum::response::Response {
    match err {
        BlobError::InvalidKey(_) => json_error(StatusCode::BAD_REQUEST, "invalid_image", err.to_string()),
        BlobError::Io(_) => {
            tracing::error!(error = %err, "blob store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "blob_error", err.to_string())
        }
    }
}

pub fn not_found() -> axum::response::Response {
    json_error(StatusCode::NOT_FOUND, "not_found", "author not found")
}

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
