use std::sync::Arc;

use axum::{
    extract::{Extension, Multipart, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use tracing::warn;

use authors_core::{AuthorId, AuthorPatch, Operation, Relations};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_author).get(list_authors))
        .route("/:id", get(get_author).patch(update_author).delete(delete_author))
}

fn parse_id(raw: &str) -> Result<AuthorId, axum::response::Response> {
    raw.parse::<AuthorId>().map_err(errors::domain_error_to_response)
}

pub async fn create_author(
    Extension(services): Extension<Arc<AppServices>>,
    multipart: Multipart,
) -> axum::response::Response {
    let form = match dto::read_create_form(multipart).await {
        Ok(form) => form,
        Err(res) => return res,
    };

    let mut new = form.author;
    if let Err(e) = new.validate() {
        return errors::domain_error_to_response(e);
    }

    let mut stored_image = None;
    if let Some(image) = form.image {
        match services.blobs.store(image.bytes, &image.content_type, &image.file_name).await {
            Ok(url) => {
                new.image = Some(url.clone());
                stored_image = Some(url);
            }
            Err(e) => return errors::blob_error_to_response(e),
        }
    }

    let author = match services.store.insert(new).await {
        Ok(a) => a,
        Err(e) => {
            if let Some(url) = stored_image {
                if let Err(blob_err) = services.blobs.remove(&url).await {
                    warn!(url = %url, error = %blob_err, "failed to remove image of unsaved author");
                }
            }
            return errors::store_error_to_response(e);
        }
    };

    if let Err(e) = services.publish(vec![author.clone()], Operation::Create).await {
        return errors::publish_error_to_response(e);
    }

    (StatusCode::CREATED, Json(serde_json::json!({ "author": author }))).into_response()
}

pub async fn list_authors(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::ListAuthorsQuery>,
) -> axum::response::Response {
    let authors = match services.store.list(&query.filter()).await {
        Ok(a) => a,
        Err(e) => return errors::store_error_to_response(e),
    };

    let authors = services.gateway.enrich(authors, &query.relations()).await;

    (StatusCode::OK, Json(serde_json::json!({ "authors": authors }))).into_response()
}

pub async fn get_author(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Query(query): Query<dto::GetAuthorQuery>,
) -> axum::response::Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(res) => return res,
    };

    let author = match services.store.get(&id).await {
        Ok(Some(a)) => a,
        Ok(None) => return errors::not_found(),
        Err(e) => return errors::store_error_to_response(e),
    };

    let relations = Relations::parse(query.relations.as_deref());
    let Some(author) = services.gateway.enrich(vec![author], &relations).await.pop() else {
        return errors::not_found();
    };

    (StatusCode::OK, Json(serde_json::json!({ "author": author }))).into_response()
}

pub async fn update_author(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::UpdateAuthorRequest>,
) -> axum::response::Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(res) => return res,
    };

    let patch = AuthorPatch::from(body);
    if let Err(e) = patch.validate() {
        return errors::domain_error_to_response(e);
    }

    let author = match services.store.update(&id, patch).await {
        Ok(Some(a)) => a,
        Ok(None) => return errors::not_found(),
        Err(e) => return errors::store_error_to_response(e),
    };

    if let Err(e) = services.publish(vec![author.clone()], Operation::Update).await {
        return errors::publish_error_to_response(e);
    }

    (StatusCode::OK, Json(serde_json::json!({ "author": author }))).into_response()
}

pub async fn delete_author(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(res) => return res,
    };

    let author = match services.store.delete(&id).await {
        Ok(Some(a)) => a,
        Ok(None) => return errors::not_found(),
        Err(e) => return errors::store_error_to_response(e),
    };

    if let Err(e) = services.publish(vec![author.clone()], Operation::Delete).await {
        return errors::publish_error_to_response(e);
    }

    (StatusCode::OK, Json(serde_json::json!({ "author": author }))).into_response()
}
