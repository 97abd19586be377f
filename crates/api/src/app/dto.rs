use axum::extract::Multipart;
use axum::http::StatusCode;
use serde::Deserialize;

use authors_core::{AuthorFilter, AuthorPatch, NewAuthor, Relations};

use crate::app::errors;

/// Largest accepted image upload.
pub const MAX_IMAGE_BYTES: usize = 250 * 1024;

const IMAGE_TYPES: [&str; 3] = ["jpeg", "jpg", "png"];

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Default, Deserialize)]
pub struct ListAuthorsQuery {
    pub authors: Option<String>,
    pub relations: Option<String>,
}

impl ListAuthorsQuery {
    pub fn filter(&self) -> AuthorFilter {
        AuthorFilter::parse(self.authors.as_deref())
    }

    pub fn relations(&self) -> Relations {
        Relations::parse(self.relations.as_deref())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct GetAuthorQuery {
    pub relations: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateAuthorRequest {
    pub name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
}

impl From<UpdateAuthorRequest> for AuthorPatch {
    fn from(body: UpdateAuthorRequest) -> Self {
        AuthorPatch {
            name: body.name,
            last_name: body.last_name,
            email: body.email,
            image: None,
        }
    }
}

/// Uploaded author image, already size/type checked.
#[derive(Debug)]
pub struct ImageUpload {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub file_name: String,
}

#[derive(Debug)]
pub struct CreateAuthorForm {
    pub author: NewAuthor,
    pub image: Option<ImageUpload>,
}

/// Read the multipart create form. Unknown parts are ignored.
pub async fn read_create_form(mut multipart: Multipart) -> Result<CreateAuthorForm, axum::response::Response> {
    let mut author = NewAuthor::default();
    let mut image = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return Err(errors::json_error(StatusCode::BAD_REQUEST, "invalid_form", e.to_string())),
        };

        let name = field.name().unwrap_or_default().to_string();
        if name == "image" {
            let file_name = field.file_name().unwrap_or_default().to_string();
            let content_type = field.content_type().unwrap_or_default().to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "invalid_form", e.to_string()))?;

            // Browsers send an empty part when no file was picked.
            if bytes.is_empty() && file_name.is_empty() {
                continue;
            }
            image = Some(validate_image(bytes.to_vec(), content_type, file_name)?);
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "invalid_form", e.to_string()))?;
        let value = value.trim().to_string();

        match name.as_str() {
            "name" => author.name = value,
            "last_name" => author.last_name = value,
            "email" if !value.is_empty() => author.email = Some(value),
            "password" if !value.is_empty() => author.password = Some(value),
            _ => {}
        }
    }

    Ok(CreateAuthorForm { author, image })
}

pub fn validate_image(
    bytes: Vec<u8>,
    content_type: String,
    file_name: String,
) -> Result<ImageUpload, axum::response::Response> {
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_image",
            format!("image must be at most {} KiB", MAX_IMAGE_BYTES / 1024),
        ));
    }

    let content_type_ok = IMAGE_TYPES.iter().any(|t| content_type.to_ascii_lowercase().contains(t));
    let extension_ok = file_name
        .rsplit_once('.')
        .is_some_and(|(_, ext)| IMAGE_TYPES.contains(&ext.to_ascii_lowercase().as_str()));
    if !content_type_ok && !extension_ok {
        return Err(errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_image",
            "image type must be jpeg, jpg or png",
        ));
    }

    Ok(ImageUpload {
        bytes,
        content_type,
        file_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_image_is_rejected() {
        let res = validate_image(vec![0; MAX_IMAGE_BYTES + 1], "image/png".into(), "a.png".into()).unwrap_err();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn image_type_comes_from_content_type_or_extension() {
        assert!(validate_image(vec![1], "image/jpeg".into(), "blob".into()).is_ok());
        assert!(validate_image(vec![1], "application/octet-stream".into(), "me.PNG".into()).is_ok());
        assert!(validate_image(vec![1], "image/gif".into(), "me.gif".into()).is_err());
    }

    #[test]
    fn update_request_never_touches_image() {
        let patch: AuthorPatch = UpdateAuthorRequest {
            name: Some("Ada".into()),
            last_name: None,
            email: None,
        }
        .into();
        assert_eq!(patch.image, None);
        assert_eq!(patch.name.as_deref(), Some("Ada"));
    }
}
