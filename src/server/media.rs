use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::auth::{RequireAuthor, RequireUser};
use crate::media::{MediaStorageError, file_extension};
use crate::server::AppState;
use crate::server::dto::ListMediaParams;
use crate::server::response::{ApiError, ApiResponse, StoreOptionExt, StoreResultExt};
use crate::server::validation::validate_alt_text;
use crate::types::{Media, MediaKind, User};

struct Upload {
    original_filename: String,
    data: Vec<u8>,
    kind: MediaKind,
    alt_text: Option<String>,
}

async fn parse_multipart_upload(
    multipart: &mut Multipart,
    max_bytes: usize,
) -> Result<Upload, ApiError> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut kind: Option<String> = None;
    let mut alt_text: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::new(e.status(), format!("Failed to read multipart: {e}")))?
    {
        match field.name() {
            Some("file") => {
                let filename = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| ApiError::bad_request("File field needs a filename"))?;
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::new(e.status(), format!("Failed to read file: {e}")))?;
                if data.len() > max_bytes {
                    return Err(ApiError::payload_too_large(format!(
                        "File size ({} bytes) exceeds maximum allowed size ({max_bytes} bytes)",
                        data.len()
                    )));
                }
                file = Some((filename, data.to_vec()));
            }
            Some("kind") => {
                kind = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ApiError::bad_request(format!("Failed to read kind: {e}")))?,
                );
            }
            Some("alt_text") => {
                alt_text = Some(field.text().await.map_err(|e| {
                    ApiError::bad_request(format!("Failed to read alt_text: {e}"))
                })?);
            }
            _ => {}
        }
    }

    let (original_filename, data) =
        file.ok_or_else(|| ApiError::bad_request("File field is required"))?;
    let kind = kind.ok_or_else(|| ApiError::bad_request("Kind field is required"))?;
    let kind = MediaKind::parse(&kind)
        .ok_or_else(|| ApiError::bad_request("Kind must be 'image' or 'document'"))?;

    Ok(Upload {
        original_filename,
        data,
        kind,
        alt_text: alt_text.filter(|s| !s.is_empty()),
    })
}

fn content_type(extension: &str) -> &'static str {
    match extension {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => "application/octet-stream",
    }
}

fn require_owner_or_admin(user: &User, media: &Media) -> Result<(), ApiError> {
    if media.user_id == user.id || user.is_admin() {
        Ok(())
    } else {
        Err(ApiError::forbidden("You do not own this file"))
    }
}

fn load_media(state: &AppState, user: &User, id: &str) -> Result<Media, ApiError> {
    let media = state
        .store
        .get_media(id)
        .api_err("Failed to get media")?
        .or_not_found("Media not found")?;

    require_owner_or_admin(user, &media)?;
    Ok(media)
}

/// GET /media - the caller's uploads; admins see everything
pub async fn list_media(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListMediaParams>,
) -> impl IntoResponse {
    let kind = match params.kind.as_deref() {
        Some(k) => Some(
            MediaKind::parse(k)
                .ok_or_else(|| ApiError::bad_request("Kind must be 'image' or 'document'"))?,
        ),
        None => None,
    };

    let owner = (!auth.user.is_admin()).then_some(auth.user.id.as_str());
    let media: Vec<Media> = state
        .store
        .list_media(owner)
        .api_err("Failed to list media")?
        .into_iter()
        .filter(|m| kind.is_none_or(|k| m.kind == k))
        .collect();

    Ok::<_, ApiError>(Json(ApiResponse::success(media)))
}

pub async fn upload_media(
    auth: RequireAuthor,
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> impl IntoResponse {
    let upload = parse_multipart_upload(&mut multipart, state.config.max_upload_bytes).await?;

    let extension = file_extension(&upload.original_filename)
        .filter(|ext| upload.kind.allows(ext))
        .ok_or_else(|| {
            ApiError::bad_request(format!(
                "Allowed {} extensions: {}",
                upload.kind.as_str(),
                upload.kind.allowed_extensions().join(", ")
            ))
        })?;

    if let Some(alt_text) = &upload.alt_text {
        validate_alt_text(alt_text)?;
    }

    let filename = format!("{}.{extension}", Uuid::new_v4());
    let sha256 = state
        .media
        .put(upload.kind, &filename, &upload.data)
        .await
        .map_err(|e| {
            tracing::error!("Failed to store upload: {e}");
            ApiError::internal("Failed to store file")
        })?;

    let media = Media {
        id: Uuid::new_v4().to_string(),
        filename,
        original_filename: upload.original_filename,
        kind: upload.kind,
        file_size: upload.data.len() as i64,
        file_extension: extension,
        sha256,
        alt_text: upload.alt_text,
        user_id: auth.user.id.clone(),
        created_at: state.clock.now(),
    };

    if let Err(e) = state.store.create_media(&media) {
        if let Err(cleanup) = state.media.delete(media.kind, &media.filename).await {
            tracing::warn!("Failed to remove orphaned upload {}: {cleanup}", media.filename);
        }
        return Err(e.into());
    }

    tracing::info!(
        media_id = %media.id,
        user_id = %auth.user.id,
        size = media.file_size,
        "media uploaded"
    );

    Ok::<_, ApiError>((StatusCode::CREATED, Json(ApiResponse::success(media))))
}

pub async fn get_media(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let media = load_media(&state, &auth.user, &id)?;

    Ok::<_, ApiError>(Json(ApiResponse::success(media)))
}

pub async fn download_media(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let media = load_media(&state, &auth.user, &id)?;

    let (reader, size) = match state.media.get(media.kind, &media.filename).await {
        Ok(result) => result,
        Err(MediaStorageError::NotFound) => {
            tracing::warn!(media_id = %media.id, "file missing from disk");
            return Err(ApiError::not_found("File not found"));
        }
        Err(e) => {
            tracing::error!("Media storage error: {e}");
            return Err(ApiError::internal("Storage error"));
        }
    };

    let body = Body::from_stream(ReaderStream::new(reader));

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type(&media.file_extension))
        .header(header::CONTENT_LENGTH, size)
        .header("X-Content-Type-Options", "nosniff")
        .body(body)
        .map_err(|_| ApiError::internal("Failed to build response"))?;

    let disposition = format!(
        "inline; filename=\"{}\"",
        media.original_filename.replace(['"', '\\'], "_")
    );
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        response
            .headers_mut()
            .insert(header::CONTENT_DISPOSITION, value);
    }

    Ok(response)
}

/// DELETE /media/{id} - removes the row, then the file. Pages using it as
/// their featured image lose the reference.
pub async fn delete_media(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let media = load_media(&state, &auth.user, &id)?;

    state
        .store
        .delete_media(&media.id)
        .api_err("Failed to delete media")?;

    if let Err(e) = state.media.delete(media.kind, &media.filename).await {
        tracing::warn!("Failed to remove file {}: {e}", media.filename);
    }

    tracing::info!(media_id = %media.id, by = %auth.user.id, "media deleted");

    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type() {
        assert_eq!(content_type("png"), "image/png");
        assert_eq!(content_type("jpeg"), "image/jpeg");
        assert_eq!(content_type("pdf"), "application/pdf");
        assert_eq!(content_type("exe"), "application/octet-stream");
    }
}
