use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use crate::auth::{RequireAdmin, RequireAuthor};
use crate::content::validate_tag_name;
use crate::server::AppState;
use crate::server::dto::{CreateTagRequest, PaginationParams, TagWithPages, UpdateTagRequest};
use crate::server::response::{
    ApiError, ApiResponse, DEFAULT_PAGE_SIZE, PaginatedResponse, StoreOptionExt, StoreResultExt,
    paginate,
};
use crate::types::Tag;

pub async fn list_tags(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PaginationParams>,
) -> impl IntoResponse {
    let cursor = params.cursor.as_deref().unwrap_or("");

    let tags = state
        .store
        .list_tags(cursor, DEFAULT_PAGE_SIZE + 1)
        .api_err("Failed to list tags")?;

    let (tags, next_cursor, has_more) =
        paginate(tags, DEFAULT_PAGE_SIZE as usize, |t| t.name.clone());

    Ok::<_, ApiError>(Json(PaginatedResponse::new(tags, next_cursor, has_more)))
}

pub async fn create_tag(
    _auth: RequireAuthor,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTagRequest>,
) -> impl IntoResponse {
    let store = state.store.as_ref();

    validate_tag_name(&req.name)?;

    if store
        .get_tag_by_name(&req.name)
        .api_err("Failed to check tag")?
        .is_some()
    {
        return Err(ApiError::conflict("Tag already exists"));
    }

    let tag = Tag {
        id: Uuid::new_v4().to_string(),
        name: req.name,
        created_at: state.clock.now(),
    };

    store.create_tag(&tag)?;

    Ok::<_, ApiError>((StatusCode::CREATED, Json(ApiResponse::success(tag))))
}

/// GET /tags/{id} - the tag with its published pages
pub async fn get_tag(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let store = state.store.as_ref();

    let tag = store
        .get_tag_by_id(&id)
        .api_err("Failed to get tag")?
        .or_not_found("Tag not found")?;

    let pages = store
        .list_tag_pages(&tag.id, true)
        .api_err("Failed to list tag pages")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(TagWithPages { tag, pages })))
}

pub async fn update_tag(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateTagRequest>,
) -> impl IntoResponse {
    let store = state.store.as_ref();

    let mut tag = store
        .get_tag_by_id(&id)
        .api_err("Failed to get tag")?
        .or_not_found("Tag not found")?;

    if let Some(name) = req.name {
        validate_tag_name(&name)?;

        if name != tag.name
            && store
                .get_tag_by_name(&name)
                .api_err("Failed to check tag name")?
                .is_some()
        {
            return Err(ApiError::conflict("Tag name already exists"));
        }
        tag.name = name;
    }

    store.update_tag(&tag)?;
    tracing::info!(tag_id = %tag.id, name = %tag.name, "tag updated");

    Ok::<_, ApiError>(Json(ApiResponse::success(tag)))
}

/// DELETE /tags/{id} - detaches the tag from its pages; the pages stay
pub async fn delete_tag(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let store = state.store.as_ref();

    let tag = store
        .get_tag_by_id(&id)
        .api_err("Failed to get tag")?
        .or_not_found("Tag not found")?;

    store.delete_tag(&tag.id).api_err("Failed to delete tag")?;
    tracing::info!(tag_id = %tag.id, name = %tag.name, "tag deleted");

    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}
