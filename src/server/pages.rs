use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::auth::{MaybeUser, RequireAuthor, RequireUser};
use crate::content::{Actor, NewPage, PageChanges, slugify};
use crate::server::AppState;
use crate::server::dto::{CreatePageRequest, PaginationParams};
use crate::server::response::{
    ApiError, ApiResponse, DEFAULT_PAGE_SIZE, PaginatedResponse, StoreResultExt, not_found_as,
    paginate,
};

/// GET /pages - published pages ordered by slug
pub async fn list_pages(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PaginationParams>,
) -> impl IntoResponse {
    let cursor = params.cursor.as_deref().unwrap_or("");

    let pages = state
        .store
        .list_published_pages(cursor, DEFAULT_PAGE_SIZE + 1)
        .api_err("Failed to list pages")?;

    let (pages, next_cursor, has_more) =
        paginate(pages, DEFAULT_PAGE_SIZE as usize, |p| p.slug.clone());

    let pages = pages
        .into_iter()
        .map(|page| state.pages.with_tags(page))
        .collect::<crate::error::Result<Vec<_>>>()?;

    Ok::<_, ApiError>(Json(PaginatedResponse::new(pages, next_cursor, has_more)))
}

pub async fn create_page(
    auth: RequireAuthor,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreatePageRequest>,
) -> impl IntoResponse {
    let slug = req
        .slug
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| slugify(&req.title));

    let new_page = NewPage {
        title: req.title,
        slug,
        content: req.content,
        summary: req.summary,
        tags: req.tags,
        publish_now: req.is_published,
        featured_image: req.featured_image,
    };

    let page = state.pages.create(&Actor::from(&auth.user), new_page)?;

    Ok::<_, ApiError>((StatusCode::CREATED, Json(ApiResponse::success(page))))
}

pub async fn get_page(
    MaybeUser(user): MaybeUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let viewer = user.as_ref().map(Actor::from);
    let page = state
        .pages
        .visible(&id, viewer.as_ref())
        .map_err(|e| not_found_as("Page not found", e))?;

    Ok::<_, ApiError>(Json(ApiResponse::success(page)))
}

pub async fn get_page_by_slug(
    MaybeUser(user): MaybeUser,
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> impl IntoResponse {
    let viewer = user.as_ref().map(Actor::from);
    let page = state
        .pages
        .visible_by_slug(&slug, viewer.as_ref())
        .map_err(|e| not_found_as("Page not found", e))?;

    Ok::<_, ApiError>(Json(ApiResponse::success(page)))
}

pub async fn update_page(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(changes): Json<PageChanges>,
) -> impl IntoResponse {
    let page = state
        .pages
        .edit(&id, &Actor::from(&auth.user), changes)
        .map_err(|e| not_found_as("Page not found", e))?;

    Ok::<_, ApiError>(Json(ApiResponse::success(page)))
}

pub async fn delete_page(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    state
        .pages
        .delete(&id, &Actor::from(&auth.user))
        .map_err(|e| not_found_as("Page not found", e))?;

    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}

pub async fn list_versions(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let versions = state
        .pages
        .history_for(&id, &Actor::from(&auth.user))
        .map_err(|e| not_found_as("Page not found", e))?;

    Ok::<_, ApiError>(Json(ApiResponse::success(versions)))
}

pub async fn get_version(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path((id, version_id)): Path<(String, i64)>,
) -> impl IntoResponse {
    let version = state
        .pages
        .version_for(&id, version_id, &Actor::from(&auth.user))
        .map_err(|e| not_found_as("Version not found", e))?;

    Ok::<_, ApiError>(Json(ApiResponse::success(version)))
}

pub async fn restore_version(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path((id, version_id)): Path<(String, i64)>,
) -> impl IntoResponse {
    let page = state
        .pages
        .restore(&id, version_id, &Actor::from(&auth.user))
        .map_err(|e| not_found_as("Version not found", e))?;

    Ok::<_, ApiError>(Json(ApiResponse::success(page)))
}
