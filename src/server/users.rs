use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use crate::auth::{MaybeUser, RequireAdmin, RequireUser, hash_password, validate_password};
use crate::content::Actor;
use crate::server::AppState;
use crate::server::dto::{PaginationParams, RegisterRequest, UpdateUserRequest};
use crate::server::response::{
    ApiError, ApiResponse, DEFAULT_PAGE_SIZE, PaginatedResponse, StoreOptionExt, StoreResultExt,
    paginate,
};
use crate::server::validation::{validate_email, validate_username};
use crate::store::Store;
use crate::types::{Role, User};

fn require_self_or_admin(caller: &User, target_id: &str) -> Result<(), ApiError> {
    if caller.id == target_id || caller.is_admin() {
        Ok(())
    } else {
        Err(ApiError::forbidden("You can only manage your own account"))
    }
}

fn ensure_username_free(store: &dyn Store, username: &str) -> Result<(), ApiError> {
    if store
        .get_user_by_username(username)
        .api_err("Failed to check username")?
        .is_some()
    {
        return Err(ApiError::conflict("Username already taken"));
    }
    Ok(())
}

fn ensure_email_free(store: &dyn Store, email: &str) -> Result<(), ApiError> {
    if store
        .get_user_by_email(email)
        .api_err("Failed to check email")?
        .is_some()
    {
        return Err(ApiError::conflict("Email already registered"));
    }
    Ok(())
}

/// POST /users - open registration; new accounts get the `user` role
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> impl IntoResponse {
    let store = state.store.as_ref();

    validate_username(&req.username)?;
    validate_email(&req.email)?;
    validate_password(&req.password)?;

    ensure_username_free(store, &req.username)?;
    ensure_email_free(store, &req.email)?;

    let now = state.clock.now();
    let user = User {
        id: Uuid::new_v4().to_string(),
        username: req.username,
        email: req.email,
        password_hash: hash_password(&req.password)?,
        role: Role::User,
        first_name: req.first_name,
        last_name: req.last_name,
        bio: req.bio,
        created_at: now,
        updated_at: now,
        last_login_at: None,
    };

    store.create_user(&user)?;
    tracing::info!(user_id = %user.id, username = %user.username, "user registered");

    Ok::<_, ApiError>((StatusCode::CREATED, Json(ApiResponse::success(user))))
}

pub async fn list_users(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Query(params): Query<PaginationParams>,
) -> impl IntoResponse {
    let cursor = params.cursor.as_deref().unwrap_or("");

    let users = state
        .store
        .list_users(cursor, DEFAULT_PAGE_SIZE + 1)
        .api_err("Failed to list users")?;

    let (users, next_cursor, has_more) =
        paginate(users, DEFAULT_PAGE_SIZE as usize, |u| u.username.clone());

    Ok::<_, ApiError>(Json(PaginatedResponse::new(users, next_cursor, has_more)))
}

pub async fn get_user(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    require_self_or_admin(&auth.user, &id)?;

    let user = state
        .store
        .get_user(&id)
        .api_err("Failed to get user")?
        .or_not_found("User not found")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(user)))
}

/// PATCH /users/{id} - a role change from a non-admin is ignored, not refused
pub async fn update_user(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateUserRequest>,
) -> impl IntoResponse {
    require_self_or_admin(&auth.user, &id)?;
    let store = state.store.as_ref();

    let mut user = store
        .get_user(&id)
        .api_err("Failed to get user")?
        .or_not_found("User not found")?;

    if let Some(username) = req.username {
        validate_username(&username)?;
        if username != user.username {
            ensure_username_free(store, &username)?;
        }
        user.username = username;
    }
    if let Some(email) = req.email {
        validate_email(&email)?;
        if email != user.email {
            ensure_email_free(store, &email)?;
        }
        user.email = email;
    }
    if let Some(password) = req.password {
        validate_password(&password)?;
        user.password_hash = hash_password(&password)?;
    }
    if let Some(first_name) = req.first_name {
        user.first_name = Some(first_name).filter(|s| !s.is_empty());
    }
    if let Some(last_name) = req.last_name {
        user.last_name = Some(last_name).filter(|s| !s.is_empty());
    }
    if let Some(bio) = req.bio {
        user.bio = Some(bio).filter(|s| !s.is_empty());
    }
    if let Some(role) = req.role {
        if auth.user.is_admin() {
            user.role = role;
        } else {
            tracing::debug!(user_id = %auth.user.id, "ignoring role change from non-admin");
        }
    }
    user.updated_at = state.clock.now();

    store.update_user(&user)?;
    tracing::info!(user_id = %user.id, by = %auth.user.id, "user updated");

    Ok::<_, ApiError>(Json(ApiResponse::success(user)))
}

/// DELETE /users/{id} - refused while the user still owns content
pub async fn delete_user(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    require_self_or_admin(&auth.user, &id)?;

    if !state.store.delete_user(&id)? {
        return Err(ApiError::not_found("User not found"));
    }
    tracing::info!(user_id = %id, by = %auth.user.id, "user deleted");

    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}

/// GET /users/{id}/pages - drafts included for the user themselves and admins
pub async fn list_user_pages(
    MaybeUser(viewer): MaybeUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    state
        .store
        .get_user(&id)
        .api_err("Failed to get user")?
        .or_not_found("User not found")?;

    let viewer = viewer.as_ref().map(Actor::from);
    let pages = state.pages.by_author(&id, viewer.as_ref())?;

    Ok::<_, ApiError>(Json(ApiResponse::success(pages)))
}
