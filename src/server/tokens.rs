use std::sync::Arc;

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::IntoResponse,
};
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::auth::{RequireUser, TokenGenerator, extract_basic_credentials, verify_password};
use crate::error::Error;
use crate::server::AppState;
use crate::server::dto::CreateTokenResponse;
use crate::server::response::{ApiError, ApiResponse, StoreResultExt};
use crate::store::Store;
use crate::types::Token;

const MAX_TOKEN_ATTEMPTS: usize = 3;

/// Generates and stores a token, retrying on the rare lookup collision.
fn store_new_token(
    store: &dyn Store,
    user_id: &str,
    now: DateTime<Utc>,
    ttl: Duration,
) -> Result<(Token, String), ApiError> {
    let expires_at = now
        .checked_add_signed(ttl)
        .ok_or_else(|| ApiError::internal("Token lifetime out of range"))?;
    let generator = TokenGenerator::new();

    for _ in 0..MAX_TOKEN_ATTEMPTS {
        let (raw_token, lookup, hash) = generator
            .generate()
            .api_err("Failed to generate token")?;

        let token = Token {
            id: Uuid::new_v4().to_string(),
            token_hash: hash,
            token_lookup: lookup,
            user_id: user_id.to_string(),
            created_at: now,
            expires_at: Some(expires_at),
            last_used_at: None,
        };

        match store.create_token(&token) {
            Ok(()) => return Ok((token, raw_token)),
            Err(Error::TokenLookupCollision) => {
                tracing::warn!("token lookup collision, retrying");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(ApiError::internal("Failed to generate a unique token"))
}

/// POST /token - exchanges HTTP Basic `email:password` for a bearer token.
/// The username is accepted in place of the email.
pub async fn issue_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let store = state.store.as_ref();

    let (login, password) = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(extract_basic_credentials)
        .ok_or_else(|| ApiError::unauthorized("Basic credentials required"))?;

    let user = match store
        .get_user_by_email(&login)
        .api_err("Failed to look up user")?
    {
        Some(user) => Some(user),
        None => store
            .get_user_by_username(&login)
            .api_err("Failed to look up user")?,
    };

    let Some(mut user) = user else {
        return Err(ApiError::unauthorized("Invalid credentials"));
    };

    if !verify_password(&password, &user.password_hash)? {
        tracing::warn!(user_id = %user.id, "failed login");
        return Err(ApiError::unauthorized("Invalid credentials"));
    }

    let now = state.clock.now();
    let (token, raw_token) = store_new_token(store, &user.id, now, state.config.token_ttl())?;

    store
        .update_user_last_login(&user.id, now)
        .api_err("Failed to record login")?;
    user.last_login_at = Some(now);

    tracing::info!(user_id = %user.id, token_id = %token.id, "token issued");

    Ok::<_, ApiError>((
        StatusCode::CREATED,
        Json(ApiResponse::success(CreateTokenResponse {
            token: raw_token,
            expires_at: token.expires_at,
            user,
        })),
    ))
}

/// DELETE /token - revokes the token presented with the request
pub async fn revoke_token(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    state
        .store
        .delete_token(&auth.token.id)
        .api_err("Failed to revoke token")?;

    tracing::info!(user_id = %auth.user.id, token_id = %auth.token.id, "token revoked");

    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}
