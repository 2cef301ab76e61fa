use std::sync::Arc;

use axum::{
    Json,
    extract::{FromRequestParts, Request, State},
    http::{HeaderValue, StatusCode, header::AUTHORIZATION, header::WWW_AUTHENTICATE, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;

use super::helpers::{TokenValidationError, extract_bearer_token, validate_token};
use crate::server::AppState;
use crate::types::{Token, User};

/// The caller behind a validated bearer token. Inserted into request
/// extensions by [`authenticate`].
#[derive(Debug, Clone)]
pub struct Identity {
    pub token: Token,
    pub user: User,
}

/// Extractor that requires any authenticated user
pub struct RequireUser {
    pub token: Token,
    pub user: User,
}

/// Extractor that requires a user allowed to create content (not a guest)
pub struct RequireAuthor {
    pub token: Token,
    pub user: User,
}

/// Extractor that requires an admin user
pub struct RequireAdmin {
    pub token: Token,
    pub user: User,
}

/// Extractor for endpoints that serve anonymous callers too
pub struct MaybeUser(pub Option<User>);

#[derive(Debug)]
pub enum AuthError {
    MissingAuth,
    InvalidScheme,
    InvalidToken,
    TokenExpired,
    NotAuthor,
    NotAdmin,
    InternalError,
}

impl From<TokenValidationError> for AuthError {
    fn from(e: TokenValidationError) -> Self {
        match e {
            TokenValidationError::InvalidScheme => AuthError::InvalidScheme,
            TokenValidationError::InvalidToken => AuthError::InvalidToken,
            TokenValidationError::TokenExpired => AuthError::TokenExpired,
            TokenValidationError::InternalError => AuthError::InternalError,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingAuth => (StatusCode::UNAUTHORIZED, "Authentication required"),
            AuthError::InvalidScheme => (StatusCode::UNAUTHORIZED, "Invalid authorization scheme"),
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "Invalid token"),
            AuthError::TokenExpired => (StatusCode::UNAUTHORIZED, "Token expired"),
            AuthError::NotAuthor => (
                StatusCode::FORBIDDEN,
                "Guest accounts cannot create content",
            ),
            AuthError::NotAdmin => (StatusCode::FORBIDDEN, "Admin access required"),
            AuthError::InternalError => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        let body = json!({ "data": null, "error": message });

        let mut response = (status, Json(body)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                WWW_AUTHENTICATE,
                HeaderValue::from_static("Bearer realm=\"scrivener\""),
            );
        }

        response
    }
}

/// Resolves the bearer token, if any, once per request. A bad token is
/// rejected here; a missing one leaves the request anonymous and lets the
/// handler's extractor decide.
pub async fn authenticate(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let auth_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let raw_token = match extract_bearer_token(auth_header) {
        Ok(token) => token,
        Err(e) => return AuthError::from(e).into_response(),
    };

    if let Some(raw_token) = raw_token {
        match validate_token(state.store.as_ref(), &raw_token, state.clock.now()) {
            Ok(identity) => {
                tracing::debug!(user = %identity.user.username, "authenticated request");
                request.extensions_mut().insert(identity);
            }
            Err(e) => return AuthError::from(e).into_response(),
        }
    }

    next.run(request).await
}

fn identity(parts: &Parts) -> Result<Identity, AuthError> {
    parts
        .extensions
        .get::<Identity>()
        .cloned()
        .ok_or(AuthError::MissingAuth)
}

impl<S: Send + Sync> FromRequestParts<S> for RequireUser {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Identity { token, user } = identity(parts)?;
        Ok(RequireUser { token, user })
    }
}

impl<S: Send + Sync> FromRequestParts<S> for RequireAuthor {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Identity { token, user } = identity(parts)?;

        if !user.role.can_author() {
            return Err(AuthError::NotAuthor);
        }

        Ok(RequireAuthor { token, user })
    }
}

impl<S: Send + Sync> FromRequestParts<S> for RequireAdmin {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Identity { token, user } = identity(parts)?;

        if !user.is_admin() {
            return Err(AuthError::NotAdmin);
        }

        Ok(RequireAdmin { token, user })
    }
}

impl<S: Send + Sync> FromRequestParts<S> for MaybeUser {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(identity(parts).ok().map(|i| i.user)))
    }
}
