use chrono::{DateTime, Utc};

use super::{Identity, TokenGenerator, parse_token};
use crate::store::Store;

#[derive(Debug, PartialEq, Eq)]
pub enum TokenValidationError {
    InvalidScheme,
    InvalidToken,
    TokenExpired,
    InternalError,
}

/// Extracts `(username, password)` from a Basic auth header.
pub fn extract_basic_credentials(header: &str) -> Option<(String, String)> {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    let encoded = header.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;

    let (username, password) = credentials.split_once(':')?;
    if username.is_empty() || password.is_empty() {
        return None;
    }

    Some((username.to_string(), password.to_string()))
}

/// Extracts a bearer token from the Authorization header.
/// Returns None when no header is present or it carries Basic credentials
/// (those are only meaningful to the token endpoint).
/// Returns Err if the auth scheme is unsupported.
pub fn extract_bearer_token(
    auth_header: Option<&str>,
) -> Result<Option<String>, TokenValidationError> {
    match auth_header {
        Some(header) => {
            if let Some(token) = header.strip_prefix("Bearer ") {
                let token = token.trim();
                if token.is_empty() {
                    return Err(TokenValidationError::InvalidToken);
                }
                Ok(Some(token.to_string()))
            } else if header.starts_with("Basic ") {
                Ok(None)
            } else {
                Err(TokenValidationError::InvalidScheme)
            }
        }
        None => Ok(None),
    }
}

/// Validates a raw token string against the store and resolves its user.
pub fn validate_token(
    store: &dyn Store,
    raw_token: &str,
    now: DateTime<Utc>,
) -> Result<Identity, TokenValidationError> {
    let (lookup, _secret) =
        parse_token(raw_token).map_err(|_| TokenValidationError::InvalidToken)?;

    let token = store
        .get_token_by_lookup(&lookup)
        .map_err(|_| TokenValidationError::InternalError)?
        .ok_or(TokenValidationError::InvalidToken)?;

    let generator = TokenGenerator::new();
    if !generator
        .verify(raw_token, &token.token_hash)
        .map_err(|_| TokenValidationError::InternalError)?
    {
        return Err(TokenValidationError::InvalidToken);
    }

    if let Some(expires_at) = &token.expires_at {
        if expires_at < &now {
            return Err(TokenValidationError::TokenExpired);
        }
    }

    let user = store
        .get_user(&token.user_id)
        .map_err(|_| TokenValidationError::InternalError)?
        .ok_or(TokenValidationError::InvalidToken)?;

    if let Err(e) = store.update_token_last_used(&token.id, now) {
        tracing::warn!("Failed to update token last_used_at: {e}");
    }

    Ok(Identity { token, user })
}
