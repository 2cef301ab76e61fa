use crate::server::response::ApiError;

const MIN_USERNAME_LEN: usize = 2;
const MAX_USERNAME_LEN: usize = 20;
const MAX_EMAIL_LEN: usize = 120;
pub const MAX_ALT_TEXT_LEN: usize = 255;

pub fn validate_username(username: &str) -> Result<(), ApiError> {
    let len = username.chars().count();
    if len < MIN_USERNAME_LEN || len > MAX_USERNAME_LEN {
        return Err(ApiError::bad_request(format!(
            "Username must be between {MIN_USERNAME_LEN} and {MAX_USERNAME_LEN} characters"
        )));
    }
    if username.chars().any(char::is_whitespace) {
        return Err(ApiError::bad_request("Username cannot contain whitespace"));
    }
    Ok(())
}

/// Only a sanity check; addresses are never mailed.
pub fn validate_email(email: &str) -> Result<(), ApiError> {
    if email.len() > MAX_EMAIL_LEN {
        return Err(ApiError::bad_request(format!(
            "Email cannot exceed {MAX_EMAIL_LEN} characters"
        )));
    }
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(ApiError::bad_request("Invalid email address")),
    }
}

pub fn validate_alt_text(alt_text: &str) -> Result<(), ApiError> {
    if alt_text.chars().count() > MAX_ALT_TEXT_LEN {
        return Err(ApiError::bad_request(format!(
            "Alt text cannot exceed {MAX_ALT_TEXT_LEN} characters"
        )));
    }
    Ok(())
}
