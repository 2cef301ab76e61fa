mod helpers;
mod middleware;
mod password;
mod token;

pub use helpers::{extract_basic_credentials, validate_token};
pub use middleware::{
    AuthError, Identity, MaybeUser, RequireAdmin, RequireAuthor, RequireUser, authenticate,
};
pub use password::{MIN_PASSWORD_LEN, hash_password, validate_password, verify_password};
pub use token::{TokenGenerator, parse_token};
