mod server;

pub use server::{DEFAULT_MAX_UPLOAD_BYTES, DEFAULT_TOKEN_TTL_SECONDS, ServerConfig};
