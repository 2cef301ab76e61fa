use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::Deserialize;

use crate::error::{Error, Result};

pub const DEFAULT_TOKEN_TTL_SECONDS: i64 = 3600;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;
/// Ten years.
pub const MAX_TOKEN_TTL_SECONDS: i64 = 10 * 366 * 24 * 60 * 60;

/// Server settings. Every field has a default, so a TOML file only needs
/// the keys it wants to change.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    /// Lifetime of tokens issued by `POST /token`.
    pub token_ttl_seconds: i64,
    pub max_upload_bytes: usize,
}

impl ServerConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: ServerConfig =
            toml::from_str(s).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.token_ttl_seconds <= 0 {
            return Err(Error::Config(
                "token_ttl_seconds must be positive".to_string(),
            ));
        }
        if self.token_ttl_seconds > MAX_TOKEN_TTL_SECONDS {
            return Err(Error::Config(format!(
                "token_ttl_seconds cannot exceed {MAX_TOKEN_TTL_SECONDS}"
            )));
        }
        if self.max_upload_bytes == 0 {
            return Err(Error::Config(
                "max_upload_bytes must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> std::result::Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }

    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("scrivener.db")
    }

    #[must_use]
    pub fn token_ttl(&self) -> Duration {
        Duration::seconds(self.token_ttl_seconds)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            data_dir: PathBuf::from("./data"),
            token_ttl_seconds: DEFAULT_TOKEN_TTL_SECONDS,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.socket_addr().unwrap().port(), 8080);
        assert_eq!(config.db_path(), PathBuf::from("./data/scrivener.db"));
        assert_eq!(config.token_ttl(), Duration::hours(1));
        assert_eq!(config.max_upload_bytes, 16 * 1024 * 1024);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ServerConfig::from_toml_str(
            r#"
            port = 9000
            data_dir = "/var/lib/scrivener"
            "#,
        )
        .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/scrivener"));
        assert_eq!(config.token_ttl_seconds, DEFAULT_TOKEN_TTL_SECONDS);
    }

    #[test]
    fn test_rejects_unknown_keys_and_bad_values() {
        assert!(matches!(
            ServerConfig::from_toml_str("prot = 1"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            ServerConfig::from_toml_str("token_ttl_seconds = 0"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_token_ttl_is_bounded() {
        for ttl in ["9223372036854775807", "1000000000000000"] {
            assert!(matches!(
                ServerConfig::from_toml_str(&format!("token_ttl_seconds = {ttl}")),
                Err(Error::Config(_))
            ));
        }

        let config =
            ServerConfig::from_toml_str(&format!("token_ttl_seconds = {MAX_TOKEN_TTL_SECONDS}"))
                .unwrap();
        assert_eq!(config.token_ttl().num_seconds(), MAX_TOKEN_TTL_SECONDS);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = ServerConfig::from_toml_file(Path::new("/nonexistent/scrivener.toml"));
        assert!(matches!(err, Err(Error::Config(_))));
    }
}
