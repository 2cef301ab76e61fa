//! # Scrivener
//!
//! A small content server: versioned pages with tags, media uploads, and a
//! token-authenticated JSON API. Usable as a standalone binary or as a library.
//!
//! ## Library Usage
//!
//! ```toml
//! [dependencies]
//! scrivener = { version = "0.0.1", default-features = false }
//! ```
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use scrivener::clock::SystemClock;
//! use scrivener::config::ServerConfig;
//! use scrivener::server::{AppState, create_router};
//! use scrivener::store::{SqliteStore, Store};
//!
//! let config = ServerConfig::default();
//! let store = SqliteStore::new(config.db_path()).unwrap();
//! store.initialize().unwrap();
//!
//! let state = Arc::new(AppState::new(Arc::new(store), Arc::new(SystemClock), config));
//! let router = create_router(state);
//! // Serve with axum...
//! ```
//!
//! Pages are only ever written through [`content::VersioningService`], which
//! records a [`types::PageVersion`] for every change.
//!
//! ## Feature Flags
//!
//! - `cli` (default): Builds the `scrivener` binary. Disable with `default-features = false`.

pub mod auth;
pub mod clock;
pub mod config;
pub mod content;
pub mod error;
pub mod media;
pub mod server;
pub mod store;
pub mod types;
