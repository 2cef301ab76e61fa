use std::sync::Arc;
use std::time::Instant;

use axum::extract::{DefaultBodyLimit, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::{
    Router,
    routing::{get, post},
};

use super::{media, pages, tags, tokens, users};
use crate::auth::authenticate;
use crate::clock::Clock;
use crate::config::ServerConfig;
use crate::content::VersioningService;
use crate::media::MediaStorage;
use crate::store::Store;

/// Room for multipart boundaries and the small text fields sent with a file.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub clock: Arc<dyn Clock>,
    pub pages: VersioningService,
    pub media: MediaStorage,
    pub config: ServerConfig,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, config: ServerConfig) -> Self {
        Self {
            pages: VersioningService::new(store.clone(), clock.clone()),
            media: MediaStorage::new(&config.data_dir),
            store,
            clock,
            config,
        }
    }
}

async fn health() -> &'static str {
    "OK"
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status();

    tracing::info!(
        "{} {} {} {}ms",
        method,
        uri.path(),
        status.as_u16(),
        latency.as_millis()
    );

    response
}

fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        // Tokens
        .route("/token", post(tokens::issue_token).delete(tokens::revoke_token))
        // Users
        .route("/users", get(users::list_users).post(users::register))
        .route(
            "/users/{id}",
            get(users::get_user)
                .patch(users::update_user)
                .delete(users::delete_user),
        )
        .route("/users/{id}/pages", get(users::list_user_pages))
        // Pages
        .route("/pages", get(pages::list_pages).post(pages::create_page))
        .route("/pages/slug/{slug}", get(pages::get_page_by_slug))
        .route(
            "/pages/{id}",
            get(pages::get_page)
                .patch(pages::update_page)
                .delete(pages::delete_page),
        )
        // Page history
        .route("/pages/{id}/versions", get(pages::list_versions))
        .route(
            "/pages/{id}/versions/{version_id}",
            get(pages::get_version),
        )
        .route(
            "/pages/{id}/versions/{version_id}/restore",
            post(pages::restore_version),
        )
        // Tags
        .route("/tags", get(tags::list_tags).post(tags::create_tag))
        .route(
            "/tags/{id}",
            get(tags::get_tag)
                .patch(tags::update_tag)
                .delete(tags::delete_tag),
        )
        // Media
        .route("/media", get(media::list_media).post(media::upload_media))
        .route(
            "/media/{id}",
            get(media::get_media).delete(media::delete_media),
        )
        .route("/media/{id}/file", get(media::download_media))
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.max_upload_bytes + MULTIPART_OVERHEAD;

    let api = api_router()
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn_with_state(state.clone(), authenticate));

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api)
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}
