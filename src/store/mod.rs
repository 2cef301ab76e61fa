mod schema;
mod sqlite;

pub use sqlite::SqliteStore;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::*;

/// Store defines the database interface.
///
/// Multi-row writes (`insert_page`, `commit_page_revision`) are atomic: either
/// every row they touch is written or none is.
pub trait Store: Send + Sync {
    fn initialize(&self) -> Result<()>;

    // User operations
    fn create_user(&self, user: &User) -> Result<()>;
    fn get_user(&self, id: &str) -> Result<Option<User>>;
    fn get_user_by_email(&self, email: &str) -> Result<Option<User>>;
    fn get_user_by_username(&self, username: &str) -> Result<Option<User>>;
    fn list_users(&self, cursor: &str, limit: i32) -> Result<Vec<User>>;
    fn update_user(&self, user: &User) -> Result<()>;
    fn update_user_last_login(&self, id: &str, at: DateTime<Utc>) -> Result<()>;
    fn delete_user(&self, id: &str) -> Result<bool>;
    fn has_admin_user(&self) -> Result<bool>;

    // Token operations
    fn create_token(&self, token: &Token) -> Result<()>;
    fn get_token_by_lookup(&self, lookup: &str) -> Result<Option<Token>>;
    fn delete_token(&self, id: &str) -> Result<bool>;
    fn update_token_last_used(&self, id: &str, at: DateTime<Utc>) -> Result<()>;

    // Page operations
    fn insert_page(
        &self,
        page: &Page,
        tag_names: &[String],
        initial: &NewPageVersion,
    ) -> Result<PageVersion>;
    fn commit_page_revision(
        &self,
        page: &Page,
        tag_names: Option<&[String]>,
        snapshot: &NewPageVersion,
    ) -> Result<PageVersion>;
    fn get_page(&self, id: &str) -> Result<Option<Page>>;
    fn get_page_by_slug(&self, slug: &str) -> Result<Option<Page>>;
    fn list_published_pages(&self, cursor: &str, limit: i32) -> Result<Vec<Page>>;
    fn list_author_pages(&self, author_id: &str) -> Result<Vec<Page>>;
    fn delete_page(&self, id: &str) -> Result<bool>;

    // Page history
    fn list_page_versions(&self, page_id: &str) -> Result<Vec<PageVersion>>;
    fn get_page_version(&self, page_id: &str, version_id: i64) -> Result<Option<PageVersion>>;

    // Tag operations
    fn create_tag(&self, tag: &Tag) -> Result<()>;
    fn get_or_create_tag(&self, name: &str, now: DateTime<Utc>) -> Result<Tag>;
    fn get_tag_by_id(&self, id: &str) -> Result<Option<Tag>>;
    fn get_tag_by_name(&self, name: &str) -> Result<Option<Tag>>;
    fn list_tags(&self, cursor: &str, limit: i32) -> Result<Vec<Tag>>;
    fn update_tag(&self, tag: &Tag) -> Result<()>;
    fn delete_tag(&self, id: &str) -> Result<bool>;

    // Page-Tag M2M operations
    fn list_page_tags(&self, page_id: &str) -> Result<Vec<Tag>>;
    fn list_tag_pages(&self, tag_id: &str, published_only: bool) -> Result<Vec<Page>>;

    // Media operations
    fn create_media(&self, media: &Media) -> Result<()>;
    fn get_media(&self, id: &str) -> Result<Option<Media>>;
    fn list_media(&self, user_id: Option<&str>) -> Result<Vec<Media>>;
    fn delete_media(&self, id: &str) -> Result<bool>;
}
