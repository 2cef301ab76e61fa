//! Page authoring, publishing and revision history.
//!
//! [`VersioningService`] is the only writer of pages. Every create, edit and
//! restore appends a [`PageVersion`](crate::types::PageVersion) in the same
//! store transaction that writes the page row.

mod service;
mod validation;

pub use service::{NewPage, PageChanges, VersioningService};
pub use validation::{
    MAX_SLUG_LEN, MAX_SUMMARY_LEN, MAX_TAG_NAME_LEN, MAX_TITLE_LEN, slugify, validate_content,
    validate_slug, validate_summary, validate_tag_name, validate_title,
};

use crate::types::{Page, User};

/// The caller of a content operation, as established by authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: String,
    pub privileged: bool,
}

impl Actor {
    #[must_use]
    pub fn new(user_id: impl Into<String>, privileged: bool) -> Self {
        Self {
            user_id: user_id.into(),
            privileged,
        }
    }

    /// Authors and admins may change a page and see its drafts and history.
    #[must_use]
    pub fn can_modify(&self, page: &Page) -> bool {
        self.privileged || self.user_id == page.author_id
    }
}

impl From<&User> for Actor {
    fn from(user: &User) -> Self {
        Actor::new(user.id.clone(), user.is_admin())
    }
}
