use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use super::Actor;
use super::validation::{
    validate_content, validate_slug, validate_summary, validate_tag_name, validate_title,
};
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::store::Store;
use crate::types::{NewPageVersion, Page, PageVersion, PageWithTags};

/// Input for [`VersioningService::create`].
#[derive(Debug, Clone, Default)]
pub struct NewPage {
    pub title: String,
    pub slug: String,
    pub content: String,
    pub summary: Option<String>,
    pub tags: Vec<String>,
    pub publish_now: bool,
    pub featured_image: Option<String>,
}

/// Partial update for [`VersioningService::edit`]. `None` leaves a field
/// alone. An empty `summary` or `featured_image` clears it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PageChanges {
    pub title: Option<String>,
    pub slug: Option<String>,
    pub content: Option<String>,
    pub summary: Option<String>,
    pub is_published: Option<bool>,
    pub tags: Option<Vec<String>>,
    pub featured_image: Option<String>,
}

impl PageChanges {
    fn validate(&self) -> Result<()> {
        if let Some(title) = &self.title {
            validate_title(title)?;
        }
        if let Some(slug) = &self.slug {
            validate_slug(slug)?;
        }
        if let Some(content) = &self.content {
            validate_content(content)?;
        }
        if let Some(summary) = &self.summary {
            validate_summary(summary)?;
        }
        if let Some(tags) = &self.tags {
            tags.iter().try_for_each(|name| validate_tag_name(name))?;
        }
        Ok(())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn slug_in_use() -> Error {
    Error::Validation("slug already in use".to_string())
}

/// The slug's unique index is the last line of defence against a racing writer.
fn map_slug_conflict(e: Error) -> Error {
    match e {
        Error::AlreadyExists => slug_in_use(),
        other => other,
    }
}

/// Applies a publish-state change. `published_at` records the first time
/// the page went live and is never moved or cleared afterwards.
pub(crate) fn apply_publish_state(page: &mut Page, publish: bool, now: DateTime<Utc>) {
    if publish && page.published_at.is_none() {
        page.published_at = Some(now);
    }
    page.is_published = publish;
}

#[derive(Clone)]
pub struct VersioningService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl VersioningService {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn create(&self, actor: &Actor, new_page: NewPage) -> Result<PageWithTags> {
        validate_title(&new_page.title)?;
        validate_slug(&new_page.slug)?;
        validate_content(&new_page.content)?;
        if let Some(summary) = &new_page.summary {
            validate_summary(summary)?;
        }
        new_page
            .tags
            .iter()
            .try_for_each(|name| validate_tag_name(name))?;

        let featured_image = non_empty(new_page.featured_image);
        self.ensure_media_exists(featured_image.as_deref())?;
        self.ensure_slug_free(&new_page.slug, None)?;

        let now = self.clock.now();
        let page = Page {
            id: Uuid::new_v4().to_string(),
            title: new_page.title,
            slug: new_page.slug,
            content: new_page.content,
            summary: non_empty(new_page.summary),
            is_published: new_page.publish_now,
            published_at: new_page.publish_now.then_some(now),
            author_id: actor.user_id.clone(),
            featured_image,
            created_at: now,
            updated_at: now,
        };

        let initial = NewPageVersion::of(&page, &actor.user_id, now);
        let version = self
            .store
            .insert_page(&page, &new_page.tags, &initial)
            .map_err(map_slug_conflict)?;

        tracing::info!(
            page_id = %page.id,
            actor = %actor.user_id,
            version = version.id,
            "page created"
        );

        self.with_tags(page)
    }

    pub fn edit(&self, page_id: &str, actor: &Actor, changes: PageChanges) -> Result<PageWithTags> {
        let mut page = self.load(page_id)?;
        if !actor.can_modify(&page) {
            return Err(Error::Forbidden);
        }
        changes.validate()?;

        let now = self.clock.now();
        let snapshot = NewPageVersion::of(&page, &actor.user_id, now);

        if let Some(slug) = changes.slug {
            if slug != page.slug {
                self.ensure_slug_free(&slug, Some(page.id.as_str()))?;
            }
            page.slug = slug;
        }
        if let Some(title) = changes.title {
            page.title = title;
        }
        if let Some(content) = changes.content {
            page.content = content;
        }
        if let Some(summary) = changes.summary {
            page.summary = non_empty(Some(summary));
        }
        if let Some(image) = changes.featured_image {
            let image = non_empty(Some(image));
            self.ensure_media_exists(image.as_deref())?;
            page.featured_image = image;
        }
        if let Some(publish) = changes.is_published {
            apply_publish_state(&mut page, publish, now);
        }
        page.updated_at = now;

        let version = self
            .store
            .commit_page_revision(&page, changes.tags.as_deref(), &snapshot)
            .map_err(map_slug_conflict)?;

        tracing::info!(
            page_id = %page.id,
            actor = %actor.user_id,
            version = version.id,
            published = page.is_published,
            "page edited"
        );

        self.with_tags(page)
    }

    /// Copies a historical title and content back onto the page. The state
    /// being replaced is snapshotted first, so a restore can itself be undone.
    pub fn restore(&self, page_id: &str, version_id: i64, actor: &Actor) -> Result<PageWithTags> {
        let mut page = self.load(page_id)?;
        if !actor.can_modify(&page) {
            return Err(Error::Forbidden);
        }
        let version = self
            .store
            .get_page_version(page_id, version_id)?
            .ok_or(Error::NotFound)?;

        let now = self.clock.now();
        let snapshot = NewPageVersion::of(&page, &actor.user_id, now);

        page.title = version.title;
        page.content = version.content;
        page.updated_at = now;

        let recorded = self.store.commit_page_revision(&page, None, &snapshot)?;

        tracing::info!(
            page_id = %page.id,
            actor = %actor.user_id,
            restored_from = version_id,
            version = recorded.id,
            "page restored"
        );

        self.with_tags(page)
    }

    /// Versions of a page, newest first.
    pub fn list_versions(&self, page_id: &str) -> Result<Vec<PageVersion>> {
        self.load(page_id)?;
        self.store.list_page_versions(page_id)
    }

    pub fn get_version(&self, page_id: &str, version_id: i64) -> Result<PageVersion> {
        self.store
            .get_page_version(page_id, version_id)?
            .ok_or(Error::NotFound)
    }

    /// [`list_versions`](Self::list_versions) restricted to the author and admins.
    pub fn history_for(&self, page_id: &str, actor: &Actor) -> Result<Vec<PageVersion>> {
        let page = self.load(page_id)?;
        if !actor.can_modify(&page) {
            return Err(Error::Forbidden);
        }
        self.store.list_page_versions(page_id)
    }

    /// [`get_version`](Self::get_version) restricted to the author and admins.
    pub fn version_for(&self, page_id: &str, version_id: i64, actor: &Actor) -> Result<PageVersion> {
        let page = self.load(page_id)?;
        if !actor.can_modify(&page) {
            return Err(Error::Forbidden);
        }
        self.get_version(page_id, version_id)
    }

    pub fn delete(&self, page_id: &str, actor: &Actor) -> Result<()> {
        let page = self.load(page_id)?;
        if !actor.can_modify(&page) {
            return Err(Error::Forbidden);
        }
        if !self.store.delete_page(page_id)? {
            return Err(Error::NotFound);
        }

        tracing::info!(page_id = %page_id, actor = %actor.user_id, "page deleted");
        Ok(())
    }

    /// Fetches a page for a reader. Drafts are reported as missing unless the
    /// viewer may modify them.
    pub fn visible(&self, page_id: &str, viewer: Option<&Actor>) -> Result<PageWithTags> {
        let page = self.load(page_id)?;
        self.check_visible(page, viewer)
    }

    pub fn visible_by_slug(&self, slug: &str, viewer: Option<&Actor>) -> Result<PageWithTags> {
        let page = self.store.get_page_by_slug(slug)?.ok_or(Error::NotFound)?;
        self.check_visible(page, viewer)
    }

    /// Pages by one author. Drafts are included only for the author and admins.
    pub fn by_author(&self, author_id: &str, viewer: Option<&Actor>) -> Result<Vec<PageWithTags>> {
        let include_drafts = viewer.is_some_and(|v| v.privileged || v.user_id == author_id);

        self.store
            .list_author_pages(author_id)?
            .into_iter()
            .filter(|page| include_drafts || page.is_published)
            .map(|page| self.with_tags(page))
            .collect()
    }

    pub fn with_tags(&self, page: Page) -> Result<PageWithTags> {
        let tags = self.store.list_page_tags(&page.id)?;
        Ok(PageWithTags { page, tags })
    }

    fn check_visible(&self, page: Page, viewer: Option<&Actor>) -> Result<PageWithTags> {
        if !page.is_published && !viewer.is_some_and(|v| v.can_modify(&page)) {
            return Err(Error::NotFound);
        }
        self.with_tags(page)
    }

    fn load(&self, page_id: &str) -> Result<Page> {
        self.store.get_page(page_id)?.ok_or(Error::NotFound)
    }

    fn ensure_slug_free(&self, slug: &str, owner: Option<&str>) -> Result<()> {
        match self.store.get_page_by_slug(slug)? {
            Some(existing) if Some(existing.id.as_str()) != owner => Err(slug_in_use()),
            _ => Ok(()),
        }
    }

    fn ensure_media_exists(&self, media_id: Option<&str>) -> Result<()> {
        let Some(media_id) = media_id else {
            return Ok(());
        };
        if self.store.get_media(media_id)?.is_none() {
            return Err(Error::Validation(format!(
                "featured image '{media_id}' does not exist"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::SqliteStore;
    use crate::types::{Role, User};
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        store: Arc<SqliteStore>,
        clock: Arc<ManualClock>,
        service: VersioningService,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteStore::new(dir.path().join("test.db")).unwrap());
        store.initialize().unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
        ));
        let service = VersioningService::new(store.clone(), clock.clone());

        for (id, role) in [("alice", Role::User), ("bob", Role::User), ("root", Role::Admin)] {
            let now = clock.now();
            store
                .create_user(&User {
                    id: id.to_string(),
                    username: id.to_string(),
                    email: format!("{id}@example.com"),
                    password_hash: "unused".to_string(),
                    role,
                    first_name: None,
                    last_name: None,
                    bio: None,
                    created_at: now,
                    updated_at: now,
                    last_login_at: None,
                })
                .unwrap();
        }

        Fixture {
            _dir: dir,
            store,
            clock,
            service,
        }
    }

    fn alice() -> Actor {
        Actor::new("alice", false)
    }

    fn draft(slug: &str) -> NewPage {
        NewPage {
            title: "Hello".to_string(),
            slug: slug.to_string(),
            content: "A".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_sets_author_and_initial_version() {
        let f = fixture();
        let created = f.service.create(&alice(), draft("hello")).unwrap();

        assert_eq!(created.page.author_id, "alice");
        assert!(!created.page.is_published);
        assert!(created.page.published_at.is_none());

        let versions = f.service.list_versions(&created.page.id).unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].title, "Hello");
        assert_eq!(versions[0].content, "A");
        assert_eq!(versions[0].user_id, "alice");
    }

    #[test]
    fn test_create_publish_now_stamps_published_at() {
        let f = fixture();
        let page = f
            .service
            .create(
                &alice(),
                NewPage {
                    publish_now: true,
                    ..draft("live")
                },
            )
            .unwrap()
            .page;

        assert!(page.is_published);
        assert_eq!(page.published_at, Some(f.clock.now()));
    }

    #[test]
    fn test_create_rejects_invalid_fields() {
        let f = fixture();

        let no_title = NewPage {
            title: String::new(),
            ..draft("a")
        };
        assert!(matches!(
            f.service.create(&alice(), no_title),
            Err(Error::Validation(_))
        ));

        let bad_slug = draft("not a slug");
        assert!(matches!(
            f.service.create(&alice(), bad_slug),
            Err(Error::Validation(_))
        ));

        let no_content = NewPage {
            content: "  ".to_string(),
            ..draft("b")
        };
        assert!(matches!(
            f.service.create(&alice(), no_content),
            Err(Error::Validation(_))
        ));

        let unknown_image = NewPage {
            featured_image: Some("missing".to_string()),
            ..draft("c")
        };
        assert!(matches!(
            f.service.create(&alice(), unknown_image),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_edit_snapshots_pre_edit_state_as_actor() {
        let f = fixture();
        let page = f.service.create(&alice(), draft("hello")).unwrap().page;

        f.clock.advance(Duration::minutes(1));
        let admin = Actor::new("root", true);
        let edited = f
            .service
            .edit(
                &page.id,
                &admin,
                PageChanges {
                    content: Some("B".to_string()),
                    ..Default::default()
                },
            )
            .unwrap()
            .page;

        assert_eq!(edited.content, "B");
        assert_eq!(edited.updated_at, f.clock.now());
        assert_eq!(edited.created_at, page.created_at);

        let versions = f.service.list_versions(&page.id).unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].content, "A");
        assert_eq!(versions[0].user_id, "root");
        assert_eq!(versions[0].created_at, f.clock.now());
    }

    #[test]
    fn test_edit_by_stranger_is_forbidden_and_writes_nothing() {
        let f = fixture();
        let page = f.service.create(&alice(), draft("hello")).unwrap().page;

        let result = f.service.edit(
            &page.id,
            &Actor::new("bob", false),
            PageChanges {
                title: Some("Mine now".to_string()),
                ..Default::default()
            },
        );

        assert!(matches!(result, Err(Error::Forbidden)));
        assert_eq!(f.service.list_versions(&page.id).unwrap().len(), 1);
        assert_eq!(f.store.get_page(&page.id).unwrap().unwrap().title, "Hello");
    }

    #[test]
    fn test_edit_missing_page_is_not_found() {
        let f = fixture();
        let result = f
            .service
            .edit("nope", &alice(), PageChanges::default());
        assert!(matches!(result, Err(Error::NotFound)));
    }

    #[test]
    fn test_edit_to_taken_slug_is_validation_error() {
        let f = fixture();
        f.service.create(&alice(), draft("first")).unwrap();
        let second = f.service.create(&alice(), draft("second")).unwrap().page;

        let result = f.service.edit(
            &second.id,
            &alice(),
            PageChanges {
                slug: Some("first".to_string()),
                ..Default::default()
            },
        );

        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(f.service.list_versions(&second.id).unwrap().len(), 1);
    }

    #[test]
    fn test_edit_keeping_own_slug_is_allowed() {
        let f = fixture();
        let page = f.service.create(&alice(), draft("same")).unwrap().page;

        let edited = f
            .service
            .edit(
                &page.id,
                &alice(),
                PageChanges {
                    slug: Some("same".to_string()),
                    summary: Some("short".to_string()),
                    ..Default::default()
                },
            )
            .unwrap()
            .page;

        assert_eq!(edited.slug, "same");
        assert_eq!(edited.summary.as_deref(), Some("short"));
    }

    #[test]
    fn test_publish_state_keeps_first_published_at() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let f = fixture();
        let mut page = f.service.create(&alice(), draft("p")).unwrap().page;

        apply_publish_state(&mut page, true, t0);
        assert_eq!(page.published_at, Some(t0));

        apply_publish_state(&mut page, false, t0 + Duration::days(1));
        assert!(!page.is_published);
        assert_eq!(page.published_at, Some(t0));

        apply_publish_state(&mut page, true, t0 + Duration::days(2));
        assert!(page.is_published);
        assert_eq!(page.published_at, Some(t0));
    }

    #[test]
    fn test_restore_leaves_slug_publish_state_and_tags() {
        let f = fixture();
        let page = f
            .service
            .create(
                &alice(),
                NewPage {
                    tags: vec!["News".to_string()],
                    ..draft("hello")
                },
            )
            .unwrap()
            .page;
        let first = f.service.list_versions(&page.id).unwrap()[0].id;

        f.service
            .edit(
                &page.id,
                &alice(),
                PageChanges {
                    title: Some("Changed".to_string()),
                    slug: Some("changed".to_string()),
                    is_published: Some(true),
                    ..Default::default()
                },
            )
            .unwrap();

        let restored = f.service.restore(&page.id, first, &alice()).unwrap();

        assert_eq!(restored.page.title, "Hello");
        assert_eq!(restored.page.slug, "changed");
        assert!(restored.page.is_published);
        assert_eq!(restored.tags.len(), 1);
        assert_eq!(restored.tags[0].name, "News");
    }

    #[test]
    fn test_restore_foreign_version_is_not_found() {
        let f = fixture();
        let one = f.service.create(&alice(), draft("one")).unwrap().page;
        let two = f.service.create(&alice(), draft("two")).unwrap().page;
        let foreign = f.service.list_versions(&two.id).unwrap()[0].id;

        let result = f.service.restore(&one.id, foreign, &alice());

        assert!(matches!(result, Err(Error::NotFound)));
        assert_eq!(f.service.list_versions(&one.id).unwrap().len(), 1);
    }

    #[test]
    fn test_history_is_gated_to_author_and_admin() {
        let f = fixture();
        let page = f.service.create(&alice(), draft("h")).unwrap().page;

        assert!(f.service.history_for(&page.id, &alice()).is_ok());
        assert!(f.service.history_for(&page.id, &Actor::new("root", true)).is_ok());
        assert!(matches!(
            f.service.history_for(&page.id, &Actor::new("bob", false)),
            Err(Error::Forbidden)
        ));
    }

    #[test]
    fn test_drafts_hidden_from_other_readers() {
        let f = fixture();
        let page = f.service.create(&alice(), draft("secret")).unwrap().page;

        assert!(matches!(
            f.service.visible(&page.id, None),
            Err(Error::NotFound)
        ));
        assert!(matches!(
            f.service.visible_by_slug("secret", Some(&Actor::new("bob", false))),
            Err(Error::NotFound)
        ));
        assert!(f.service.visible(&page.id, Some(&alice())).is_ok());
        assert!(f
            .service
            .visible_by_slug("secret", Some(&Actor::new("root", true)))
            .is_ok());

        assert!(f.service.by_author("alice", None).unwrap().is_empty());
        assert_eq!(f.service.by_author("alice", Some(&alice())).unwrap().len(), 1);
    }

    #[test]
    fn test_delete_requires_author_or_admin() {
        let f = fixture();
        let page = f.service.create(&alice(), draft("gone")).unwrap().page;

        assert!(matches!(
            f.service.delete(&page.id, &Actor::new("bob", false)),
            Err(Error::Forbidden)
        ));
        f.service.delete(&page.id, &Actor::new("root", true)).unwrap();
        assert!(matches!(
            f.service.list_versions(&page.id),
            Err(Error::NotFound)
        ));
    }
}
