//! Behavioural tests for page versioning and the publish workflow, run
//! against a real SQLite store and a manual clock.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use rusqlite::params;
use tempfile::TempDir;

use scrivener::clock::{Clock, ManualClock};
use scrivener::content::{Actor, NewPage, PageChanges, VersioningService};
use scrivener::error::Error;
use scrivener::store::{SqliteStore, Store};
use scrivener::types::{Role, User};

struct Harness {
    _dir: TempDir,
    store: Arc<SqliteStore>,
    clock: Arc<ManualClock>,
    service: VersioningService,
    author: Actor,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteStore::new(dir.path().join("pages.db")).unwrap());
        store.initialize().unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap(),
        ));

        let harness = Self {
            service: VersioningService::new(store.clone(), clock.clone()),
            _dir: dir,
            store,
            clock,
            author: Actor::new("author", false),
        };
        harness.add_user("author", Role::User);
        harness.add_user("editor", Role::Admin);
        harness.add_user("reader", Role::User);
        harness
    }

    fn add_user(&self, id: &str, role: Role) {
        let now = self.clock.now();
        self.store
            .create_user(&User {
                id: id.to_string(),
                username: id.to_string(),
                email: format!("{id}@example.com"),
                password_hash: String::new(),
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

    fn count(&self, table: &str) -> i64 {
        self.store
            .connection()
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), params![], |row| {
                row.get(0)
            })
            .unwrap()
    }

    fn create(&self, title: &str, slug: &str, content: &str) -> String {
        self.service
            .create(
                &self.author,
                NewPage {
                    title: title.to_string(),
                    slug: slug.to_string(),
                    content: content.to_string(),
                    ..Default::default()
                },
            )
            .unwrap()
            .page
            .id
    }

    fn set_content(&self, page_id: &str, content: &str) {
        self.service
            .edit(
                page_id,
                &self.author,
                PageChanges {
                    content: Some(content.to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
    }

    fn set_published(&self, page_id: &str, published: bool) -> scrivener::types::Page {
        self.service
            .edit(
                page_id,
                &self.author,
                PageChanges {
                    is_published: Some(published),
                    ..Default::default()
                },
            )
            .unwrap()
            .page
    }
}

#[test]
fn test_create_edit_restore_walkthrough() {
    let h = Harness::new();

    let id = h.create("Hello", "hello", "A");
    assert_eq!(h.service.list_versions(&id).unwrap().len(), 1);

    h.clock.advance(Duration::minutes(1));
    h.set_content(&id, "B");
    let versions = h.service.list_versions(&id).unwrap();
    assert_eq!(versions.len(), 2);
    assert_eq!(h.store.get_page(&id).unwrap().unwrap().content, "B");

    let first = versions.last().unwrap().id;
    h.clock.advance(Duration::minutes(1));
    let restored = h.service.restore(&id, first, &h.author).unwrap();

    assert_eq!(restored.page.content, "A");
    assert_eq!(h.service.list_versions(&id).unwrap().len(), 3);
}

#[test]
fn test_n_edits_make_n_plus_one_versions() {
    let h = Harness::new();
    let id = h.create("Counter", "counter", "0");

    for n in 1..=5 {
        h.clock.advance(Duration::seconds(1));
        h.set_content(&id, &n.to_string());

        let versions = h.service.list_versions(&id).unwrap();
        assert_eq!(versions.len(), n + 1);
    }

    // Newest first, and every snapshot holds the content the edit replaced
    let contents: Vec<String> = h
        .service
        .list_versions(&id)
        .unwrap()
        .into_iter()
        .map(|v| v.content)
        .collect();
    assert_eq!(contents, ["4", "3", "2", "1", "0", "0"]);
}

#[test]
fn test_restore_matches_chosen_version() {
    let h = Harness::new();
    let id = h.create("One", "doc", "first body");

    h.service
        .edit(
            &id,
            &h.author,
            PageChanges {
                title: Some("Two".to_string()),
                content: Some("second body".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    h.set_content(&id, "third body");

    let versions = h.service.list_versions(&id).unwrap();
    let target = versions
        .iter()
        .find(|v| v.content == "second body")
        .unwrap()
        .clone();
    let before = versions.len();

    let page = h.service.restore(&id, target.id, &h.author).unwrap().page;

    assert_eq!(page.title, target.title);
    assert_eq!(page.content, target.content);

    let after = h.service.list_versions(&id).unwrap();
    assert_eq!(after.len(), before + 1);
    assert_eq!(after[0].content, "third body");
    assert_eq!(h.service.get_version(&id, target.id).unwrap(), target);
}

#[test]
fn test_restore_by_admin_stamps_time_and_actor() {
    let h = Harness::new();
    let id = h.create("One", "doc", "first body");
    let created_at = h.clock.now();

    h.clock.advance(Duration::minutes(5));
    h.set_content(&id, "second body");
    let first = h
        .service
        .list_versions(&id)
        .unwrap()
        .into_iter()
        .find(|v| v.content == "first body")
        .unwrap();

    h.clock.advance(Duration::minutes(30));
    let editor = Actor::new("editor", true);
    let page = h.service.restore(&id, first.id, &editor).unwrap().page;

    assert_eq!(page.content, "first body");
    assert_eq!(page.updated_at, h.clock.now());
    assert_eq!(page.created_at, created_at);
    assert_eq!(page.author_id, "author");

    let stored = h.store.get_page(&id).unwrap().unwrap();
    assert_eq!(stored.updated_at, h.clock.now());

    let versions = h.service.list_versions(&id).unwrap();
    assert_eq!(versions.len(), 3);
    assert_eq!(versions[0].content, "second body");
    assert_eq!(versions[0].user_id, "editor");
    assert_eq!(versions[0].created_at, h.clock.now());
    assert_eq!(versions[1].user_id, "author");
}

#[test]
fn test_published_at_survives_unpublish_and_republish() {
    let h = Harness::new();
    let id = h.create("Draft", "draft", "text");
    assert!(h.store.get_page(&id).unwrap().unwrap().published_at.is_none());

    h.clock.advance(Duration::hours(1));
    let first_publish = h.clock.now();
    let page = h.set_published(&id, true);
    assert!(page.is_published);
    assert_eq!(page.published_at, Some(first_publish));

    h.clock.advance(Duration::hours(1));
    let page = h.set_published(&id, false);
    assert!(!page.is_published);
    assert_eq!(page.published_at, Some(first_publish));

    h.clock.advance(Duration::hours(1));
    h.set_content(&id, "edited while unpublished");
    let page = h.set_published(&id, true);
    assert_eq!(page.published_at, Some(first_publish));

    let stored = h.store.get_page(&id).unwrap().unwrap();
    assert_eq!(stored.published_at, Some(first_publish));
    assert_eq!(stored.updated_at, h.clock.now());

    // Publishing and unpublishing are edits too
    assert_eq!(h.service.list_versions(&id).unwrap().len(), 5);
}

#[test]
fn test_duplicate_slug_commits_nothing() {
    let h = Harness::new();
    h.create("Original", "taken", "text");

    let pages = h.count("pages");
    let versions = h.count("page_versions");
    let tags = h.count("tags");

    let result = h.service.create(
        &h.author,
        NewPage {
            title: "Copy".to_string(),
            slug: "taken".to_string(),
            content: "text".to_string(),
            tags: vec!["Brand New".to_string()],
            ..Default::default()
        },
    );

    assert!(matches!(result, Err(Error::Validation(_))));
    assert_eq!(h.count("pages"), pages);
    assert_eq!(h.count("page_versions"), versions);
    assert_eq!(h.count("tags"), tags);
    assert!(h.store.get_tag_by_name("Brand New").unwrap().is_none());
}

#[test]
fn test_tags_are_shared_by_name() {
    let h = Harness::new();

    for slug in ["one", "two"] {
        h.service
            .create(
                &h.author,
                NewPage {
                    title: slug.to_string(),
                    slug: slug.to_string(),
                    content: "text".to_string(),
                    tags: vec!["News".to_string()],
                    ..Default::default()
                },
            )
            .unwrap();
    }

    assert_eq!(h.count("tags"), 1);
    let news = h.store.get_tag_by_name("News").unwrap().unwrap();
    assert_eq!(h.store.list_tag_pages(&news.id, false).unwrap().len(), 2);

    // Exact match only
    h.service
        .create(
            &h.author,
            NewPage {
                title: "three".to_string(),
                slug: "three".to_string(),
                content: "text".to_string(),
                tags: vec!["news".to_string(), "News".to_string(), "news".to_string()],
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(h.count("tags"), 2);
}

#[test]
fn test_edit_replaces_tags_only_when_given() {
    let h = Harness::new();
    let id = h
        .service
        .create(
            &h.author,
            NewPage {
                title: "Tagged".to_string(),
                slug: "tagged".to_string(),
                content: "text".to_string(),
                tags: vec!["A".to_string(), "B".to_string()],
                ..Default::default()
            },
        )
        .unwrap()
        .page
        .id;

    h.set_content(&id, "new text");
    assert_eq!(h.store.list_page_tags(&id).unwrap().len(), 2);

    let page = h
        .service
        .edit(
            &id,
            &h.author,
            PageChanges {
                tags: Some(vec!["C".to_string()]),
                ..Default::default()
            },
        )
        .unwrap();
    let names: Vec<&str> = page.tags.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, ["C"]);
    assert_eq!(h.count("tags"), 3);
}

#[test]
fn test_restore_with_foreign_version_writes_nothing() {
    let h = Harness::new();
    let mine = h.create("Mine", "mine", "mine");
    let other = h.create("Other", "other", "other");
    let foreign = h.service.list_versions(&other).unwrap()[0].id;
    let versions = h.count("page_versions");

    let result = h.service.restore(&mine, foreign, &h.author);

    assert!(matches!(result, Err(Error::NotFound)));
    assert_eq!(h.count("page_versions"), versions);
    assert_eq!(h.store.get_page(&mine).unwrap().unwrap().content, "mine");
}

#[test]
fn test_unknown_page_is_not_found() {
    let h = Harness::new();

    assert!(matches!(
        h.service.list_versions("missing"),
        Err(Error::NotFound)
    ));
    assert!(matches!(
        h.service.restore("missing", 1, &h.author),
        Err(Error::NotFound)
    ));
    assert!(matches!(
        h.service.edit("missing", &h.author, PageChanges::default()),
        Err(Error::NotFound)
    ));
}

#[test]
fn test_non_author_edit_is_forbidden_and_writes_nothing() {
    let h = Harness::new();
    let id = h.create("Guarded", "guarded", "text");
    let versions = h.count("page_versions");

    let reader = Actor::new("reader", false);
    let result = h.service.edit(
        &id,
        &reader,
        PageChanges {
            content: Some("vandalised".to_string()),
            ..Default::default()
        },
    );

    assert!(matches!(result, Err(Error::Forbidden)));
    assert!(matches!(
        h.service.restore(&id, 1, &reader),
        Err(Error::Forbidden)
    ));
    assert_eq!(h.count("page_versions"), versions);

    // Admins may edit anyone's page; the snapshot is attributed to them
    let editor = Actor::new("editor", true);
    h.service
        .edit(
            &id,
            &editor,
            PageChanges {
                content: Some("fixed".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    let latest = &h.service.list_versions(&id).unwrap()[0];
    assert_eq!(latest.user_id, "editor");
    assert_eq!(latest.content, "text");
    assert_eq!(
        h.store.get_page(&id).unwrap().unwrap().author_id,
        "author"
    );
}

#[test]
fn test_delete_removes_history_but_keeps_tags() {
    let h = Harness::new();
    let id = h
        .service
        .create(
            &h.author,
            NewPage {
                title: "Short lived".to_string(),
                slug: "short-lived".to_string(),
                content: "text".to_string(),
                tags: vec!["Ephemeral".to_string()],
                ..Default::default()
            },
        )
        .unwrap()
        .page
        .id;
    h.set_content(&id, "more");

    h.service.delete(&id, &h.author).unwrap();

    assert_eq!(h.count("pages"), 0);
    assert_eq!(h.count("page_versions"), 0);
    assert_eq!(h.count("page_tags"), 0);
    assert!(h.store.get_tag_by_name("Ephemeral").unwrap().is_some());
}
