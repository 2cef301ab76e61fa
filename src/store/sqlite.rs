use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, Transaction, ffi, params};
use uuid::Uuid;

use super::Store;
use super::schema::SCHEMA;
use crate::error::{Error, Result};
use crate::types::*;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns a guard to the underlying database connection.
    /// This allows consuming applications to execute custom SQL.
    pub fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn()
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Handle SQLite's default datetime format: "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}

fn parse_optional_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.map(|s| parse_datetime(&s))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn has_extended_code(e: &rusqlite::Error, code: i32) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(err, _) if err.extended_code == code)
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    has_extended_code(e, ffi::SQLITE_CONSTRAINT_UNIQUE)
        || has_extended_code(e, ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
}

fn is_foreign_key_violation(e: &rusqlite::Error) -> bool {
    has_extended_code(e, ffi::SQLITE_CONSTRAINT_FOREIGNKEY)
}

/// Maps constraint failures on insert/update to domain errors.
fn map_write_error(e: rusqlite::Error, missing_reference: &str) -> Error {
    if is_unique_violation(&e) {
        Error::AlreadyExists
    } else if is_foreign_key_violation(&e) {
        Error::Conflict(missing_reference.to_string())
    } else {
        Error::from(e)
    }
}

const USER_COLUMNS: &str = "id, username, email, password_hash, role, first_name, last_name, bio, \
                            created_at, updated_at, last_login_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    let role: String = row.get(4)?;
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        role: Role::parse(&role).unwrap_or_else(|| {
            tracing::error!("Invalid role in database: '{}'", role);
            Role::Guest
        }),
        first_name: row.get(5)?,
        last_name: row.get(6)?,
        bio: row.get(7)?,
        created_at: parse_datetime(&row.get::<_, String>(8)?),
        updated_at: parse_datetime(&row.get::<_, String>(9)?),
        last_login_at: parse_optional_datetime(row.get(10)?),
    })
}

const TOKEN_COLUMNS: &str =
    "id, token_hash, token_lookup, user_id, created_at, expires_at, last_used_at";

fn token_from_row(row: &Row<'_>) -> rusqlite::Result<Token> {
    Ok(Token {
        id: row.get(0)?,
        token_hash: row.get(1)?,
        token_lookup: row.get(2)?,
        user_id: row.get(3)?,
        created_at: parse_datetime(&row.get::<_, String>(4)?),
        expires_at: parse_optional_datetime(row.get(5)?),
        last_used_at: parse_optional_datetime(row.get(6)?),
    })
}

const PAGE_COLUMNS: &str = "id, title, slug, content, summary, is_published, published_at, \
                            author_id, featured_image, created_at, updated_at";

fn page_from_row(row: &Row<'_>) -> rusqlite::Result<Page> {
    Ok(Page {
        id: row.get(0)?,
        title: row.get(1)?,
        slug: row.get(2)?,
        content: row.get(3)?,
        summary: row.get(4)?,
        is_published: row.get(5)?,
        published_at: parse_optional_datetime(row.get(6)?),
        author_id: row.get(7)?,
        featured_image: row.get(8)?,
        created_at: parse_datetime(&row.get::<_, String>(9)?),
        updated_at: parse_datetime(&row.get::<_, String>(10)?),
    })
}

fn version_from_row(row: &Row<'_>) -> rusqlite::Result<PageVersion> {
    Ok(PageVersion {
        id: row.get(0)?,
        page_id: row.get(1)?,
        title: row.get(2)?,
        content: row.get(3)?,
        user_id: row.get(4)?,
        created_at: parse_datetime(&row.get::<_, String>(5)?),
    })
}

fn tag_from_row(row: &Row<'_>) -> rusqlite::Result<Tag> {
    Ok(Tag {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: parse_datetime(&row.get::<_, String>(2)?),
    })
}

const MEDIA_COLUMNS: &str = "id, filename, original_filename, kind, file_size, file_extension, \
                             sha256, alt_text, user_id, created_at";

fn media_from_row(row: &Row<'_>) -> rusqlite::Result<Media> {
    let kind: String = row.get(3)?;
    Ok(Media {
        id: row.get(0)?,
        filename: row.get(1)?,
        original_filename: row.get(2)?,
        kind: MediaKind::parse(&kind).unwrap_or_else(|| {
            tracing::error!("Invalid media kind in database: '{}'", kind);
            MediaKind::Document
        }),
        file_size: row.get(4)?,
        file_extension: row.get(5)?,
        sha256: row.get(6)?,
        alt_text: row.get(7)?,
        user_id: row.get(8)?,
        created_at: parse_datetime(&row.get::<_, String>(9)?),
    })
}

/// Looks up a tag by exact name inside a transaction, creating it if absent.
fn get_or_create_tag_tx(tx: &Transaction<'_>, name: &str, now: &DateTime<Utc>) -> Result<Tag> {
    let existing = tx
        .query_row(
            "SELECT id, name, created_at FROM tags WHERE name = ?1",
            params![name],
            tag_from_row,
        )
        .optional()?;

    if let Some(tag) = existing {
        return Ok(tag);
    }

    let tag = Tag {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        created_at: *now,
    };
    tx.execute(
        "INSERT INTO tags (id, name, created_at) VALUES (?1, ?2, ?3)",
        params![tag.id, tag.name, format_datetime(&tag.created_at)],
    )?;
    Ok(tag)
}

/// Replaces the page's tag set with the named tags, creating missing ones.
fn set_page_tags_tx(
    tx: &Transaction<'_>,
    page_id: &str,
    tag_names: &[String],
    now: &DateTime<Utc>,
) -> Result<()> {
    tx.execute("DELETE FROM page_tags WHERE page_id = ?1", params![page_id])?;

    let mut seen = HashSet::new();
    for name in tag_names {
        if !seen.insert(name.as_str()) {
            continue;
        }
        let tag = get_or_create_tag_tx(tx, name, now)?;
        tx.execute(
            "INSERT INTO page_tags (page_id, tag_id) VALUES (?1, ?2)",
            params![page_id, tag.id],
        )?;
    }
    Ok(())
}

fn insert_version_tx(tx: &Transaction<'_>, version: &NewPageVersion) -> Result<PageVersion> {
    tx.execute(
        "INSERT INTO page_versions (page_id, title, content, user_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            version.page_id,
            version.title,
            version.content,
            version.user_id,
            format_datetime(&version.created_at),
        ],
    )
    .map_err(|e| map_write_error(e, "snapshot references an unknown user"))?;

    Ok(PageVersion {
        id: tx.last_insert_rowid(),
        page_id: version.page_id.clone(),
        title: version.title.clone(),
        content: version.content.clone(),
        user_id: version.user_id.clone(),
        created_at: version.created_at,
    })
}

impl Store for SqliteStore {
    fn initialize(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    // User operations

    fn create_user(&self, user: &User) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO users (id, username, email, password_hash, role, first_name, last_name, bio, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    user.id,
                    user.username,
                    user.email,
                    user.password_hash,
                    user.role.as_str(),
                    user.first_name,
                    user.last_name,
                    user.bio,
                    format_datetime(&user.created_at),
                    format_datetime(&user.updated_at),
                ],
            )
            .map_err(|e| map_write_error(e, "user references unknown data"))?;
        Ok(())
    }

    fn get_user(&self, id: &str) -> Result<Option<User>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![id],
            user_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
            params![email],
            user_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
            params![username],
            user_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_users(&self, cursor: &str, limit: i32) -> Result<Vec<User>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username > ?1 ORDER BY username LIMIT ?2"
        ))?;

        let rows = stmt.query_map(params![cursor, limit], user_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn update_user(&self, user: &User) -> Result<()> {
        let rows = self
            .conn()
            .execute(
                "UPDATE users SET username = ?1, email = ?2, password_hash = ?3, role = ?4,
                 first_name = ?5, last_name = ?6, bio = ?7, updated_at = ?8 WHERE id = ?9",
                params![
                    user.username,
                    user.email,
                    user.password_hash,
                    user.role.as_str(),
                    user.first_name,
                    user.last_name,
                    user.bio,
                    format_datetime(&user.updated_at),
                    user.id,
                ],
            )
            .map_err(|e| map_write_error(e, "user references unknown data"))?;

        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn update_user_last_login(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "UPDATE users SET last_login_at = ?1 WHERE id = ?2",
            params![format_datetime(&at), id],
        )?;
        Ok(())
    }

    fn delete_user(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM users WHERE id = ?1", params![id])
            .map_err(|e| {
                if is_foreign_key_violation(&e) {
                    Error::Conflict("user still owns pages, page history, or media".to_string())
                } else {
                    Error::from(e)
                }
            })?;
        Ok(rows > 0)
    }

    fn has_admin_user(&self) -> Result<bool> {
        let conn = self.conn();
        let count: i32 = conn.query_row(
            "SELECT COUNT(*) FROM users WHERE role = 'admin'",
            [],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // Token operations

    fn create_token(&self, token: &Token) -> Result<()> {
        let result = self.conn().execute(
            "INSERT INTO tokens (id, token_hash, token_lookup, user_id, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                token.id,
                token.token_hash,
                token.token_lookup,
                token.user_id,
                format_datetime(&token.created_at),
                token.expires_at.as_ref().map(format_datetime),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(Error::TokenLookupCollision),
            Err(e) if is_foreign_key_violation(&e) => Err(Error::NotFound),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn get_token_by_lookup(&self, lookup: &str) -> Result<Option<Token>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {TOKEN_COLUMNS} FROM tokens WHERE token_lookup = ?1"),
            params![lookup],
            token_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn delete_token(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM tokens WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn update_token_last_used(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "UPDATE tokens SET last_used_at = ?1 WHERE id = ?2",
            params![format_datetime(&at), id],
        )?;
        Ok(())
    }

    // Page operations

    fn insert_page(
        &self,
        page: &Page,
        tag_names: &[String],
        initial: &NewPageVersion,
    ) -> Result<PageVersion> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO pages (id, title, slug, content, summary, is_published, published_at, author_id, featured_image, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                page.id,
                page.title,
                page.slug,
                page.content,
                page.summary,
                page.is_published,
                page.published_at.as_ref().map(format_datetime),
                page.author_id,
                page.featured_image,
                format_datetime(&page.created_at),
                format_datetime(&page.updated_at),
            ],
        )
        .map_err(|e| map_write_error(e, "page references an unknown author or media"))?;

        set_page_tags_tx(&tx, &page.id, tag_names, &page.created_at)?;
        let version = insert_version_tx(&tx, initial)?;

        tx.commit()?;
        Ok(version)
    }

    fn commit_page_revision(
        &self,
        page: &Page,
        tag_names: Option<&[String]>,
        snapshot: &NewPageVersion,
    ) -> Result<PageVersion> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM pages WHERE id = ?1)",
            params![page.id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(Error::NotFound);
        }

        let version = insert_version_tx(&tx, snapshot)?;

        tx.execute(
            "UPDATE pages SET title = ?1, slug = ?2, content = ?3, summary = ?4, is_published = ?5,
             published_at = ?6, featured_image = ?7, updated_at = ?8 WHERE id = ?9",
            params![
                page.title,
                page.slug,
                page.content,
                page.summary,
                page.is_published,
                page.published_at.as_ref().map(format_datetime),
                page.featured_image,
                format_datetime(&page.updated_at),
                page.id,
            ],
        )
        .map_err(|e| map_write_error(e, "page references unknown media"))?;

        if let Some(names) = tag_names {
            set_page_tags_tx(&tx, &page.id, names, &page.updated_at)?;
        }

        tx.commit()?;
        Ok(version)
    }

    fn get_page(&self, id: &str) -> Result<Option<Page>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {PAGE_COLUMNS} FROM pages WHERE id = ?1"),
            params![id],
            page_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_page_by_slug(&self, slug: &str) -> Result<Option<Page>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {PAGE_COLUMNS} FROM pages WHERE slug = ?1"),
            params![slug],
            page_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_published_pages(&self, cursor: &str, limit: i32) -> Result<Vec<Page>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PAGE_COLUMNS} FROM pages
             WHERE is_published = 1 AND slug > ?1 ORDER BY slug LIMIT ?2"
        ))?;

        let rows = stmt.query_map(params![cursor, limit], page_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn list_author_pages(&self, author_id: &str) -> Result<Vec<Page>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PAGE_COLUMNS} FROM pages WHERE author_id = ?1 ORDER BY updated_at DESC"
        ))?;

        let rows = stmt.query_map(params![author_id], page_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_page(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM pages WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // Page history

    fn list_page_versions(&self, page_id: &str) -> Result<Vec<PageVersion>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, page_id, title, content, user_id, created_at
             FROM page_versions WHERE page_id = ?1 ORDER BY id DESC",
        )?;

        let rows = stmt.query_map(params![page_id], version_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn get_page_version(&self, page_id: &str, version_id: i64) -> Result<Option<PageVersion>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, page_id, title, content, user_id, created_at
             FROM page_versions WHERE id = ?1 AND page_id = ?2",
            params![version_id, page_id],
            version_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    // Tag operations

    fn create_tag(&self, tag: &Tag) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO tags (id, name, created_at) VALUES (?1, ?2, ?3)",
                params![tag.id, tag.name, format_datetime(&tag.created_at)],
            )
            .map_err(|e| map_write_error(e, "tag references unknown data"))?;
        Ok(())
    }

    fn get_or_create_tag(&self, name: &str, now: DateTime<Utc>) -> Result<Tag> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let tag = get_or_create_tag_tx(&tx, name, &now)?;
        tx.commit()?;
        Ok(tag)
    }

    fn get_tag_by_id(&self, id: &str) -> Result<Option<Tag>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, name, created_at FROM tags WHERE id = ?1",
            params![id],
            tag_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_tag_by_name(&self, name: &str) -> Result<Option<Tag>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, name, created_at FROM tags WHERE name = ?1",
            params![name],
            tag_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_tags(&self, cursor: &str, limit: i32) -> Result<Vec<Tag>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, created_at FROM tags WHERE name > ?1 ORDER BY name LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![cursor, limit], tag_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn update_tag(&self, tag: &Tag) -> Result<()> {
        let rows = self
            .conn()
            .execute(
                "UPDATE tags SET name = ?1 WHERE id = ?2",
                params![tag.name, tag.id],
            )
            .map_err(|e| map_write_error(e, "tag references unknown data"))?;

        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn delete_tag(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM tags WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // Page-Tag M2M operations

    fn list_page_tags(&self, page_id: &str) -> Result<Vec<Tag>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT t.id, t.name, t.created_at
             FROM tags t
             JOIN page_tags pt ON t.id = pt.tag_id
             WHERE pt.page_id = ?1
             ORDER BY t.name",
        )?;

        let rows = stmt.query_map(params![page_id], tag_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn list_tag_pages(&self, tag_id: &str, published_only: bool) -> Result<Vec<Page>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT p.id, p.title, p.slug, p.content, p.summary, p.is_published, p.published_at,
                    p.author_id, p.featured_image, p.created_at, p.updated_at
             FROM pages p
             JOIN page_tags pt ON p.id = pt.page_id
             WHERE pt.tag_id = ?1 AND (?2 = 0 OR p.is_published = 1)
             ORDER BY p.slug",
        )?;

        let rows = stmt.query_map(params![tag_id, published_only], page_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    // Media operations

    fn create_media(&self, media: &Media) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO media (id, filename, original_filename, kind, file_size, file_extension, sha256, alt_text, user_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    media.id,
                    media.filename,
                    media.original_filename,
                    media.kind.as_str(),
                    media.file_size,
                    media.file_extension,
                    media.sha256,
                    media.alt_text,
                    media.user_id,
                    format_datetime(&media.created_at),
                ],
            )
            .map_err(|e| map_write_error(e, "media references an unknown user"))?;
        Ok(())
    }

    fn get_media(&self, id: &str) -> Result<Option<Media>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {MEDIA_COLUMNS} FROM media WHERE id = ?1"),
            params![id],
            media_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_media(&self, user_id: Option<&str>) -> Result<Vec<Media>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MEDIA_COLUMNS} FROM media
             WHERE ?1 IS NULL OR user_id = ?1 ORDER BY created_at DESC"
        ))?;

        let rows = stmt.query_map(params![user_id], media_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_media(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM media WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }
}
