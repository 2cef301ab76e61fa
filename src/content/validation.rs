use crate::error::{Error, Result};

pub const MAX_TITLE_LEN: usize = 100;
pub const MAX_SLUG_LEN: usize = 100;
pub const MAX_SUMMARY_LEN: usize = 200;
pub const MAX_TAG_NAME_LEN: usize = 50;

fn is_valid_slug_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

fn invalid(message: impl Into<String>) -> Error {
    Error::Validation(message.into())
}

pub fn validate_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(invalid("title is required"));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(invalid(format!(
            "title cannot exceed {MAX_TITLE_LEN} characters"
        )));
    }
    Ok(())
}

pub fn validate_slug(slug: &str) -> Result<()> {
    if slug.is_empty() {
        return Err(invalid("slug is required"));
    }
    if slug.len() > MAX_SLUG_LEN {
        return Err(invalid(format!("slug cannot exceed {MAX_SLUG_LEN} characters")));
    }
    if !slug.chars().all(is_valid_slug_char) {
        return Err(invalid(
            "slug can only contain alphanumeric characters, hyphens, and underscores",
        ));
    }
    if slug.starts_with('-') || slug.starts_with('_') {
        return Err(invalid("slug cannot start with a hyphen or underscore"));
    }
    Ok(())
}

pub fn validate_content(content: &str) -> Result<()> {
    if content.trim().is_empty() {
        return Err(invalid("content is required"));
    }
    Ok(())
}

pub fn validate_summary(summary: &str) -> Result<()> {
    if summary.chars().count() > MAX_SUMMARY_LEN {
        return Err(invalid(format!(
            "summary cannot exceed {MAX_SUMMARY_LEN} characters"
        )));
    }
    Ok(())
}

/// Tag names are matched exactly, so only emptiness and length are checked.
pub fn validate_tag_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(invalid("tag name cannot be empty"));
    }
    if name.chars().count() > MAX_TAG_NAME_LEN {
        return Err(invalid(format!(
            "tag name cannot exceed {MAX_TAG_NAME_LEN} characters"
        )));
    }
    Ok(())
}

/// Derives a slug from a title: lower-case ASCII words joined by hyphens.
#[must_use]
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;

    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else if c.is_whitespace() || c == '-' || c == '_' {
            pending_dash = true;
        }
    }

    slug.truncate(MAX_SLUG_LEN);
    slug.trim_end_matches('-').to_string()
}
