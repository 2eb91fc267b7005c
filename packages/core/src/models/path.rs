//! Materialized Path Encoding
//!
//! A node's path is the titles of its ancestor chain joined by [`SEPARATOR`],
//! most distant ancestor first and the node's own title last:
//!
//! ```text
//! A                       - container, depth 1
//! A/Pineapple             - item inside A
//! A/Other                 - container, depth 2
//! A/Other/Banana          - item inside A/Other
//! B/Hippos/Flying/007     - item, depth 4
//! ```
//!
//! The separator is a strict single character. Trailing separators are
//! removed by exact suffix stripping, never by trimming a character class.
//!
//! All functions here are pure; the tree service layers locking and
//! persistence on top of them.

use super::node::ValidationError;

/// Path separator
pub const SEPARATOR: char = '/';

/// Replacement for separator occurrences inside a title
pub const SEPARATOR_REPLACEMENT: char = '_';

/// Maximum title length in characters
pub const MAX_TITLE_LENGTH: usize = 255;

/// Remove every trailing separator from `value`
pub fn strip_trailing_separators(value: &str) -> &str {
    let mut value = value;
    while let Some(rest) = value.strip_suffix(SEPARATOR) {
        value = rest;
    }
    value
}

/// Normalize a raw title before it takes part in a path
///
/// Trailing separators are stripped, then each remaining separator is replaced
/// with [`SEPARATOR_REPLACEMENT`]. Titles that end up empty (or whitespace
/// only) are rejected.
///
/// # Examples
///
/// ```rust
/// use pathtree_core::models::path::normalize_title;
///
/// assert_eq!(normalize_title("Fruit/").unwrap(), "Fruit");
/// assert_eq!(normalize_title("a/b").unwrap(), "a_b");
/// assert!(normalize_title("///").is_err());
/// ```
pub fn normalize_title(raw: &str) -> Result<String, ValidationError> {
    let stripped = strip_trailing_separators(raw);
    if stripped.trim().is_empty() {
        return Err(ValidationError::EmptyTitle(raw.to_string()));
    }

    let length = stripped.chars().count();
    if length > MAX_TITLE_LENGTH {
        return Err(ValidationError::TitleTooLong {
            max: MAX_TITLE_LENGTH,
            actual: length,
        });
    }

    Ok(stripped.replace(SEPARATOR, &SEPARATOR_REPLACEMENT.to_string()))
}

/// Join a parent path and a title
///
/// An empty parent path yields the bare title (a root).
pub fn join(parent_path: &str, title: &str) -> String {
    let parent_path = strip_trailing_separators(parent_path);
    if parent_path.is_empty() {
        title.to_string()
    } else {
        format!("{}{}{}", parent_path, SEPARATOR, title)
    }
}

/// Derive a path from a stored path by swapping its last segment for `title`
///
/// Everything above the leaf segment is taken as authoritative, so a rename
/// anywhere in the hierarchy does not need the ancestor chain reloaded.
///
/// # Examples
///
/// ```rust
/// use pathtree_core::models::path::derive_from_stored;
///
/// assert_eq!(derive_from_stored("A/B/C", "C2"), "A/B/C2");
/// assert_eq!(derive_from_stored("A", "A2"), "A2");
/// assert_eq!(derive_from_stored("", "New"), "New");
/// ```
pub fn derive_from_stored(stored_path: &str, title: &str) -> String {
    let stored = strip_trailing_separators(stored_path);
    match stored.rsplit_once(SEPARATOR) {
        Some((prefix, _leaf)) => join(prefix, title),
        None => title.to_string(),
    }
}

/// Non-empty segments of a path, root first
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split(SEPARATOR).filter(|segment| !segment.is_empty())
}

/// Number of segments in a path
pub fn depth(path: &str) -> usize {
    segments(path).count()
}

/// First segment of a path (the root's title)
pub fn root_segment(path: &str) -> Option<&str> {
    segments(path).next()
}

/// Path of the direct parent, if any
pub fn parent_path(path: &str) -> Option<&str> {
    strip_trailing_separators(path)
        .rsplit_once(SEPARATOR)
        .map(|(prefix, _)| prefix)
        .filter(|prefix| !prefix.is_empty())
}

/// Paths of every proper ancestor, root first
///
/// ```rust
/// use pathtree_core::models::path::ancestor_paths;
///
/// assert_eq!(ancestor_paths("A/B/C"), vec!["A".to_string(), "A/B".to_string()]);
/// assert!(ancestor_paths("A").is_empty());
/// ```
pub fn ancestor_paths(path: &str) -> Vec<String> {
    let parts: Vec<&str> = segments(path).collect();
    let mut ancestors = Vec::with_capacity(parts.len().saturating_sub(1));
    let mut current = String::new();
    for part in parts.iter().take(parts.len().saturating_sub(1)) {
        if !current.is_empty() {
            current.push(SEPARATOR);
        }
        current.push_str(part);
        ancestors.push(current.clone());
    }
    ancestors
}

/// Prefix shared by every descendant of `path`
pub fn descendant_prefix(path: &str) -> String {
    format!("{}{}", strip_trailing_separators(path), SEPARATOR)
}

/// Whether `ancestor` is a strict, segment-aligned prefix of `path`
pub fn is_ancestor_path(ancestor: &str, path: &str) -> bool {
    path.starts_with(&descendant_prefix(ancestor))
}

/// Move a descendant path from under `old_prefix` to under `new_prefix`
///
/// Only an exact `old_prefix/` prefix is replaced; the descendant's own
/// relative sub-path is kept as is. Returns `None` when `path` is not a
/// descendant of `old_prefix`.
pub fn rebase(path: &str, old_prefix: &str, new_prefix: &str) -> Option<String> {
    let relative = path.strip_prefix(&descendant_prefix(old_prefix))?;
    Some(join(new_prefix, relative))
}
