// src/entry.rs
//! Announcement entry value type and the identifier resolver.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const PLACEHOLDER_TITLE: &str = "No Title";
pub const PLACEHOLDER_DESCRIPTION: &str = "No Description";

/// One announcement record. Immutable once it has been stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub timestamp: String,
    pub title: String,
    pub description: String,
    pub link: Option<String>,
    pub identifier: String,
}

impl Entry {
    /// Build an entry from extracted feed fields, filling placeholders and
    /// deriving the identifier.
    pub fn from_parts(
        timestamp: Option<&str>,
        title: Option<&str>,
        description: Option<&str>,
        link: Option<&str>,
    ) -> Self {
        let title = non_empty(title).unwrap_or(PLACEHOLDER_TITLE).to_string();
        let description = non_empty(description)
            .unwrap_or(PLACEHOLDER_DESCRIPTION)
            .to_string();
        let link = non_empty(link).map(str::to_string);
        let identifier = resolve_identifier(link.as_deref(), &title, &description);

        Self {
            timestamp: timestamp.map(str::trim).unwrap_or_default().to_string(),
            title,
            description,
            link,
            identifier,
        }
    }
}

/// Stable dedup key: the trimmed link when present, otherwise the hex
/// SHA-256 of `title + description` (placeholders substituted for blanks).
pub fn resolve_identifier(link: Option<&str>, title: &str, description: &str) -> String {
    if let Some(link) = non_empty(link) {
        return link.to_string();
    }
    let title = non_empty(Some(title)).unwrap_or(PLACEHOLDER_TITLE);
    let description = non_empty(Some(description)).unwrap_or(PLACEHOLDER_DESCRIPTION);
    content_hash(title, description)
}

fn content_hash(title: &str, description: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(description.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest.iter() {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|t| !t.is_empty())
}
