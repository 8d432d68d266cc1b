//! Represents a stored resource: an uploaded file, a paste or a redirect.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use std::fmt;

/// What a resource holds and how `GET /{id}` serves it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
pub enum ResourceKind {
    /// Raw bytes under a client-chosen name.
    File,
    /// UTF-8 text under a generated code.
    Paste,
    /// A target URL under a generated code.
    Redirect,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::File => "file",
            ResourceKind::Paste => "paste",
            ResourceKind::Redirect => "redirect",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata row for a single resource.
///
/// The payload of files and pastes lives in a blob on disk; `blob` names it
/// relative to the storage directory. Redirects carry their `target` inline.
#[derive(Clone, FromRow, Debug)]
pub struct Resource {
    /// Identifier, unique across every kind.
    pub id: String,

    pub kind: ResourceKind,

    /// Blob file name for file and paste payloads.
    pub blob: Option<String>,

    /// Redirect destination.
    pub target: Option<String>,

    /// Content type supplied with a file upload.
    pub content_type: Option<String>,

    /// Payload length in bytes.
    pub size_bytes: i64,

    /// MD5 of the payload.
    pub etag: Option<String>,

    pub created_at: DateTime<Utc>,

    /// Unix timestamp after which the resource is gone.
    pub expires_at: Option<i64>,

    /// Reads left before the resource is deleted, if limited.
    pub remaining_accesses: Option<i64>,
}

/// Retention parameters applied when a resource is written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Retention {
    pub expires_at: Option<i64>,
    pub max_accesses: Option<i64>,
}
