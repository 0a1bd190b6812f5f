use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a persisted game record.
pub type GameId = u64;

/// A file found by a library scan (never persisted).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    pub path: PathBuf,
    pub size: u64,
    /// Hex-encoded SHA-256 of the file content.
    pub checksum: String,
    pub modified_at: DateTime<Utc>,
}

/// A game known to the registry.
///
/// Records are never removed: a file that disappears from disk only gets
/// `deleted_at` set, and the record is revived if the same content shows
/// up again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameRecord {
    pub id: GameId,
    pub path: PathBuf,
    pub checksum: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl GameRecord {
    /// Returns `true` unless the record has been soft-deleted.
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// File name component of the stored path, used for downloads.
    pub fn file_name(&self) -> String {
        file_name_of(&self.path)
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".into())
}

/// An inclusive byte range `[start, end]` inside a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteInterval {
    pub start: u64,
    pub end: u64,
}

impl ByteInterval {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    /// Interval covering a whole non-empty file.
    pub fn full(file_size: u64) -> Option<Self> {
        file_size.checked_sub(1).map(|end| Self { start: 0, end })
    }

    /// Number of bytes covered (always at least 1).
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn is_full(&self, file_size: u64) -> bool {
        self.start == 0 && self.end.checked_add(1) == Some(file_size)
    }

    /// Value for the `Content-Range` response header.
    pub fn content_range(&self, file_size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, file_size)
    }
}
