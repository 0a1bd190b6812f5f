//! Game registry.
//!
//! The registry is the only mutable shared state of the library server. It
//! is written exclusively by the reconciliation pass and read by downloads,
//! so every implementation must make single-record writes atomic: a reader
//! sees a record either before or after a write, never half of it.

mod file_store;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use gameshelf_protocol::{GameId, GameRecord};

pub use file_store::FileGameStore;

/// Errors produced by a [`GameStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("game {0} not found")]
    NotFound(GameId),

    #[error("checksum {checksum} already belongs to live game {existing}")]
    DuplicateChecksum { checksum: String, existing: GameId },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Insert-or-update request for a game record.
///
/// Without `id` a new record is created and gets the next free id; with an
/// `id` the existing record is overwritten, keeping its `created_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertGame {
    pub id: Option<GameId>,
    pub path: PathBuf,
    pub checksum: String,
    pub size: u64,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl UpsertGame {
    /// Update request that copies every field of `record`.
    pub fn from_record(record: &GameRecord) -> Self {
        Self {
            id: Some(record.id),
            path: record.path.clone(),
            checksum: record.checksum.clone(),
            size: record.size,
            deleted_at: record.deleted_at,
        }
    }
}

/// Persisted collection of game records.
pub trait GameStore: Send + Sync {
    /// Returns the record with `id`, live or soft-deleted.
    fn find_by_id(&self, id: GameId) -> Result<GameRecord, StoreError>;

    /// Returns every record, soft-deleted ones included, ordered by id.
    fn find_all(&self) -> Result<Vec<GameRecord>, StoreError>;

    /// Returns every record without `deleted_at`, ordered by id.
    fn find_all_live(&self) -> Result<Vec<GameRecord>, StoreError> {
        Ok(self
            .find_all()?
            .into_iter()
            .filter(GameRecord::is_live)
            .collect())
    }

    /// Returns the live record holding `checksum`, if any.
    fn find_live_by_checksum(&self, checksum: &str) -> Result<Option<GameRecord>, StoreError> {
        Ok(self
            .find_all_live()?
            .into_iter()
            .find(|r| r.checksum == checksum))
    }

    /// Inserts or updates a record.
    ///
    /// Fails with [`StoreError::DuplicateChecksum`] if the write would leave
    /// two live records with the same checksum.
    fn upsert(&self, game: UpsertGame) -> Result<GameRecord, StoreError>;

    /// Marks a record as deleted. Deleting an already deleted record keeps
    /// its original `deleted_at`.
    fn soft_delete(&self, id: GameId) -> Result<(), StoreError>;
}
