//! JSON-file backed registry.
//!
//! The whole table lives in memory behind an `RwLock`. Writers are
//! serialized by a separate mutex: each one builds the next table from a
//! snapshot, persists it (temp file + rename) and only then swaps it in, so
//! a failed write leaves both disk and memory untouched. Readers only wait
//! for the swap, never for the disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};

use chrono::Utc;
use gameshelf_protocol::{GameId, GameRecord};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{GameStore, StoreError, UpsertGame};

/// On-disk layout.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableFile {
    next_id: GameId,
    games: Vec<GameRecord>,
}

#[derive(Debug, Clone)]
struct Table {
    next_id: GameId,
    games: BTreeMap<GameId, GameRecord>,
}

impl Default for Table {
    fn default() -> Self {
        Self {
            next_id: 1,
            games: BTreeMap::new(),
        }
    }
}

impl Table {
    fn from_file(file: TableFile) -> Self {
        let games: BTreeMap<_, _> = file.games.into_iter().map(|g| (g.id, g)).collect();
        let after_last = games.keys().next_back().map_or(1, |id| id + 1);
        Self {
            next_id: file.next_id.max(after_last),
            games,
        }
    }

    fn to_file(&self) -> TableFile {
        TableFile {
            next_id: self.next_id,
            games: self.games.values().cloned().collect(),
        }
    }

    fn live_with_checksum(&self, checksum: &str, except: Option<GameId>) -> Option<GameId> {
        self.games
            .values()
            .find(|g| g.is_live() && g.checksum == checksum && Some(g.id) != except)
            .map(|g| g.id)
    }
}

/// Game registry persisted as a single JSON document.
pub struct FileGameStore {
    path: Option<PathBuf>,
    table: RwLock<Table>,
    writer: Mutex<()>,
}

impl FileGameStore {
    /// Opens the registry at `path`, starting empty if the file does not
    /// exist yet. The file is created on the first write.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let table = match std::fs::read_to_string(&path) {
            Ok(content) => Table::from_file(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Table::default(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        debug!(path = %path.display(), games = table.games.len(), "registry opened");
        Ok(Self::with_table(Some(path), table))
    }

    /// Registry without persistence.
    pub fn in_memory() -> Self {
        Self::with_table(None, Table::default())
    }

    fn with_table(path: Option<PathBuf>, table: Table) -> Self {
        Self {
            path,
            table: RwLock::new(table),
            writer: Mutex::new(()),
        }
    }

    /// Path of the backing file, if persistent.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn persist(&self, table: &Table) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let io_err = |source| StoreError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(&table.to_file())?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(io_err)?;
        std::fs::rename(&tmp, path).map_err(io_err)?;
        Ok(())
    }

    /// Applies `change` to a copy of the table, persists it and swaps it in.
    fn write<T>(
        &self,
        change: impl FnOnce(&mut Table) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = self.read(Table::clone);
        let out = change(&mut next)?;
        self.persist(&next)?;
        *self.table.write().unwrap_or_else(PoisonError::into_inner) = next;
        Ok(out)
    }

    fn read<T>(&self, f: impl FnOnce(&Table) -> T) -> T {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        f(&table)
    }
}

impl GameStore for FileGameStore {
    fn find_by_id(&self, id: GameId) -> Result<GameRecord, StoreError> {
        self.read(|t| t.games.get(&id).cloned())
            .ok_or(StoreError::NotFound(id))
    }

    fn find_all(&self) -> Result<Vec<GameRecord>, StoreError> {
        Ok(self.read(|t| t.games.values().cloned().collect()))
    }

    fn find_live_by_checksum(&self, checksum: &str) -> Result<Option<GameRecord>, StoreError> {
        Ok(self.read(|t| {
            t.live_with_checksum(checksum, None)
                .and_then(|id| t.games.get(&id).cloned())
        }))
    }

    fn upsert(&self, game: UpsertGame) -> Result<GameRecord, StoreError> {
        self.write(|table| {
            if game.deleted_at.is_none() {
                if let Some(existing) = table.live_with_checksum(&game.checksum, game.id) {
                    return Err(StoreError::DuplicateChecksum {
                        checksum: game.checksum.clone(),
                        existing,
                    });
                }
            }

            let now = Utc::now();
            let record = match game.id {
                Some(id) => {
                    let current = table.games.get(&id).ok_or(StoreError::NotFound(id))?;
                    GameRecord {
                        id,
                        path: game.path,
                        checksum: game.checksum,
                        size: game.size,
                        created_at: current.created_at,
                        updated_at: now,
                        deleted_at: game.deleted_at,
                    }
                }
                None => {
                    let id = table.next_id;
                    table.next_id += 1;
                    GameRecord {
                        id,
                        path: game.path,
                        checksum: game.checksum,
                        size: game.size,
                        created_at: now,
                        updated_at: now,
                        deleted_at: game.deleted_at,
                    }
                }
            };

            table.games.insert(record.id, record.clone());
            Ok(record)
        })
    }

    fn soft_delete(&self, id: GameId) -> Result<(), StoreError> {
        let already_deleted = self
            .read(|t| t.games.get(&id).map(|g| !g.is_live()))
            .ok_or(StoreError::NotFound(id))?;
        if already_deleted {
            return Ok(());
        }

        self.write(|table| {
            let record = table.games.get_mut(&id).ok_or(StoreError::NotFound(id))?;
            if record.is_live() {
                let now = Utc::now();
                record.deleted_at = Some(now);
                record.updated_at = now;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn new_game(path: &str, checksum: &str) -> UpsertGame {
        UpsertGame {
            id: None,
            path: PathBuf::from(path),
            checksum: checksum.into(),
            size: 42,
            deleted_at: None,
        }
    }

    #[test]
    fn insert_assigns_sequential_ids() {
        let store = FileGameStore::in_memory();
        let a = store.upsert(new_game("/g/a.zip", "aaa")).unwrap();
        let b = store.upsert(new_game("/g/b.zip", "bbb")).unwrap();
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(a.created_at, a.updated_at);
        assert_eq!(store.find_by_id(2).unwrap().path, PathBuf::from("/g/b.zip"));
    }

    #[test]
    fn update_keeps_created_at() {
        let store = FileGameStore::in_memory();
        let created = store.upsert(new_game("/g/a.zip", "aaa")).unwrap();

        let mut update = UpsertGame::from_record(&created);
        update.path = PathBuf::from("/g/renamed.zip");
        let updated = store.upsert(update).unwrap();

        assert_eq!(updated.id, created.id);
        assert_eq!(updated.created_at, created.created_at);
        assert!(updated.updated_at >= created.updated_at);
        assert_eq!(updated.path, PathBuf::from("/g/renamed.zip"));
    }

    #[test]
    fn update_unknown_id_is_not_found() {
        let store = FileGameStore::in_memory();
        let mut game = new_game("/g/a.zip", "aaa");
        game.id = Some(99);
        assert!(matches!(store.upsert(game), Err(StoreError::NotFound(99))));
    }

    #[test]
    fn live_checksums_are_unique() {
        let store = FileGameStore::in_memory();
        store.upsert(new_game("/g/a.zip", "same")).unwrap();
        let err = store.upsert(new_game("/g/b.zip", "same")).unwrap_err();
        assert!(matches!(
            err,
            StoreError::DuplicateChecksum { existing: 1, .. }
        ));
        assert_eq!(store.find_all().unwrap().len(), 1);
    }

    #[test]
    fn soft_deleted_checksum_can_be_reused() {
        let store = FileGameStore::in_memory();
        let old = store.upsert(new_game("/g/a.zip", "same")).unwrap();
        store.soft_delete(old.id).unwrap();

        let new = store.upsert(new_game("/g/b.zip", "same")).unwrap();
        assert_ne!(new.id, old.id);
        assert_eq!(store.find_all_live().unwrap(), vec![new]);
        assert_eq!(store.find_all().unwrap().len(), 2);
    }

    #[test]
    fn soft_delete_is_idempotent() {
        let store = FileGameStore::in_memory();
        let game = store.upsert(new_game("/g/a.zip", "aaa")).unwrap();

        store.soft_delete(game.id).unwrap();
        let first = store.find_by_id(game.id).unwrap();
        assert!(first.deleted_at.is_some());

        store.soft_delete(game.id).unwrap();
        assert_eq!(store.find_by_id(game.id).unwrap(), first);
        assert!(store.find_live_by_checksum("aaa").unwrap().is_none());
    }

    #[test]
    fn soft_delete_unknown_id() {
        let store = FileGameStore::in_memory();
        assert!(matches!(store.soft_delete(5), Err(StoreError::NotFound(5))));
    }

    #[test]
    fn persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("games.json");

        {
            let store = FileGameStore::open(&path).unwrap();
            store.upsert(new_game("/g/a.zip", "aaa")).unwrap();
            let b = store.upsert(new_game("/g/b.zip", "bbb")).unwrap();
            store.soft_delete(b.id).unwrap();
        }

        let store = FileGameStore::open(&path).unwrap();
        assert_eq!(store.find_all().unwrap().len(), 2);
        assert_eq!(store.find_all_live().unwrap().len(), 1);
        // Ids keep increasing after a reopen.
        let c = store.upsert(new_game("/g/c.zip", "ccc")).unwrap();
        assert_eq!(c.id, 3);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn failed_persist_leaves_table_untouched() {
        let dir = TempDir::new().unwrap();
        // A directory where the registry file should be makes rename fail.
        let path = dir.path().join("games.json");
        std::fs::create_dir_all(path.join("blocker")).unwrap();

        let store = FileGameStore::open(dir.path().join("other.json")).unwrap();
        store.upsert(new_game("/g/a.zip", "aaa")).unwrap();

        let broken = FileGameStore::with_table(Some(path), store.read(Table::clone));
        let err = broken.upsert(new_game("/g/b.zip", "bbb")).unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
        assert_eq!(broken.find_all().unwrap().len(), 1);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("games.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            FileGameStore::open(&path),
            Err(StoreError::Json(_))
        ));
    }

    #[test]
    fn reads_do_not_wait_for_a_write_in_progress() {
        let store = FileGameStore::in_memory();
        store.upsert(new_game("/g/a.zip", "aaa")).unwrap();

        // Stands in for a writer busy persisting the table.
        let _writer = store.writer.lock().unwrap();
        assert_eq!(store.find_all().unwrap().len(), 1);
        assert!(store.find_by_id(1).is_ok());
    }

    #[test]
    fn concurrent_writers_get_distinct_ids() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("games.json");
        let store = FileGameStore::open(&path).unwrap();

        std::thread::scope(|s| {
            for t in 0..4 {
                let store = &store;
                s.spawn(move || {
                    for i in 0..10 {
                        let name = format!("/g/{t}-{i}.zip");
                        store.upsert(new_game(&name, &name)).unwrap();
                    }
                });
            }
        });

        let games = store.find_all().unwrap();
        assert_eq!(games.len(), 40);
        let ids: std::collections::BTreeSet<_> = games.iter().map(|g| g.id).collect();
        assert_eq!(ids.len(), 40);
        assert_eq!(FileGameStore::open(&path).unwrap().find_all().unwrap(), games);
    }
}
