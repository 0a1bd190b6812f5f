//! Writes a [`MutationPlan`] to the registry.
//!
//! Every mutation re-reads the record it targets and is skipped when the
//! registry already holds the desired state, so applying a plan twice
//! changes nothing the second time.

use gameshelf_registry::{GameStore, StoreError, UpsertGame};
use tracing::{debug, warn};

use crate::plan::{Mutation, MutationPlan};

/// A mutation the registry refused.
#[derive(Debug, thiserror::Error)]
#[error("failed to apply {} for {}: {source}", .mutation.kind(), .mutation.path().display())]
pub struct StoreWriteError {
    pub mutation: Mutation,
    #[source]
    pub source: StoreError,
}

/// Outcome of [`apply`].
#[derive(Debug, Default)]
pub struct ApplyReport {
    /// Mutations that changed the registry.
    pub applied: Vec<Mutation>,
    /// Mutations whose target state was already present.
    pub unchanged: Vec<Mutation>,
    pub failed: Vec<StoreWriteError>,
}

impl ApplyReport {
    /// Number of applied mutations of the given kind.
    pub fn count(&self, kind: &str) -> usize {
        self.applied.iter().filter(|m| m.kind() == kind).count()
    }
}

/// Applies `plan` record by record.
///
/// A failing write only fails its own mutation; the rest of the plan is
/// still applied.
pub fn apply(plan: &MutationPlan, store: &dyn GameStore) -> ApplyReport {
    let mut report = ApplyReport::default();
    for mutation in &plan.mutations {
        match apply_one(mutation, store) {
            Ok(true) => {
                debug!(kind = mutation.kind(), path = %mutation.path().display(), "mutation applied");
                report.applied.push(mutation.clone());
            }
            Ok(false) => report.unchanged.push(mutation.clone()),
            Err(source) => {
                warn!(
                    kind = mutation.kind(),
                    path = %mutation.path().display(),
                    "registry write failed: {source}"
                );
                report.failed.push(StoreWriteError {
                    mutation: mutation.clone(),
                    source,
                });
            }
        }
    }
    report
}

/// Returns whether the registry was written.
fn apply_one(mutation: &Mutation, store: &dyn GameStore) -> Result<bool, StoreError> {
    match mutation {
        Mutation::Create { descriptor } => {
            if store.find_live_by_checksum(&descriptor.checksum)?.is_some() {
                return Ok(false);
            }
            store.upsert(UpsertGame {
                id: None,
                path: descriptor.path.clone(),
                checksum: descriptor.checksum.clone(),
                size: descriptor.size,
                deleted_at: None,
            })?;
            Ok(true)
        }
        Mutation::Revive { id, path, size } => {
            let record = store.find_by_id(*id)?;
            if record.is_live() && record.path == *path && record.size == *size {
                return Ok(false);
            }
            store.upsert(UpsertGame {
                path: path.clone(),
                size: *size,
                deleted_at: None,
                ..UpsertGame::from_record(&record)
            })?;
            Ok(true)
        }
        Mutation::Rename { id, to, .. } => {
            let record = store.find_by_id(*id)?;
            if record.path == *to {
                return Ok(false);
            }
            store.upsert(UpsertGame {
                path: to.clone(),
                ..UpsertGame::from_record(&record)
            })?;
            Ok(true)
        }
        Mutation::SoftDelete { id, .. } => {
            if !store.find_by_id(*id)?.is_live() {
                return Ok(false);
            }
            store.soft_delete(*id)?;
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile;
    use chrono::Utc;
    use gameshelf_protocol::{FileDescriptor, GameId, GameRecord};
    use gameshelf_registry::FileGameStore;
    use std::path::{Path, PathBuf};

    fn file(path: &str, checksum: &str) -> FileDescriptor {
        FileDescriptor {
            path: PathBuf::from(path),
            size: 3,
            checksum: checksum.into(),
            modified_at: Utc::now(),
        }
    }

    fn run(store: &dyn GameStore, files: Vec<FileDescriptor>) -> ApplyReport {
        let plan = reconcile(files, &store.find_all().unwrap());
        apply(&plan, store)
    }

    /// Store that refuses every write touching `poisoned`.
    struct FailingStore {
        inner: FileGameStore,
        poisoned: PathBuf,
    }

    impl GameStore for FailingStore {
        fn find_by_id(&self, id: GameId) -> Result<GameRecord, StoreError> {
            self.inner.find_by_id(id)
        }

        fn find_all(&self) -> Result<Vec<GameRecord>, StoreError> {
            self.inner.find_all()
        }

        fn upsert(&self, game: UpsertGame) -> Result<GameRecord, StoreError> {
            if game.path == self.poisoned {
                return Err(StoreError::Io {
                    path: game.path,
                    source: std::io::Error::other("disk full"),
                });
            }
            self.inner.upsert(game)
        }

        fn soft_delete(&self, id: GameId) -> Result<(), StoreError> {
            self.inner.soft_delete(id)
        }
    }

    #[test]
    fn applying_same_plan_twice_is_a_no_op() {
        let store = FileGameStore::in_memory();
        store
            .upsert(UpsertGame {
                id: None,
                path: PathBuf::from("/g/old.zip"),
                checksum: "old".into(),
                size: 3,
                deleted_at: None,
            })
            .unwrap();
        let plan = reconcile(
            vec![file("/g/a.zip", "a"), file("/g/b.zip", "b")],
            &store.find_all().unwrap(),
        );

        let first = apply(&plan, &store);
        assert_eq!(first.applied.len(), 3);
        let after_first = store.find_all().unwrap();

        let second = apply(&plan, &store);
        assert!(second.applied.is_empty());
        assert_eq!(second.unchanged.len(), 3);
        assert_eq!(store.find_all().unwrap(), after_first);
    }

    #[test]
    fn rename_keeps_id_and_created_at() {
        let store = FileGameStore::in_memory();
        run(&store, vec![file("/g/a.zip", "a")]);
        let before = store.find_live_by_checksum("a").unwrap().unwrap();

        let report = run(&store, vec![file("/g/renamed.zip", "a")]);
        assert_eq!(report.count("rename"), 1);

        let after = store.find_by_id(before.id).unwrap();
        assert_eq!(after.path, Path::new("/g/renamed.zip"));
        assert_eq!(after.created_at, before.created_at);
        assert_eq!(store.find_all().unwrap().len(), 1);
    }

    #[test]
    fn delete_then_restore_revives_same_id() {
        let store = FileGameStore::in_memory();
        run(&store, vec![file("/g/a.zip", "a")]);
        let original = store.find_live_by_checksum("a").unwrap().unwrap();

        let report = run(&store, Vec::new());
        assert_eq!(report.count("softDelete"), 1);
        assert!(store.find_by_id(original.id).unwrap().deleted_at.is_some());

        let report = run(&store, vec![file("/g/a.zip", "a")]);
        assert_eq!(report.count("revive"), 1);
        let revived = store.find_by_id(original.id).unwrap();
        assert!(revived.is_live());
        assert_eq!(revived.created_at, original.created_at);
        assert_eq!(store.find_all().unwrap().len(), 1);
    }

    #[test]
    fn write_failure_only_fails_its_mutation() {
        let store = FailingStore {
            inner: FileGameStore::in_memory(),
            poisoned: PathBuf::from("/g/bad.zip"),
        };
        let report = run(
            &store,
            vec![
                file("/g/a.zip", "a"),
                file("/g/bad.zip", "bad"),
                file("/g/c.zip", "c"),
            ],
        );

        assert_eq!(report.applied.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].mutation.path(), Path::new("/g/bad.zip"));
        assert!(matches!(report.failed[0].source, StoreError::Io { .. }));
        assert_eq!(store.find_all_live().unwrap().len(), 2);

        // A retry picks up exactly the failed mutation.
        let retry = run(&store, vec![
            file("/g/a.zip", "a"),
            file("/g/bad.zip", "bad"),
            file("/g/c.zip", "c"),
        ]);
        assert_eq!(retry.failed.len(), 1);
        assert!(retry.applied.is_empty());
    }

    #[test]
    fn stale_plan_targeting_unknown_id_fails_cleanly() {
        let store = FileGameStore::in_memory();
        let plan = MutationPlan {
            mutations: vec![Mutation::SoftDelete {
                id: 42,
                path: PathBuf::from("/g/ghost.zip"),
            }],
            ..Default::default()
        };
        let report = apply(&plan, &store);
        assert!(matches!(report.failed[0].source, StoreError::NotFound(42)));
    }
}
