//! Scan-vs-registry diff.
//!
//! Records are matched on checksum only. A known checksum at a new path is
//! a rename and keeps the record id; content changed in place shows up as
//! the old checksum disappearing and a new one appearing.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use gameshelf_protocol::{FileDescriptor, GameId, GameRecord};
use serde::Serialize;

/// A single registry change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Mutation {
    /// First sighting of a checksum.
    Create { descriptor: FileDescriptor },
    /// A soft-deleted checksum is back on disk.
    Revive { id: GameId, path: PathBuf, size: u64 },
    /// A live checksum moved to another path.
    Rename { id: GameId, from: PathBuf, to: PathBuf },
    /// A live checksum is gone from disk.
    SoftDelete { id: GameId, path: PathBuf },
}

impl Mutation {
    /// Short name used in logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Revive { .. } => "revive",
            Self::Rename { .. } => "rename",
            Self::SoftDelete { .. } => "softDelete",
        }
    }

    /// Path the mutation is about (the new path for renames).
    pub fn path(&self) -> &Path {
        match self {
            Self::Create { descriptor } => &descriptor.path,
            Self::Revive { path, .. } | Self::SoftDelete { path, .. } => path,
            Self::Rename { to, .. } => to,
        }
    }
}

/// Two scanned files with identical content.
///
/// The first one seen is reconciled, the duplicate is left out of the plan
/// and reported for manual resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{} has the same content as {} ({checksum})", .duplicate.display(), .kept.display())]
pub struct DuplicateContent {
    pub checksum: String,
    pub kept: PathBuf,
    pub duplicate: PathBuf,
}

/// Ordered registry changes produced by [`reconcile`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MutationPlan {
    /// Soft-deletes first, then renames, revivals and creations.
    pub mutations: Vec<Mutation>,
    pub conflicts: Vec<DuplicateContent>,
    /// Number of descriptors consumed from the scan.
    pub scanned: usize,
}

impl MutationPlan {
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    /// Drops soft-deletes of records located at or below one of `paths`.
    ///
    /// Used for paths the scan failed to read: their content is unknown,
    /// which is not the same as gone. Returns the number of dropped
    /// mutations.
    pub fn spare_unreadable(&mut self, paths: &[PathBuf]) -> usize {
        let before = self.mutations.len();
        self.mutations.retain(|m| match m {
            Mutation::SoftDelete { path, .. } => !paths.iter().any(|p| path.starts_with(p)),
            _ => true,
        });
        before - self.mutations.len()
    }
}

/// Diffs scanned files against a registry snapshot.
///
/// `snapshot` must contain soft-deleted records too, they are needed to
/// revive content that comes back.
pub fn reconcile<I>(descriptors: I, snapshot: &[GameRecord]) -> MutationPlan
where
    I: IntoIterator<Item = FileDescriptor>,
{
    let mut plan = MutationPlan::default();

    // checksum -> index into `scanned`, first seen wins.
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut scanned: Vec<FileDescriptor> = Vec::new();
    for descriptor in descriptors {
        plan.scanned += 1;
        if let Some(&kept) = seen.get(&descriptor.checksum) {
            plan.conflicts.push(DuplicateContent {
                checksum: descriptor.checksum,
                kept: scanned[kept].path.clone(),
                duplicate: descriptor.path,
            });
            continue;
        }
        seen.insert(descriptor.checksum.clone(), scanned.len());
        scanned.push(descriptor);
    }

    let mut live: HashMap<&str, &GameRecord> = HashMap::new();
    let mut deleted: HashMap<&str, &GameRecord> = HashMap::new();
    let mut by_id: Vec<&GameRecord> = snapshot.iter().collect();
    by_id.sort_by_key(|r| r.id);
    for &record in &by_id {
        if record.is_live() {
            live.entry(record.checksum.as_str()).or_insert(record);
        } else {
            deleted
                .entry(record.checksum.as_str())
                .and_modify(|best| {
                    if record.updated_at > best.updated_at {
                        *best = record;
                    }
                })
                .or_insert(record);
        }
    }

    let scanned_checksums: HashSet<&str> = seen.keys().map(String::as_str).collect();
    let mut soft_deletes = Vec::new();
    for record in by_id.iter().filter(|r| r.is_live()) {
        if !scanned_checksums.contains(record.checksum.as_str()) {
            soft_deletes.push(Mutation::SoftDelete {
                id: record.id,
                path: record.path.clone(),
            });
        }
    }

    let mut renames = Vec::new();
    let mut revivals = Vec::new();
    let mut creations = Vec::new();
    for descriptor in &scanned {
        let checksum = descriptor.checksum.as_str();
        if let Some(record) = live.get(checksum) {
            if record.path != descriptor.path {
                renames.push(Mutation::Rename {
                    id: record.id,
                    from: record.path.clone(),
                    to: descriptor.path.clone(),
                });
            }
        } else if let Some(record) = deleted.get(checksum) {
            revivals.push(Mutation::Revive {
                id: record.id,
                path: descriptor.path.clone(),
                size: descriptor.size,
            });
        } else {
            creations.push(Mutation::Create {
                descriptor: descriptor.clone(),
            });
        }
    }

    plan.mutations.extend(soft_deletes);
    plan.mutations.extend(renames);
    plan.mutations.extend(revivals);
    plan.mutations.extend(creations);
    plan
}
