//! Full reindex passes.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gameshelf_protocol::GameRecord;
use gameshelf_registry::{GameStore, StoreError};
use gameshelf_scanner::{ScanError, Scanner};
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

use crate::apply::{ApplyReport, apply};
use crate::plan::{DuplicateContent, MutationPlan, reconcile};

/// Errors that abort a whole reindex pass.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("a reindex is already running")]
    AlreadyRunning,

    #[error("registry error: {0}")]
    Store(#[from] StoreError),

    #[error("index task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Everything a reindex pass did.
#[derive(Debug)]
pub struct IndexReport {
    pub plan: MutationPlan,
    pub applied: ApplyReport,
    /// Files and directories that could not be read.
    pub scan_failures: Vec<ScanError>,
    /// Soft-deletes skipped because the record sits under an unreadable path.
    pub spared: usize,
    /// Live records after the pass.
    pub games: Vec<GameRecord>,
    pub elapsed: Duration,
}

/// A path-scoped failure, flattened for JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathFailure {
    pub path: Option<PathBuf>,
    pub message: String,
}

/// Serializable digest of an [`IndexReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSummary {
    pub scanned: usize,
    pub created: usize,
    pub revived: usize,
    pub renamed: usize,
    pub soft_deleted: usize,
    pub unchanged: usize,
    pub spared: usize,
    pub conflicts: Vec<DuplicateContent>,
    pub scan_failures: Vec<PathFailure>,
    pub write_failures: Vec<PathFailure>,
    pub live_games: usize,
    pub elapsed_ms: u64,
}

impl IndexReport {
    pub fn summary(&self) -> IndexSummary {
        IndexSummary {
            scanned: self.plan.scanned,
            created: self.applied.count("create"),
            revived: self.applied.count("revive"),
            renamed: self.applied.count("rename"),
            soft_deleted: self.applied.count("softDelete"),
            unchanged: self.applied.unchanged.len(),
            spared: self.spared,
            conflicts: self.plan.conflicts.clone(),
            scan_failures: self
                .scan_failures
                .iter()
                .map(|e| PathFailure {
                    path: e.path().map(PathBuf::from),
                    message: e.to_string(),
                })
                .collect(),
            write_failures: self
                .applied
                .failed
                .iter()
                .map(|e| PathFailure {
                    path: Some(e.mutation.path().to_path_buf()),
                    message: e.to_string(),
                })
                .collect(),
            live_games: self.games.len(),
            elapsed_ms: self.elapsed.as_millis() as u64,
        }
    }
}

/// Runs reindex passes, one at a time.
///
/// The pass lock is held by the blocking task doing the work, so dropping a
/// `reindex` future does not let a second pass start early.
pub struct Indexer {
    store: Arc<dyn GameStore>,
    scanner: Arc<Scanner>,
    running: Arc<Mutex<()>>,
}

impl Indexer {
    pub fn new(store: Arc<dyn GameStore>, scanner: Scanner) -> Self {
        Self {
            store,
            scanner: Arc::new(scanner),
            running: Arc::new(Mutex::new(())),
        }
    }

    /// Returns `true` while a pass is in flight.
    pub fn is_running(&self) -> bool {
        self.running.try_lock().is_err()
    }

    /// Runs a full pass, waiting for a pass already in flight to finish.
    pub async fn reindex(&self) -> Result<IndexReport, IndexError> {
        let guard = Arc::clone(&self.running).lock_owned().await;
        self.run_pass(guard).await
    }

    /// Runs a full pass, or fails with [`IndexError::AlreadyRunning`].
    pub async fn try_reindex(&self) -> Result<IndexReport, IndexError> {
        let guard = Arc::clone(&self.running)
            .try_lock_owned()
            .map_err(|_| IndexError::AlreadyRunning)?;
        self.run_pass(guard).await
    }

    async fn run_pass(&self, guard: OwnedMutexGuard<()>) -> Result<IndexReport, IndexError> {
        let store = Arc::clone(&self.store);
        let scanner = Arc::clone(&self.scanner);
        info!(roots = scanner.config().roots.len(), "reindex started");

        // Hashing is blocking file I/O. The guard lives as long as the work.
        let report = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            run_blocking(store.as_ref(), &scanner)
        })
        .await??;

        info!(
            scanned = report.plan.scanned,
            applied = report.applied.applied.len(),
            failed = report.applied.failed.len(),
            conflicts = report.plan.conflicts.len(),
            scan_failures = report.scan_failures.len(),
            live = report.games.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "reindex finished"
        );
        Ok(report)
    }
}

fn run_blocking(store: &dyn GameStore, scanner: &Scanner) -> Result<IndexReport, IndexError> {
    let started = Instant::now();
    let snapshot = store.find_all()?;

    let mut scan_failures = Vec::new();
    let descriptors = scanner.scan().filter_map(|item| match item {
        Ok(descriptor) => Some(descriptor),
        Err(e) => {
            warn!("scan failure: {e}");
            scan_failures.push(e);
            None
        }
    });
    let mut plan = reconcile(descriptors, &snapshot);

    let unreadable: Vec<PathBuf> = scan_failures
        .iter()
        .filter_map(|e| e.path().map(PathBuf::from))
        .collect();
    let spared = plan.spare_unreadable(&unreadable);
    if spared > 0 {
        warn!(spared, "kept records under unreadable paths");
    }
    for conflict in &plan.conflicts {
        warn!("duplicate content: {conflict}");
    }

    let applied = apply(&plan, store);
    let games = store.find_all_live()?;

    Ok(IndexReport {
        plan,
        applied,
        scan_failures,
        spared,
        games,
        elapsed: started.elapsed(),
    })
}
