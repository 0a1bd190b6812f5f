//! Recursive library walk.
//!
//! Directories are visited depth-first, entries of each directory in file
//! name order. Directory symlinks are followed; every directory is entered
//! at most once per scan, keyed by its canonical path, so symlink cycles
//! terminate.

use std::collections::HashSet;
use std::fs::Metadata;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use gameshelf_protocol::FileDescriptor;
use regex::Regex;
use tracing::{debug, warn};

use crate::ScanError;
use crate::identify::identify;

/// Path patterns excluded from a scan.
///
/// Each pattern is a regular expression matched against the full path. A
/// matching directory is not entered at all.
#[derive(Debug, Clone, Default)]
pub struct IgnoreSet {
    patterns: Vec<Regex>,
}

impl IgnoreSet {
    pub fn new<I, S>(patterns: I) -> Result<Self, ScanError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| {
                Regex::new(p.as_ref()).map_err(|source| ScanError::InvalidPattern {
                    pattern: p.as_ref().to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn is_ignored(&self, path: &Path) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        let path = path.to_string_lossy();
        self.patterns.iter().any(|re| re.is_match(&path))
    }
}

/// What to scan.
#[derive(Debug, Clone, Default)]
pub struct ScanConfig {
    /// Root directories, scanned in order.
    pub roots: Vec<PathBuf>,
    pub ignore: IgnoreSet,
    /// Accepted file extensions without the dot, case-insensitive.
    /// Empty accepts every regular file.
    pub extensions: Vec<String>,
}

impl ScanConfig {
    fn accepts_extension(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        let Some(ext) = path.extension().map(|e| e.to_string_lossy()) else {
            return false;
        };
        self.extensions
            .iter()
            .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(&ext))
    }
}

/// Produces [`Scan`]s over a fixed configuration.
#[derive(Debug, Clone)]
pub struct Scanner {
    config: ScanConfig,
}

impl Scanner {
    pub fn new(config: ScanConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Starts a new walk over all roots.
    ///
    /// Nothing is read from disk until the returned iterator is advanced.
    pub fn scan(&self) -> Scan<'_> {
        Scan {
            config: &self.config,
            roots: self.config.roots.iter(),
            stack: Vec::new(),
            visited: HashSet::new(),
        }
    }
}

/// A single pass over the library.
///
/// Yields one item per accepted regular file, or one error per path that
/// could not be read. Errors never end the walk.
pub struct Scan<'a> {
    config: &'a ScanConfig,
    roots: std::slice::Iter<'a, PathBuf>,
    /// Pending entries of every directory currently being walked.
    stack: Vec<std::vec::IntoIter<PathBuf>>,
    visited: HashSet<PathBuf>,
}

impl Scan<'_> {
    /// Pushes the sorted entries of `dir`, unless it was already visited.
    fn enter_dir(&mut self, dir: &Path) -> Result<(), ScanError> {
        let canonical = std::fs::canonicalize(dir).map_err(|e| ScanError::io(dir, e))?;
        if !self.visited.insert(canonical) {
            debug!(path = %dir.display(), "directory already visited, skipping");
            return Ok(());
        }

        let entries = std::fs::read_dir(dir).map_err(|e| ScanError::io(dir, e))?;
        let mut paths = Vec::new();
        for entry in entries {
            match entry {
                Ok(entry) => paths.push(entry.path()),
                Err(e) => warn!(path = %dir.display(), "failed to read directory entry: {e}"),
            }
        }
        paths.sort();
        self.stack.push(paths.into_iter());
        Ok(())
    }

    /// Handles one path; `None` means the path produced nothing to yield.
    fn visit(&mut self, path: PathBuf) -> Option<Result<FileDescriptor, ScanError>> {
        if self.config.ignore.is_ignored(&path) {
            debug!(path = %path.display(), "ignored");
            return None;
        }

        let metadata = match std::fs::metadata(&path) {
            Ok(m) => m,
            Err(e) => {
                if std::fs::symlink_metadata(&path).is_ok() {
                    debug!(path = %path.display(), "broken symlink, skipping");
                    return None;
                }
                return Some(Err(ScanError::io(path, e)));
            }
        };

        if metadata.is_dir() {
            return self.enter_dir(&path).err().map(Err);
        }
        if !metadata.is_file() {
            debug!(path = %path.display(), "not a regular file, skipping");
            return None;
        }
        if !self.config.accepts_extension(&path) {
            return None;
        }

        Some(describe(path, &metadata))
    }
}

fn describe(path: PathBuf, metadata: &Metadata) -> Result<FileDescriptor, ScanError> {
    let id = identify(&path)?;
    let modified_at = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    debug!(path = %path.display(), size = id.size, "file identified");
    Ok(FileDescriptor {
        path,
        size: id.size,
        checksum: id.checksum,
        modified_at,
    })
}

impl Iterator for Scan<'_> {
    type Item = Result<FileDescriptor, ScanError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.stack.is_empty() {
                // Roots go through the same checks as any other entry.
                let root = self.roots.next()?;
                self.stack.push(vec![root.clone()].into_iter());
            }

            let Some(path) = self.stack.last_mut().and_then(|frame| frame.next()) else {
                self.stack.pop();
                continue;
            };

            if let Some(item) = self.visit(path) {
                return Some(item);
            }
        }
    }
}
