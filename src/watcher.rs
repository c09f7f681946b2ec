//! Polling watcher for incremental re-indexing
//!
//! Compares the stored rows of each watched project against the filesystem
//! and feeds the differences to the coordinator: modified files are
//! re-parsed one by one, vanished files are dropped, and new files trigger a
//! regular pass.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::coordinator::{normalize_path, Coordinator};
use crate::error::Result;
use crate::ignore::IgnoreMatcher;
use crate::model::ProjectRecord;
use crate::progress::ProgressSink;
use crate::scanner::{disk_mtime, is_storable};
use crate::store::Store;

/// Granularity at which a sleeping watcher notices the stop flag
const STOP_POLL: Duration = Duration::from_millis(50);

/// Set of changes detected in a scan
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ChangeSet {
    pub added: Vec<PathBuf>,
    pub modified: Vec<PathBuf>,
    pub deleted: Vec<PathBuf>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    pub fn total(&self) -> usize {
        self.added.len() + self.modified.len() + self.deleted.len()
    }
}

/// Totals over the lifetime of one watch loop
#[derive(Debug, Default, Clone, Serialize)]
pub struct WatchStats {
    pub scans: usize,
    pub passes: usize,
    pub updated: usize,
    pub deleted: usize,
    pub errors: usize,
}

/// Diff a project's stored files against the filesystem.
///
/// A file counts as modified when its on-disk mtime is newer than the stored
/// one or when it was never successfully processed. Files that became
/// ignored are reported as deleted.
pub fn detect_changes(store: &Store, project: &ProjectRecord, ignore: &IgnoreMatcher) -> Result<ChangeSet> {
    let stored: HashMap<PathBuf, Option<f64>> = store
        .project_files(project.id)?
        .into_iter()
        .map(|f| (f.path, f.mtime))
        .collect();

    let mut changes = ChangeSet::default();
    let mut seen = HashSet::new();
    let walker = WalkDir::new(&project.path)
        .into_iter()
        .filter_entry(|e| is_storable(e.path()) && !ignore.is_ignored(e.path()));

    for entry in walker.flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.into_path();
        match stored.get(&path) {
            None => changes.added.push(path.clone()),
            Some(stored_mtime) => {
                let on_disk = match disk_mtime(&path) {
                    Ok(m) => m,
                    Err(_) => continue,
                };
                if stored_mtime.map_or(true, |m| on_disk > m) {
                    changes.modified.push(path.clone());
                }
            }
        }
        seen.insert(path);
    }

    changes.deleted = stored
        .into_keys()
        .filter(|p| !seen.contains(p))
        .collect();

    changes.added.sort();
    changes.modified.sort();
    changes.deleted.sort();
    Ok(changes)
}

/// Sleep for `interval`, waking early if `stop` is set. Returns false when stopped.
fn pause(interval: Duration, stop: &AtomicBool) -> bool {
    let deadline = Instant::now() + interval;
    while Instant::now() < deadline {
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        std::thread::sleep(STOP_POLL.min(deadline.saturating_duration_since(Instant::now())));
    }
    !stop.load(Ordering::Relaxed)
}

/// Poll `roots` every `interval` until `stop` is set.
///
/// Roots must have been indexed once; unknown roots are skipped until a pass
/// has registered them.
pub fn watch_loop(
    coordinator: &Coordinator,
    roots: &[PathBuf],
    interval: Duration,
    progress: Arc<dyn ProgressSink>,
    stop: &AtomicBool,
) -> Result<WatchStats> {
    let roots: Vec<PathBuf> = roots.iter().map(|r| normalize_path(r)).collect();
    info!(
        "File watcher started: roots={:?}, interval={}ms",
        roots,
        interval.as_millis()
    );

    let mut stats = WatchStats::default();
    while pause(interval, stop) {
        stats.scans += 1;
        for root in &roots {
            if let Err(e) = sync_root(coordinator, root, progress.clone(), &mut stats) {
                warn!(root = ?root, "Watcher scan error: {}", e);
                stats.errors += 1;
            }
        }
    }

    info!(scans = stats.scans, passes = stats.passes, "File watcher stopped");
    Ok(stats)
}

fn sync_root(
    coordinator: &Coordinator,
    root: &Path,
    progress: Arc<dyn ProgressSink>,
    stats: &mut WatchStats,
) -> Result<()> {
    let changes = {
        let store = Store::open_with(coordinator.store_path(), coordinator.config().busy_retries)?;
        let Some(project) = store.get_project(root)? else {
            debug!(root = ?root, "Root not indexed yet");
            return Ok(());
        };
        detect_changes(&store, &project, coordinator.ignore())?
    };
    if changes.is_empty() {
        return Ok(());
    }

    info!(
        "Watcher detected {} changes: {} added, {} modified, {} deleted",
        changes.total(),
        changes.added.len(),
        changes.modified.len(),
        changes.deleted.len()
    );

    // A pass covers modifications and deletions as well
    if !changes.added.is_empty() {
        let handle = coordinator.start_indexing(&[root.to_path_buf()], progress)?;
        handle.wait();
        stats.passes += 1;
        return Ok(());
    }

    for path in &changes.modified {
        match coordinator.update_file(path) {
            Ok(_) => stats.updated += 1,
            Err(e) => {
                warn!(path = ?path, "Failed to update file: {}", e);
                stats.errors += 1;
            }
        }
    }
    if !changes.deleted.is_empty() {
        stats.deleted += coordinator.delete_files(&changes.deleted)?;
    }
    Ok(())
}
