//! Background indexing tasks and the query surface
//!
//! The coordinator keeps one task per project root. Each task runs a scanner
//! pass on its own thread with its own store handle; queries open short-lived
//! handles on the calling thread. Cancellation is cooperative: the task's
//! flag is polled by the scanner at every directory entry.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use tracing::{debug, info, warn};

use crate::config::IndexerConfig;
use crate::error::{IndexError, Result};
use crate::ignore::IgnoreMatcher;
use crate::model::{FileRecord, ProjectRecord, SymbolNode, SymbolRecord};
use crate::parser::ParserRegistry;
use crate::progress::ProgressSink;
use crate::scanner::{PassStats, Scanner};
use crate::store::Store;

/// How a background pass ended
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    /// The pass ran to completion or stopped on cancellation (see `PassStats::cancelled`)
    Finished(PassStats),
    Failed(String),
}

/// Shared state of one running pass
#[derive(Debug)]
pub struct TaskState {
    root: PathBuf,
    cancelled: AtomicBool,
    outcome: Mutex<Option<TaskOutcome>>,
    finished: Condvar,
}

impl TaskState {
    fn new(root: PathBuf) -> Self {
        Self {
            root,
            cancelled: AtomicBool::new(false),
            outcome: Mutex::new(None),
            finished: Condvar::new(),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_finished(&self) -> bool {
        self.outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn finish(&self, outcome: TaskOutcome) {
        let mut slot = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(outcome);
        self.finished.notify_all();
    }

    /// Block until the pass has quiesced.
    pub fn wait(&self) -> TaskOutcome {
        let mut slot = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            slot = self
                .finished
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// The tasks started (or already running) for one `start_indexing` call
#[derive(Debug, Clone)]
pub struct IndexHandle {
    tasks: Vec<Arc<TaskState>>,
}

impl IndexHandle {
    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(|t| t.is_finished())
    }

    pub fn cancel(&self) {
        for task in &self.tasks {
            task.cancel();
        }
    }

    /// Block until every task has quiesced; outcomes are in root order.
    pub fn wait(&self) -> Vec<(PathBuf, TaskOutcome)> {
        self.tasks
            .iter()
            .map(|t| (t.root.clone(), t.wait()))
            .collect()
    }
}

/// Passes that hit a busy store are restarted this many times in total
const PASS_ATTEMPTS: u32 = 3;

type TaskTable = Arc<Mutex<HashMap<PathBuf, Arc<TaskState>>>>;

/// Resolve symlinks and relative segments so one directory has one identity.
/// Paths that no longer exist are resolved through their parent.
pub fn normalize_path(path: &Path) -> PathBuf {
    if let Ok(resolved) = path.canonicalize() {
        return resolved;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => match parent.canonicalize() {
            Ok(parent) => parent.join(name),
            Err(_) => path.to_path_buf(),
        },
        _ => path.to_path_buf(),
    }
}

pub struct Coordinator {
    config: IndexerConfig,
    store_path: PathBuf,
    registry: Arc<ParserRegistry>,
    ignore: Arc<IgnoreMatcher>,
    tasks: TaskTable,
}

impl Coordinator {
    /// Create a coordinator. The store schema is created (or reset) here, on
    /// the caller's thread, so workers never race to set it up.
    pub fn new(config: IndexerConfig, registry: ParserRegistry) -> Self {
        let ignore = IgnoreMatcher::new(&config.ignore_patterns);
        let store_path = config.store_path();
        if let Err(e) = Store::open_with(&store_path, config.busy_retries) {
            warn!(path = ?store_path, "Could not prepare index store: {}", e);
        }
        Self {
            store_path,
            config,
            registry: Arc::new(registry),
            ignore: Arc::new(ignore),
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    pub fn ignore(&self) -> &IgnoreMatcher {
        &self.ignore
    }

    fn open_store(&self) -> Result<Store> {
        Store::open_with(&self.store_path, self.config.busy_retries)
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, Arc<TaskState>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Roots with a pass currently running
    pub fn active_roots(&self) -> Vec<PathBuf> {
        let mut roots: Vec<PathBuf> = self.table().keys().cloned().collect();
        roots.sort();
        roots
    }

    // ─── Tasks ──────────────────────────────────────────────────────

    /// Start a background pass for each root that has none running.
    pub fn start_indexing(&self, roots: &[PathBuf], progress: Arc<dyn ProgressSink>) -> Result<IndexHandle> {
        if !self.config.enabled {
            return Err(IndexError::IndexingDisabled);
        }

        let mut handle = IndexHandle { tasks: Vec::new() };
        let mut table = self.table();
        for root in roots {
            let root = normalize_path(root);
            if let Some(existing) = table.get(&root) {
                debug!(root = ?root, "Pass already running");
                handle.tasks.push(existing.clone());
                continue;
            }

            let state = Arc::new(TaskState::new(root.clone()));
            table.insert(root.clone(), state.clone());
            if let Err(e) = self.spawn_pass(state.clone(), progress.clone()) {
                table.remove(&root);
                return Err(e.into());
            }
            handle.tasks.push(state);
        }
        Ok(handle)
    }

    fn spawn_pass(&self, state: Arc<TaskState>, progress: Arc<dyn ProgressSink>) -> std::io::Result<()> {
        let store_path = self.store_path.clone();
        let busy_retries = self.config.busy_retries;
        let batch_size = self.config.batch_size;
        let registry = self.registry.clone();
        let ignore = self.ignore.clone();
        let tasks = self.tasks.clone();

        std::thread::Builder::new()
            .name(format!("projindex-{}", crate::model::display_name(&state.root)))
            .spawn(move || {
                let mut attempt = 1;
                let outcome = loop {
                    let result = Store::open_with(&store_path, busy_retries).and_then(|store| {
                        let scanner = Scanner::new(&store, &registry, &ignore)
                            .with_progress(progress.as_ref())
                            .with_cancel(&state.cancelled)
                            .with_batch_size(batch_size);
                        scanner.run_pass(&state.root)
                    });
                    match result {
                        Ok(stats) => break TaskOutcome::Finished(stats),
                        Err(e) if e.is_transient() && attempt < PASS_ATTEMPTS => {
                            info!(root = ?state.root, attempt, "Store busy, restarting pass");
                            attempt += 1;
                        }
                        Err(e) => {
                            warn!(root = ?state.root, "Indexing pass failed: {}", e);
                            break TaskOutcome::Failed(e.to_string());
                        }
                    }
                };

                {
                    let mut table = tasks.lock().unwrap_or_else(PoisonError::into_inner);
                    if table.get(&state.root).is_some_and(|t| Arc::ptr_eq(t, &state)) {
                        table.remove(&state.root);
                    }
                }
                state.finish(outcome);
            })?;
        Ok(())
    }

    /// Cancel the handle's tasks and wait for them to stop.
    pub fn cancel(&self, handle: &IndexHandle) -> Vec<(PathBuf, TaskOutcome)> {
        handle.cancel();
        handle.wait()
    }

    pub fn cancel_all(&self) {
        let running: Vec<Arc<TaskState>> = self.table().values().cloned().collect();
        for task in &running {
            task.cancel();
        }
        for task in &running {
            task.wait();
        }
        if !running.is_empty() {
            info!(tasks = running.len(), "Cancelled all indexing passes");
        }
    }

    /// Cancel the pass for one root, if any, and wait for it.
    fn cancel_root(&self, root: &Path) {
        let running = self.table().get(root).cloned();
        if let Some(task) = running {
            task.cancel();
            task.wait();
        }
    }

    /// Force a full re-parse: stop any running pass, forget stored
    /// timestamps, then start again.
    pub fn reindex(&self, roots: &[PathBuf], progress: Arc<dyn ProgressSink>) -> Result<IndexHandle> {
        if !self.config.enabled {
            return Err(IndexError::IndexingDisabled);
        }
        let roots: Vec<PathBuf> = roots.iter().map(|r| normalize_path(r)).collect();
        let store = self.open_store()?;
        for root in &roots {
            self.cancel_root(root);
            if let Some(project) = store.get_project(root)? {
                let reset = store.reset_project_mtimes(project.id)?;
                debug!(root = ?root, files = reset, "Reset stored timestamps");
            }
        }
        drop(store);
        self.start_indexing(&roots, progress)
    }

    /// Stop indexing a root and drop everything stored for it.
    pub fn remove_project(&self, root: &Path) -> Result<bool> {
        let root = normalize_path(root);
        self.cancel_root(&root);
        self.open_store()?.delete_project(&root)
    }

    /// Stop every pass and empty the store.
    pub fn clear_all(&self) -> Result<()> {
        self.cancel_all();
        self.open_store()?.truncate()
    }

    // ─── Targeted updates ───────────────────────────────────────────

    pub fn update_file(&self, path: &Path) -> Result<bool> {
        if !self.config.enabled {
            return Err(IndexError::IndexingDisabled);
        }
        let store = self.open_store()?;
        Scanner::new(&store, &self.registry, &self.ignore).update_file(&normalize_path(path))
    }

    pub fn rename_files(&self, pairs: &[(PathBuf, PathBuf)]) -> Result<usize> {
        let pairs: Vec<(PathBuf, PathBuf)> = pairs
            .iter()
            .map(|(old, new)| (normalize_path(old), normalize_path(new)))
            .collect();
        let store = self.open_store()?;
        Scanner::new(&store, &self.registry, &self.ignore).rename_files(&pairs)
    }

    pub fn delete_files(&self, paths: &[PathBuf]) -> Result<usize> {
        let paths: Vec<PathBuf> = paths.iter().map(|p| normalize_path(p)).collect();
        let store = self.open_store()?;
        Scanner::new(&store, &self.registry, &self.ignore).delete_files(&paths)
    }

    // ─── Queries ────────────────────────────────────────────────────

    pub fn get_all_projects(&self) -> Result<Vec<ProjectRecord>> {
        self.open_store()?.get_all_projects()
    }

    pub fn get_project_ids(&self, roots: &[PathBuf]) -> Result<Vec<i64>> {
        let roots: Vec<PathBuf> = roots.iter().map(|r| normalize_path(r)).collect();
        self.open_store()?.get_project_ids(&roots)
    }

    pub fn get_file(&self, path: &Path) -> Result<Option<FileRecord>> {
        self.open_store()?.get_file_by_path(&normalize_path(path))
    }

    /// Files matching `filter`, best match first
    pub fn get_files(&self, filter: Option<&str>, project_ids: Option<&[i64]>) -> Result<Vec<FileRecord>> {
        Ok(self.open_store()?.query_files(project_ids, filter))
    }

    /// Symbols matching `filter`, restricted to one file or to some projects
    /// but not both.
    pub fn get_symbols(
        &self,
        filter: Option<&str>,
        file: Option<&Path>,
        project_ids: Option<&[i64]>,
    ) -> Result<Vec<(SymbolRecord, FileRecord)>> {
        if file.is_some() && project_ids.is_some() {
            return Err(IndexError::BadQuery(
                "a symbol query takes either a file or a project list, not both".to_string(),
            ));
        }
        let store = self.open_store()?;
        let file_id = match file {
            Some(path) => match store.get_file_by_path(&normalize_path(path))? {
                Some(record) => Some(record.id),
                None => return Ok(Vec::new()),
            },
            None => None,
        };
        Ok(store.query_symbols(file_id, project_ids, filter))
    }

    /// Files matching `filter` under the given roots (all projects when empty)
    pub fn query_files(&self, filter: Option<&str>, roots: &[PathBuf]) -> Result<Vec<FileRecord>> {
        if roots.is_empty() {
            return self.get_files(filter, None);
        }
        let ids = self.get_project_ids(roots)?;
        self.get_files(filter, Some(&ids))
    }

    /// Symbols matching `filter` anywhere, or in one file
    pub fn query_symbols(&self, filter: Option<&str>, file: Option<&Path>) -> Result<Vec<(SymbolRecord, FileRecord)>> {
        self.get_symbols(filter, file, None)
    }

    pub fn query_symbols_in_project(
        &self,
        filter: Option<&str>,
        roots: &[PathBuf],
    ) -> Result<Vec<(SymbolRecord, FileRecord)>> {
        let ids = self.get_project_ids(roots)?;
        self.get_symbols(filter, None, Some(&ids))
    }

    /// Symbol forest of one indexed file
    pub fn outline(&self, path: &Path) -> Result<Vec<SymbolNode>> {
        let path = normalize_path(path);
        let store = self.open_store()?;
        let file = store
            .get_file_by_path(&path)?
            .ok_or(IndexError::UnknownFile(path))?;
        store.file_outline(file.id)
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
