//! Indexing passes over a project root
//!
//! A pass walks the root, records every non-ignored file, re-parses files
//! whose on-disk mtime is newer than the stored one and finally sweeps rows
//! for files that vanished or became ignored. Writes are grouped into batches
//! with one savepoint per file, so a reader sees either all of a file's
//! changes or none of them.

use serde::Serialize;
use std::cell::Cell;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::UNIX_EPOCH;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{IndexError, Result};
use crate::ignore::IgnoreMatcher;
use crate::model::{display_name, Definition};
use crate::parser::ParserRegistry;
use crate::progress::{NullProgress, ProgressSink};
use crate::store::{Batch, Store};

const DEFAULT_BATCH_SIZE: usize = 50;

/// Counters for one pass
#[derive(Debug, Default, Clone, Serialize)]
pub struct PassStats {
    pub files_seen: usize,
    pub files_parsed: usize,
    pub files_unchanged: usize,
    pub symbols_inserted: usize,
    pub parse_errors: usize,
    pub walk_errors: usize,
    /// Files skipped because recording them failed
    pub file_errors: usize,
    pub files_removed: usize,
    pub cancelled: bool,
}

/// What happened to one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileOutcome {
    Unchanged,
    /// No parser claims the file; only its timestamp was recorded
    Tracked,
    Parsed(usize),
    ParseFailed,
    /// Gone before it could be read; true if a stale row was dropped
    Vanished(bool),
}

/// On-disk modification time in seconds since the Unix epoch
pub fn disk_mtime(path: &Path) -> std::io::Result<f64> {
    let modified = std::fs::metadata(path)?.modified()?;
    Ok(modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0))
}

/// Paths are stored as text, so names that are not valid UTF-8 cannot be indexed.
pub(crate) fn is_storable(path: &Path) -> bool {
    path.to_str().is_some()
}

pub struct Scanner<'a> {
    store: &'a Store,
    registry: &'a ParserRegistry,
    ignore: &'a IgnoreMatcher,
    progress: &'a dyn ProgressSink,
    cancel: Option<&'a AtomicBool>,
    batch_size: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(store: &'a Store, registry: &'a ParserRegistry, ignore: &'a IgnoreMatcher) -> Self {
        Self {
            store,
            registry,
            ignore,
            progress: &NullProgress,
            cancel: None,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_progress(mut self, progress: &'a dyn ProgressSink) -> Self {
        self.progress = progress;
        self
    }

    /// Flag polled at every directory entry; once set the pass commits and stops.
    pub fn with_cancel(mut self, cancel: &'a AtomicBool) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.is_some_and(|c| c.load(Ordering::Relaxed))
    }

    /// Run one full pass over `root`.
    ///
    /// A file that cannot be recorded is logged and skipped. Only a store that
    /// stays busy ends the pass early.
    pub fn run_pass(&self, root: &Path) -> Result<PassStats> {
        let mut stats = PassStats::default();
        let project_id = self.store.ensure_project(root)?;
        let project_name = display_name(root);
        info!(root = ?root, project_id, "Starting indexing pass");

        let mut pending: Option<Batch<'a>> = None;
        let unstorable = Cell::new(0);
        let walker = WalkDir::new(root).into_iter().filter_entry(|e| {
            if !is_storable(e.path()) {
                warn!(path = ?e.path(), "Skipping path that is not valid UTF-8");
                unstorable.set(unstorable.get() + 1);
                return false;
            }
            !self.ignore.is_ignored(e.path())
        });

        for entry in walker {
            if self.cancelled() {
                if let Some(batch) = pending.take() {
                    batch.commit()?;
                }
                stats.walk_errors += unstorable.get();
                stats.cancelled = true;
                info!(root = ?root, "Indexing pass cancelled");
                return Ok(stats);
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let failure = IndexError::WalkFailure {
                        path: e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf()),
                        message: e.to_string(),
                    };
                    warn!("{}", failure);
                    stats.walk_errors += 1;
                    continue;
                }
            };

            let path = entry.path();
            let dir = if entry.file_type().is_dir() {
                path
            } else {
                path.parent().unwrap_or(path)
            };
            let label = match dir.strip_prefix(root) {
                Ok(relative) if relative.as_os_str().is_empty() => PathBuf::from(&project_name),
                Ok(relative) => Path::new(&project_name).join(relative),
                Err(_) => dir.to_path_buf(),
            };
            self.progress
                .report(&format!("Indexing {}", label.display()), None);

            if !entry.file_type().is_file() {
                continue;
            }

            stats.files_seen += 1;
            match self.index_file(path, project_id, false, &mut pending) {
                Ok(outcome) => self.tally(&mut stats, outcome),
                Err(e) if e.is_transient() => return Err(e),
                Err(e) => {
                    warn!(path = ?path, "Failed to index file: {}", e);
                    stats.file_errors += 1;
                }
            }

            if pending.as_ref().is_some_and(|b| b.len() >= self.batch_size) {
                if let Some(batch) = pending.take() {
                    batch.commit()?;
                }
            }
        }
        if let Some(batch) = pending.take() {
            batch.commit()?;
        }
        stats.walk_errors += unstorable.get();

        self.progress.report("Cleaning database", Some(95));
        match self.sweep(project_id)? {
            Some(removed) => stats.files_removed += removed,
            None => {
                stats.cancelled = true;
                return Ok(stats);
            }
        }
        self.progress.report("Finished", Some(100));

        info!(
            root = ?root,
            seen = stats.files_seen,
            parsed = stats.files_parsed,
            symbols = stats.symbols_inserted,
            removed = stats.files_removed,
            errors = stats.file_errors,
            "Indexing pass finished"
        );
        Ok(stats)
    }

    /// Delete rows for files that no longer exist or are now ignored.
    /// Returns `None` when cancelled part way.
    fn sweep(&self, project_id: i64) -> Result<Option<usize>> {
        let mut removed = 0;
        let mut batch = self.store.batch()?;
        for file in self.store.project_files(project_id)? {
            if self.cancelled() {
                batch.commit()?;
                return Ok(None);
            }
            if file.path.exists() && !self.ignore.is_ignored(&file.path) {
                continue;
            }
            match batch.file(|| self.store.delete_file(&file.path)) {
                Ok(true) => {
                    debug!(path = ?file.path, "Swept stale file");
                    removed += 1;
                }
                Ok(false) => {}
                Err(e) if e.is_transient() => return Err(e),
                Err(e) => warn!(path = ?file.path, "Failed to sweep file: {}", e),
            }
            if batch.len() >= self.batch_size {
                batch.commit()?;
                batch = self.store.batch()?;
            }
        }
        batch.commit()?;
        Ok(Some(removed))
    }

    fn tally(&self, stats: &mut PassStats, outcome: FileOutcome) {
        match outcome {
            FileOutcome::Unchanged => stats.files_unchanged += 1,
            FileOutcome::Tracked => {}
            FileOutcome::Parsed(symbols) => {
                stats.files_parsed += 1;
                stats.symbols_inserted += symbols;
            }
            FileOutcome::ParseFailed => stats.parse_errors += 1,
            FileOutcome::Vanished(dropped) => stats.files_removed += usize::from(dropped),
        }
    }

    /// Run `write` in its own savepoint inside the pending batch, opening one if needed.
    fn in_batch(
        &self,
        pending: &mut Option<Batch<'a>>,
        write: impl FnOnce() -> Result<FileOutcome>,
    ) -> Result<FileOutcome> {
        let mut batch = match pending.take() {
            Some(batch) => batch,
            None => self.store.batch()?,
        };
        let outcome = batch.file(write);
        *pending = Some(batch);
        outcome
    }

    /// Record one file and re-parse it if it changed (or always, with `force`).
    ///
    /// Cheap writes join the pending batch. A file that needs parsing first
    /// commits that batch, runs the parser with no write lock held and then
    /// stores the outline in a short transaction of its own.
    fn index_file(
        &self,
        path: &Path,
        project_id: i64,
        force: bool,
        pending: &mut Option<Batch<'a>>,
    ) -> Result<FileOutcome> {
        let on_disk = match disk_mtime(path) {
            Ok(mtime) => mtime,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = ?path, "File vanished before it was indexed");
                return self.in_batch(pending, || {
                    self.store.delete_file(path).map(FileOutcome::Vanished)
                });
            }
            Err(e) => return Err(e.into()),
        };

        let stored = self.store.get_file_by_path(path)?.and_then(|f| f.mtime);
        if !force && stored.is_some_and(|s| on_disk <= s) {
            return Ok(FileOutcome::Unchanged);
        }

        let Some(plugin) = self.registry.parser_for(path) else {
            return self.in_batch(pending, || {
                self.store.upsert_file(path, project_id)?;
                self.store.update_file(path, on_disk, None)?;
                Ok(FileOutcome::Tracked)
            });
        };

        if let Some(batch) = pending.take() {
            batch.commit()?;
        }
        let parsed = ParserRegistry::parse_with(plugin.as_ref(), path);

        let mut batch = self.store.batch()?;
        let outcome = batch.file(|| {
            let file_id = self.store.upsert_file(path, project_id)?;
            match parsed {
                Ok(definitions) => {
                    self.store.clear_file_symbols(file_id)?;
                    let inserted = self.insert_definitions(&definitions, file_id, project_id, None)?;
                    self.store.update_file(path, on_disk, None)?;
                    debug!(path = ?path, symbols = inserted, "Parsed file");
                    Ok(FileOutcome::Parsed(inserted))
                }
                Err(e) => {
                    // Leave the outline and timestamp alone so the next pass retries
                    warn!("{}", e);
                    Ok(FileOutcome::ParseFailed)
                }
            }
        });
        batch.commit()?;
        outcome
    }

    /// Insert a definition tree depth-first, threading parent ids down.
    fn insert_definitions(
        &self,
        definitions: &[Definition],
        file_id: i64,
        project_id: i64,
        parent_id: Option<i64>,
    ) -> Result<usize> {
        let mut inserted = 0;
        for def in definitions {
            let id = self.store.insert_symbol(
                &def.name,
                def.line,
                def.column,
                def.icon.as_ref(),
                file_id,
                project_id,
                parent_id,
            )?;
            inserted += 1 + self.insert_definitions(&def.children, file_id, project_id, Some(id))?;
        }
        Ok(inserted)
    }

    /// Re-parse a single file regardless of its stored timestamp.
    ///
    /// Files that vanished, became ignored or cannot be stored are removed
    /// instead. Returns false when the file is no longer indexed.
    pub fn update_file(&self, path: &Path) -> Result<bool> {
        if !path.is_file() || !is_storable(path) || self.ignore.is_ignored(path) {
            return self.store.delete_file(path).map(|_| false);
        }
        let project_id = match self.store.get_file_by_path(path)? {
            Some(file) => file.project_id,
            None => self
                .store
                .project_containing(path)?
                .map(|p| p.id)
                .ok_or_else(|| IndexError::UnknownFile(path.to_path_buf()))?,
        };

        let mut pending = None;
        let outcome = self.index_file(path, project_id, true, &mut pending)?;
        if let Some(batch) = pending {
            batch.commit()?;
        }
        debug!(path = ?path, ?outcome, "Updated file");
        Ok(!matches!(outcome, FileOutcome::Vanished(_)))
    }

    /// Move file rows without re-parsing. A target that is ignored (or not
    /// storable) drops the row; a target that already has a row replaces it.
    /// Returns the number of rows moved.
    pub fn rename_files(&self, pairs: &[(PathBuf, PathBuf)]) -> Result<usize> {
        let mut moved = 0;
        let mut batch = self.store.batch()?;
        for (old, new) in pairs {
            let renamed = batch.file(|| {
                if !self.store.has_file(old)? {
                    return Ok(false);
                }
                if !is_storable(new) || self.ignore.is_ignored(new) {
                    self.store.delete_file(old)?;
                    return Ok(false);
                }
                if old != new {
                    self.store.delete_file(new)?;
                }
                self.store.rename_file(old, new)?;
                Ok(true)
            })?;
            if renamed {
                moved += 1;
            }
        }
        batch.commit()?;
        Ok(moved)
    }

    /// Remove file rows and their symbols. Returns the number removed.
    pub fn delete_files(&self, paths: &[PathBuf]) -> Result<usize> {
        let mut removed = 0;
        let mut batch = self.store.batch()?;
        for path in paths {
            if batch.file(|| self.store.delete_file(path))? {
                removed += 1;
            }
        }
        batch.commit()?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ParserPlugin;
    use crate::progress::RecordingProgress;
    use std::fs;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};
    use tempfile::{tempdir, TempDir};

    /// Every Python file defines `spam` at line 1, column 15
    struct SpamParser {
        calls: AtomicUsize,
    }

    impl ParserPlugin for SpamParser {
        fn name(&self) -> &str {
            "spam"
        }

        fn mimetypes(&self) -> &[&str] {
            &["text/x-python"]
        }

        fn parse(&self, path: &Path) -> anyhow::Result<Vec<Definition>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if fs::read_to_string(path)?.contains("syntax error") {
                anyhow::bail!("invalid syntax");
            }
            Ok(vec![Definition::new("spam", 1, 15)])
        }
    }

    struct Fixture {
        _dir: TempDir,
        root: PathBuf,
        store: Store,
        ignore: IgnoreMatcher,
    }

    fn fixture(files: &[&str]) -> Fixture {
        let dir = tempdir().unwrap();
        let root = dir.path().join("proj");
        fs::create_dir_all(&root).unwrap();
        for name in files {
            let path = root.join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, format!("# {}\n", name)).unwrap();
        }
        let store = Store::open(&dir.path().join("index.db")).unwrap();
        Fixture {
            _dir: dir,
            root,
            store,
            ignore: IgnoreMatcher::new(&[".git", "*.pyc"]),
        }
    }

    fn spam_registry() -> (ParserRegistry, Arc<SpamParser>) {
        let parser = Arc::new(SpamParser {
            calls: AtomicUsize::new(0),
        });
        let mut registry = ParserRegistry::new();
        registry.register(parser.clone());
        (registry, parser)
    }

    fn bump_mtime(path: &Path) {
        let later = SystemTime::now() + Duration::from_secs(60);
        fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(later)
            .unwrap();
    }

    fn file_names(store: &Store, filter: &str) -> Vec<String> {
        store
            .query_files(None, Some(filter))
            .into_iter()
            .map(|f| f.name)
            .collect()
    }

    #[test]
    fn test_fresh_index_without_parsers() {
        let fx = fixture(&["setup.py", "module.py", "README.md"]);
        let registry = ParserRegistry::new();
        let stats = Scanner::new(&fx.store, &registry, &fx.ignore)
            .run_pass(&fx.root)
            .unwrap();

        assert_eq!(stats.files_seen, 3);
        assert_eq!(fx.store.count_files().unwrap(), 3);
        assert_eq!(fx.store.count_symbols().unwrap(), 0);
        assert_eq!(file_names(&fx.store, "set")[0], "setup.py");
        // Files without a parser still get a timestamp
        assert!(fx.store.get_file_mtime(&fx.root.join("README.md")).unwrap().is_some());
    }

    #[test]
    fn test_fresh_index_with_stub_parser() {
        let fx = fixture(&["setup.py", "module.py", "README.md"]);
        let (registry, parser) = spam_registry();
        let stats = Scanner::new(&fx.store, &registry, &fx.ignore)
            .run_pass(&fx.root)
            .unwrap();

        assert_eq!(stats.files_parsed, 2);
        assert_eq!(parser.calls.load(Ordering::SeqCst), 2);
        assert_eq!(fx.store.count_files().unwrap(), 3);
        assert_eq!(fx.store.count_symbols().unwrap(), 2);

        let hits = fx.store.query_symbols(None, None, Some("spam"));
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|(s, _)| s.line == 1 && s.column == 15));
        assert!(fx.store.query_symbols(None, None, Some("egg")).is_empty());
    }

    #[test]
    fn test_second_pass_skips_unchanged_files() {
        let fx = fixture(&["setup.py", "module.py"]);
        let (registry, parser) = spam_registry();
        let scanner = Scanner::new(&fx.store, &registry, &fx.ignore);
        scanner.run_pass(&fx.root).unwrap();

        let stats = scanner.run_pass(&fx.root).unwrap();
        assert_eq!(stats.files_unchanged, 2);
        assert_eq!(parser.calls.load(Ordering::SeqCst), 2);

        bump_mtime(&fx.root.join("setup.py"));
        let stats = scanner.run_pass(&fx.root).unwrap();
        assert_eq!(stats.files_parsed, 1);
        assert_eq!(fx.store.count_symbols().unwrap(), 2);
    }

    #[test]
    fn test_update_file_replaces_symbols() {
        let fx = fixture(&["setup.py", "module.py", "README.md"]);
        let (registry, _parser) = spam_registry();
        let scanner = Scanner::new(&fx.store, &registry, &fx.ignore);
        scanner.run_pass(&fx.root).unwrap();

        let setup = fx.root.join("setup.py");
        let before = fx.store.get_file_mtime(&setup).unwrap().unwrap();
        bump_mtime(&setup);
        assert!(scanner.update_file(&setup).unwrap());

        assert_eq!(fx.store.count_symbols().unwrap(), 2);
        let file = fx.store.get_file_by_path(&setup).unwrap().unwrap();
        assert_eq!(fx.store.query_symbols(Some(file.id), None, None).len(), 1);
        assert!(file.mtime.unwrap() > before);
    }

    #[test]
    fn test_update_file_outside_projects() {
        let fx = fixture(&[]);
        let (registry, _parser) = spam_registry();
        let scanner = Scanner::new(&fx.store, &registry, &fx.ignore);
        let stray = fx._dir.path().join("stray.py");
        fs::write(&stray, "x = 1\n").unwrap();
        assert!(matches!(scanner.update_file(&stray), Err(IndexError::UnknownFile(_))));
    }

    #[test]
    fn test_update_file_picks_up_new_file() {
        let fx = fixture(&["setup.py"]);
        let (registry, _parser) = spam_registry();
        let scanner = Scanner::new(&fx.store, &registry, &fx.ignore);
        scanner.run_pass(&fx.root).unwrap();

        let added = fx.root.join("pkg/extra.py");
        fs::create_dir_all(added.parent().unwrap()).unwrap();
        fs::write(&added, "def spam(): pass\n").unwrap();
        assert!(scanner.update_file(&added).unwrap());
        assert_eq!(fx.store.count_files().unwrap(), 2);
        assert_eq!(fx.store.count_symbols().unwrap(), 2);
    }

    #[test]
    fn test_rename_keeps_identity() {
        let fx = fixture(&["setup.py", "module.py", "README.md"]);
        let (registry, parser) = spam_registry();
        let scanner = Scanner::new(&fx.store, &registry, &fx.ignore);
        scanner.run_pass(&fx.root).unwrap();

        let old = fx.root.join("module.py");
        let new = fx.root.join("mod.py");
        let before = fx.store.get_file_by_path(&old).unwrap().unwrap();
        fs::rename(&old, &new).unwrap();

        assert_eq!(scanner.rename_files(&[(old.clone(), new.clone())]).unwrap(), 1);
        assert_eq!(parser.calls.load(Ordering::SeqCst), 2);

        assert!(fx.store.get_file_by_path(&old).unwrap().is_none());
        let after = fx.store.get_file_by_path(&new).unwrap().unwrap();
        assert_eq!(after.id, before.id);
        assert_eq!(after.name, "mod.py");
        assert_eq!(after.mtime, before.mtime);
        let symbols = fx.store.query_symbols(Some(after.id), None, None);
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].0.file_id, before.id);

        // Unknown sources are skipped
        assert_eq!(scanner.rename_files(&[(old, fx.root.join("x.py"))]).unwrap(), 0);
    }

    #[test]
    fn test_rename_into_ignored_drops_row() {
        let fx = fixture(&["cache.py"]);
        let registry = ParserRegistry::new();
        let scanner = Scanner::new(&fx.store, &registry, &fx.ignore);
        scanner.run_pass(&fx.root).unwrap();

        let pair = (fx.root.join("cache.py"), fx.root.join("cache.pyc"));
        assert_eq!(scanner.rename_files(&[pair]).unwrap(), 0);
        assert_eq!(fx.store.count_files().unwrap(), 0);
    }

    #[test]
    fn test_sweep_removes_deleted_files() {
        let fx = fixture(&["setup.py", "module.py", "README.md"]);
        let registry = ParserRegistry::new();
        let scanner = Scanner::new(&fx.store, &registry, &fx.ignore);
        scanner.run_pass(&fx.root).unwrap();
        assert_eq!(fx.store.count_files().unwrap(), 3);

        fs::remove_file(fx.root.join("README.md")).unwrap();
        let stats = scanner.run_pass(&fx.root).unwrap();
        assert_eq!(stats.files_removed, 1);
        assert_eq!(fx.store.count_files().unwrap(), 2);
        assert!(file_names(&fx.store, "readme").is_empty());
    }

    #[test]
    fn test_sweep_removes_newly_ignored_files() {
        let fx = fixture(&["app.py", "build/out.py"]);
        let registry = ParserRegistry::new();
        Scanner::new(&fx.store, &registry, &fx.ignore)
            .run_pass(&fx.root)
            .unwrap();
        assert_eq!(fx.store.count_files().unwrap(), 2);

        let stricter = IgnoreMatcher::new(&["build"]);
        Scanner::new(&fx.store, &registry, &stricter)
            .run_pass(&fx.root)
            .unwrap();
        let files = fx.store.query_files(None, None);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "app.py");
    }

    #[test]
    fn test_ignored_directories_are_not_descended() {
        let fx = fixture(&["src/lib.py", ".git/config", ".git/hooks/pre-commit.py", "mod.pyc"]);
        let registry = ParserRegistry::new();
        let progress = RecordingProgress::new();
        let stats = Scanner::new(&fx.store, &registry, &fx.ignore)
            .with_progress(&progress)
            .run_pass(&fx.root)
            .unwrap();

        assert_eq!(stats.files_seen, 1);
        let events = progress.events();
        assert!(events.iter().all(|(m, _)| !m.contains(".git")));
        assert!(events.contains(&("Indexing proj/src".to_string(), None)));
        assert_eq!(events[events.len() - 2], ("Cleaning database".to_string(), Some(95)));
        assert_eq!(events[events.len() - 1], ("Finished".to_string(), Some(100)));
    }

    #[test]
    fn test_parse_failure_keeps_timestamp_unset() {
        let fx = fixture(&["good.py"]);
        let broken = fx.root.join("broken.py");
        fs::write(&broken, "syntax error\n").unwrap();
        let (registry, parser) = spam_registry();
        let scanner = Scanner::new(&fx.store, &registry, &fx.ignore);

        let stats = scanner.run_pass(&fx.root).unwrap();
        assert_eq!(stats.parse_errors, 1);
        assert!(fx.store.has_file(&broken).unwrap());
        assert_eq!(fx.store.get_file_mtime(&broken).unwrap(), None);
        assert_eq!(fx.store.count_symbols().unwrap(), 1);

        // The broken file is retried on the next pass
        scanner.run_pass(&fx.root).unwrap();
        assert_eq!(parser.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_nested_definitions_keep_parents() {
        struct Nested;
        impl ParserPlugin for Nested {
            fn name(&self) -> &str {
                "nested"
            }
            fn mimetypes(&self) -> &[&str] {
                &["text/x-python"]
            }
            fn parse(&self, _path: &Path) -> anyhow::Result<Vec<Definition>> {
                Ok(vec![Definition::new("Cart", 0, 6)
                    .with_icon("code-class")
                    .with_children(vec![
                        Definition::new("add", 1, 8).with_icon("code-function"),
                        Definition::new("items", 4, 8).with_icon("code-variable"),
                    ])])
            }
        }

        let fx = fixture(&["cart.py"]);
        let mut registry = ParserRegistry::new();
        registry.register(Arc::new(Nested));
        let stats = Scanner::new(&fx.store, &registry, &fx.ignore)
            .run_pass(&fx.root)
            .unwrap();
        assert_eq!(stats.symbols_inserted, 3);

        let file = fx.store.get_file_by_path(&fx.root.join("cart.py")).unwrap().unwrap();
        let outline = fx.store.file_outline(file.id).unwrap();
        assert_eq!(outline.len(), 1);
        assert_eq!(outline[0].children.len(), 2);
        assert_eq!(outline[0].children[1].symbol.parent_id, Some(outline[0].symbol.id));
    }

    #[test]
    fn test_cancel_before_start_skips_everything() {
        let fx = fixture(&["setup.py", "module.py"]);
        let registry = ParserRegistry::new();
        let cancel = AtomicBool::new(true);
        let progress = RecordingProgress::new();
        let stats = Scanner::new(&fx.store, &registry, &fx.ignore)
            .with_cancel(&cancel)
            .with_progress(&progress)
            .run_pass(&fx.root)
            .unwrap();

        assert!(stats.cancelled);
        assert_eq!(fx.store.count_files().unwrap(), 0);
        assert!(fx.store.has_project(&fx.root).unwrap());
        assert!(progress.events().iter().all(|(m, _)| m != "Cleaning database"));
    }

    #[test]
    fn test_cancel_mid_pass_commits_whole_files() {
        let names: Vec<String> = (0..20).map(|i| format!("dir{}/file{}.py", i, i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let fx = fixture(&refs);
        let (registry, _parser) = spam_registry();

        let cancel = Arc::new(AtomicBool::new(false));
        let reports = AtomicUsize::new(0);
        let flag = cancel.clone();
        let stop_after_some = move |_: &str, _: Option<u8>| {
            if reports.fetch_add(1, Ordering::SeqCst) == 10 {
                flag.store(true, Ordering::SeqCst);
            }
        };
        let stats = Scanner::new(&fx.store, &registry, &fx.ignore)
            .with_cancel(&cancel)
            .with_progress(&stop_after_some)
            .with_batch_size(3)
            .run_pass(&fx.root)
            .unwrap();

        assert!(stats.cancelled);
        let files = fx.store.count_files().unwrap();
        assert!(files > 0 && files < 20);
        // Every committed Python file carries its complete outline
        assert_eq!(fx.store.count_symbols().unwrap(), files);
    }

    #[test]
    fn test_file_vanishing_mid_walk_does_not_end_pass() {
        let fx = fixture(&["a.py", "b.py", "c.py"]);
        let (registry, _parser) = spam_registry();
        let scanner = Scanner::new(&fx.store, &registry, &fx.ignore);
        scanner.run_pass(&fx.root).unwrap();
        assert_eq!(fx.store.count_files().unwrap(), 3);

        // The first report after the root label belongs to a file entry
        let root = fx.root.clone();
        let reports = AtomicUsize::new(0);
        let delete_everything = move |_: &str, _: Option<u8>| {
            if reports.fetch_add(1, Ordering::SeqCst) == 1 {
                for name in ["a.py", "b.py", "c.py"] {
                    let _ = fs::remove_file(root.join(name));
                }
            }
        };
        let stats = Scanner::new(&fx.store, &registry, &fx.ignore)
            .with_progress(&delete_everything)
            .run_pass(&fx.root)
            .unwrap();
        assert!(!stats.cancelled);
        assert_eq!(stats.file_errors, 0);
        assert_eq!(stats.files_removed, 3);
        assert_eq!(fx.store.count_files().unwrap(), 0);
        assert_eq!(fx.store.count_symbols().unwrap(), 0);
    }

    #[test]
    fn test_parser_runs_without_write_lock() {
        /// Fails unless another handle can take the write lock right away
        struct LockCheckingParser {
            store_path: PathBuf,
        }
        impl ParserPlugin for LockCheckingParser {
            fn name(&self) -> &str {
                "lock"
            }
            fn mimetypes(&self) -> &[&str] {
                &["text/x-python"]
            }
            fn parse(&self, _path: &Path) -> anyhow::Result<Vec<Definition>> {
                let other = Store::open_with(&self.store_path, 0)?;
                other.batch()?.commit()?;
                Ok(vec![Definition::new("spam", 0, 0)])
            }
        }

        let fx = fixture(&["README.md", "a.py", "notes.txt", "b.py"]);
        let mut registry = ParserRegistry::new();
        registry.register(Arc::new(LockCheckingParser {
            store_path: fx.store.path().to_path_buf(),
        }));
        let stats = Scanner::new(&fx.store, &registry, &fx.ignore)
            .run_pass(&fx.root)
            .unwrap();

        assert_eq!(stats.parse_errors, 0);
        assert_eq!(stats.files_parsed, 2);
        assert_eq!(fx.store.count_files().unwrap(), 4);
        assert_eq!(fx.store.count_symbols().unwrap(), 2);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_non_utf8_names_are_skipped() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let fx = fixture(&["good.txt"]);
        fs::write(fx.root.join(OsStr::from_bytes(b"bad\xff.txt")), "x\n").unwrap();
        let registry = ParserRegistry::new();
        let scanner = Scanner::new(&fx.store, &registry, &fx.ignore);

        for _ in 0..3 {
            let stats = scanner.run_pass(&fx.root).unwrap();
            assert_eq!(stats.walk_errors, 1);
            assert_eq!(stats.files_seen, 1);
            assert_eq!(stats.files_removed, 0);
        }
        let files = fx.store.query_files(None, None);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "good.txt");
    }

    #[test]
    fn test_delete_files() {
        let fx = fixture(&["a.py", "b.py"]);
        let (registry, _parser) = spam_registry();
        let scanner = Scanner::new(&fx.store, &registry, &fx.ignore);
        scanner.run_pass(&fx.root).unwrap();

        let removed = scanner
            .delete_files(&[fx.root.join("a.py"), fx.root.join("missing.py")])
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(fx.store.count_files().unwrap(), 1);
        assert_eq!(fx.store.count_symbols().unwrap(), 1);
    }
}
