//! SQLite store for projects, files and symbols
//!
//! Two FTS5 tables shadow the file and symbol names in their searchable form
//! (see [`crate::searchable`]); queries narrow candidates through them and then
//! order hits by [`crate::rank::match_ratio`], registered as a SQL function.
//!
//! The database runs in WAL mode so short-lived readers never block the
//! writer. Writers take `BEGIN IMMEDIATE` locks and retry with exponential
//! backoff when another writer holds the lock.

use rusqlite::functions::FunctionFlags;
use rusqlite::types::Value;
use rusqlite::{
    params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row, Transaction,
    TransactionBehavior,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{IndexError, Result};
use crate::model::{display_name, FileRecord, IconHint, ProjectRecord, SymbolNode, SymbolRecord};
use crate::rank::match_ratio;
use crate::searchable::{match_expression, searchable};

/// Bumped whenever the schema changes; embedded in the store filename
pub const SCHEMA_VERSION: i64 = 3;

const DEFAULT_BUSY_RETRIES: u32 = 8;
const BACKOFF_START: Duration = Duration::from_millis(10);
const BACKOFF_MAX: Duration = Duration::from_millis(500);
/// SQLite's own busy handler; kept short so the backoff below does the waiting
const SQLITE_BUSY_TIMEOUT: Duration = Duration::from_millis(50);
const SCHEMA_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS project (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS file (
    id         INTEGER PRIMARY KEY,
    path       TEXT NOT NULL UNIQUE,
    mtime      REAL,
    name       TEXT NOT NULL,
    project_id INTEGER NOT NULL REFERENCES project(id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_file_project ON file(project_id);

CREATE TABLE IF NOT EXISTS symbol (
    id               INTEGER PRIMARY KEY,
    line             INTEGER NOT NULL,
    "column"         INTEGER NOT NULL,
    icon_theme       TEXT,
    icon_path        TEXT,
    name             TEXT NOT NULL,
    file_id          INTEGER NOT NULL REFERENCES file(id) ON DELETE CASCADE,
    project_id       INTEGER NOT NULL REFERENCES project(id) ON DELETE CASCADE,
    parent_symbol_id INTEGER REFERENCES symbol(id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_symbol_file ON symbol(file_id);
CREATE INDEX IF NOT EXISTS idx_symbol_project ON symbol(project_id);

-- Reserved for TODO-comment extraction
CREATE TABLE IF NOT EXISTS todo (
    id      INTEGER PRIMARY KEY,
    line    INTEGER NOT NULL,
    text    TEXT NOT NULL,
    file_id INTEGER NOT NULL REFERENCES file(id) ON DELETE CASCADE
);

-- rowid mirrors the entity id
CREATE VIRTUAL TABLE IF NOT EXISTS file_index USING fts5(file_id UNINDEXED, content);
CREATE VIRTUAL TABLE IF NOT EXISTS symbol_index USING fts5(symbol_id UNINDEXED, content);
"#;

const DROP_ALL: &str = r#"
DROP TABLE IF EXISTS symbol_index;
DROP TABLE IF EXISTS file_index;
DROP TABLE IF EXISTS todo;
DROP TABLE IF EXISTS symbol;
DROP TABLE IF EXISTS file;
DROP TABLE IF EXISTS project;
"#;

const FILE_COLUMNS: &str = "f.id, f.path, f.mtime, f.name, f.project_id";
const SYMBOL_COLUMNS: &str = r#"s.id, s.name, s.line, s."column", s.icon_theme, s.icon_path, s.file_id, s.project_id, s.parent_symbol_id"#;
/// Number of columns in [`SYMBOL_COLUMNS`]; file columns follow in joined rows
const SYMBOL_WIDTH: usize = 9;

/// A handle on the index database. Each thread opens its own.
pub struct Store {
    conn: Connection,
    path: PathBuf,
    busy_retries: u32,
}

/// One write transaction spanning a batch of files.
///
/// Each file's writes run in their own savepoint so a failure discards that
/// file only. Dropping the batch without [`Batch::commit`] rolls everything back.
pub struct Batch<'s> {
    tx: Transaction<'s>,
    files: usize,
}

impl Batch<'_> {
    /// Run `f` inside a savepoint; its writes are kept only if it succeeds.
    pub fn file<T>(&mut self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let sp = self.tx.savepoint()?;
        let out = f();
        if out.is_ok() {
            sp.commit()?;
            self.files += 1;
        }
        out
    }

    /// Files committed into this batch so far
    pub fn len(&self) -> usize {
        self.files
    }

    pub fn is_empty(&self) -> bool {
        self.files == 0
    }

    pub fn commit(self) -> Result<()> {
        let files = self.files;
        self.tx.commit()?;
        debug!(files, "Committed batch");
        Ok(())
    }
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn file_from_row(row: &Row, offset: usize) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        id: row.get(offset)?,
        path: PathBuf::from(row.get::<_, String>(offset + 1)?),
        mtime: row.get(offset + 2)?,
        name: row.get(offset + 3)?,
        project_id: row.get(offset + 4)?,
    })
}

fn symbol_from_row(row: &Row) -> rusqlite::Result<SymbolRecord> {
    let icon_theme: Option<String> = row.get(4)?;
    let icon_path: Option<String> = row.get(5)?;
    Ok(SymbolRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        line: row.get(2)?,
        column: row.get(3)?,
        icon: icon_theme.map(|theme| IconHint {
            theme,
            path: icon_path,
        }),
        file_id: row.get(6)?,
        project_id: row.get(7)?,
        parent_id: row.get(8)?,
    })
}

fn project_from_row(row: &Row) -> rusqlite::Result<ProjectRecord> {
    Ok(ProjectRecord {
        id: row.get(0)?,
        path: PathBuf::from(row.get::<_, String>(1)?),
        name: row.get(2)?,
    })
}

/// `AND <column> IN (?, ?, ...)`, pushing the ids onto `values`
fn in_clause(column: &str, ids: &[i64], values: &mut Vec<Value>) -> String {
    let marks = vec!["?"; ids.len()].join(", ");
    values.extend(ids.iter().map(|id| Value::Integer(*id)));
    format!(" AND {} IN ({})", column, marks)
}

/// Empty or whitespace-only filters mean "everything, alphabetically"
fn effective_filter(filter: Option<&str>) -> Option<&str> {
    filter.map(str::trim).filter(|f| !f.is_empty())
}

impl Store {
    /// Open (or create) the store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, DEFAULT_BUSY_RETRIES)
    }

    pub fn open_with(path: &Path, busy_retries: u32) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // A writer holding the lock during schema setup is worth another attempt
        let unavailable = |source: rusqlite::Error| {
            if is_busy(&source) {
                warn!(path = ?path, "Store locked while opening: {}", source);
                IndexError::StoreBusy
            } else {
                IndexError::StoreUnavailable {
                    path: path.to_path_buf(),
                    source,
                }
            }
        };
        let conn = Connection::open(path).map_err(unavailable)?;
        Self::init(&conn).map_err(unavailable)?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
            busy_retries,
        })
    }

    fn init(conn: &Connection) -> rusqlite::Result<()> {
        // Schema setup may have to wait for a running writer
        conn.busy_timeout(SCHEMA_BUSY_TIMEOUT)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            "#,
        )?;

        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version != SCHEMA_VERSION {
            if version != 0 {
                info!(found = version, expected = SCHEMA_VERSION, "Schema version changed, starting a fresh index");
                conn.execute_batch(DROP_ALL)?;
            }
            conn.execute_batch(SCHEMA)?;
            conn.execute_batch(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))?;
        }
        conn.busy_timeout(SQLITE_BUSY_TIMEOUT)?;

        conn.create_scalar_function(
            "match_ratio",
            2,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                let name: String = ctx.get(0)?;
                let filter: String = ctx.get(1)?;
                Ok(match_ratio(&name, &filter))
            },
        )?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `op`, retrying with exponential backoff while the database is
    /// locked by another writer.
    fn retry<T>(&self, mut op: impl FnMut() -> rusqlite::Result<T>) -> Result<T> {
        let mut delay = BACKOFF_START;
        for attempt in 0..=self.busy_retries {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if is_busy(&e) => {
                    if attempt == self.busy_retries {
                        break;
                    }
                    debug!(attempt, delay_ms = delay.as_millis() as u64, "Store busy, backing off");
                    std::thread::sleep(delay);
                    delay = (delay * 2).min(BACKOFF_MAX);
                }
                Err(e) => return Err(e.into()),
            }
        }
        warn!(path = ?self.path, "Store still busy after {} retries", self.busy_retries);
        Err(IndexError::StoreBusy)
    }

    /// Run `op` inside a named savepoint, retried as a whole while busy.
    /// A failing `op` leaves no trace.
    fn atomically<T>(&self, name: &str, mut op: impl FnMut() -> rusqlite::Result<T>) -> Result<T> {
        self.retry(|| {
            self.conn.execute_batch(&format!("SAVEPOINT {}", name))?;
            match op() {
                Ok(value) => {
                    self.conn.execute_batch(&format!("RELEASE {}", name))?;
                    Ok(value)
                }
                Err(e) => {
                    let _ = self
                        .conn
                        .execute_batch(&format!("ROLLBACK TO {0}; RELEASE {0}", name));
                    Err(e)
                }
            }
        })
    }

    /// Start a write transaction for a batch of files.
    pub fn batch(&self) -> Result<Batch<'_>> {
        let tx = self.retry(|| Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate))?;
        Ok(Batch { tx, files: 0 })
    }

    // ─── Projects ───────────────────────────────────────────────────

    /// Return the id of the project rooted at `root`, creating it if needed.
    pub fn ensure_project(&self, root: &Path) -> Result<i64> {
        let path = path_text(root);
        let name = display_name(root);
        self.retry(|| {
            self.conn.execute(
                "INSERT OR IGNORE INTO project (path, name) VALUES (?1, ?2)",
                params![path, name],
            )
        })?;
        let id = self.conn.query_row(
            "SELECT id FROM project WHERE path = ?1",
            params![path],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn has_project(&self, root: &Path) -> Result<bool> {
        Ok(self.get_project(root)?.is_some())
    }

    pub fn get_project(&self, root: &Path) -> Result<Option<ProjectRecord>> {
        let project = self
            .conn
            .query_row(
                "SELECT id, path, name FROM project WHERE path = ?1",
                params![path_text(root)],
                project_from_row,
            )
            .optional()?;
        Ok(project)
    }

    pub fn get_all_projects(&self) -> Result<Vec<ProjectRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, path, name FROM project ORDER BY id")?;
        let projects = stmt
            .query_map([], project_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(projects)
    }

    /// Ids of the known projects among `roots`; unknown roots are skipped.
    pub fn get_project_ids(&self, roots: &[PathBuf]) -> Result<Vec<i64>> {
        let mut ids = Vec::with_capacity(roots.len());
        for root in roots {
            if let Some(project) = self.get_project(root)? {
                ids.push(project.id);
            }
        }
        Ok(ids)
    }

    /// The innermost known project whose root contains `path`
    pub fn project_containing(&self, path: &Path) -> Result<Option<ProjectRecord>> {
        Ok(self
            .get_all_projects()?
            .into_iter()
            .filter(|p| path.starts_with(&p.path))
            .max_by_key(|p| p.path.components().count()))
    }

    /// Remove a project with all of its files and symbols.
    /// Returns false if the project was not known.
    pub fn delete_project(&self, root: &Path) -> Result<bool> {
        let Some(project) = self.get_project(root)? else {
            return Ok(false);
        };
        self.atomically("delete_project", || {
            self.conn.execute(
                "DELETE FROM symbol_index WHERE rowid IN (SELECT id FROM symbol WHERE project_id = ?1)",
                params![project.id],
            )?;
            self.conn.execute(
                "DELETE FROM file_index WHERE rowid IN (SELECT id FROM file WHERE project_id = ?1)",
                params![project.id],
            )?;
            self.conn
                .execute("DELETE FROM symbol WHERE project_id = ?1", params![project.id])?;
            self.conn
                .execute("DELETE FROM file WHERE project_id = ?1", params![project.id])?;
            self.conn
                .execute("DELETE FROM project WHERE id = ?1", params![project.id])
        })?;
        info!(root = ?root, "Removed project from index");
        Ok(true)
    }

    // ─── Files ──────────────────────────────────────────────────────

    pub fn has_file(&self, path: &Path) -> Result<bool> {
        Ok(self.get_file_by_path(path)?.is_some())
    }

    pub fn get_file_by_path(&self, path: &Path) -> Result<Option<FileRecord>> {
        let file = self
            .conn
            .query_row(
                &format!("SELECT {} FROM file f WHERE f.path = ?1", FILE_COLUMNS),
                params![path_text(path)],
                |row| file_from_row(row, 0),
            )
            .optional()?;
        Ok(file)
    }

    pub fn get_file_by_id(&self, id: i64) -> Result<Option<FileRecord>> {
        let file = self
            .conn
            .query_row(
                &format!("SELECT {} FROM file f WHERE f.id = ?1", FILE_COLUMNS),
                params![id],
                |row| file_from_row(row, 0),
            )
            .optional()?;
        Ok(file)
    }

    /// Stored modification time; `Ok(None)` if the file was never processed.
    pub fn get_file_mtime(&self, path: &Path) -> Result<Option<f64>> {
        self.get_file_by_path(path)?
            .map(|f| f.mtime)
            .ok_or_else(|| IndexError::UnknownFile(path.to_path_buf()))
    }

    /// Insert a file row on first sight; otherwise return the existing id untouched.
    pub fn upsert_file(&self, path: &Path, project_id: i64) -> Result<i64> {
        if let Some(existing) = self.get_file_by_path(path)? {
            return Ok(existing.id);
        }
        let name = display_name(path);
        let text = path_text(path);
        let id = self.retry(|| {
            self.conn.execute(
                "INSERT INTO file (path, mtime, name, project_id) VALUES (?1, NULL, ?2, ?3)",
                params![text, name, project_id],
            )?;
            let id = self.conn.last_insert_rowid();
            self.conn.execute(
                "INSERT INTO file_index (rowid, file_id, content) VALUES (?1, ?1, ?2)",
                params![id, searchable(&name)],
            )?;
            Ok(id)
        })?;
        Ok(id)
    }

    /// Record a new modification time, optionally moving the file to `new_path`.
    /// Both changes land together or not at all.
    pub fn update_file(&self, path: &Path, mtime: f64, new_path: Option<&Path>) -> Result<()> {
        let file = self
            .get_file_by_path(path)?
            .ok_or_else(|| IndexError::UnknownFile(path.to_path_buf()))?;

        self.atomically("update_file", || {
            self.conn.execute(
                "UPDATE file SET mtime = ?1 WHERE id = ?2",
                params![mtime, file.id],
            )?;
            if let Some(target) = new_path {
                self.move_file(file.id, target)?;
            }
            Ok(())
        })
    }

    /// Move a file row to `new_path`, keeping its id, timestamp and symbols.
    pub fn rename_file(&self, path: &Path, new_path: &Path) -> Result<()> {
        let file = self
            .get_file_by_path(path)?
            .ok_or_else(|| IndexError::UnknownFile(path.to_path_buf()))?;
        self.atomically("rename_file", || self.move_file(file.id, new_path))
    }

    fn move_file(&self, file_id: i64, target: &Path) -> rusqlite::Result<()> {
        let name = display_name(target);
        self.conn.execute(
            "UPDATE file SET path = ?1, name = ?2 WHERE id = ?3",
            params![path_text(target), name, file_id],
        )?;
        self.conn
            .execute("DELETE FROM file_index WHERE rowid = ?1", params![file_id])?;
        self.conn.execute(
            "INSERT INTO file_index (rowid, file_id, content) VALUES (?1, ?1, ?2)",
            params![file_id, searchable(&name)],
        )?;
        Ok(())
    }

    /// Remove a file and its symbols. Returns false if the path was unknown.
    pub fn delete_file(&self, path: &Path) -> Result<bool> {
        let Some(file) = self.get_file_by_path(path)? else {
            return Ok(false);
        };
        self.clear_file_symbols(file.id)?;
        self.retry(|| {
            self.conn
                .execute("DELETE FROM file_index WHERE rowid = ?1", params![file.id])?;
            self.conn
                .execute("DELETE FROM file WHERE id = ?1", params![file.id])
        })?;
        debug!(path = ?path, "Deleted file from index");
        Ok(true)
    }

    /// All file rows owned by a project
    pub fn project_files(&self, project_id: i64) -> Result<Vec<FileRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM file f WHERE f.project_id = ?1 ORDER BY f.id",
            FILE_COLUMNS
        ))?;
        let files = stmt
            .query_map(params![project_id], |row| file_from_row(row, 0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(files)
    }

    /// Forget stored timestamps so the next pass re-parses every file.
    pub fn reset_project_mtimes(&self, project_id: i64) -> Result<usize> {
        self.retry(|| {
            self.conn.execute(
                "UPDATE file SET mtime = NULL WHERE project_id = ?1",
                params![project_id],
            )
        })
    }

    // ─── Symbols ────────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    pub fn insert_symbol(
        &self,
        name: &str,
        line: u32,
        column: u32,
        icon: Option<&IconHint>,
        file_id: i64,
        project_id: i64,
        parent_id: Option<i64>,
    ) -> Result<i64> {
        let theme = icon.map(|i| i.theme.as_str());
        let icon_path = icon.and_then(|i| i.path.as_deref());
        self.retry(|| {
            self.conn.execute(
                r#"INSERT INTO symbol (line, "column", icon_theme, icon_path, name, file_id, project_id, parent_symbol_id)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
                params![line, column, theme, icon_path, name, file_id, project_id, parent_id],
            )?;
            let id = self.conn.last_insert_rowid();
            self.conn.execute(
                "INSERT INTO symbol_index (rowid, symbol_id, content) VALUES (?1, ?1, ?2)",
                params![id, searchable(name)],
            )?;
            Ok(id)
        })
    }

    /// Remove every symbol of a file. Returns the number removed.
    pub fn clear_file_symbols(&self, file_id: i64) -> Result<usize> {
        self.retry(|| {
            self.conn.execute(
                "DELETE FROM symbol_index WHERE rowid IN (SELECT id FROM symbol WHERE file_id = ?1)",
                params![file_id],
            )?;
            self.conn
                .execute("DELETE FROM symbol WHERE file_id = ?1", params![file_id])
        })
    }

    /// The symbol forest of one file, children in insertion order
    pub fn file_outline(&self, file_id: i64) -> Result<Vec<SymbolNode>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM symbol s WHERE s.file_id = ?1 ORDER BY s.id",
            SYMBOL_COLUMNS
        ))?;
        let symbols = stmt
            .query_map(params![file_id], symbol_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut by_parent: HashMap<Option<i64>, Vec<SymbolRecord>> = HashMap::new();
        for symbol in symbols {
            by_parent.entry(symbol.parent_id).or_default().push(symbol);
        }

        fn build(parent: Option<i64>, by_parent: &mut HashMap<Option<i64>, Vec<SymbolRecord>>) -> Vec<SymbolNode> {
            let Some(level) = by_parent.remove(&parent) else {
                return Vec::new();
            };
            level
                .into_iter()
                .map(|symbol| {
                    let children = build(Some(symbol.id), by_parent);
                    SymbolNode { symbol, children }
                })
                .collect()
        }

        Ok(build(None, &mut by_parent))
    }

    // ─── Queries ────────────────────────────────────────────────────

    /// Files matching `filter`, best match first; every file alphabetically
    /// when the filter is empty. Failures are logged and yield no results.
    pub fn query_files(&self, project_ids: Option<&[i64]>, filter: Option<&str>) -> Vec<FileRecord> {
        match self.try_query_files(project_ids, filter) {
            Ok(files) => files,
            Err(e) => {
                warn!("File query failed: {}", e);
                Vec::new()
            }
        }
    }

    fn try_query_files(&self, project_ids: Option<&[i64]>, filter: Option<&str>) -> Result<Vec<FileRecord>> {
        if project_ids.is_some_and(|ids| ids.is_empty()) {
            return Ok(Vec::new());
        }
        let mut values = Vec::new();
        let sql = match effective_filter(filter) {
            None => {
                let mut sql = format!("SELECT {} FROM file f WHERE 1 = 1", FILE_COLUMNS);
                if let Some(ids) = project_ids {
                    sql.push_str(&in_clause("f.project_id", ids, &mut values));
                }
                sql.push_str(" ORDER BY f.name, f.id");
                sql
            }
            Some(filter) => {
                let Some(expr) = match_expression(filter) else {
                    return Ok(Vec::new());
                };
                values.push(Value::Text(expr));
                let mut sql = format!(
                    "SELECT {} FROM file_index JOIN file f ON f.id = file_index.rowid \
                     WHERE file_index MATCH ?",
                    FILE_COLUMNS
                );
                if let Some(ids) = project_ids {
                    sql.push_str(&in_clause("f.project_id", ids, &mut values));
                }
                sql.push_str(" ORDER BY match_ratio(f.name, ?), file_index.rowid");
                values.push(Value::Text(filter.to_string()));
                sql
            }
        };

        let mut stmt = self.conn.prepare(&sql)?;
        let files = stmt
            .query_map(params_from_iter(values.iter()), |row| file_from_row(row, 0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(files)
    }

    /// Symbols matching `filter` together with their files, best match first.
    /// Failures are logged and yield no results.
    pub fn query_symbols(
        &self,
        file_id: Option<i64>,
        project_ids: Option<&[i64]>,
        filter: Option<&str>,
    ) -> Vec<(SymbolRecord, FileRecord)> {
        match self.try_query_symbols(file_id, project_ids, filter) {
            Ok(hits) => hits,
            Err(e) => {
                warn!("Symbol query failed: {}", e);
                Vec::new()
            }
        }
    }

    fn try_query_symbols(
        &self,
        file_id: Option<i64>,
        project_ids: Option<&[i64]>,
        filter: Option<&str>,
    ) -> Result<Vec<(SymbolRecord, FileRecord)>> {
        if project_ids.is_some_and(|ids| ids.is_empty()) {
            return Ok(Vec::new());
        }
        let mut values = Vec::new();
        let filter = effective_filter(filter);

        let mut sql = match filter {
            None => format!(
                "SELECT {}, {} FROM symbol s JOIN file f ON f.id = s.file_id WHERE 1 = 1",
                SYMBOL_COLUMNS, FILE_COLUMNS
            ),
            Some(filter) => {
                let Some(expr) = match_expression(filter) else {
                    return Ok(Vec::new());
                };
                values.push(Value::Text(expr));
                format!(
                    "SELECT {}, {} FROM symbol_index \
                     JOIN symbol s ON s.id = symbol_index.rowid \
                     JOIN file f ON f.id = s.file_id \
                     WHERE symbol_index MATCH ?",
                    SYMBOL_COLUMNS, FILE_COLUMNS
                )
            }
        };
        if let Some(id) = file_id {
            sql.push_str(" AND s.file_id = ?");
            values.push(Value::Integer(id));
        }
        if let Some(ids) = project_ids {
            sql.push_str(&in_clause("s.project_id", ids, &mut values));
        }
        match filter {
            None => sql.push_str(" ORDER BY s.name, s.id"),
            Some(filter) => {
                sql.push_str(" ORDER BY match_ratio(s.name, ?), symbol_index.rowid");
                values.push(Value::Text(filter.to_string()));
            }
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let hits = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                Ok((symbol_from_row(row)?, file_from_row(row, SYMBOL_WIDTH)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(hits)
    }

    // ─── Maintenance ────────────────────────────────────────────────

    pub fn count_files(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM file", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn count_symbols(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM symbol", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Empty every relation, keeping the file and schema in place.
    pub fn truncate(&self) -> Result<()> {
        self.retry(|| {
            self.conn.execute_batch(
                r#"
                BEGIN IMMEDIATE;
                DELETE FROM symbol_index;
                DELETE FROM file_index;
                DELETE FROM todo;
                DELETE FROM symbol;
                DELETE FROM file;
                DELETE FROM project;
                COMMIT;
                "#,
            )
        })?;
        info!(path = ?self.path, "Cleared index");
        Ok(())
    }
}
