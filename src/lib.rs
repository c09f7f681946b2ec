//! projindex - background project indexer
//!
//! Walks project trees, records every file in a SQLite store, extracts symbol
//! outlines through parser plugins keyed by media type, and answers fuzzy
//! file and symbol lookups ranked by how closely names match the query.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod ignore;
pub mod model;
pub mod outline;
pub mod parser;
pub mod progress;
pub mod rank;
pub mod scanner;
pub mod searchable;
pub mod store;
pub mod watcher;

pub use config::IndexerConfig;
pub use coordinator::{Coordinator, IndexHandle, TaskOutcome};
pub use error::{IndexError, Result};
pub use ignore::IgnoreMatcher;
pub use model::{Definition, FileRecord, IconHint, ProjectRecord, SymbolNode, SymbolRecord};
pub use outline::{JsOutline, PhpOutline};
pub use parser::{ParserPlugin, ParserRegistry};
pub use progress::{NullProgress, ProgressSink, TerminalProgress};
pub use scanner::{PassStats, Scanner};
pub use store::{Store, SCHEMA_VERSION};
pub use watcher::{watch_loop, ChangeSet};
