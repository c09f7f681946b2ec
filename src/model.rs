//! Records persisted by the store and produced by parser plugins

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A project root known to the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: i64,
    pub path: PathBuf,
    pub name: String,
}

/// A file under some project root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: i64,
    pub path: PathBuf,
    /// Seconds since the Unix epoch at the last successful update; `None`
    /// until the file has been processed once.
    pub mtime: Option<f64>,
    pub name: String,
    pub project_id: i64,
}

/// Icon to show next to a symbol: a theme icon name with a fallback image path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IconHint {
    pub theme: String,
    pub path: Option<String>,
}

impl IconHint {
    pub fn themed(theme: &str) -> Self {
        Self {
            theme: theme.to_string(),
            path: None,
        }
    }
}

/// A stored symbol. `parent_id` links nested symbols within the same file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolRecord {
    pub id: i64,
    pub name: String,
    pub line: u32,
    pub column: u32,
    pub icon: Option<IconHint>,
    pub file_id: i64,
    pub project_id: i64,
    pub parent_id: Option<i64>,
}

/// A symbol together with its nested children, as materialised for an outline view
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolNode {
    pub symbol: SymbolRecord,
    pub children: Vec<SymbolNode>,
}

/// One entry of a parsed outline. Lines and columns are 0-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
    pub name: String,
    pub line: u32,
    pub column: u32,
    pub icon: Option<IconHint>,
    pub children: Vec<Definition>,
}

impl Definition {
    pub fn new(name: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            name: name.into(),
            line,
            column,
            icon: None,
            children: Vec::new(),
        }
    }

    pub fn with_icon(mut self, theme: &str) -> Self {
        self.icon = Some(IconHint::themed(theme));
        self
    }

    pub fn with_children(mut self, children: Vec<Definition>) -> Self {
        self.children = children;
        self
    }
}

/// Final path segment, used as the display name of projects and files
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}
