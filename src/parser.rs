//! Parser plugins keyed by media type
//!
//! A plugin turns one file into a tree of [`Definition`]s. The registry maps
//! each media type to the most recently registered plugin claiming it; files
//! whose type nobody claims are tracked without symbols.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::error::{IndexError, Result};
use crate::model::Definition;

/// A symbol extractor for one or more media types.
///
/// Implementations must be safe to call from several indexing threads at once.
pub trait ParserPlugin: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Media types this plugin handles, e.g. `text/x-php`
    fn mimetypes(&self) -> &[&str];

    /// Parse the file at `path` into its top-level definitions.
    fn parse(&self, path: &Path) -> anyhow::Result<Vec<Definition>>;
}

/// Extensions whose media type differs across platforms' mime databases
const MIMETYPE_OVERRIDES: &[(&str, &str)] = &[
    ("py", "text/x-python"),
    ("pyw", "text/x-python"),
    ("php", "text/x-php"),
    ("phtml", "text/x-php"),
    ("js", "text/javascript"),
    ("mjs", "text/javascript"),
    ("cjs", "text/javascript"),
    ("rs", "text/x-rust"),
    ("c", "text/x-csrc"),
    ("h", "text/x-chdr"),
    ("md", "text/markdown"),
];

/// Guess a file's media type from its name.
pub fn guess_mimetype(path: &Path) -> Option<String> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase());
    if let Some(ext) = ext.as_deref() {
        if let Some((_, mime)) = MIMETYPE_OVERRIDES.iter().find(|(e, _)| *e == ext) {
            return Some(mime.to_string());
        }
    }
    mime_guess::from_path(path).first_raw().map(str::to_string)
}

#[derive(Default, Clone)]
pub struct ParserRegistry {
    by_mimetype: HashMap<String, Arc<dyn ParserPlugin>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the tree-sitter outline plugins
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::outline::PhpOutline));
        registry.register(Arc::new(crate::outline::JsOutline));
        registry
    }

    /// Claim every media type the plugin lists; later registrations win.
    pub fn register(&mut self, plugin: Arc<dyn ParserPlugin>) {
        for mime in plugin.mimetypes() {
            if let Some(previous) = self.by_mimetype.insert(mime.to_string(), plugin.clone()) {
                debug!(
                    mimetype = *mime,
                    "Parser {} replaces {}",
                    plugin.name(),
                    previous.name()
                );
            }
        }
    }

    pub fn for_mimetype(&self, mimetype: &str) -> Option<Arc<dyn ParserPlugin>> {
        self.by_mimetype.get(mimetype).cloned()
    }

    /// Plugin responsible for `path`, if any
    pub fn parser_for(&self, path: &Path) -> Option<Arc<dyn ParserPlugin>> {
        guess_mimetype(path).and_then(|mime| self.for_mimetype(&mime))
    }

    /// Parse `path` with the plugin `plugin`, mapping failures to [`IndexError::ParseFailure`].
    pub fn parse_with(plugin: &dyn ParserPlugin, path: &Path) -> Result<Vec<Definition>> {
        plugin.parse(path).map_err(|e| IndexError::ParseFailure {
            path: path.to_path_buf(),
            message: format!("{}: {:#}", plugin.name(), e),
        })
    }

    /// Parse `path` with whichever plugin claims it.
    /// `Ok(None)` means no plugin handles this file type.
    pub fn parse(&self, path: &Path) -> Result<Option<Vec<Definition>>> {
        match self.parser_for(path) {
            Some(plugin) => Self::parse_with(plugin.as_ref(), path).map(Some),
            None => Ok(None),
        }
    }

    pub fn mimetypes(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.by_mimetype.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn is_empty(&self) -> bool {
        self.by_mimetype.is_empty()
    }
}

impl std::fmt::Debug for ParserRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParserRegistry")
            .field("mimetypes", &self.mimetypes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::path::PathBuf;

    struct Fixed(&'static str);

    impl ParserPlugin for Fixed {
        fn name(&self) -> &str {
            self.0
        }

        fn mimetypes(&self) -> &[&str] {
            &["text/x-python"]
        }

        fn parse(&self, path: &Path) -> anyhow::Result<Vec<Definition>> {
            if path.ends_with("broken.py") {
                bail!("unexpected indent");
            }
            Ok(vec![Definition::new(self.0, 0, 0)])
        }
    }

    #[test]
    fn test_guess_mimetype() {
        assert_eq!(guess_mimetype(Path::new("a/setup.py")).as_deref(), Some("text/x-python"));
        assert_eq!(guess_mimetype(Path::new("a/Cart.PHP")).as_deref(), Some("text/x-php"));
        assert_eq!(guess_mimetype(Path::new("app.mjs")).as_deref(), Some("text/javascript"));
        assert_eq!(guess_mimetype(Path::new("logo.png")).as_deref(), Some("image/png"));
        assert_eq!(guess_mimetype(Path::new("Makefile")), None);
    }

    #[test]
    fn test_later_registration_wins() {
        let mut registry = ParserRegistry::new();
        registry.register(Arc::new(Fixed("first")));
        registry.register(Arc::new(Fixed("second")));

        let parsed = registry.parse(Path::new("setup.py")).unwrap().unwrap();
        assert_eq!(parsed[0].name, "second");
        assert_eq!(registry.mimetypes(), vec!["text/x-python"]);
    }

    #[test]
    fn test_unclaimed_type() {
        let mut registry = ParserRegistry::new();
        registry.register(Arc::new(Fixed("py")));
        assert!(registry.parser_for(Path::new("README.md")).is_none());
        assert!(registry.parse(Path::new("README.md")).unwrap().is_none());
    }

    #[test]
    fn test_failure_carries_path() {
        let mut registry = ParserRegistry::new();
        registry.register(Arc::new(Fixed("py")));
        match registry.parse(Path::new("/proj/broken.py")) {
            Err(IndexError::ParseFailure { path, message }) => {
                assert_eq!(path, PathBuf::from("/proj/broken.py"));
                assert!(message.contains("unexpected indent"));
            }
            other => panic!("expected parse failure, got {:?}", other.map(|d| d.is_some())),
        }
    }

    #[test]
    fn test_builtin_plugins() {
        let registry = ParserRegistry::with_builtin();
        assert!(registry.parser_for(Path::new("Cart.php")).is_some());
        assert!(registry.parser_for(Path::new("app.js")).is_some());
        assert!(registry.parser_for(Path::new("setup.py")).is_none());
    }
}
