//! Bootstrap resolution
//!
//! A plugin's `bootstrap` field names its executable entry point as
//! `[relative/file]#export`. The file part is resolved against the package
//! folder; the export is looked up through an injected
//! [`BootstrapResolver`], so the lifecycle logic never depends on how code
//! is actually linked.

use std::any::Any;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Export used when the reference names only a file
pub const DEFAULT_EXPORT: &str = "default";

/// Type-erased exported value
pub type ExportValue = Arc<dyn Any + Send + Sync>;

/// Resolved location of a plugin entry point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeLocator {
    /// Absolute path of the referenced file, if any
    pub file: Option<PathBuf>,
    /// Exported symbol name
    pub export: String,
}

impl CodeLocator {
    /// Parse a bootstrap reference relative to a package folder
    ///
    /// # Errors
    ///
    /// Returns a reason string if the reference is empty or points outside
    /// the package
    pub fn parse(reference: &str, package_dir: &Path) -> Result<Self, String> {
        let reference = reference.trim();
        let (file, export) = match reference.split_once('#') {
            Some((file, export)) => (file.trim(), export.trim()),
            None => (reference, ""),
        };

        if file.is_empty() && export.is_empty() {
            return Err("empty bootstrap reference".to_string());
        }

        let file = if file.is_empty() {
            None
        } else {
            let relative = Path::new(file);
            let escapes = relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
            if escapes {
                return Err(format!("bootstrap path {file} escapes the package"));
            }
            Some(package_dir.join(relative))
        };

        Ok(Self {
            file,
            export: if export.is_empty() {
                DEFAULT_EXPORT.to_string()
            } else {
                export.to_string()
            },
        })
    }
}

/// Resolves a locator to an exported value
pub trait BootstrapResolver: Send + Sync {
    /// Look up the export a locator names
    ///
    /// # Errors
    ///
    /// Returns a reason string if the export cannot be resolved
    fn resolve(&self, locator: &CodeLocator) -> Result<ExportValue, String>;
}

/// A plugin's resolved entry point
#[derive(Clone)]
pub struct Bootstrap {
    pub locator: CodeLocator,
    export: ExportValue,
}

impl Bootstrap {
    /// Wrap a resolved export
    #[must_use]
    pub fn new(locator: CodeLocator, export: ExportValue) -> Self {
        Self { locator, export }
    }

    /// Borrow the export as a concrete type
    #[must_use]
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.export.downcast_ref::<T>()
    }
}

impl std::fmt::Debug for Bootstrap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bootstrap")
            .field("locator", &self.locator)
            .finish_non_exhaustive()
    }
}

/// Resolver backed by a table of compiled-in exports
///
/// When the locator names a file, the file must exist; the export itself
/// comes from the table.
#[derive(Default, Clone)]
pub struct ExportTable {
    exports: HashMap<String, ExportValue>,
}

impl ExportTable {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an export under a name, replacing any previous one
    pub fn register<T: Any + Send + Sync>(&mut self, name: impl Into<String>, value: T) {
        self.exports.insert(name.into(), Arc::new(value));
    }

    /// Builder-style [`ExportTable::register`]
    #[must_use]
    pub fn with<T: Any + Send + Sync>(mut self, name: impl Into<String>, value: T) -> Self {
        self.register(name, value);
        self
    }

    /// Registered export names, sorted
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.exports.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl BootstrapResolver for ExportTable {
    fn resolve(&self, locator: &CodeLocator) -> Result<ExportValue, String> {
        if let Some(file) = &locator.file
            && !file.exists()
        {
            return Err(format!("bootstrap file {} not found", file.display()));
        }

        self.exports
            .get(&locator.export)
            .cloned()
            .ok_or_else(|| format!("unknown export {}", locator.export))
    }
}

impl std::fmt::Debug for ExportTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportTable")
            .field("exports", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_file_and_export() {
        let locator = CodeLocator::parse("lib/handler.json#reply", Path::new("/pkg")).unwrap();
        assert_eq!(locator.file, Some(PathBuf::from("/pkg/lib/handler.json")));
        assert_eq!(locator.export, "reply");
    }

    #[test]
    fn parse_export_only_and_file_only() {
        let export_only = CodeLocator::parse("#json", Path::new("/pkg")).unwrap();
        assert!(export_only.file.is_none());
        assert_eq!(export_only.export, "json");

        let file_only = CodeLocator::parse("index.html", Path::new("/pkg")).unwrap();
        assert_eq!(file_only.export, DEFAULT_EXPORT);
    }

    #[test]
    fn rejects_escaping_paths() {
        assert!(CodeLocator::parse("../other/x#y", Path::new("/pkg")).is_err());
        assert!(CodeLocator::parse("/etc/passwd#y", Path::new("/pkg")).is_err());
        assert!(CodeLocator::parse("  ", Path::new("/pkg")).is_err());
    }

    #[test]
    fn table_resolves_registered_exports() {
        let table = ExportTable::new().with("answer", 42_u32);
        let locator = CodeLocator::parse("#answer", Path::new("/pkg")).unwrap();
        let export = table.resolve(&locator).unwrap();
        assert_eq!(export.downcast_ref::<u32>(), Some(&42));

        let missing = CodeLocator::parse("#nope", Path::new("/pkg")).unwrap();
        assert!(table.resolve(&missing).unwrap_err().contains("unknown export"));
    }

    #[test]
    fn table_requires_referenced_file() {
        let dir = tempfile::tempdir().unwrap();
        let table = ExportTable::new().with("default", ());

        let locator = CodeLocator::parse("missing.txt", dir.path()).unwrap();
        assert!(table.resolve(&locator).unwrap_err().contains("not found"));

        std::fs::write(dir.path().join("present.txt"), "x").unwrap();
        let locator = CodeLocator::parse("present.txt", dir.path()).unwrap();
        assert!(table.resolve(&locator).is_ok());
    }
}
