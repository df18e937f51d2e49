//! ProposedPatch domain type

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Full-file replacements proposed by the oracle, keyed by root-relative path
///
/// There is no diff or merge form: every entry replaces the whole file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProposedPatch {
    files: BTreeMap<PathBuf, String>,

    /// Free-text rationale returned alongside the files
    pub notes: Option<String>,
}

impl ProposedPatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace one file
    pub fn with_file(mut self, path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        self.files.insert(path.into(), content.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Insert a file, returning the previous content if the path was already present
    pub fn insert(&mut self, path: impl Into<PathBuf>, content: impl Into<String>) -> Option<String> {
        self.files.insert(path.into(), content.into())
    }

    pub fn get(&self, path: &Path) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.files.keys().map(PathBuf::as_path)
    }

    pub fn files(&self) -> impl Iterator<Item = (&Path, &str)> {
        self.files.iter().map(|(p, c)| (p.as_path(), c.as_str()))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// True when both patches would leave identical files on disk (notes ignored)
    pub fn same_files_as(&self, other: &ProposedPatch) -> bool {
        self.files == other.files
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_files_ignores_notes() {
        let a = ProposedPatch::new().with_file("a.py", "x = 1\n").with_notes("first try");
        let b = ProposedPatch::new().with_file("a.py", "x = 1\n").with_notes("second try");
        let c = ProposedPatch::new().with_file("a.py", "x = 2\n");

        assert!(a.same_files_as(&b));
        assert!(!a.same_files_as(&c));
    }

    #[test]
    fn test_insert_reports_duplicates() {
        let mut patch = ProposedPatch::new();
        assert!(patch.insert("a.py", "1").is_none());
        assert_eq!(patch.insert("a.py", "2").as_deref(), Some("1"));
        assert_eq!(patch.get(Path::new("a.py")), Some("2"));
        assert_eq!(patch.len(), 1);
    }
}
