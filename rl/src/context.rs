//! Context assembly
//!
//! Reads everything a prompt needs for the next attempt: the target's data
//! files, whatever generated artifacts are on disk, a snapshot of the
//! repository tree and the previous attempt's diagnostic. Nothing here writes.

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::Serialize;
use tracing::debug;
use walkdir::WalkDir;

use crate::config::ConfigError;
use crate::domain::{Attempt, Diagnostic, Target};

/// Directories never listed in the repository snapshot
const SKIPPED_DIRS: &[&str] = &[
    ".git",
    ".repairloop",
    ".venv",
    "venv",
    "__pycache__",
    "node_modules",
    "target",
];

/// Upper bound on snapshot entries
const MAX_SNAPSHOT_FILES: usize = 500;

/// Lines of the expected output shown to the oracle
const EXPECTED_PREVIEW_LINES: usize = 20;

/// A generated artifact as it currently exists on disk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExistingFile {
    pub path: String,
    pub content: String,
}

/// Everything the prompt templates can reference for one attempt
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PromptContext {
    /// Target name
    pub target: String,

    /// Ordinal of the attempt this context is for
    pub attempt: u32,

    pub max_attempts: u32,

    /// Source input path (root-relative) and size
    pub input_path: String,
    pub input_bytes: u64,

    /// Expected output path (root-relative), size and leading lines
    pub expected_path: String,
    pub expected_bytes: u64,
    pub expected_preview: String,

    /// Paths the oracle must produce
    pub module_path: String,
    pub test_path: String,

    /// Sorted root-relative file list
    pub present_files: Vec<String>,

    /// Files left out of `present_files` by the size cap
    pub omitted_files: usize,

    /// Generated artifacts currently on disk, module first
    pub existing: Vec<ExistingFile>,

    /// Diagnostic from the previous attempt; absent on attempt 1
    pub diagnostic: Option<Diagnostic>,
}

impl PromptContext {
    pub fn is_retry(&self) -> bool {
        self.diagnostic.is_some()
    }
}

/// Build the context for the attempt following `history`
///
/// Fails only when a target path cannot be read; that is never retried.
pub fn assemble(target: &Target, history: &[Attempt], max_attempts: u32) -> Result<PromptContext, ConfigError> {
    let attempt = history.len() as u32 + 1;
    debug!(target = %target.name, attempt, "assemble: called");

    let input_bytes = require_file(target, &target.input, "source input")?;
    let expected_bytes = require_file(target, &target.expected, "expected output")?;
    let expected_preview = preview(target, &target.expected)?;

    let mut existing = Vec::new();
    for rel in target.artifacts() {
        if let Some(content) = read_artifact(target, rel)? {
            debug!(path = %rel.display(), len = content.len(), "assemble: found existing artifact");
            existing.push(ExistingFile {
                path: display(rel),
                content,
            });
        }
    }

    let (present_files, omitted_files) = snapshot(&target.root);

    let diagnostic = history.last().and_then(Attempt::diagnostic);
    debug!(attempt, has_diagnostic = diagnostic.is_some(), "assemble: done");

    Ok(PromptContext {
        target: target.name.clone(),
        attempt,
        max_attempts,
        input_path: display(&target.input),
        input_bytes,
        expected_path: display(&target.expected),
        expected_bytes,
        expected_preview,
        module_path: display(&target.module),
        test_path: display(&target.test),
        present_files,
        omitted_files,
        existing,
        diagnostic,
    })
}

fn display(rel: &Path) -> String {
    rel.to_string_lossy().into_owned()
}

fn unreadable(role: &'static str, path: &Path, message: impl Into<String>) -> ConfigError {
    ConfigError::Unreadable {
        role,
        path: path.to_path_buf(),
        message: message.into(),
    }
}

/// A data file must exist, be a regular file and be openable
fn require_file(target: &Target, rel: &Path, role: &'static str) -> Result<u64, ConfigError> {
    let path = target.abs(rel);
    let meta = fs::metadata(&path).map_err(|e| unreadable(role, &path, e.to_string()))?;
    if !meta.is_file() {
        return Err(unreadable(role, &path, "not a regular file"));
    }
    fs::File::open(&path).map_err(|e| unreadable(role, &path, e.to_string()))?;
    Ok(meta.len())
}

fn preview(target: &Target, rel: &Path) -> Result<String, ConfigError> {
    let path = target.abs(rel);
    let file = fs::File::open(&path).map_err(|e| unreadable("expected output", &path, e.to_string()))?;
    let mut out = String::new();
    for line in BufReader::new(file).split(b'\n').take(EXPECTED_PREVIEW_LINES) {
        let line = line.map_err(|e| unreadable("expected output", &path, e.to_string()))?;
        out.push_str(String::from_utf8_lossy(&line).trim_end_matches('\r'));
        out.push('\n');
    }
    Ok(out)
}

/// Missing artifacts are normal; present-but-unreadable ones are not
fn read_artifact(target: &Target, rel: &Path) -> Result<Option<String>, ConfigError> {
    let path = target.abs(rel);
    match fs::symlink_metadata(&path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(unreadable("generated artifact", &path, e.to_string())),
        Ok(_) => {}
    }
    let meta = fs::metadata(&path).map_err(|e| unreadable("generated artifact", &path, e.to_string()))?;
    if !meta.is_file() {
        return Err(unreadable("generated artifact", &path, "not a regular file"));
    }
    let bytes = fs::read(&path).map_err(|e| unreadable("generated artifact", &path, e.to_string()))?;
    Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
}

/// Sorted list of repository files, skipping tool and VCS directories
fn snapshot(root: &Path) -> (Vec<String>, usize) {
    debug!(?root, "snapshot: called");
    let mut files: Vec<String> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !e
                    .file_name()
                    .to_str()
                    .is_some_and(|name| SKIPPED_DIRS.contains(&name))
        })
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            e.path()
                .strip_prefix(root)
                .ok()
                .map(|p| p.to_string_lossy().into_owned())
        })
        .collect();
    files.sort();

    let omitted = files.len().saturating_sub(MAX_SNAPSHOT_FILES);
    files.truncate(MAX_SNAPSHOT_FILES);
    debug!(count = files.len(), omitted, "snapshot: done");
    (files, omitted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LayoutConfig;
    use crate::domain::{AttemptOutcome, DiagnosticKind, VerificationReport};
    use tempfile::TempDir;

    fn setup() -> (TempDir, Target) {
        let temp = TempDir::new().unwrap();
        let target = Target::resolve("icici", temp.path(), &LayoutConfig::default()).unwrap();
        fs::create_dir_all(temp.path().join("data/icici")).unwrap();
        fs::write(temp.path().join("data/icici/icici sample.pdf"), b"%PDF-1.4 fake").unwrap();
        fs::write(
            temp.path().join("data/icici/result.csv"),
            "Date,Description,Debit Amt,Credit Amt,Balance\r\n01-08-2024,Salary,,1935.3,6864.58\r\n",
        )
        .unwrap();
        (temp, target)
    }

    fn failed(ordinal: u32, output: &str) -> Attempt {
        Attempt {
            ordinal,
            context: PromptContext::default(),
            patch: None,
            outcome: AttemptOutcome::VerificationFailed(VerificationReport::from_exit(1, output.to_string(), 3)),
        }
    }

    #[test]
    fn test_first_attempt_has_no_diagnostic_or_artifacts() {
        let (_temp, target) = setup();

        let ctx = assemble(&target, &[], 3).unwrap();

        assert_eq!(ctx.attempt, 1);
        assert_eq!(ctx.max_attempts, 3);
        assert!(!ctx.is_retry());
        assert!(ctx.existing.is_empty());
        assert_eq!(ctx.input_bytes, 13);
        assert_eq!(ctx.module_path, "custom_parsers/icici_parser.py");
        assert!(ctx.expected_preview.starts_with("Date,Description"));
        assert!(!ctx.expected_preview.contains('\r'));
        assert!(ctx.present_files.contains(&"data/icici/result.csv".to_string()));
    }

    #[test]
    fn test_retry_carries_last_diagnostic_and_artifacts() {
        let (temp, target) = setup();
        fs::create_dir_all(temp.path().join("custom_parsers")).unwrap();
        fs::write(temp.path().join("custom_parsers/icici_parser.py"), "def parse(p): pass\n").unwrap();

        let history = vec![failed(1, "first failure"), failed(2, "AssertionError: row 3 mismatch")];
        let ctx = assemble(&target, &history, 3).unwrap();

        assert_eq!(ctx.attempt, 3);
        let diag = ctx.diagnostic.unwrap();
        assert_eq!(diag.kind, DiagnosticKind::Verification);
        assert_eq!(diag.attempt, 2);
        assert_eq!(diag.text, "AssertionError: row 3 mismatch");
        assert_eq!(ctx.existing.len(), 1);
        assert_eq!(ctx.existing[0].path, "custom_parsers/icici_parser.py");
        assert_eq!(ctx.existing[0].content, "def parse(p): pass\n");
    }

    #[test]
    fn test_missing_input_is_configuration_error() {
        let (temp, target) = setup();
        fs::remove_file(temp.path().join("data/icici/icici sample.pdf")).unwrap();

        let err = assemble(&target, &[], 3).unwrap_err();
        assert!(matches!(err, ConfigError::Unreadable { role: "source input", .. }));
    }

    #[test]
    fn test_artifact_that_is_a_directory_is_configuration_error() {
        let (temp, target) = setup();
        fs::create_dir_all(temp.path().join("tests/test_icici.py")).unwrap();

        let err = assemble(&target, &[], 3).unwrap_err();
        assert!(matches!(err, ConfigError::Unreadable { role: "generated artifact", .. }));
    }

    #[test]
    fn test_snapshot_skips_tool_directories() {
        let (temp, target) = setup();
        fs::create_dir_all(temp.path().join(".git/objects")).unwrap();
        fs::write(temp.path().join(".git/objects/abc"), "x").unwrap();
        fs::create_dir_all(temp.path().join("tests/__pycache__")).unwrap();
        fs::write(temp.path().join("tests/__pycache__/t.pyc"), "x").unwrap();

        let ctx = assemble(&target, &[], 3).unwrap();

        assert!(ctx.present_files.iter().all(|f| !f.starts_with(".git")));
        assert!(ctx.present_files.iter().all(|f| !f.contains("__pycache__")));
        assert_eq!(ctx.omitted_files, 0);
    }

    #[test]
    fn test_non_utf8_artifact_is_read_lossily() {
        let (temp, target) = setup();
        fs::create_dir_all(temp.path().join("tests")).unwrap();
        fs::write(temp.path().join("tests/test_icici.py"), [b'o', b'k', 0xff]).unwrap();

        let ctx = assemble(&target, &[], 3).unwrap();
        assert_eq!(ctx.existing.len(), 1);
        assert!(ctx.existing[0].content.starts_with("ok"));
    }
}
