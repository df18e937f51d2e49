//! Patch application
//!
//! Writes a [`ProposedPatch`] to disk in two phases: every file is first
//! staged into a temp file next to its destination, and only when all of them
//! staged cleanly are they renamed into place. A failed stage leaves the
//! previous artifacts untouched. Renames are atomic per file only, so the
//! prior contents of every destination are captured before the first rename
//! and written back if a later rename fails.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::ProposedPatch;

/// Errors from applying a patch
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("refusing to write {}: {reason}", .path.display())]
    InvalidPath { path: PathBuf, reason: &'static str },

    #[error("failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One file written by [`apply_patch`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedFile {
    /// Root-relative path
    pub path: PathBuf,
    pub bytes: usize,
}

/// Write every file of `patch` under `root`, all-or-nothing at the staging step
pub fn apply_patch(root: &Path, patch: &ProposedPatch) -> Result<Vec<AppliedFile>, ApplyError> {
    debug!(?root, files = patch.len(), "apply_patch: called");
    let canonical_root = root.canonicalize().map_err(|e| ApplyError::Io {
        path: root.to_path_buf(),
        source: e,
    })?;

    let mut staged = Vec::with_capacity(patch.len());
    for (rel, content) in patch.files() {
        let temp = stage(&canonical_root, rel, content)?;
        staged.push((rel, temp, content.len()));
    }
    debug!(staged = staged.len(), "apply_patch: all files staged");

    let mut priors = Vec::with_capacity(staged.len());
    for (rel, _, _) in &staged {
        priors.push(Prior::capture(&canonical_root, rel)?);
    }

    let mut applied = Vec::with_capacity(staged.len());
    for (index, (rel, temp, bytes)) in staged.into_iter().enumerate() {
        let dest = canonical_root.join(rel);
        if let Err(e) = temp.persist(&dest) {
            warn!(path = %rel.display(), error = %e.error, "apply_patch: rename failed, restoring earlier files");
            restore(&priors[..index]);
            return Err(ApplyError::Io {
                path: rel.to_path_buf(),
                source: e.error,
            });
        }
        debug!(path = %rel.display(), bytes, "apply_patch: persisted");
        applied.push(AppliedFile {
            path: rel.to_path_buf(),
            bytes,
        });
    }

    info!("Applied {} file(s)", applied.len());
    Ok(applied)
}

/// What a destination held before the rename phase
#[derive(Debug)]
struct Prior {
    dest: PathBuf,
    content: Option<Vec<u8>>,
}

impl Prior {
    fn capture(root: &Path, rel: &Path) -> Result<Self, ApplyError> {
        let dest = root.join(rel);
        let content = match fs::read(&dest) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(source) => {
                return Err(ApplyError::Io {
                    path: rel.to_path_buf(),
                    source,
                });
            }
        };
        Ok(Self { dest, content })
    }
}

/// Put back files already renamed into place; best effort
fn restore(priors: &[Prior]) {
    for prior in priors {
        let result = match &prior.content {
            Some(bytes) => fs::write(&prior.dest, bytes),
            None => fs::remove_file(&prior.dest),
        };
        if let Err(e) = result {
            warn!(path = %prior.dest.display(), error = %e, "restore: failed");
        }
    }
}

/// Write `content` to a temp file in the destination's directory
fn stage(root: &Path, rel: &Path, content: &str) -> Result<NamedTempFile, ApplyError> {
    check_relative(rel)?;

    let dest = root.join(rel);
    let parent = dest.parent().ok_or(ApplyError::InvalidPath {
        path: rel.to_path_buf(),
        reason: "no parent directory",
    })?;
    let io_err = |source| ApplyError::Io {
        path: rel.to_path_buf(),
        source,
    };

    fs::create_dir_all(parent).map_err(io_err)?;

    // Symlinked directories could still lead outside the root
    let canonical_parent = parent.canonicalize().map_err(io_err)?;
    if !canonical_parent.starts_with(root) {
        return Err(ApplyError::InvalidPath {
            path: rel.to_path_buf(),
            reason: "resolves outside the repository root",
        });
    }
    if dest.is_dir() {
        return Err(ApplyError::InvalidPath {
            path: rel.to_path_buf(),
            reason: "destination is a directory",
        });
    }

    let mut temp = NamedTempFile::new_in(&canonical_parent).map_err(io_err)?;
    temp.write_all(content.as_bytes()).map_err(io_err)?;
    temp.as_file().sync_all().map_err(io_err)?;
    Ok(temp)
}

fn check_relative(rel: &Path) -> Result<(), ApplyError> {
    let invalid = |reason| ApplyError::InvalidPath {
        path: rel.to_path_buf(),
        reason,
    };
    if rel.as_os_str().is_empty() {
        return Err(invalid("empty path"));
    }
    for component in rel.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => return Err(invalid("contains '..'")),
            Component::RootDir | Component::Prefix(_) => return Err(invalid("absolute path")),
        }
    }
    Ok(())
}
