//! Oracle: the code-generation collaborator
//!
//! An [`Oracle`] maps a prompt context to a full-file [`ProposedPatch`]. The
//! controller treats it as a black box: it may be slow, non-deterministic or
//! wrong, and every failure simply costs one attempt.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::context::PromptContext;
use crate::domain::ProposedPatch;
use crate::llm::LlmError;

mod llm_oracle;
mod response;

pub use llm_oracle::LlmOracle;
pub use response::parse_answer;

/// Errors from one oracle call
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(#[from] LlmError),

    #[error("could not render prompt: {0}")]
    Prompt(String),

    #[error("empty response")]
    Empty,

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("response is missing required files: {}", join(.0))]
    MissingFiles(Vec<PathBuf>),

    #[error("response contains unexpected files: {}", join(.0))]
    UnexpectedFiles(Vec<PathBuf>),

    #[error("response lists {} more than once", .0.display())]
    DuplicateFile(PathBuf),
}

fn join(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Capability interface for anything that can propose a patch
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Propose full replacements for the target's artifacts
    async fn propose(&self, context: &PromptContext) -> Result<ProposedPatch, OracleError>;
}

/// Check that a patch names exactly the expected files
///
/// Runs on every patch regardless of which oracle produced it, so a partial
/// answer never reaches the patch applier.
pub fn check_files(patch: &ProposedPatch, expected: &[&Path]) -> Result<(), OracleError> {
    debug!(files = patch.len(), expected = expected.len(), "check_files: called");
    let missing: Vec<PathBuf> = expected
        .iter()
        .filter(|p| patch.get(p).is_none())
        .map(|p| p.to_path_buf())
        .collect();
    if !missing.is_empty() {
        debug!(?missing, "check_files: missing files");
        return Err(OracleError::MissingFiles(missing));
    }

    let extra: Vec<PathBuf> = patch
        .paths()
        .filter(|p| !expected.contains(p))
        .map(Path::to_path_buf)
        .collect();
    if !extra.is_empty() {
        debug!(?extra, "check_files: unexpected files");
        return Err(OracleError::UnexpectedFiles(extra));
    }

    Ok(())
}
