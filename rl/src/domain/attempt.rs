//! Attempt, Diagnostic and RunResult domain types

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ProposedPatch, VerificationReport};
use crate::context::PromptContext;

/// Fixed attempt budget for one run
pub const MAX_ATTEMPTS: u32 = 3;

/// Which stage produced a diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    Oracle,
    Apply,
    Verification,
}

impl std::fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Oracle => write!(f, "oracle"),
            Self::Apply => write!(f, "apply"),
            Self::Verification => write!(f, "verification"),
        }
    }
}

/// Textual evidence from a failed attempt, fed into the next prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,

    /// Ordinal of the attempt that produced it
    pub attempt: u32,

    /// Exit code, for verification diagnostics
    pub exit_code: Option<i32>,

    /// Full text; for verification this is the report output verbatim
    pub text: String,
}

/// How an attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Verification passed
    Passed(VerificationReport),
    /// Oracle call failed; nothing was applied or verified
    OracleFailed { message: String },
    /// Patch could not be written; nothing was verified
    ApplyFailed { message: String },
    /// Patch applied, verification failed
    VerificationFailed(VerificationReport),
}

impl AttemptOutcome {
    /// Short label used in logs and the journal
    pub fn label(&self) -> &'static str {
        match self {
            Self::Passed(_) => "passed",
            Self::OracleFailed { .. } => "oracle_failed",
            Self::ApplyFailed { .. } => "apply_failed",
            Self::VerificationFailed(_) => "verification_failed",
        }
    }

    pub fn report(&self) -> Option<&VerificationReport> {
        match self {
            Self::Passed(r) | Self::VerificationFailed(r) => Some(r),
            _ => None,
        }
    }
}

/// One completed iteration of assemble → generate → apply → verify
#[derive(Debug, Clone)]
pub struct Attempt {
    /// 1-based ordinal
    pub ordinal: u32,

    /// Context the prompt was built from
    pub context: PromptContext,

    /// Patch received from the oracle, if the call succeeded
    pub patch: Option<ProposedPatch>,

    pub outcome: AttemptOutcome,
}

impl Attempt {
    /// Diagnostic to carry into the next attempt; `None` for a pass
    pub fn diagnostic(&self) -> Option<Diagnostic> {
        debug!(ordinal = self.ordinal, outcome = self.outcome.label(), "Attempt::diagnostic: called");
        let (kind, exit_code, text) = match &self.outcome {
            AttemptOutcome::Passed(_) => return None,
            AttemptOutcome::OracleFailed { message } => {
                (DiagnosticKind::Oracle, None, format!("oracle call failed: {}", message))
            }
            AttemptOutcome::ApplyFailed { message } => {
                (DiagnosticKind::Apply, None, format!("patch application failed: {}", message))
            }
            AttemptOutcome::VerificationFailed(report) => {
                (DiagnosticKind::Verification, Some(report.exit_code), report.output.clone())
            }
        };
        Some(Diagnostic {
            kind,
            attempt: self.ordinal,
            exit_code,
            text,
        })
    }
}

/// Final status of a run, produced exactly once
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunResult {
    /// Verification passed on this attempt
    Success { attempt: u32 },
    /// The budget ran out; carries the last attempt's diagnostic in full
    ExhaustedAttempts { last_diagnostic: Diagnostic },
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}
