//! Domain types for repairloop
//!
//! Core domain types: Target, ProposedPatch, VerificationReport, Attempt, RunResult.
//! Everything here is plain data; the controller owns the only mutable copy.

mod attempt;
mod patch;
mod report;
mod target;

pub use attempt::{Attempt, AttemptOutcome, Diagnostic, DiagnosticKind, MAX_ATTEMPTS, RunResult};
pub use patch::ProposedPatch;
pub use report::VerificationReport;
pub use target::Target;
