//! repairloop - bounded generate/apply/verify repair loop
//!
//! An [`Oracle`] proposes full contents for a target's module and test, the
//! patch is written to disk, and a subprocess [`Verifier`] judges it. Failed
//! attempts feed their diagnostic into the next prompt until the harness
//! passes or [`MAX_ATTEMPTS`] is spent.

pub mod apply;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod context;
pub mod controller;
pub mod domain;
pub mod journal;
pub mod llm;
pub mod oracle;
pub mod prompts;
pub mod verify;

pub use apply::{AppliedFile, ApplyError, apply_patch};
pub use cancel::Cancellation;
pub use config::{Config, ConfigError};
pub use context::{PromptContext, assemble};
pub use controller::{RepairError, RepairLoop};
pub use domain::{
    Attempt, AttemptOutcome, Diagnostic, DiagnosticKind, MAX_ATTEMPTS, ProposedPatch, RunResult, Target,
    VerificationReport,
};
pub use journal::Journal;
pub use oracle::{LlmOracle, Oracle, OracleError};
pub use verify::{SubprocessVerifier, Verifier, VerifyError};
