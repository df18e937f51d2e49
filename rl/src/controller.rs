//! Repair loop controller
//!
//! Drives one target through at most [`MAX_ATTEMPTS`] attempts of
//! assemble → generate → apply → verify. The current step is a single
//! [`LoopState`] value; each transition consumes it and returns the next one.
//!
//! Oracle, apply and verification failures all consume an attempt and feed a
//! diagnostic into the next one. Only a configuration error (an unreadable
//! target path) or an interrupt ends the run early.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::apply::apply_patch;
use crate::cancel::Cancellation;
use crate::config::ConfigError;
use crate::context::{PromptContext, assemble};
use crate::domain::{Attempt, AttemptOutcome, MAX_ATTEMPTS, ProposedPatch, RunResult, Target, VerificationReport};
use crate::journal::Journal;
use crate::oracle::{Oracle, OracleError, check_files};
use crate::verify::{Verifier, VerifyError};

/// Default budget for one oracle call
pub const DEFAULT_ORACLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Errors that end a run without a [`RunResult`]
#[derive(Debug, Error)]
pub enum RepairError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("run interrupted")]
    Interrupted,
}

/// Controller position between transitions
#[derive(Debug)]
enum LoopState {
    Assemble,
    Generate { context: PromptContext },
    Apply { context: PromptContext, patch: ProposedPatch },
    Verify { context: PromptContext, patch: ProposedPatch },
    Decide { attempt: Attempt },
    Done(RunResult),
}

impl LoopState {
    fn name(&self) -> &'static str {
        match self {
            Self::Assemble => "assemble",
            Self::Generate { .. } => "generate",
            Self::Apply { .. } => "apply",
            Self::Verify { .. } => "verify",
            Self::Decide { .. } => "decide",
            Self::Done(_) => "done",
        }
    }
}

type AttemptHook = Box<dyn Fn(&Attempt) + Send + Sync>;

/// The bounded repair loop for one target
pub struct RepairLoop {
    target: Target,
    oracle: Arc<dyn Oracle>,
    verifier: Arc<dyn Verifier>,
    oracle_timeout: Duration,
    max_attempts: u32,
    journal: Option<Journal>,
    cancel: Cancellation,
    on_attempt: Option<AttemptHook>,
    history: Vec<Attempt>,
}

impl RepairLoop {
    pub fn new(target: Target, oracle: Arc<dyn Oracle>, verifier: Arc<dyn Verifier>) -> Self {
        debug!(target = %target.name, "RepairLoop::new: called");
        Self {
            target,
            oracle,
            verifier,
            oracle_timeout: DEFAULT_ORACLE_TIMEOUT,
            max_attempts: MAX_ATTEMPTS,
            journal: None,
            cancel: Cancellation::new(),
            on_attempt: None,
            history: Vec::new(),
        }
    }

    pub fn with_oracle_timeout(mut self, timeout: Duration) -> Self {
        debug!(timeout_ms = timeout.as_millis() as u64, "RepairLoop::with_oracle_timeout: called");
        self.oracle_timeout = timeout;
        self
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        debug!(path = %journal.path().display(), "RepairLoop::with_journal: called");
        self.journal = Some(journal);
        self
    }

    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    /// Called with every completed attempt, before the retry decision
    pub fn with_attempt_hook(mut self, hook: impl Fn(&Attempt) + Send + Sync + 'static) -> Self {
        self.on_attempt = Some(Box::new(hook));
        self
    }

    /// Attempts completed by the last [`run`](Self::run), in order
    pub fn attempts(&self) -> &[Attempt] {
        &self.history
    }

    /// Run the loop to a final result
    pub async fn run(&mut self) -> Result<RunResult, RepairError> {
        info!(
            "Starting repair loop for '{}' (max attempts: {})",
            self.target.name, self.max_attempts
        );
        self.history.clear();

        let mut state = LoopState::Assemble;
        loop {
            debug!(state = state.name(), attempts = self.history.len(), "run: transition");
            state = match state {
                LoopState::Assemble => self.step_assemble()?,
                LoopState::Generate { context } => self.step_generate(context).await?,
                LoopState::Apply { context, patch } => self.step_apply(context, patch),
                LoopState::Verify { context, patch } => self.step_verify(context, patch).await?,
                LoopState::Decide { attempt } => self.step_decide(attempt),
                LoopState::Done(result) => {
                    if let Some(journal) = &self.journal {
                        journal.record_finish(&result, self.history.len() as u32);
                    }
                    info!(
                        success = result.is_success(),
                        attempts = self.history.len(),
                        "Repair loop finished"
                    );
                    return Ok(result);
                }
            };
        }
    }

    fn step_assemble(&self) -> Result<LoopState, RepairError> {
        if self.cancel.is_cancelled() {
            return Err(self.interrupted("assemble"));
        }
        let context = assemble(&self.target, &self.history, self.max_attempts)?;
        info!(
            "Attempt {}/{} for '{}'",
            context.attempt, self.max_attempts, self.target.name
        );
        Ok(LoopState::Generate { context })
    }

    async fn step_generate(&self, context: PromptContext) -> Result<LoopState, RepairError> {
        debug!(attempt = context.attempt, "step_generate: called");
        let call = tokio::time::timeout(self.oracle_timeout, self.oracle.propose(&context));
        let result = tokio::select! {
            result = call => result,
            _ = self.cancel.cancelled() => return Err(self.interrupted("generate")),
        };

        let checked = match result {
            Err(_) => Err(OracleError::Timeout(self.oracle_timeout)),
            Ok(Err(e)) => Err(e),
            Ok(Ok(patch)) => check_files(&patch, &self.target.artifacts()).map(|()| patch),
        };

        Ok(match checked {
            Ok(patch) => {
                debug!(files = patch.len(), "step_generate: patch accepted");
                LoopState::Apply { context, patch }
            }
            Err(e) => {
                warn!(attempt = context.attempt, error = %e, "Oracle call failed");
                LoopState::Decide {
                    attempt: Attempt {
                        ordinal: context.attempt,
                        context,
                        patch: None,
                        outcome: AttemptOutcome::OracleFailed { message: e.to_string() },
                    },
                }
            }
        })
    }

    fn step_apply(&self, context: PromptContext, patch: ProposedPatch) -> LoopState {
        debug!(attempt = context.attempt, "step_apply: called");
        if let Some(previous) = self.history.last().and_then(|a| a.patch.as_ref())
            && previous.same_files_as(&patch)
        {
            warn!(
                attempt = context.attempt,
                "Oracle proposed the same files as the previous attempt"
            );
        }

        match apply_patch(&self.target.root, &patch) {
            Ok(applied) => {
                for file in &applied {
                    debug!(path = %file.path.display(), bytes = file.bytes, "step_apply: wrote");
                }
                LoopState::Verify { context, patch }
            }
            Err(e) => {
                warn!(attempt = context.attempt, error = %e, "Patch application failed");
                LoopState::Decide {
                    attempt: Attempt {
                        ordinal: context.attempt,
                        context,
                        patch: Some(patch),
                        outcome: AttemptOutcome::ApplyFailed { message: e.to_string() },
                    },
                }
            }
        }
    }

    async fn step_verify(&self, context: PromptContext, patch: ProposedPatch) -> Result<LoopState, RepairError> {
        debug!(attempt = context.attempt, "step_verify: called");
        let report = match self.verifier.verify(&self.target, &self.cancel).await {
            Ok(report) => report,
            Err(VerifyError::Interrupted) => return Err(self.interrupted("verify")),
            Err(e) => {
                warn!(error = %e, "Verifier could not run");
                VerificationReport::from_exit(-1, e.to_string(), 0)
            }
        };

        let outcome = if report.passed {
            AttemptOutcome::Passed(report)
        } else {
            AttemptOutcome::VerificationFailed(report)
        };
        Ok(LoopState::Decide {
            attempt: Attempt {
                ordinal: context.attempt,
                context,
                patch: Some(patch),
                outcome,
            },
        })
    }

    fn step_decide(&mut self, attempt: Attempt) -> LoopState {
        debug!(ordinal = attempt.ordinal, outcome = attempt.outcome.label(), "step_decide: called");
        info!("Attempt {} {}", attempt.ordinal, attempt.outcome.label());
        if let Some(journal) = &self.journal {
            journal.record_attempt(&attempt);
        }
        if let Some(hook) = &self.on_attempt {
            hook(&attempt);
        }

        let ordinal = attempt.ordinal;
        let diagnostic = attempt.diagnostic();
        self.history.push(attempt);

        match diagnostic {
            None => LoopState::Done(RunResult::Success { attempt: ordinal }),
            Some(last_diagnostic) if self.history.len() as u32 >= self.max_attempts => {
                warn!(attempts = self.history.len(), "Attempt budget exhausted");
                LoopState::Done(RunResult::ExhaustedAttempts { last_diagnostic })
            }
            Some(_) => LoopState::Assemble,
        }
    }

    fn interrupted(&self, step: &str) -> RepairError {
        warn!(step, attempts = self.history.len(), "Repair loop interrupted");
        RepairError::Interrupted
    }
}
