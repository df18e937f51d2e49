//! VerificationReport domain type

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Outcome of one verifier run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// Exit code 0 and no timeout
    pub passed: bool,

    /// Process exit code (-1 when killed by a signal or the timeout)
    pub exit_code: i32,

    /// Combined stdout then stderr, never truncated
    pub output: String,

    /// The harness exceeded its time budget and was killed
    pub timed_out: bool,

    /// Wall-clock run time
    pub duration_ms: u64,
}

impl VerificationReport {
    /// Build a report from a finished process
    pub fn from_exit(exit_code: i32, output: String, duration_ms: u64) -> Self {
        let passed = exit_code == 0;
        debug!(exit_code, passed, duration_ms, "VerificationReport::from_exit: called");
        Self {
            passed,
            exit_code,
            output,
            timed_out: false,
            duration_ms,
        }
    }

    /// Build a report for a harness killed at its deadline
    pub fn timed_out(output: String, duration_ms: u64) -> Self {
        debug!(duration_ms, "VerificationReport::timed_out: called");
        Self {
            passed: false,
            exit_code: -1,
            output,
            timed_out: true,
            duration_ms,
        }
    }
}
