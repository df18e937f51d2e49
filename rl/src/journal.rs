//! Run journal
//!
//! Appends one JSON line per completed attempt, plus a closing line per run,
//! to `<dir>/<target>.jsonl`. Journal trouble is logged and otherwise ignored;
//! it never changes the outcome of a run.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{Attempt, RunResult};

/// One line of the journal
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
enum Record<'a> {
    Attempt {
        run_id: Uuid,
        target: &'a str,
        timestamp: DateTime<Utc>,
        ordinal: u32,
        outcome: &'static str,
        exit_code: Option<i32>,
        timed_out: bool,
        duration_ms: Option<u64>,
        files: Vec<String>,
        notes: Option<&'a str>,
        diagnostic: Option<String>,
    },
    RunFinished {
        run_id: Uuid,
        target: &'a str,
        timestamp: DateTime<Utc>,
        success: bool,
        attempts: u32,
    },
}

/// JSONL writer for a single run
#[derive(Debug)]
pub struct Journal {
    run_id: Uuid,
    target: String,
    path: PathBuf,
}

impl Journal {
    /// Start a journal for a new run of `target` under `dir`
    pub fn new(dir: &Path, target: &str) -> Self {
        let run_id = Uuid::now_v7();
        let path = dir.join(format!("{}.jsonl", target));
        debug!(%run_id, ?path, "Journal::new: called");
        Self {
            run_id,
            target: target.to_string(),
            path,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record_attempt(&self, attempt: &Attempt) {
        debug!(ordinal = attempt.ordinal, "Journal::record_attempt: called");
        let report = attempt.outcome.report();
        let record = Record::Attempt {
            run_id: self.run_id,
            target: &self.target,
            timestamp: Utc::now(),
            ordinal: attempt.ordinal,
            outcome: attempt.outcome.label(),
            exit_code: report.map(|r| r.exit_code),
            timed_out: report.is_some_and(|r| r.timed_out),
            duration_ms: report.map(|r| r.duration_ms),
            files: attempt
                .patch
                .as_ref()
                .map(|p| p.paths().map(|p| p.display().to_string()).collect())
                .unwrap_or_default(),
            notes: attempt.patch.as_ref().and_then(|p| p.notes.as_deref()),
            diagnostic: attempt.diagnostic().map(|d| d.text),
        };
        self.append(&record);
    }

    pub fn record_finish(&self, result: &RunResult, attempts: u32) {
        debug!(attempts, success = result.is_success(), "Journal::record_finish: called");
        let record = Record::RunFinished {
            run_id: self.run_id,
            target: &self.target,
            timestamp: Utc::now(),
            success: result.is_success(),
            attempts,
        };
        self.append(&record);
    }

    fn append(&self, record: &Record<'_>) {
        if let Err(e) = self.try_append(record) {
            warn!(path = %self.path.display(), error = %e, "Failed to write run journal");
        }
    }

    fn try_append(&self, record: &Record<'_>) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(line.as_bytes())
    }
}
