//! End-to-end runs of the repair loop with the real subprocess verifier

use std::collections::VecDeque;
use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use repairloop::config::LayoutConfig;
use repairloop::{
    DiagnosticKind, Journal, MAX_ATTEMPTS, Oracle, OracleError, PromptContext, ProposedPatch, RepairLoop, RunResult,
    SubprocessVerifier, Target,
};
use tempfile::TempDir;

const MODULE: &str = "custom_parsers/icici_parser.py";
const TEST: &str = "tests/test_icici.py";

/// Checks the module for the right version, pytest-style output on failure
const HARNESS: &str = "grep -q 'VERSION = 2' \"$REPAIRLOOP_MODULE\" && echo '1 passed' \
    || { echo 'F'; echo 'E   AssertionError: row 3 mismatch' >&2; exit 1; }";

struct ScriptedOracle {
    answers: Mutex<VecDeque<Result<ProposedPatch, OracleError>>>,
    contexts: Mutex<Vec<PromptContext>>,
}

impl ScriptedOracle {
    fn new(answers: Vec<Result<ProposedPatch, OracleError>>) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(answers.into()),
            contexts: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn propose(&self, context: &PromptContext) -> Result<ProposedPatch, OracleError> {
        self.contexts.lock().unwrap().push(context.clone());
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(OracleError::Empty))
    }
}

fn repo() -> (TempDir, Target) {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let target = Target::resolve("icici", temp.path(), &LayoutConfig::default()).unwrap();
    fs::create_dir_all(temp.path().join("data/icici")).unwrap();
    fs::write(target.abs(&target.input), b"%PDF-1.4 statement").unwrap();
    fs::write(
        target.abs(&target.expected),
        "Date,Description,Debit Amt,Credit Amt,Balance\n01-08-2024,Salary,,1935.3,6864.58\n",
    )
    .unwrap();
    (temp, target)
}

fn version(n: u32) -> ProposedPatch {
    ProposedPatch::new()
        .with_file(MODULE, format!("VERSION = {}\n", n))
        .with_file(TEST, "from custom_parsers.icici_parser import VERSION\n")
        .with_notes(format!("version {}", n))
}

#[tokio::test]
async fn test_repairs_after_verification_failure() {
    let (temp, target) = repo();
    let oracle = ScriptedOracle::new(vec![Ok(version(1)), Ok(version(2))]);
    let verifier = Arc::new(SubprocessVerifier::new(HARNESS, Duration::from_secs(30)));
    let journal = Journal::new(&temp.path().join(".repairloop/runs"), "icici");
    let journal_path = journal.path().to_path_buf();

    let mut repair = RepairLoop::new(target.clone(), oracle.clone(), verifier).with_journal(journal);
    let result = repair.run().await.unwrap();

    assert_eq!(result, RunResult::Success { attempt: 2 });
    assert_eq!(fs::read_to_string(target.abs(&target.module)).unwrap(), "VERSION = 2\n");

    let contexts = oracle.contexts.lock().unwrap();
    assert_eq!(contexts.len(), 2);
    let diagnostic = contexts[1].diagnostic.as_ref().unwrap();
    assert_eq!(diagnostic.kind, DiagnosticKind::Verification);
    assert_eq!(diagnostic.exit_code, Some(1));
    assert_eq!(diagnostic.text, "F\nE   AssertionError: row 3 mismatch\n");
    assert_eq!(contexts[1].existing[0].content, "VERSION = 1\n");
    assert!(contexts[1].present_files.contains(&MODULE.to_string()));

    let journal = fs::read_to_string(journal_path).unwrap();
    let lines: Vec<serde_json::Value> = journal.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0]["outcome"], "verification_failed");
    assert_eq!(lines[1]["outcome"], "passed");
    assert_eq!(lines[1]["notes"], "version 2");
    assert_eq!(lines[2]["event"], "run-finished");
    assert_eq!(lines[2]["success"], true);
}

#[tokio::test]
async fn test_exhausts_with_last_report_verbatim() {
    let (_temp, target) = repo();
    let oracle = ScriptedOracle::new(vec![Ok(version(1)), Ok(version(1)), Ok(version(3))]);
    let verifier = Arc::new(SubprocessVerifier::new(HARNESS, Duration::from_secs(30)));

    let mut repair = RepairLoop::new(target, oracle.clone(), verifier);
    let result = repair.run().await.unwrap();

    assert_eq!(repair.attempts().len(), MAX_ATTEMPTS as usize);
    match result {
        RunResult::ExhaustedAttempts { last_diagnostic } => {
            assert_eq!(last_diagnostic.attempt, 3);
            assert_eq!(last_diagnostic.text, "F\nE   AssertionError: row 3 mismatch\n");
        }
        other => panic!("expected exhaustion, got {:?}", other),
    }
}

#[tokio::test]
async fn test_hung_harness_is_killed_each_attempt() {
    let (_temp, target) = repo();
    let oracle = ScriptedOracle::new(vec![Ok(version(1)), Ok(version(2)), Ok(version(3))]);
    let verifier = Arc::new(SubprocessVerifier::new("sleep 30", Duration::from_millis(200)));

    let start = std::time::Instant::now();
    let mut repair = RepairLoop::new(target, oracle, verifier);
    let result = repair.run().await.unwrap();

    assert!(start.elapsed() < Duration::from_secs(20));
    assert!(!result.is_success());
    for attempt in repair.attempts() {
        let report = attempt.outcome.report().unwrap();
        assert!(report.timed_out);
        assert!(report.output.contains("timed out after 200ms"));
    }
}

#[tokio::test]
async fn test_oracle_failures_share_the_budget() {
    let (_temp, target) = repo();
    let oracle = ScriptedOracle::new(vec![
        Err(OracleError::Malformed("expected value at line 1".to_string())),
        Ok(version(1)),
        Err(OracleError::Empty),
    ]);
    let verifier = Arc::new(SubprocessVerifier::new(HARNESS, Duration::from_secs(30)));

    let mut repair = RepairLoop::new(target, oracle.clone(), verifier);
    let result = repair.run().await.unwrap();

    let labels: Vec<_> = repair.attempts().iter().map(|a| a.outcome.label()).collect();
    assert_eq!(labels, vec!["oracle_failed", "verification_failed", "oracle_failed"]);
    match result {
        RunResult::ExhaustedAttempts { last_diagnostic } => {
            assert_eq!(last_diagnostic.kind, DiagnosticKind::Oracle);
            assert_eq!(last_diagnostic.text, "oracle call failed: empty response");
        }
        other => panic!("expected exhaustion, got {:?}", other),
    }

    let contexts = oracle.contexts.lock().unwrap();
    assert!(
        contexts[1]
            .diagnostic
            .as_ref()
            .unwrap()
            .text
            .contains("malformed response: expected value at line 1")
    );
}
