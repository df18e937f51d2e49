use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use eyre::{Context, Result};
use tracing::{debug, info, warn};

use repairloop::cli::{Cli, Command};
use repairloop::config::Config;
use repairloop::controller::{RepairError, RepairLoop};
use repairloop::domain::{Attempt, AttemptOutcome, MAX_ATTEMPTS, RunResult, Target};
use repairloop::journal::Journal;
use repairloop::llm::create_client;
use repairloop::oracle::LlmOracle;
use repairloop::prompts::PromptLoader;
use repairloop::verify::{SubprocessVerifier, Verifier, VerifyError};
use repairloop::{Cancellation, assemble};

const EXIT_PASS: u8 = 0;
const EXIT_EXHAUSTED: u8 = 1;
const EXIT_CONFIG: u8 = 2;
const EXIT_INTERRUPTED: u8 = 130;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("repairloop")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Priority: CLI --log-level > config file > INFO
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("repairloop.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(EXIT_CONFIG)
        }
    }
}

/// Everything up to dispatch is setup; any error there is a configuration error
async fn run(cli: Cli) -> Result<u8> {
    // API keys may live in a .env next to the repository
    let dotenv = dotenvy::dotenv().ok();

    let config = Config::load(cli.config.as_ref(), &cli.root).context("Failed to load configuration")?;
    setup_logging(cli.log_level.as_deref(), config.log_level.as_deref()).context("Failed to setup logging")?;
    if let Some(path) = dotenv {
        info!("Loaded environment from {}", path.display());
    }
    config.log_source();
    info!("repairloop loaded config: provider={} model={}", config.llm.provider, config.llm.model);

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Run { target } => cmd_run(&config, &cli.root, &target).await,
        Command::Prompt { target } => cmd_prompt(&config, &cli.root, &target),
        Command::Verify { target } => cmd_verify(&config, &cli.root, &target).await,
    }
}

/// Cancellation flipped by the first Ctrl-C
fn interrupt_on_ctrl_c() -> Cancellation {
    let cancel = Cancellation::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("SIGINT received");
                eprintln!("\nInterrupted, stopping...");
                trigger.cancel();
            }
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C"),
        }
    });
    cancel
}

/// Run the repair loop for a target
async fn cmd_run(config: &Config, root: &Path, name: &str) -> Result<u8> {
    debug!(%name, ?root, "cmd_run: called");
    let target = Target::resolve(name, root, &config.layout)?;

    // Surface a missing key as a configuration error before anything else
    config.llm.api_key()?;
    let llm = create_client(&config.llm).context("Failed to create LLM client")?;
    let prompts = PromptLoader::new(config.oracle.prompts_dir.as_deref()).context("Failed to load prompts")?;
    let oracle = Arc::new(LlmOracle::new(llm, prompts, config.llm.max_tokens));
    let verifier = Arc::new(SubprocessVerifier::from_config(&config.verify));

    let mut repair = RepairLoop::new(target.clone(), oracle, verifier)
        .with_oracle_timeout(Duration::from_millis(config.oracle.timeout_ms))
        .with_cancellation(interrupt_on_ctrl_c())
        .with_attempt_hook(print_attempt);
    if config.journal.enabled {
        let journal = Journal::new(&target.abs(&config.journal.dir), &target.name);
        println!("Run {} (journal: {})", journal.run_id(), journal.path().display());
        repair = repair.with_journal(journal);
    }

    println!(
        "Repairing '{}': {} + {} (up to {} attempts)",
        target.name,
        target.module.display(),
        target.test.display(),
        MAX_ATTEMPTS
    );

    match repair.run().await {
        Ok(RunResult::Success { attempt }) => {
            println!("\nPassed on attempt {}/{}", attempt, MAX_ATTEMPTS);
            Ok(EXIT_PASS)
        }
        Ok(RunResult::ExhaustedAttempts { last_diagnostic }) => {
            eprintln!(
                "\nFailed after {} attempts. Last diagnostic ({} stage, attempt {}):\n",
                repair.attempts().len(),
                last_diagnostic.kind,
                last_diagnostic.attempt
            );
            eprintln!("{}", last_diagnostic.text);
            Ok(EXIT_EXHAUSTED)
        }
        Err(RepairError::Configuration(e)) => {
            eprintln!("Error: {}", e);
            Ok(EXIT_CONFIG)
        }
        Err(RepairError::Interrupted) => {
            eprintln!("Interrupted after {} completed attempt(s)", repair.attempts().len());
            Ok(EXIT_INTERRUPTED)
        }
    }
}

fn print_attempt(attempt: &Attempt) {
    let status = match &attempt.outcome {
        AttemptOutcome::Passed(r) => format!("passed in {}ms", r.duration_ms),
        AttemptOutcome::OracleFailed { message } => format!("oracle failed: {}", message),
        AttemptOutcome::ApplyFailed { message } => format!("apply failed: {}", message),
        AttemptOutcome::VerificationFailed(r) if r.timed_out => "verifier timed out".to_string(),
        AttemptOutcome::VerificationFailed(r) => format!("verification failed (exit {})", r.exit_code),
    };
    println!("[attempt {}/{}] {}", attempt.ordinal, MAX_ATTEMPTS, status);
    if let Some(notes) = attempt.patch.as_ref().and_then(|p| p.notes.as_deref()) {
        println!("  notes: {}", notes);
    }
}

/// Print the first-attempt prompt
fn cmd_prompt(config: &Config, root: &Path, name: &str) -> Result<u8> {
    debug!(%name, ?root, "cmd_prompt: called");
    let target = Target::resolve(name, root, &config.layout)?;
    let context = assemble(&target, &[], MAX_ATTEMPTS)?;
    let prompts = PromptLoader::new(config.oracle.prompts_dir.as_deref()).context("Failed to load prompts")?;
    let rendered = prompts.render(&context)?;

    println!("=== system ===\n{}\n", rendered.system);
    println!("=== user ===\n{}", rendered.user);
    Ok(EXIT_PASS)
}

/// Run the verifier once against whatever is on disk
async fn cmd_verify(config: &Config, root: &Path, name: &str) -> Result<u8> {
    debug!(%name, ?root, "cmd_verify: called");
    let target = Target::resolve(name, root, &config.layout)?;
    let verifier = SubprocessVerifier::from_config(&config.verify);

    match verifier.verify(&target, &interrupt_on_ctrl_c()).await {
        Ok(report) => {
            print!("{}", report.output);
            if report.passed {
                println!("\nVerification passed ({}ms)", report.duration_ms);
                Ok(EXIT_PASS)
            } else {
                eprintln!(
                    "\nVerification failed (exit {}{})",
                    report.exit_code,
                    if report.timed_out { ", timed out" } else { "" }
                );
                Ok(EXIT_EXHAUSTED)
            }
        }
        Err(VerifyError::Interrupted) => Ok(EXIT_INTERRUPTED),
        Err(e @ (VerifyError::Spawn { .. } | VerifyError::Wait(_))) => {
            eprintln!("Error: {}", e);
            Ok(EXIT_EXHAUSTED)
        }
    }
}
