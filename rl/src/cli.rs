//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// repairloop - bounded generate/apply/verify loop for LLM-written artifacts
#[derive(Debug, Parser)]
#[command(
    name = "rl",
    about = "Generate, apply and verify target artifacts with a bounded repair loop",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Repository root the layout paths are relative to
    #[arg(short, long, global = true, default_value = ".", help = "Repository root")]
    pub root: PathBuf,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the repair loop for a target
    Run {
        /// Target name (letters, digits, '-' and '_')
        target: String,
    },

    /// Print the first-attempt prompt for a target without calling the oracle
    Prompt {
        /// Target name
        target: String,
    },

    /// Run only the verifier against the current artifacts
    Verify {
        /// Target name
        target: String,
    },
}
