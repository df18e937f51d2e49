//! repairloop configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Main repairloop configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// LLM provider configuration
    pub llm: LlmConfig,

    /// Oracle call configuration
    pub oracle: OracleConfig,

    /// Verification harness configuration
    pub verify: VerifyConfig,

    /// Path conventions for targets
    pub layout: LayoutConfig,

    /// Run journal configuration
    pub journal: JournalConfig,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// File this config was read from
    #[serde(skip)]
    pub source: Option<PathBuf>,

    /// Config files that existed but could not be loaded
    #[serde(skip)]
    pub warnings: Vec<String>,
}

impl Config {
    /// Load configuration with fallback chain
    ///
    /// Runs before logging is initialized, so fallbacks are recorded on the
    /// returned config and reported later by [`log_source`](Self::log_source).
    pub fn load(config_path: Option<&PathBuf>, root: &Path) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Project-local config next to the repository, then the user config
        let mut candidates = vec![root.join(".repairloop.yml")];
        if let Some(config_dir) = dirs::config_dir() {
            candidates.push(config_dir.join("repairloop").join("repairloop.yml"));
        }

        let mut warnings = Vec::new();
        for candidate in candidates {
            if !candidate.exists() {
                continue;
            }
            match Self::load_from_file(&candidate) {
                Ok(mut config) => {
                    config.warnings = warnings;
                    return Ok(config);
                }
                Err(e) => warnings.push(format!("Failed to load config from {}: {:#}", candidate.display(), e)),
            }
        }

        Ok(Self {
            warnings,
            ..Self::default()
        })
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let mut config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.source = Some(path.as_ref().to_path_buf());
        Ok(config)
    }

    /// Log where the config came from and any file that was skipped
    pub fn log_source(&self) {
        for warning in &self.warnings {
            tracing::warn!("{}", warning);
        }
        match &self.source {
            Some(path) => tracing::info!("Loaded config from: {}", path.display()),
            None => tracing::info!("No config file found, using defaults"),
        }
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name ("openai", "groq" - both speak the Chat Completions API)
    pub provider: String,

    /// Model identifier
    pub model: String,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// API base URL (without the `/v1/...` suffix)
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Maximum completion tokens per response
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,

    /// Sampling temperature
    pub temperature: f32,

    /// HTTP request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "groq".to_string(),
            model: "openai/gpt-oss-120b".to_string(),
            api_key_env: "GROQ_API_KEY".to_string(),
            base_url: "https://api.groq.com/openai".to_string(),
            max_tokens: 8192,
            temperature: 0.8,
            timeout_ms: 120_000,
        }
    }
}

impl LlmConfig {
    /// Read the API key from the configured environment variable
    pub fn api_key(&self) -> Result<String, ConfigError> {
        debug!(api_key_env = %self.api_key_env, "LlmConfig::api_key: called");
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(ConfigError::MissingApiKey {
                env: self.api_key_env.clone(),
            }),
        }
    }
}

/// Oracle call configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Upper bound for one `propose` call, including client-side retries
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Directory with `system.pmt` / `user.pmt` overrides
    #[serde(rename = "prompts-dir")]
    pub prompts_dir: Option<PathBuf>,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 300_000,
            prompts_dir: None,
        }
    }
}

/// Verification harness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    /// Shell command that runs the harness (executed with `sh -c` in the repo root)
    pub command: String,

    /// Execution timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            command: "python -m pytest -q --maxfail=1".to_string(),
            timeout_ms: 300_000,
        }
    }
}

/// Path conventions for a target, as Handlebars templates over `{{target}}`
///
/// All paths are relative to the repository root.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Source input data
    pub input: String,

    /// Expected output reference
    pub expected: String,

    /// Generated module
    pub module: String,

    /// Generated test
    pub test: String,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            input: "data/{{target}}/{{target}} sample.pdf".to_string(),
            expected: "data/{{target}}/result.csv".to_string(),
            module: "custom_parsers/{{target}}_parser.py".to_string(),
            test: "tests/test_{{target}}.py".to_string(),
        }
    }
}

/// Run journal configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    /// Write a JSONL record per attempt
    pub enabled: bool,

    /// Journal directory, relative to the repository root
    pub dir: PathBuf,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from(".repairloop/runs"),
        }
    }
}

/// Errors raised while turning configuration into runtime values
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("LLM API key not found. Set the {env} environment variable.")]
    MissingApiKey { env: String },

    #[error("Invalid target name '{0}': use letters, digits, '-' or '_'")]
    InvalidTargetName(String),

    #[error("Invalid layout template '{template}': {message}")]
    Layout { template: String, message: String },

    #[error("Unreadable {role} at {path}: {message}")]
    Unreadable {
        role: &'static str,
        path: PathBuf,
        message: String,
    },
}
