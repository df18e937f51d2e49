//! Prompt Loader
//!
//! Loads prompt templates from an override directory or falls back to the
//! embedded defaults, then renders them against a [`PromptContext`].

use std::path::{Path, PathBuf};

use eyre::{Result, eyre};
use handlebars::Handlebars;
use tracing::{debug, info};

use super::embedded;
use crate::context::PromptContext;

const TEMPLATES: [&str; 2] = ["system", "user"];

/// A rendered system/user prompt pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    pub system: String,
    pub user: String,
}

/// Loads and renders prompt templates
pub struct PromptLoader {
    /// Handlebars template engine with both templates registered
    hbs: Handlebars<'static>,
}

impl PromptLoader {
    /// Create a loader, reading `{name}.pmt` overrides from `override_dir` when present
    pub fn new(override_dir: Option<&Path>) -> Result<Self> {
        debug!(?override_dir, "PromptLoader::new: called");
        let mut hbs = Handlebars::new();
        hbs.register_escape_fn(handlebars::no_escape);

        for name in TEMPLATES {
            let source = load_template(name, override_dir)?;
            hbs.register_template_string(name, source)
                .map_err(|e| eyre!("Invalid prompt template {}: {}", name, e))?;
        }

        Ok(Self { hbs })
    }

    /// Create a loader that only uses embedded prompts
    pub fn embedded_only() -> Result<Self> {
        Self::new(None)
    }

    /// Render both prompts for one attempt
    pub fn render(&self, context: &PromptContext) -> Result<RenderedPrompt> {
        info!(
            "Rendering prompts for target '{}' attempt {}/{}",
            context.target, context.attempt, context.max_attempts
        );
        let system = self
            .hbs
            .render("system", context)
            .map_err(|e| eyre!("Failed to render system prompt: {}", e))?;
        let user = self
            .hbs
            .render("user", context)
            .map_err(|e| eyre!("Failed to render user prompt: {}", e))?;
        debug!(system_len = system.len(), user_len = user.len(), "PromptLoader::render: done");
        Ok(RenderedPrompt { system, user })
    }
}

/// Load a template by name
///
/// Checks in order:
/// 1. Override: `{override_dir}/{name}.pmt`
/// 2. Embedded fallback
fn load_template(name: &str, override_dir: Option<&Path>) -> Result<String> {
    if let Some(dir) = override_dir {
        let path: PathBuf = dir.join(format!("{}.pmt", name));
        if path.exists() {
            debug!("Loading prompt from override: {:?}", path);
            return std::fs::read_to_string(&path)
                .map_err(|e| eyre!("Failed to read prompt override {}: {}", path.display(), e));
        }
    }

    if let Some(content) = embedded::get_embedded(name) {
        debug!("Using embedded prompt: {}", name);
        return Ok(content.to_string());
    }

    Err(eyre!("Prompt template not found: {}", name))
}
