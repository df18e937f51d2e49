//! Prompt templates
//!
//! Embedded defaults compiled into the binary, with optional file overrides.

mod embedded;
mod loader;

pub use embedded::get_embedded;
pub use loader::{PromptLoader, RenderedPrompt};
