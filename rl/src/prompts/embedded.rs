//! Embedded prompts
//!
//! These are compiled into the binary from .pmt files at build time.

use tracing::debug;

/// Oracle system prompt: the output contract
pub const SYSTEM: &str = include_str!("../../prompts/system.pmt");

/// Oracle user prompt: per-attempt context and diagnostic
pub const USER: &str = include_str!("../../prompts/user.pmt");

/// Get the embedded prompt by name
pub fn get_embedded(name: &str) -> Option<&'static str> {
    debug!(%name, "get_embedded: called");
    match name {
        "system" => Some(SYSTEM),
        "user" => Some(USER),
        _ => {
            debug!("get_embedded: no match found");
            None
        }
    }
}
