//! CLI command handlers.

pub mod parse;
pub mod replay;

/// Message id used for the single recorded response a command reads.
pub const MESSAGE_ID: &str = "recorded";
