//! Built-in prompt template.
//!
//! Embedded at compile time from the `templates/` directory so the binary
//! works without a prompt file.

/// Work-cycle instructions, see [`crate::agent::PromptTemplate`] for the placeholders.
pub const PROMPT: &str = include_str!("../templates/PROMPT.md");
