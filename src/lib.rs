//! ConvoCoach - conversational roleplay practice with AI personas
//!
//! A session walks through persona selection, a streamed dialogue with the
//! persona, and a structured feedback report on the user's side of the
//! conversation.

pub mod cli;
pub mod config;
pub mod feedback;
pub mod gateway;
pub mod gemini_api;
pub mod llm;
pub mod logging;
pub mod persona;
pub mod session;
pub mod transcript;

#[cfg(test)]
mod test_utils;

// Re-export Args for the binary
pub use cli::Args;
