//! Language-model token source.
//!
//! This module provides:
//! * [`TokenSource`]: trait implemented by every model backend; returns a
//!   lazy [`TokenStream`] of text fragments.
//! * [`CommandTokenSource`]: runs an external model runner, JSON request on
//!   stdin, streamed UTF-8 text on stdout.
//! * [`LlmError`]: error variants for model operations.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use voice_chat::config::AppConfig;
//! use voice_chat::conversation::ConversationTurn;
//! use voice_chat::llm::{CommandTokenSource, TokenSource};
//!
//! let config = AppConfig::load().unwrap_or_default();
//! let source = CommandTokenSource::from_config(&config.llm).unwrap();
//!
//! let request = [
//!     ConversationTurn::system(config.persona.system_prompt.clone()),
//!     ConversationTurn::user("Tell me a joke."),
//! ];
//! for fragment in source.stream(&request).unwrap() {
//!     print!("{}", fragment.unwrap());
//! }
//! ```

pub mod source;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use source::{CommandTokenSource, LlmError, TokenSource, TokenStream};

#[cfg(test)]
pub use source::ScriptedSource;
