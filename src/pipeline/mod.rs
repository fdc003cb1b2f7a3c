//! Response pipeline for the voice chat front-end.
//!
//! This module wires token stream → classifier → segmenter → speech
//! dispatcher for one response, and the conversation bookkeeping around it.
//!
//! # Architecture
//!
//! ```text
//! user text
//!        │
//!        ▼
//! ChatSession::start_turn
//!        ├─ history + persona → prune → TokenSource::stream
//!        └─ spawn_blocking(run_response)
//!              ├─ TokenClassifier → StreamEvent::Display   ─▶ front-end
//!              ├─ SentenceSegmenter → ResponseSpeech::speak ─▶ dispatch thread
//!              └─ StreamEvent::Status(PipelineState)        ─▶ front-end
//!
//! ChatSession::complete_turn(outcome) → history → HistoryStore::save
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use voice_chat::config::AppConfig;
//! use voice_chat::llm::CommandTokenSource;
//! use voice_chat::pipeline::{ChatSession, StreamEvent};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = AppConfig::default();
//!     let source = Arc::new(CommandTokenSource::from_config(&config.llm).unwrap());
//!     let mut session = ChatSession::new(&config, source, None, None);
//!
//!     let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//!     let handle = session.start_turn("Hello!", tx).unwrap();
//!     while let Some(event) = rx.recv().await {
//!         if let StreamEvent::Display(segment) = event {
//!             print!("{}", segment.as_str());
//!         }
//!     }
//!     let outcome = handle.await.unwrap();
//!     session.complete_turn(&outcome);
//! }
//! ```

pub mod runner;
pub mod session;
pub mod state;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use runner::{run_response, spawn_response, ResponseOutcome};
pub use session::{ChatSession, RECALL_PREVIEW_CHARS};
pub use state::{PipelineState, StreamEvent};
