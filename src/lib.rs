//! Streaming voice chat: model output is shown as it arrives with hidden
//! reasoning spans filtered out, and every finished sentence is spoken in
//! order while the rest of the reply is still generating.
//!
//! ```text
//! llm ──fragments──▶ stream::TokenClassifier ──▶ stream::SentenceSegmenter
//!                                                  │
//!                     tts::SpeechDispatcher ◀──────┘
//!                             │
//!                     audio::PlaybackQueue ──▶ speaker
//! ```

pub mod audio;
pub mod config;
pub mod conversation;
pub mod llm;
pub mod pipeline;
pub mod repl;
pub mod stream;
pub mod tts;
