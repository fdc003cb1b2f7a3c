//! TTS (text-to-speech) module: the synthesis engine seam and the speech
//! dispatcher that feeds the playback queue.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                 SpeechDispatcher ("speech-dispatch")     │
//! │                                                         │
//! │   SpeechSegment ──▶ SpeechSynthesizer (trait)           │
//! │                     └─ CommandSynthesizer               │
//! │                              │ mono f32 @ engine rate   │
//! │                              ▼                          │
//! │                     resample → PlaybackQueue → wait()   │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use voice_chat::audio::PlaybackQueue;
//! use voice_chat::config::AppConfig;
//! use voice_chat::stream::SpeechSegment;
//! use voice_chat::tts::{CommandSynthesizer, SpeechDispatcher};
//!
//! let config = AppConfig::default();
//! let queue = Arc::new(PlaybackQueue::new(&config.playback, config.tts.sample_rate));
//! let synth = CommandSynthesizer::from_config(&config.tts).unwrap();
//! let dispatcher = SpeechDispatcher::spawn(Arc::new(synth), queue).unwrap();
//!
//! let speech = dispatcher.begin_response().unwrap();
//! speech.speak(SpeechSegment::new("Hello there.").unwrap());
//! speech.wait_done();
//! ```

pub mod dispatcher;
pub mod engine;

// ── Public re-exports ──────────────────────────────────────────────────────

pub use dispatcher::{DispatchSnapshot, ResponseSpeech, SpeechDispatcher};
pub use engine::{decode_pcm_s16le, CommandSynthesizer, SpeechSynthesizer, TtsError};

// test-only re-export so the pipeline tests can import MockSynthesizer
// without `use voice_chat::tts::engine::MockSynthesizer`.
#[cfg(test)]
pub use engine::MockSynthesizer;
