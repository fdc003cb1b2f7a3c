//! Streaming response text: reasoning-span filtering and sentence grouping.
//!
//! ```text
//! model fragments ──▶ TokenClassifier ──▶ DisplaySegment ──▶ UI
//!                                            │ (Text only)
//!                                            ▼
//!                                    SentenceSegmenter ──▶ SpeechSegment ──▶ speech
//! ```

pub mod classifier;
pub mod segmenter;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use classifier::{ClassifierEvent, ClassifierState, DisplaySegment, TokenClassifier};
pub use segmenter::{SentenceSegmenter, SpeechSegment, SENTENCE_TERMINATORS};
