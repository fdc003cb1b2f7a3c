//! Audio playback: synthesized speech → resampling → playback queue →
//! speaker.
//!
//! # Pipeline
//!
//! ```text
//! SpeechDispatcher → resample (synthesis rate → device rate)
//!                  → split_into_chunks → PlaybackQueue
//!                  → cpal output callback (PlaybackQueue::fill) → speaker
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use voice_chat::audio::{open_or_degrade, PlaybackQueue};
//! use voice_chat::config::PlaybackConfig;
//!
//! let config = PlaybackConfig::default();
//! let queue = Arc::new(PlaybackQueue::new(&config, 22_050));
//! let _handle = open_or_degrade(&queue, 22_050, config.block_size);
//!
//! queue.enqueue_samples(&vec![0.0; 22_050]).unwrap();
//! queue.wait();
//! ```

pub mod output;
pub mod queue;
pub mod resample;

pub use output::{open_or_degrade, AudioOutput, OutputError, StreamHandle};
pub use queue::{
    split_into_chunks, AudioChunk, PlaybackError, PlaybackQueue, WaitOutcome, MAX_VOLUME,
};
pub use resample::resample;
