//! Speech synthesis engine trait and implementations.
//!
//! # Overview
//!
//! [`SpeechSynthesizer`] is the interface used by the speech dispatcher.  It
//! is object-safe and `Send + Sync` so it can be held behind an
//! `Arc<dyn SpeechSynthesizer>` and called from the dispatch thread.
//!
//! [`CommandSynthesizer`] is the production implementation: it runs an
//! external program that reads the text on stdin and writes raw signed 16-bit
//! little-endian mono PCM on stdout.
//!
//! [`MockSynthesizer`] (available under `#[cfg(test)]`) produces
//! deterministic samples per text, records every call and can be told to
//! fail or panic on a given sentence.

use std::io::{ErrorKind, Write};
use std::process::{Command, Stdio};

use thiserror::Error;

use crate::config::TtsConfig;

// ---------------------------------------------------------------------------
// TtsError
// ---------------------------------------------------------------------------

/// All errors that can arise from the synthesis subsystem.
#[derive(Debug, Error)]
pub enum TtsError {
    /// No synthesis command is configured.
    #[error("speech synthesis is not configured")]
    NotConfigured,

    #[error("synthesis process I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The engine exited unsuccessfully.
    #[error("synthesis command failed: {0}")]
    CommandFailed(String),

    /// The engine succeeded but produced no audio.
    #[error("synthesis produced no audio")]
    EmptyOutput,
}

// ---------------------------------------------------------------------------
// SpeechSynthesizer trait
// ---------------------------------------------------------------------------

/// Object-safe, thread-safe interface for text-to-speech engines.
///
/// # Contract
///
/// - Blocking: returns once the whole utterance is synthesized.
/// - Output is mono `f32` PCM at [`sample_rate`](Self::sample_rate) Hz.
pub trait SpeechSynthesizer: Send + Sync {
    /// Rate of the samples returned by [`synthesize`](Self::synthesize).
    fn sample_rate(&self) -> u32;

    /// Synthesize `text` into mono samples.
    fn synthesize(&self, text: &str) -> Result<Vec<f32>, TtsError>;
}

// Compile-time assertion: Box<dyn SpeechSynthesizer> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn SpeechSynthesizer>) {}
};

// ---------------------------------------------------------------------------
// CommandSynthesizer
// ---------------------------------------------------------------------------

/// Synthesizer backed by an external program (one process per sentence).
#[derive(Debug, Clone)]
pub struct CommandSynthesizer {
    program: String,
    args: Vec<String>,
    sample_rate: u32,
}

impl CommandSynthesizer {
    /// Build from [`TtsConfig::command`].
    ///
    /// # Errors
    ///
    /// [`TtsError::NotConfigured`] when the command is empty.
    pub fn from_config(config: &TtsConfig) -> Result<Self, TtsError> {
        let (program, args) = config
            .command
            .split_first()
            .ok_or(TtsError::NotConfigured)?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            sample_rate: config.sample_rate,
        })
    }
}

impl SpeechSynthesizer for CommandSynthesizer {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn synthesize(&self, text: &str) -> Result<Vec<f32>, TtsError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdin = child.stdin.take();
        // Feed stdin from a scoped thread so a chatty engine cannot deadlock
        // on a full stdout pipe.
        let output = std::thread::scope(|s| {
            if let Some(mut stdin) = stdin {
                s.spawn(move || match stdin.write_all(text.as_bytes()) {
                    Ok(()) => {}
                    // The engine may exit without reading everything.
                    Err(e) if e.kind() == ErrorKind::BrokenPipe => {}
                    Err(e) => log::warn!("tts: failed to write text to engine: {e}"),
                });
            }
            child.wait_with_output()
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TtsError::CommandFailed(format!(
                "{} ({})",
                output.status,
                stderr.trim()
            )));
        }

        let samples = decode_pcm_s16le(&output.stdout);
        if samples.is_empty() {
            return Err(TtsError::EmptyOutput);
        }
        log::debug!(
            "tts: {} chars → {} samples @ {}Hz",
            text.chars().count(),
            samples.len(),
            self.sample_rate
        );
        Ok(samples)
    }
}

/// Decode signed 16-bit little-endian PCM into `f32` in `[-1.0, 1.0)`.
/// A trailing odd byte is ignored.
///
/// ```
/// use voice_chat::tts::decode_pcm_s16le;
///
/// let samples = decode_pcm_s16le(&[0x00, 0x40, 0x00, 0xC0]);
/// assert_eq!(samples, vec![0.5, -0.5]);
/// ```
pub fn decode_pcm_s16le(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32_768.0)
        .collect()
}

// ---------------------------------------------------------------------------
// MockSynthesizer  (test-only)
// ---------------------------------------------------------------------------

/// A test double producing [`MockSynthesizer::samples_for`] for each text.
#[cfg(test)]
pub struct MockSynthesizer {
    sample_rate: u32,
    delay: std::time::Duration,
    fail_on: Option<String>,
    panic_on: Option<String>,
    calls: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl MockSynthesizer {
    pub const SAMPLES_PER_CHAR: usize = 3;

    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            delay: std::time::Duration::ZERO,
            fail_on: None,
            panic_on: None,
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Sleep this long inside every `synthesize` call.
    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Return an error for this exact text.
    pub fn failing_on(mut self, text: impl Into<String>) -> Self {
        self.fail_on = Some(text.into());
        self
    }

    /// Panic for this exact text.
    pub fn panicking_on(mut self, text: impl Into<String>) -> Self {
        self.panic_on = Some(text.into());
        self
    }

    /// Deterministic non-silent samples for `text`.
    pub fn samples_for(text: &str) -> Vec<f32> {
        text.chars()
            .flat_map(|c| {
                let value = ((c as u32 % 97) + 1) as f32 / 200.0;
                std::iter::repeat(value).take(Self::SAMPLES_PER_CHAR)
            })
            .collect()
    }

    /// Every text passed to `synthesize`, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl SpeechSynthesizer for MockSynthesizer {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn synthesize(&self, text: &str) -> Result<Vec<f32>, TtsError> {
        self.calls.lock().unwrap().push(text.to_string());
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if self.panic_on.as_deref() == Some(text) {
            panic!("mock synthesizer panicked on {text:?}");
        }
        if self.fail_on.as_deref() == Some(text) {
            return Err(TtsError::CommandFailed("mock failure".into()));
        }
        Ok(Self::samples_for(text))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
