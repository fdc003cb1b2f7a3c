//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across threads.
//! Every section carries `#[serde(default)]`, so a hand-written
//! `settings.toml` only needs the keys it wants to override.

use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;

// ---------------------------------------------------------------------------
// LlmConfig
// ---------------------------------------------------------------------------

/// Settings for the language-model token source and the prompt budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Program (and arguments) that streams model output on stdout.
    ///
    /// The request is written to its stdin as JSON.  Empty means "not
    /// configured".
    pub command: Vec<String>,
    /// Size of the model's context window in tokens.
    pub context_limit: usize,
    /// Tokens reserved for the model's reply.
    pub max_response_tokens: usize,
    /// Extra headroom subtracted from the prompt budget.
    pub safety_margin: usize,
    /// Sampling temperature forwarded to the model runner.
    pub temperature: f32,
    /// Estimated tokens per character used by the context pruner.
    pub tokens_per_char: f32,
}

impl LlmConfig {
    /// Token budget available for the prompt (system turn + history).
    ///
    /// ```
    /// use voice_chat::config::LlmConfig;
    ///
    /// let cfg = LlmConfig::default();
    /// assert_eq!(cfg.prompt_budget(), 2048 - 600 - 100);
    /// ```
    pub fn prompt_budget(&self) -> usize {
        self.context_limit
            .saturating_sub(self.max_response_tokens)
            .saturating_sub(self.safety_margin)
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            context_limit: 2048,
            max_response_tokens: 600,
            safety_margin: 100,
            temperature: 0.7,
            tokens_per_char: 2.0,
        }
    }
}

// ---------------------------------------------------------------------------
// TtsConfig
// ---------------------------------------------------------------------------

/// Settings for the speech-synthesis engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Program (and arguments) that reads text on stdin and writes raw
    /// signed 16-bit little-endian mono PCM on stdout.  Empty disables speech.
    pub command: Vec<String>,
    /// Sample rate of the engine's output in Hz.
    pub sample_rate: u32,
    /// Playback volume applied at startup (0.0 – 10.0).
    pub initial_volume: f32,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            sample_rate: 22_050,
            initial_volume: 2.0,
        }
    }
}

// ---------------------------------------------------------------------------
// PlaybackConfig
// ---------------------------------------------------------------------------

/// Settings for the playback queue and the output device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Number of samples per queued block, also requested as the device's
    /// callback buffer size.
    pub block_size: usize,
    /// Maximum number of blocks waiting in the queue before the producer is
    /// blocked.  `0` leaves the queue unbounded.
    pub max_queued_blocks: usize,
    /// Poll interval used while waiting for the queue to drain.
    pub wait_poll_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            block_size: 4096,
            max_queued_blocks: 64,
            wait_poll_ms: 100,
        }
    }
}

// ---------------------------------------------------------------------------
// StreamConfig
// ---------------------------------------------------------------------------

/// Settings for the token stream classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Literal marker that opens a hidden reasoning span.
    pub open_marker: String,
    /// Literal marker that closes a hidden reasoning span.
    pub close_marker: String,
    /// Text shown once per response in place of the hidden reasoning.
    pub placeholder: String,
    /// While reasoning, the buffer is truncated once it grows past this many
    /// characters ...
    pub reasoning_window_chars: usize,
    /// ... down to its last `reasoning_keep_chars` characters.
    pub reasoning_keep_chars: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            open_marker: "<think>".into(),
            close_marker: "</think>".into(),
            placeholder: "[thinking process hidden]".into(),
            reasoning_window_chars: 50,
            reasoning_keep_chars: 20,
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryConfig
// ---------------------------------------------------------------------------

/// Settings for the persisted conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Number of most-recent turns kept on disk.
    pub max_history: usize,
    /// Explicit history file; `None` uses [`AppPaths::memory_file`].
    pub file: Option<PathBuf>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_history: 30,
            file: None,
        }
    }
}

// ---------------------------------------------------------------------------
// PersonaConfig
// ---------------------------------------------------------------------------

/// The assistant persona, sent as the anchor (system) turn of every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonaConfig {
    pub system_prompt: String,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            system_prompt: "You are a calm, friendly voice assistant. \
                            Keep answers short and natural, like talking to a friend."
                .into(),
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use voice_chat::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
///
/// // Modify and save
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Token source and prompt budget.
    pub llm: LlmConfig,
    /// Speech synthesis engine.
    pub tts: TtsConfig,
    /// Playback queue / output device.
    pub playback: PlaybackConfig,
    /// Reasoning-span markers and classifier limits.
    pub stream: StreamConfig,
    /// Conversation history persistence.
    pub memory: MemoryConfig,
    /// Assistant persona.
    pub persona: PersonaConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet
    /// (first-run scenario) so callers never need to special-case a missing
    /// file.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Resolved location of the conversation history file.
    pub fn memory_file(&self) -> PathBuf {
        self.memory
            .file
            .clone()
            .unwrap_or_else(|| AppPaths::new().memory_file)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
