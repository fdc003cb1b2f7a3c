//! Configuration module for the voice chat front-end.
//!
//! Provides `AppConfig` (top-level settings), sub-configs for each subsystem,
//! `AppPaths` for the settings and history file locations, and TOML
//! persistence via `AppConfig::load` / `AppConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{
    AppConfig, LlmConfig, MemoryConfig, PersonaConfig, PlaybackConfig, StreamConfig, TtsConfig,
};
