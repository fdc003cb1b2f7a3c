//! Where the voice chat keeps its files.
//!
//! `settings.toml` goes under the platform config directory and the
//! conversation history (`memory.json`) under the platform local data
//! directory, each in a `voice-chat` subdirectory.  A platform without one
//! of those directories gets the current directory instead.

use std::path::{Path, PathBuf};

const APP_DIR: &str = "voice-chat";

/// Resolved file locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    pub settings_file: PathBuf,
    /// Default history file; `[memory] file` in the settings overrides it.
    pub memory_file: PathBuf,
}

impl AppPaths {
    pub fn new() -> Self {
        let config_root = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        let data_root = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::under(&config_root, &data_root)
    }

    /// The same layout below explicit roots.
    pub fn under(config_root: &Path, data_root: &Path) -> Self {
        Self {
            settings_file: config_root.join(APP_DIR).join("settings.toml"),
            memory_file: data_root.join(APP_DIR).join("memory.json"),
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_below_roots() {
        let paths = AppPaths::under(Path::new("/cfg"), Path::new("/data"));
        assert_eq!(
            paths.settings_file,
            PathBuf::from("/cfg/voice-chat/settings.toml")
        );
        assert_eq!(paths.memory_file, PathBuf::from("/data/voice-chat/memory.json"));
    }

    #[test]
    fn platform_paths_end_in_app_dir() {
        let paths = AppPaths::new();
        for file in [&paths.settings_file, &paths.memory_file] {
            let dir = file.parent().and_then(Path::file_name);
            assert_eq!(dir, Some(std::ffi::OsStr::new(APP_DIR)), "{file:?}");
        }
    }
}
