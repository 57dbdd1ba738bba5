//! Persistent application configuration model and defaults.

use std::path::{Path, PathBuf};

use log::{info, warn};

/// Root configuration persisted to `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Library indexing preferences.
    pub library: LibraryConfig,
    #[serde(default)]
    /// Playback behavior preferences.
    pub playback: PlaybackConfig,
    #[serde(default)]
    /// Playback-state persistence cadence.
    pub persistence: PersistenceConfig,
}

/// Library indexing preferences persisted between sessions.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct LibraryConfig {
    /// Folders scanned for audio files. Empty means the platform music folder.
    #[serde(default)]
    pub folders: Vec<String>,
}

/// How a voice search request turns into a queue.
#[derive(Debug, Clone, Copy, serde::Deserialize, serde::Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SearchPlayMode {
    /// Play the first matching track within the full track list.
    #[default]
    FirstMatch,
    /// Play all matching tracks as a new queue.
    AllMatches,
}

/// Playback behavior preferences.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PlaybackConfig {
    #[serde(default)]
    pub search_play: SearchPlayMode,
}

/// Playback-state persistence cadence.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PersistenceConfig {
    /// Coalescing window for track/shuffle/filter change writes.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Interval of the repeating save while playback is active.
    #[serde(default = "default_autosave_secs")]
    pub autosave_secs: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            autosave_secs: default_autosave_secs(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    250
}

fn default_autosave_secs() -> u64 {
    5
}

/// Clamps configuration values into usable ranges.
pub fn sanitize_config(mut config: Config) -> Config {
    if config.library.folders.is_empty() {
        if let Some(music_dir) = dirs::audio_dir() {
            config.library.folders = vec![music_dir.to_string_lossy().to_string()];
        }
    }
    config.persistence.debounce_ms = config.persistence.debounce_ms.clamp(50, 5_000);
    config.persistence.autosave_secs = config.persistence.autosave_secs.clamp(1, 300);
    config
}

/// Directory holding `config.toml`.
pub fn config_root() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("troubadour")
}

/// Loads the config file, creating a default one on first run.
pub fn load_config(config_file: &Path) -> Config {
    if !config_file.exists() {
        let default_config = sanitize_config(Config::default());
        info!(
            "Config file not found. Creating default config. path={}",
            config_file.display()
        );
        if let Some(parent) = config_file.parent() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                warn!("Failed to create config directory {}: {}", parent.display(), err);
            }
        }
        match toml::to_string(&default_config) {
            Ok(serialized) => {
                if let Err(err) = std::fs::write(config_file, serialized) {
                    warn!("Failed to write default config: {}", err);
                }
            }
            Err(err) => warn!("Failed to serialize default config: {}", err),
        }
        return default_config;
    }

    let config_content = std::fs::read_to_string(config_file).unwrap_or_default();
    sanitize_config(toml::from_str::<Config>(&config_content).unwrap_or_else(|err| {
        warn!("Failed to parse config, falling back to defaults: {}", err);
        Config::default()
    }))
}
