//! Engine configuration.
//!
//! Loaded from the `[engine]` table of the application's TOML file; every key is
//! optional and falls back to the defaults below.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Static engine configuration.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of outstanding background scan jobs.
    pub scan_threads: usize,
    /// Batching window for scan-driven metadata updates.
    pub delayed_update_ms: u64,
    pub shuffle: bool,
    /// With `shuffle`, play whole albums once one is picked.
    pub album_shuffle: bool,
    pub repeat: bool,
    /// Advance to the next entry after the playing one is deleted.
    pub advance_on_delete: bool,
    /// Only scan entries when they are about to play.
    pub metadata_on_play: bool,
    /// `resume()` always starts paused.
    pub always_resume_paused: bool,
    /// Periodic state save interval in seconds (0 disables autosave).
    pub autosave_secs: u64,
    /// Lifetime of metadata cache items in seconds.
    pub cache_ttl_secs: u64,
    /// Persisted state file.
    pub state_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scan_threads: 2,
            delayed_update_ms: 250,
            shuffle: false,
            album_shuffle: false,
            repeat: false,
            advance_on_delete: false,
            metadata_on_play: false,
            always_resume_paused: false,
            autosave_secs: 300,
            cache_ttl_secs: 10,
            state_path: None,
        }
    }
}

impl EngineConfig {
    pub fn settings(&self) -> Settings {
        Settings {
            shuffle: self.shuffle,
            album_shuffle: self.album_shuffle,
            repeat: self.repeat,
            advance_on_delete: self.advance_on_delete,
            metadata_on_play: self.metadata_on_play,
            always_resume_paused: self.always_resume_paused,
        }
    }

    pub fn delayed_update(&self) -> Duration {
        Duration::from_millis(self.delayed_update_ms)
    }

    pub fn autosave_interval(&self) -> Option<Duration> {
        (self.autosave_secs > 0).then(|| Duration::from_secs(self.autosave_secs))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Behaviour switches that can change at runtime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Settings {
    pub shuffle: bool,
    pub album_shuffle: bool,
    pub repeat: bool,
    pub advance_on_delete: bool,
    pub metadata_on_play: bool,
    pub always_resume_paused: bool,
}
