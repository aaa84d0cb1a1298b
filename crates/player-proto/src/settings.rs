use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::model::SortCriterion;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Theme {
    #[default]
    Dark,
    Light,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSettings {
    #[serde(default = "default_volume")]
    pub volume: f64,
    #[serde(default = "default_amp_level")]
    pub amp_level: f64,
    #[serde(default)]
    pub mute: bool,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            volume: default_volume(),
            amp_level: default_amp_level(),
            mute: false,
        }
    }
}

/// How the playback surface shows and steps through video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSettings {
    #[serde(default = "default_fit_to_window")]
    pub fit_to_window: bool,
    /// Playback rate multiplier.
    #[serde(default = "default_playback_speed")]
    pub playback_speed: f64,
    /// Seconds skipped per seek step.
    #[serde(default = "default_seek_speed")]
    pub seek_speed: f64,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            fit_to_window: default_fit_to_window(),
            playback_speed: default_playback_speed(),
            seek_speed: default_seek_speed(),
        }
    }
}

pub const PLAYBACK_SPEEDS: [f64; 8] = [0.25, 0.5, 0.75, 1.0, 1.25, 1.5, 1.75, 2.0];
pub const SEEK_SPEEDS: [f64; 9] = [0.03, 0.05, 0.1, 0.5, 1.0, 3.0, 5.0, 10.0, 20.0];

fn default_fit_to_window() -> bool {
    true
}

fn default_playback_speed() -> f64 {
    1.0
}

fn default_seek_speed() -> f64 {
    10.0
}

fn default_volume() -> f64 {
    1.0
}

fn default_amp_level() -> f64 {
    0.07
}

fn default_playlist_visible() -> bool {
    true
}

/// Snapshot of user settings.  This is the only state that survives a
/// restart; unknown keys are ignored and missing keys fall back to defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub sort: SortCriterion,
    /// Last directory used for a move or conversion.
    #[serde(default)]
    pub default_path: Option<PathBuf>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub audio: AudioSettings,
    #[serde(default)]
    pub video: VideoSettings,
    #[serde(default = "default_playlist_visible")]
    pub playlist_visible: bool,
    #[serde(default)]
    pub theme: Theme,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sort: SortCriterion::default(),
            default_path: None,
            tags: Vec::new(),
            audio: AudioSettings::default(),
            video: VideoSettings::default(),
            playlist_visible: default_playlist_visible(),
            theme: Theme::default(),
        }
    }
}

/// Reads and writes the settings snapshot as JSON.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot.  A missing or unreadable file yields the defaults.
    pub fn load(&self) -> Settings {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(_) => return Settings::default(),
        };
        match serde_json::from_str::<Settings>(&content) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("settings: ignoring {}: {}", self.path.display(), e);
                Settings::default()
            }
        }
    }

    pub fn save(&self, settings: &Settings) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(settings)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}
