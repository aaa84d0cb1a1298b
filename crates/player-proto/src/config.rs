use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::platform;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub release: ReleaseConfig,
    #[serde(default)]
    pub transcoder: TranscoderConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_settings_file")]
    pub settings_file: PathBuf,
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
}

/// Handshake with the playback surface before touching an open file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseConfig {
    /// How long to wait for `FileReleased` before carrying on without a
    /// resume position.
    #[serde(default = "default_release_timeout_ms")]
    pub timeout_ms: u64,
}

impl ReleaseConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscoderConfig {
    /// Explicit ffmpeg binary; searched for when unset.
    #[serde(default)]
    pub ffmpeg: Option<PathBuf>,
    /// Explicit ffprobe binary; searched for when unset.
    #[serde(default)]
    pub ffprobe: Option<PathBuf>,
    /// Only look for binaries on PATH.
    #[serde(default)]
    pub use_system_deps: bool,
}

impl TranscoderConfig {
    pub fn ffmpeg_binary(&self) -> PathBuf {
        self.ffmpeg
            .clone()
            .or_else(platform::find_ffmpeg_binary)
            .unwrap_or_else(|| PathBuf::from("ffmpeg"))
    }

    pub fn ffprobe_binary(&self) -> PathBuf {
        self.ffprobe
            .clone()
            .or_else(platform::find_ffprobe_binary)
            .unwrap_or_else(|| PathBuf::from("ffprobe"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Where trashed files go.  Defaults to the XDG trash.
    #[serde(default = "default_trash_dir")]
    pub trash_dir: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            settings_file: default_settings_file(),
            log_file: default_log_file(),
        }
    }
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_release_timeout_ms(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            trash_dir: default_trash_dir(),
        }
    }
}

fn default_settings_file() -> PathBuf {
    platform::data_dir().join("settings.json")
}

fn default_log_file() -> PathBuf {
    platform::data_dir().join("daemon.log")
}

fn default_release_timeout_ms() -> u64 {
    5000
}

fn default_trash_dir() -> PathBuf {
    platform::trash_dir()
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Read `path`, writing the defaults there first when it does not exist.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
