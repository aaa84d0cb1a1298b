use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::model::{FileId, MediaFile, PlayStatus, Selection, SortCriterion, SortOrder};
use crate::settings::{Settings, Theme, VideoSettings};

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  Renderers check this on the `Hello` message.
pub const PROTOCOL_VERSION: u32 = 1;

/// Which window a drop landed on.  Drops on the player replace the playlist,
/// drops on the playlist append to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Surface {
    Player,
    Playlist,
}

/// Step for relative navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub fn step(self) -> isize {
        match self {
            Direction::Forward => 1,
            Direction::Backward => -1,
        }
    }
}

/// Messages sent from renderers to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Intent {
    // ── playlist ─────────────────────────────────────────────────────────────
    InitPlaylist { paths: Vec<PathBuf> },
    AddToPlaylist { paths: Vec<PathBuf> },
    DropFiles { paths: Vec<PathBuf>, target: Surface },
    RemoveFromPlaylist { ids: Vec<FileId> },
    RemoveSelected,
    ClearPlaylist,
    ChangeIndex { direction: Direction },
    SelectFile { index: usize },
    ChangePlaylistItemOrder { from: usize, to: usize },
    ToggleGroupBy,
    ChangeSortOrder { order: SortOrder },
    ToggleShuffle,
    SelectionChanged { selection: Selection },

    // ── playback surface ─────────────────────────────────────────────────────
    PlayStatusChanged { status: PlayStatus },
    /// Confirmation for a `ReleaseFile` request, echoing its `request`.
    FileReleased { current_time: f64, request: u64 },
    MediaStateChanged { volume: f64, amp_level: f64, mute: bool },

    // ── view settings ────────────────────────────────────────────────────────
    ChangeTheme { theme: Theme },
    TogglePlaylistWindow,
    ToggleFitToWindow,
    ChangePlaybackSpeed { speed: f64 },
    ChangeSeekSpeed { speed: f64 },

    // ── file operations ──────────────────────────────────────────────────────
    Rename { id: FileId, name: String },
    UndoRename,
    RedoRename,
    TrashSelected,
    MoveFile { id: FileId, dest: PathBuf },
    ApplyTag { tag: String },
    SaveTags { tags: Vec<String> },
    CopyFileNames { full_path: bool },
    PasteFilePaths,
    ShowMetadata,

    // ── conversion ───────────────────────────────────────────────────────────
    Convert { request: ConvertRequest },
    CancelConvert,

    // ── system ───────────────────────────────────────────────────────────────
    GetState,
    Shutdown,
}

/// Messages sent from the daemon to renderers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum Notification {
    /// Sent once on connect and on `GetState`.
    Hello {
        protocol_version: u32,
        snapshot: PlaylistSnapshot,
        settings: Settings,
    },
    PlaylistReplaced {
        files: Vec<MediaFile>,
    },
    PlaylistChanged {
        files: Vec<MediaFile>,
    },
    PlaylistCleared,
    CurrentFileChanged {
        file: Option<MediaFile>,
        status: PlayStatus,
        start_from: Option<f64>,
    },
    SelectionChanged {
        selection: Selection,
    },
    SortChanged {
        sort: SortCriterion,
    },
    ShuffleChanged {
        enabled: bool,
    },
    /// Ask the playback surface to close these files and reply with
    /// `Intent::FileReleased`.
    ReleaseFile {
        file_ids: Vec<FileId>,
        request: u64,
    },
    Renamed {
        file: MediaFile,
    },
    /// Rename rejected; the view should reopen the editor with `file.name`.
    RenameFailed {
        file: MediaFile,
        message: String,
    },
    ConversionStarted {
        dest: PathBuf,
    },
    /// `error` is `None` for success and for a user cancel.
    ConversionEnded {
        error: Option<String>,
    },
    Metadata {
        file: MediaFile,
        metadata: MediaMetadata,
    },
    TagsChanged {
        tags: Vec<String>,
    },
    ThemeChanged {
        theme: Theme,
    },
    PlaylistVisibilityChanged {
        visible: bool,
    },
    VideoSettingsChanged {
        video: VideoSettings,
    },
    Error {
        message: String,
    },
    Log {
        message: String,
    },
}

/// Full view of the playlist for late joiners.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlaylistSnapshot {
    pub files: Vec<MediaFile>,
    pub current_index: Option<usize>,
    pub status: PlayStatus,
    pub selection: Selection,
    pub sort: SortCriterion,
    pub shuffle: bool,
}

// ── conversion ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvertFormat {
    Mp4,
    Mp3,
}

impl ConvertFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ConvertFormat::Mp4 => "mp4",
            ConvertFormat::Mp3 => "mp3",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FrameSize {
    #[default]
    SizeNone,
    P360,
    P480,
    P720,
    P1080,
}

impl FrameSize {
    /// `WxH` for a preset, `None` to keep the source size.
    pub fn dimensions(self) -> Option<&'static str> {
        match self {
            FrameSize::SizeNone => None,
            FrameSize::P360 => Some("480x360"),
            FrameSize::P480 => Some("640x480"),
            FrameSize::P720 => Some("1280x720"),
            FrameSize::P1080 => Some("1920x1080"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    RotationNone,
    Clockwise90,
    CounterClockwise90,
}

impl Rotation {
    /// ffmpeg `transpose` value.
    pub fn transpose(self) -> Option<u8> {
        match self {
            Rotation::RotationNone => None,
            Rotation::Clockwise90 => Some(1),
            Rotation::CounterClockwise90 => Some(2),
        }
    }
}

/// Audio bitrate in kbps; `None` keeps the source bitrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AudioBitrate {
    #[default]
    BitrateNone,
    Kbps128,
    Kbps160,
    Kbps192,
    Kbps320,
    Explicit(u32),
}

impl AudioBitrate {
    pub fn kbps(self) -> Option<u32> {
        match self {
            AudioBitrate::BitrateNone => None,
            AudioBitrate::Kbps128 => Some(128),
            AudioBitrate::Kbps160 => Some(160),
            AudioBitrate::Kbps192 => Some(192),
            AudioBitrate::Kbps320 => Some(320),
            AudioBitrate::Explicit(v) => Some(v),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvertOptions {
    #[serde(default)]
    pub frame_size: FrameSize,
    #[serde(default)]
    pub audio_bitrate: AudioBitrate,
    #[serde(default)]
    pub rotation: Rotation,
    /// Linear gain; `1.0` leaves the volume alone.
    #[serde(default = "default_volume_multiplier")]
    pub audio_volume: f64,
    /// Raise the volume so the measured peak sits at 0 dB.  Overrides
    /// `audio_volume`.
    #[serde(default)]
    pub maximize_volume: bool,
}

fn default_volume_multiplier() -> f64 {
    1.0
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            frame_size: FrameSize::default(),
            audio_bitrate: AudioBitrate::default(),
            rotation: Rotation::default(),
            audio_volume: default_volume_multiplier(),
            maximize_volume: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvertRequest {
    pub source: PathBuf,
    pub dest: PathBuf,
    pub format: ConvertFormat,
    #[serde(default)]
    pub options: ConvertOptions,
}

/// `volumedetect` figures, kept as the raw text ffmpeg printed.  `N/A` when
/// the analysis failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaVolume {
    pub n_samples: String,
    pub mean_volume: String,
    pub max_volume: String,
}

impl MediaVolume {
    pub fn unavailable() -> Self {
        Self {
            n_samples: "N/A".to_string(),
            mean_volume: "N/A".to_string(),
            max_volume: "N/A".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub index: u32,
    pub codec_type: String,
    pub codec_name: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub bit_rate: Option<u64>,
    /// Display rotation in degrees, when the stream carries one.
    pub rotation: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaMetadata {
    pub duration_secs: Option<f64>,
    pub bit_rate: Option<u64>,
    pub streams: Vec<StreamInfo>,
    pub volume: MediaVolume,
}

// ── framing ───────────────────────────────────────────────────────────────────

/// Wrapper for IPC communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Intent(Intent),
    Notification(Notification),
}

impl Message {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        if data.len() < 4 {
            anyhow::bail!("Insufficient data for length header");
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if data.len() < 4 + len {
            anyhow::bail!("Insufficient data for message");
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok((msg, 4 + len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_encode_decode() {
        let msg = Message::Intent(Intent::ChangePlaylistItemOrder { from: 3, to: 1 });
        let encoded = msg.encode().unwrap();
        let (decoded, len) = Message::decode(&encoded).unwrap();
        assert_eq!(len, encoded.len());
        match decoded {
            Message::Intent(Intent::ChangePlaylistItemOrder { from, to }) => {
                assert_eq!((from, to), (3, 1));
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_decode_needs_full_frame() {
        let encoded = Message::Intent(Intent::ClearPlaylist).encode().unwrap();
        assert!(Message::decode(&encoded[..2]).is_err());
        assert!(Message::decode(&encoded[..encoded.len() - 1]).is_err());
    }

    #[test]
    fn test_notification_is_not_mistaken_for_intent() {
        let msg = Message::Notification(Notification::ConversionEnded { error: None });
        let encoded = msg.encode().unwrap();
        let (decoded, _) = Message::decode(&encoded).unwrap();
        assert!(matches!(
            decoded,
            Message::Notification(Notification::ConversionEnded { error: None })
        ));
    }

    #[test]
    fn test_convert_options_defaults() {
        let json = r#"{"source":"/a.mov","dest":"/a.mp4","format":"Mp4"}"#;
        let request: ConvertRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.options, ConvertOptions::default());
        assert_eq!(request.options.audio_volume, 1.0);
    }

    #[test]
    fn test_presets() {
        assert_eq!(FrameSize::P720.dimensions(), Some("1280x720"));
        assert_eq!(FrameSize::SizeNone.dimensions(), None);
        assert_eq!(Rotation::CounterClockwise90.transpose(), Some(2));
        assert_eq!(AudioBitrate::Explicit(96).kbps(), Some(96));
        assert_eq!(Direction::Backward.step(), -1);
    }
}
