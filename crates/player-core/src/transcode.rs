//! ffmpeg/ffprobe driver: metadata probing, volume analysis and format
//! conversion.
//!
//! Only one conversion runs at a time.  The running conversion can be
//! cancelled from any clone of the [`Transcoder`]; the process is killed and
//! its partial output removed.

use chrono::Utc;
use player_proto::config::TranscoderConfig;
use player_proto::protocol::{
    ConvertFormat, ConvertRequest, MediaMetadata, MediaVolume, StreamInfo,
};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{PlayerError, Result};

#[derive(Clone)]
pub struct Transcoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    active: Arc<Mutex<Option<CancellationToken>>>,
}

/// What the argument builder needs to know about the source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceInfo {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub rotation: Option<i32>,
    /// Bits per second of the first audio stream.
    pub audio_bit_rate: Option<u64>,
    /// Peak level in dB from `volumedetect`.
    pub max_volume: Option<f64>,
}

impl SourceInfo {
    fn from_metadata(metadata: &MediaMetadata) -> Self {
        let video = metadata.streams.iter().find(|s| s.codec_type == "video");
        let audio = metadata.streams.iter().find(|s| s.codec_type == "audio");
        Self {
            width: video.and_then(|s| s.width),
            height: video.and_then(|s| s.height),
            rotation: video.and_then(|s| s.rotation),
            audio_bit_rate: audio.and_then(|s| s.bit_rate),
            max_volume: metadata.volume.max_volume.parse().ok(),
        }
    }
}

/// The claimed conversion slot.  Released when dropped.
pub struct ConversionSlot {
    slot: Arc<Mutex<Option<CancellationToken>>>,
    token: CancellationToken,
}

impl Drop for ConversionSlot {
    fn drop(&mut self) {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl Transcoder {
    pub fn new(ffmpeg: PathBuf, ffprobe: PathBuf) -> Self {
        Self {
            ffmpeg,
            ffprobe,
            active: Arc::new(Mutex::new(None)),
        }
    }

    pub fn from_config(config: &TranscoderConfig) -> Self {
        Self::new(config.ffmpeg_binary(), config.ffprobe_binary())
    }

    pub fn is_busy(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Stop the running conversion.  Returns false when nothing was running.
    pub fn cancel(&self) -> bool {
        match self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            Some(token) => {
                info!("transcode: cancelling conversion");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Take the single conversion slot, or fail with `Busy`.
    pub fn claim(&self) -> Result<ConversionSlot> {
        let mut slot = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(PlayerError::Busy("conversion"));
        }
        let token = CancellationToken::new();
        *slot = Some(token.clone());
        Ok(ConversionSlot {
            slot: self.active.clone(),
            token,
        })
    }

    // ── probing ──────────────────────────────────────────────────────────────

    /// Container/stream facts plus the measured volume.
    pub async fn probe(&self, path: &Path) -> Result<MediaMetadata> {
        if !tokio::fs::try_exists(path).await? {
            return Err(PlayerError::NotFound(path.to_path_buf()));
        }

        let mut metadata = self.ffprobe(path).await?;
        metadata.volume = self.measure_volume(path).await;
        Ok(metadata)
    }

    async fn ffprobe(&self, path: &Path) -> Result<MediaMetadata> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "error", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| PlayerError::Probe(format!("failed to run ffprobe: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PlayerError::Probe(
                last_line(&stderr).unwrap_or_else(|| format!("ffprobe exited with {}", output.status)),
            ));
        }

        parse_probe(&String::from_utf8_lossy(&output.stdout))
    }

    /// Run `volumedetect` over the audio.  Any failure yields `N/A` figures.
    pub async fn measure_volume(&self, path: &Path) -> MediaVolume {
        let output = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-nostats", "-nostdin", "-i"])
            .arg(path)
            .args(["-vn", "-af", "volumedetect", "-f", "null", "-"])
            .stdin(Stdio::null())
            .output()
            .await;

        match output {
            Ok(out) if out.status.success() => parse_volume(&String::from_utf8_lossy(&out.stderr)),
            Ok(out) => {
                debug!("transcode: volumedetect exited with {}", out.status);
                MediaVolume::unavailable()
            }
            Err(e) => {
                warn!("transcode: failed to run ffmpeg for volumedetect: {}", e);
                MediaVolume::unavailable()
            }
        }
    }

    // ── conversion ───────────────────────────────────────────────────────────

    /// Convert `request.source` into `output` while holding `slot`.
    /// `output` is a fresh [`staging_path`] for `request.dest`; on failure
    /// or cancel it is removed, so it must not name a file that exists.
    pub async fn convert(
        &self,
        slot: ConversionSlot,
        request: &ConvertRequest,
        output: &Path,
    ) -> Result<()> {
        if !tokio::fs::try_exists(&request.source).await? {
            return Err(PlayerError::NotFound(request.source.clone()));
        }
        if tokio::fs::try_exists(output).await? {
            return Err(PlayerError::ConversionFailed(format!(
                "refusing to write over existing {}",
                output.display()
            )));
        }

        let needs_volume = request.options.maximize_volume;
        let info = match self.source_info(&request.source, needs_volume).await {
            Ok(info) => info,
            Err(e) => return Err(PlayerError::ConversionFailed(e.to_string())),
        };
        let args = build_args(request, output, &info)?;

        info!(
            "transcode: {} -> {} ({:?})",
            request.source.display(),
            output.display(),
            request.format
        );
        debug!("transcode: ffmpeg {}", args.join(" "));

        let mut child = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PlayerError::ConversionFailed(format!("failed to run ffmpeg: {}", e)))?;

        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_end(&mut buf).await;
            }
            String::from_utf8_lossy(&buf).into_owned()
        });

        let outcome = tokio::select! {
            status = child.wait() => Some(status),
            _ = slot.token.cancelled() => None,
        };

        match outcome {
            Some(Ok(status)) if status.success() => {
                info!("transcode: finished {}", output.display());
                Ok(())
            }
            Some(Ok(status)) => {
                let log = stderr_task.await.unwrap_or_default();
                remove_partial(output).await;
                Err(PlayerError::ConversionFailed(
                    last_line(&log).unwrap_or_else(|| format!("ffmpeg exited with {}", status)),
                ))
            }
            Some(Err(e)) => {
                remove_partial(output).await;
                Err(PlayerError::ConversionFailed(e.to_string()))
            }
            None => {
                let _ = child.kill().await;
                stderr_task.abort();
                remove_partial(output).await;
                info!("transcode: cancelled {}", output.display());
                Err(PlayerError::ConversionCancelled)
            }
        }
    }

    async fn source_info(&self, source: &Path, with_volume: bool) -> Result<SourceInfo> {
        let mut metadata = self.ffprobe(source).await?;
        if with_volume {
            metadata.volume = self.measure_volume(source).await;
        }
        Ok(SourceInfo::from_metadata(&metadata))
    }
}

/// Conversions write next to `dest` under this name and are renamed over
/// `dest` only once ffmpeg succeeded.
pub fn staging_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(Utc::now().timestamp_millis().to_string());
    dest.with_file_name(name)
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("transcode: removed partial output {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("transcode: could not remove {}: {}", path.display(), e),
    }
}

/// ffmpeg arguments for `request`, reading from `info` whatever the
/// request leaves to the source.
pub fn build_args(request: &ConvertRequest, output: &Path, info: &SourceInfo) -> Result<Vec<String>> {
    let options = &request.options;
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-nostdin".into(),
        "-y".into(),
        "-i".into(),
        request.source.to_string_lossy().into_owned(),
    ];

    match request.format {
        ConvertFormat::Mp3 => {
            args.extend(["-f".into(), "mp3".into(), "-vn".into()]);
        }
        ConvertFormat::Mp4 => {
            let size = match options.frame_size.dimensions() {
                Some(preset) => preset.to_string(),
                None => source_size(info)?,
            };
            args.extend([
                "-f".into(),
                "mp4".into(),
                "-c:v".into(),
                "libx264".into(),
                "-s".into(),
                size,
            ]);
            if let Some(transpose) = options.rotation.transpose() {
                args.extend(["-vf".into(), format!("transpose={}", transpose)]);
            }
        }
    }

    args.extend(["-c:a".into(), "libmp3lame".into()]);

    let kbps = options
        .audio_bitrate
        .kbps()
        .map(u64::from)
        .unwrap_or_else(|| info.audio_bit_rate.map(|bps| bps.div_ceil(1000)).unwrap_or(0));
    if kbps > 0 {
        args.extend(["-b:a".into(), format!("{}k", kbps)]);
    }

    if let Some(filter) = volume_filter(options.audio_volume, options.maximize_volume, info)? {
        args.extend(["-af".into(), filter]);
    }

    args.push(output.to_string_lossy().into_owned());
    Ok(args)
}

fn volume_filter(multiplier: f64, maximize: bool, info: &SourceInfo) -> Result<Option<String>> {
    if maximize {
        return match info.max_volume {
            Some(max) if max < 0.0 => Ok(Some(format!("volume={}dB", -max))),
            _ => Err(PlayerError::ConversionFailed("No max_volume".into())),
        };
    }
    if (multiplier - 1.0).abs() > f64::EPSILON {
        return Ok(Some(format!("volume={}", multiplier)));
    }
    Ok(None)
}

fn source_size(info: &SourceInfo) -> Result<String> {
    let (Some(width), Some(height)) = (info.width, info.height) else {
        return Err(PlayerError::ConversionFailed("source frame size unknown".into()));
    };
    let quarter_turn = matches!(info.rotation.map(|r| r.rem_euclid(360)), Some(90) | Some(270));
    if quarter_turn {
        Ok(format!("{}x{}", height, width))
    } else {
        Ok(format!("{}x{}", width, height))
    }
}

// ── parsing ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    #[serde(default)]
    format: Option<ProbeFormat>,
}

#[derive(Deserialize)]
struct ProbeStream {
    index: u32,
    #[serde(default)]
    codec_type: Option<String>,
    #[serde(default)]
    codec_name: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    bit_rate: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
    #[serde(default)]
    side_data_list: Vec<serde_json::Value>,
}

impl ProbeStream {
    fn rotation(&self) -> Option<i32> {
        self.side_data_list
            .iter()
            .find_map(|d| d.get("rotation").and_then(|r| r.as_i64()))
            .map(|r| r as i32)
            .or_else(|| self.tags.get("rotate").and_then(|r| r.parse().ok()))
    }
}

#[derive(Deserialize)]
struct ProbeFormat {
    #[serde(default)]
    duration: Option<String>,
    #[serde(default)]
    bit_rate: Option<String>,
}

/// Turn `ffprobe -print_format json` output into metadata.  The volume is
/// left as `N/A`.
pub fn parse_probe(json: &str) -> Result<MediaMetadata> {
    let probe: ProbeOutput =
        serde_json::from_str(json).map_err(|e| PlayerError::Probe(format!("bad ffprobe output: {}", e)))?;

    let streams = probe
        .streams
        .iter()
        .map(|s| StreamInfo {
            index: s.index,
            codec_type: s.codec_type.clone().unwrap_or_else(|| "unknown".into()),
            codec_name: s.codec_name.clone(),
            width: s.width,
            height: s.height,
            bit_rate: s.bit_rate.as_deref().and_then(|b| b.parse().ok()),
            rotation: s.rotation(),
        })
        .collect();

    let format = probe.format.as_ref();
    Ok(MediaMetadata {
        duration_secs: format.and_then(|f| f.duration.as_deref()).and_then(|d| d.parse().ok()),
        bit_rate: format.and_then(|f| f.bit_rate.as_deref()).and_then(|b| b.parse().ok()),
        streams,
        volume: MediaVolume::unavailable(),
    })
}

/// Pull the `volumedetect` summary out of ffmpeg's stderr.  Missing figures
/// come back empty.
pub fn parse_volume(stderr: &str) -> MediaVolume {
    let capture = |pattern: &str| -> String {
        Regex::new(pattern)
            .ok()
            .and_then(|re| re.captures(stderr))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default()
    };

    MediaVolume {
        n_samples: capture(r"n_samples:\s?([0-9]*)"),
        mean_volume: capture(r"mean_volume:\s?([^ ]*)\s?dB"),
        max_volume: capture(r"max_volume:\s?([^ ]*)\s?dB"),
    }
}

fn last_line(log: &str) -> Option<String> {
    log.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use player_proto::protocol::{AudioBitrate, ConvertOptions, FrameSize, Rotation};

    fn request(format: ConvertFormat, options: ConvertOptions) -> ConvertRequest {
        ConvertRequest {
            source: PathBuf::from("/in/clip.mov"),
            dest: PathBuf::from("/out/clip.mp4"),
            format,
            options,
        }
    }

    fn flag<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == name)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn test_mp3_args() {
        let req = request(
            ConvertFormat::Mp3,
            ConvertOptions {
                audio_bitrate: AudioBitrate::Kbps192,
                audio_volume: 1.5,
                ..ConvertOptions::default()
            },
        );
        let args = build_args(&req, Path::new("/out/clip.mp3"), &SourceInfo::default()).unwrap();

        assert_eq!(flag(&args, "-i"), Some("/in/clip.mov"));
        assert_eq!(flag(&args, "-f"), Some("mp3"));
        assert_eq!(flag(&args, "-c:a"), Some("libmp3lame"));
        assert_eq!(flag(&args, "-b:a"), Some("192k"));
        assert_eq!(flag(&args, "-af"), Some("volume=1.5"));
        assert!(!args.iter().any(|a| a == "-c:v"));
        assert_eq!(args.last().map(String::as_str), Some("/out/clip.mp3"));
    }

    #[test]
    fn test_bitrate_from_source_rounds_up() {
        let req = request(ConvertFormat::Mp3, ConvertOptions::default());
        let info = SourceInfo {
            audio_bit_rate: Some(128_001),
            ..SourceInfo::default()
        };
        let args = build_args(&req, Path::new("/o.mp3"), &info).unwrap();
        assert_eq!(flag(&args, "-b:a"), Some("129k"));
        assert_eq!(flag(&args, "-af"), None);

        let args = build_args(&req, Path::new("/o.mp3"), &SourceInfo::default()).unwrap();
        assert_eq!(flag(&args, "-b:a"), None);
    }

    #[test]
    fn test_mp4_preset_and_rotation() {
        let req = request(
            ConvertFormat::Mp4,
            ConvertOptions {
                frame_size: FrameSize::P720,
                rotation: Rotation::Clockwise90,
                ..ConvertOptions::default()
            },
        );
        let args = build_args(&req, Path::new("/o.mp4"), &SourceInfo::default()).unwrap();
        assert_eq!(flag(&args, "-c:v"), Some("libx264"));
        assert_eq!(flag(&args, "-s"), Some("1280x720"));
        assert_eq!(flag(&args, "-vf"), Some("transpose=1"));
    }

    #[test]
    fn test_mp4_source_size_swaps_on_quarter_turn() {
        let req = request(ConvertFormat::Mp4, ConvertOptions::default());
        let mut info = SourceInfo {
            width: Some(1920),
            height: Some(1080),
            rotation: Some(-90),
            ..SourceInfo::default()
        };
        let args = build_args(&req, Path::new("/o.mp4"), &info).unwrap();
        assert_eq!(flag(&args, "-s"), Some("1080x1920"));

        info.rotation = None;
        let args = build_args(&req, Path::new("/o.mp4"), &info).unwrap();
        assert_eq!(flag(&args, "-s"), Some("1920x1080"));

        info.width = None;
        assert!(build_args(&req, Path::new("/o.mp4"), &info).is_err());
    }

    #[test]
    fn test_maximize_volume() {
        let req = request(
            ConvertFormat::Mp3,
            ConvertOptions {
                maximize_volume: true,
                audio_volume: 2.0,
                ..ConvertOptions::default()
            },
        );
        let quiet = SourceInfo {
            max_volume: Some(-6.5),
            ..SourceInfo::default()
        };
        let args = build_args(&req, Path::new("/o.mp3"), &quiet).unwrap();
        assert_eq!(flag(&args, "-af"), Some("volume=6.5dB"));

        let loud = SourceInfo {
            max_volume: Some(0.0),
            ..SourceInfo::default()
        };
        let err = build_args(&req, Path::new("/o.mp3"), &loud).unwrap_err();
        assert_eq!(err.to_string(), "conversion failed: No max_volume");
    }

    #[test]
    fn test_parse_volume() {
        let stderr = "\
[Parsed_volumedetect_0 @ 0x55] n_samples: 2646000
[Parsed_volumedetect_0 @ 0x55] mean_volume: -21.3 dB
[Parsed_volumedetect_0 @ 0x55] max_volume: -4.0 dB
[Parsed_volumedetect_0 @ 0x55] histogram_4db: 12";
        let volume = parse_volume(stderr);
        assert_eq!(volume.n_samples, "2646000");
        assert_eq!(volume.mean_volume, "-21.3");
        assert_eq!(volume.max_volume, "-4.0");

        let empty = parse_volume("no audio here");
        assert_eq!(empty.max_volume, "");
    }

    #[test]
    fn test_parse_probe() {
        let json = r#"{
            "streams": [
                {"index": 0, "codec_type": "video", "codec_name": "h264", "width": 1280, "height": 720,
                 "side_data_list": [{"side_data_type": "Display Matrix", "rotation": -90}]},
                {"index": 1, "codec_type": "audio", "codec_name": "aac", "bit_rate": "128000"}
            ],
            "format": {"duration": "12.500000", "bit_rate": "1500000"}
        }"#;
        let metadata = parse_probe(json).unwrap();
        assert_eq!(metadata.duration_secs, Some(12.5));
        assert_eq!(metadata.bit_rate, Some(1_500_000));
        assert_eq!(metadata.streams.len(), 2);
        assert_eq!(metadata.streams[0].rotation, Some(-90));
        assert_eq!(metadata.streams[1].bit_rate, Some(128_000));
        assert_eq!(metadata.volume, MediaVolume::unavailable());

        let info = SourceInfo::from_metadata(&metadata);
        assert_eq!(info.audio_bit_rate, Some(128_000));
        assert_eq!(info.width, Some(1280));
        assert_eq!(info.max_volume, None);

        assert!(parse_probe("not json").is_err());
    }

    #[test]
    fn test_staging_path_stays_beside_dest() {
        let staged = staging_path(Path::new("/out/clip.mp4"));
        assert_eq!(staged.parent(), Some(Path::new("/out")));
        let name = staged.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("clip.mp4"));
        assert!(name.len() > "clip.mp4".len());
    }

    #[test]
    fn test_second_conversion_is_busy() {
        let transcoder = Transcoder::new(PathBuf::from("ffmpeg"), PathBuf::from("ffprobe"));
        let slot = transcoder.claim().unwrap();
        assert!(transcoder.is_busy());
        assert!(matches!(transcoder.claim(), Err(PlayerError::Busy(_))));

        drop(slot);
        assert!(!transcoder.is_busy());
        assert!(transcoder.claim().is_ok());
    }

    #[tokio::test]
    async fn test_slot_freed_after_failure() {
        let dir = tempfile::tempdir().unwrap();
        let transcoder = Transcoder::new(
            dir.path().join("no-ffmpeg"),
            dir.path().join("no-ffprobe"),
        );
        let req = ConvertRequest {
            source: dir.path().join("missing.mov"),
            dest: dir.path().join("out.mp3"),
            format: ConvertFormat::Mp3,
            options: ConvertOptions::default(),
        };

        let slot = transcoder.claim().unwrap();
        let err = transcoder
            .convert(slot, &req, &staging_path(&req.dest))
            .await
            .unwrap_err();
        assert!(matches!(err, PlayerError::NotFound(_)));
        assert!(!transcoder.is_busy());
        assert!(!transcoder.cancel());

        std::fs::write(&req.source, b"x").unwrap();
        let slot = transcoder.claim().unwrap();
        let err = transcoder
            .convert(slot, &req, &staging_path(&req.dest))
            .await
            .unwrap_err();
        assert!(matches!(err, PlayerError::ConversionFailed(_)));
        assert!(!transcoder.is_busy());
    }

    #[tokio::test]
    async fn test_never_writes_over_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let song = dir.path().join("song.mp3");
        std::fs::write(&song, b"original").unwrap();
        let transcoder = Transcoder::new(dir.path().join("ffmpeg"), dir.path().join("ffprobe"));
        let req = ConvertRequest {
            source: song.clone(),
            dest: song.clone(),
            format: ConvertFormat::Mp3,
            options: ConvertOptions::default(),
        };

        let slot = transcoder.claim().unwrap();
        let err = transcoder.convert(slot, &req, &song).await.unwrap_err();
        assert!(matches!(err, PlayerError::ConversionFailed(_)));
        assert_eq!(std::fs::read(&song).unwrap(), b"original");
    }

    /// Shell stand-ins for ffprobe and ffmpeg.  `ffmpeg_body` sees the
    /// output path as `$out`.
    #[cfg(unix)]
    fn scripted(dir: &Path, ffmpeg_body: &str) -> Transcoder {
        use std::os::unix::fs::PermissionsExt;

        let write = |name: &str, body: &str| {
            let path = dir.join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        };
        let ffprobe = write("ffprobe", r#"echo '{"streams":[],"format":{}}'"#);
        let ffmpeg = write(
            "ffmpeg",
            &format!("for out; do :; done\nprintf partial > \"$out\"\n{}", ffmpeg_body),
        );
        Transcoder::new(ffmpeg, ffprobe)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_conversion_keeps_source_and_removes_partial() {
        let tools = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let song = dir.path().join("song.mp3");
        std::fs::write(&song, b"original").unwrap();
        let transcoder = scripted(
            tools.path(),
            "echo 'frame=   10 size=1kB' >&2\necho 'Output same as Input #0 - exiting' >&2\nexit 1",
        );
        let req = ConvertRequest {
            source: song.clone(),
            dest: song.clone(),
            format: ConvertFormat::Mp3,
            options: ConvertOptions::default(),
        };
        let output = staging_path(&req.dest);

        let slot = transcoder.claim().unwrap();
        let err = transcoder.convert(slot, &req, &output).await.unwrap_err();
        match err {
            PlayerError::ConversionFailed(reason) => {
                assert_eq!(reason, "Output same as Input #0 - exiting")
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(!output.exists());
        assert_eq!(std::fs::read(&song).unwrap(), b"original");
        assert!(!transcoder.is_busy());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_kills_ffmpeg_and_removes_partial() {
        let tools = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("clip.mov");
        std::fs::write(&source, b"x").unwrap();
        let transcoder = scripted(tools.path(), "exec sleep 30");
        let req = ConvertRequest {
            source: source.clone(),
            dest: dir.path().join("clip.mp3"),
            format: ConvertFormat::Mp3,
            options: ConvertOptions::default(),
        };
        let output = staging_path(&req.dest);

        let slot = transcoder.claim().unwrap();
        let task = {
            let transcoder = transcoder.clone();
            let output = output.clone();
            tokio::spawn(async move { transcoder.convert(slot, &req, &output).await })
        };

        for _ in 0..400 {
            if output.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }
        assert!(output.exists());
        assert!(transcoder.cancel());

        let err = task.await.unwrap().unwrap_err();
        assert!(err.is_cancellation());
        assert!(!output.exists());
        assert!(source.exists());
        assert!(!transcoder.is_busy());
    }
}
