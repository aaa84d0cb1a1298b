use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

const APP_DIR: &str = "altplayer";

/// Global flag to control whether to use system-installed binaries from PATH
/// instead of bundled ones beside the executable.
static USE_SYSTEM_DEPS: AtomicBool = AtomicBool::new(false);

/// Set whether to use system dependencies (from PATH) instead of bundled ones.
pub fn set_use_system_deps(use_system: bool) {
    USE_SYSTEM_DEPS.store(use_system, Ordering::Relaxed);
}

/// Check whether to use system dependencies from PATH.
pub fn should_use_system_deps() -> bool {
    USE_SYSTEM_DEPS.load(Ordering::Relaxed)
}

pub fn data_dir() -> PathBuf {
    // On macOS and Linux, use ~/.local/share/altplayer/ (XDG standard)
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join(APP_DIR)
    }
    #[cfg(windows)]
    {
        if let Some(portable) = portable_dir("data") {
            return portable;
        }

        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }
}

pub fn config_dir() -> PathBuf {
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join(APP_DIR)
    }

    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }
}

/// Root of the user's trash (`files/` and `info/` live below it).
pub fn trash_dir() -> PathBuf {
    #[cfg(unix)]
    {
        dirs::data_local_dir()
            .unwrap_or_else(|| data_dir().join(".."))
            .join("Trash")
    }

    #[cfg(windows)]
    {
        data_dir().join("Trash")
    }
}

#[cfg(windows)]
fn portable_dir(name: &str) -> Option<PathBuf> {
    let exe_path = std::env::current_exe().ok()?;
    let exe_dir = exe_path.parent()?;
    let portable = exe_dir.join(name);
    portable.exists().then_some(portable)
}

#[cfg(unix)]
fn ffmpeg_binary_names() -> &'static [&'static str] {
    &["ffmpeg"]
}

#[cfg(windows)]
fn ffmpeg_binary_names() -> &'static [&'static str] {
    &["ffmpeg.exe", "ffmpeg"]
}

#[cfg(unix)]
fn ffprobe_binary_names() -> &'static [&'static str] {
    &["ffprobe"]
}

#[cfg(windows)]
fn ffprobe_binary_names() -> &'static [&'static str] {
    &["ffprobe.exe", "ffprobe"]
}

fn find_beside_exe(names: &[&str]) -> Option<PathBuf> {
    let current_exe = std::env::current_exe().ok()?;
    let dir = current_exe.parent()?;
    for name in names {
        let p = dir.join(name);
        if p.exists() {
            return Some(p);
        }
        let p = dir.join("resources").join(name);
        if p.exists() {
            return Some(p);
        }
    }
    None
}

fn find_on_path(names: &[&str]) -> Option<PathBuf> {
    let path = std::env::var("PATH").ok()?;
    #[cfg(unix)]
    let sep = ":";
    #[cfg(windows)]
    let sep = ";";
    for dir in path.split(sep) {
        for name in names {
            let p = PathBuf::from(dir).join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }
    None
}

/// Find the ffmpeg binary used for conversion and volume analysis.
/// If use_system_deps is true, skips bundled binaries and uses PATH only.
pub fn find_ffmpeg_binary() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("FFMPEG_PATH") {
        let path = PathBuf::from(p);
        if path.exists() {
            return Some(path);
        }
    }

    if !should_use_system_deps() {
        if let Some(p) = find_beside_exe(ffmpeg_binary_names()) {
            return Some(p);
        }
    }

    find_on_path(ffmpeg_binary_names())
}

/// Find ffprobe binary for metadata probing.
pub fn find_ffprobe_binary() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("FFPROBE_PATH") {
        let path = PathBuf::from(p);
        if path.exists() {
            return Some(path);
        }
    }

    if !should_use_system_deps() {
        if let Some(p) = find_beside_exe(ffprobe_binary_names()) {
            return Some(p);
        }
    }
    find_on_path(ffprobe_binary_names())
}
