//! Filesystem mutations on playlist entries.  Callers are expected to have
//! released the file from the playback surface first.

use chrono::Local;
use player_proto::model::MediaFile;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

use crate::error::{PlayerError, Result};

/// Rename `file` within its directory.  Refuses to overwrite.
pub async fn rename_in_place(file: &MediaFile, new_name: &str) -> Result<MediaFile> {
    if !is_plain_name(new_name) {
        return Err(PlayerError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("\"{}\" is not a valid file name", new_name),
        )));
    }

    let new_path = file.dir.join(new_name);
    if new_path == file.full_path {
        return Ok(file.clone());
    }
    ensure_free(&new_path, new_name).await?;
    ensure_exists(&file.full_path).await?;

    tokio::fs::rename(&file.full_path, &new_path).await?;
    debug!("fileops: renamed {} -> {}", file.full_path.display(), new_name);
    Ok(file.relocated(&new_path))
}

/// Move `file` to `dest`, copying across filesystems when a plain rename
/// is not possible.
pub async fn move_file(file: &MediaFile, dest: &Path) -> Result<MediaFile> {
    let dest_name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| dest.display().to_string());
    ensure_free(dest, &dest_name).await?;
    ensure_exists(&file.full_path).await?;

    relocate(&file.full_path, dest).await?;
    info!("fileops: moved {} -> {}", file.full_path.display(), dest.display());
    Ok(file.relocated(dest))
}

/// Move `path` into the freedesktop trash at `trash_dir`: the file goes to
/// `files/` under a unique name and a matching `.trashinfo` lands in
/// `info/`.  Returns where the file ended up.
pub async fn trash(path: &Path, trash_dir: &Path) -> Result<PathBuf> {
    ensure_exists(path).await?;

    let files_dir = trash_dir.join("files");
    let info_dir = trash_dir.join("info");
    tokio::fs::create_dir_all(&files_dir).await?;
    tokio::fs::create_dir_all(&info_dir).await?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| PlayerError::NotFound(path.to_path_buf()))?;
    let trashed_name = unique_name(&files_dir, &info_dir, &name).await;

    let info = format!(
        "[Trash Info]\nPath={}\nDeletionDate={}\n",
        encode_path(path),
        Local::now().format("%Y-%m-%dT%H:%M:%S")
    );
    let info_path = info_dir.join(format!("{}.trashinfo", trashed_name));
    tokio::fs::write(&info_path, info).await?;

    let target = files_dir.join(&trashed_name);
    if let Err(e) = relocate(path, &target).await {
        let _ = tokio::fs::remove_file(&info_path).await;
        return Err(e);
    }

    info!("fileops: trashed {}", path.display());
    Ok(target)
}

/// Toggle a `[tag]-` prefix on `name`.  An existing bracketed prefix is
/// replaced by the new tag, or removed when it is the same tag.
pub fn tagged_name(name: &str, tag: &str) -> String {
    let prefix = format!("[{}]-", tag);

    match existing_tag(name) {
        Some(current) if current == prefix => name[current.len()..].to_string(),
        Some(current) => format!("{}{}", prefix, &name[current.len()..]),
        None => format!("{}{}", prefix, name),
    }
}

/// Everything up to the last `]-` when the name starts with `[`.
fn existing_tag(name: &str) -> Option<&str> {
    if !name.starts_with('[') {
        return None;
    }
    name.rfind("]-").map(|end| &name[..end + 2])
}

fn is_plain_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

async fn ensure_free(path: &Path, display_name: &str) -> Result<()> {
    if tokio::fs::try_exists(path).await? {
        return Err(PlayerError::NameCollision(display_name.to_string()));
    }
    Ok(())
}

async fn ensure_exists(path: &Path) -> Result<()> {
    if !tokio::fs::try_exists(path).await? {
        return Err(PlayerError::NotFound(path.to_path_buf()));
    }
    Ok(())
}

async fn relocate(from: &Path, to: &Path) -> Result<()> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }

    // rename fails across mount points
    debug!("fileops: rename failed, copying {} -> {}", from.display(), to.display());
    if let Err(e) = tokio::fs::copy(from, to).await {
        let _ = tokio::fs::remove_file(to).await;
        return Err(e.into());
    }
    tokio::fs::remove_file(from).await?;
    Ok(())
}

async fn unique_name(files_dir: &Path, info_dir: &Path, name: &str) -> String {
    let taken = |candidate: String| async move {
        let in_files = tokio::fs::try_exists(files_dir.join(&candidate)).await.unwrap_or(true);
        let in_info = tokio::fs::try_exists(info_dir.join(format!("{}.trashinfo", candidate)))
            .await
            .unwrap_or(true);
        in_files || in_info
    };

    if !taken(name.to_string()).await {
        return name.to_string();
    }

    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut n = 2;
    loop {
        let candidate = format!("{}.{}{}", stem, n, ext);
        if !taken(candidate.clone()).await {
            return candidate;
        }
        n += 1;
    }
}

/// Percent-encode each path segment, keeping the separators.
fn encode_path(path: &Path) -> String {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    absolute
        .to_string_lossy()
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
