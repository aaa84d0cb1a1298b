use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

// ── ids ───────────────────────────────────────────────────────────────────────

static NEXT_FILE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique handle for one playlist entry.  Never reused, and carried
/// over unchanged when the entry's file is renamed or moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(u64);

impl FileId {
    pub fn next() -> Self {
        Self(NEXT_FILE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ── media file ────────────────────────────────────────────────────────────────

/// One playlist entry.  Values are replaced, not edited: a rename or move
/// produces a new `MediaFile` with the same `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaFile {
    pub id: FileId,
    pub full_path: PathBuf,
    /// Containing directory; the group-by key.
    pub dir: PathBuf,
    /// File name including extension.
    pub name: String,
    /// Trailing extension with its dot (`.mp4`), empty when there is none.
    pub extension: String,
    /// Last-modified time.
    pub date: DateTime<Utc>,
    /// Playback-source locator handed to the playback surface.
    pub src: String,
}

impl MediaFile {
    /// Build an entry for `path` with a fresh id, reading the modification
    /// time from the filesystem.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        let date = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        Ok(Self::new(path, date))
    }

    /// Build an entry without touching the filesystem.
    pub fn new(path: &Path, date: DateTime<Utc>) -> Self {
        Self::with_id(FileId::next(), path, date)
    }

    /// The same logical entry, now living at `new_path`.  The id and date
    /// are kept; everything derived from the path is recomputed.
    pub fn relocated(&self, new_path: &Path) -> Self {
        Self::with_id(self.id, new_path, self.date)
    }

    fn with_id(id: FileId, path: &Path, date: DateTime<Utc>) -> Self {
        let extension = extension_of(path);
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let src = dir
            .join(urlencoding::encode(&name).into_owned())
            .to_string_lossy()
            .into_owned();
        Self {
            id,
            full_path: path.to_path_buf(),
            dir,
            name,
            extension,
            date,
            src,
        }
    }

    /// Name with its own trailing extension removed.
    pub fn stem(&self) -> &str {
        let ext = extension_of(Path::new(&self.name));
        self.name.strip_suffix(ext.as_str()).unwrap_or(&self.name)
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default()
}

// ── sorting ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortOrder {
    #[default]
    NameAsc,
    NameDesc,
    DateAsc,
    DateDesc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SortCriterion {
    pub order: SortOrder,
    #[serde(default)]
    pub group_by: bool,
}

// ── playback / selection ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlayStatus {
    Playing,
    Paused,
    #[default]
    Stopped,
}

/// Highlighted entries in the playlist view.  `selected_id` is the anchor for
/// shift-range selection; `selected_ids` keeps insertion order without
/// duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Selection {
    #[serde(default)]
    pub selected_id: Option<FileId>,
    #[serde(default)]
    pub selected_ids: Vec<FileId>,
}

impl Selection {
    pub fn single(id: FileId) -> Self {
        Self {
            selected_id: Some(id),
            selected_ids: vec![id],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.selected_id.is_none() && self.selected_ids.is_empty()
    }

    pub fn clear(&mut self) {
        self.selected_id = None;
        self.selected_ids.clear();
    }

    /// Drop duplicate ids, keeping the first occurrence.
    pub fn dedup(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.selected_ids.retain(|id| seen.insert(*id));
    }

    /// Keep only ids accepted by `keep`.  Returns true if anything changed.
    pub fn retain(&mut self, mut keep: impl FnMut(FileId) -> bool) -> bool {
        let before = self.clone();
        self.selected_ids.retain(|id| keep(*id));
        if let Some(anchor) = self.selected_id {
            if !keep(anchor) {
                self.selected_id = None;
            }
        }
        before != *self
    }
}
