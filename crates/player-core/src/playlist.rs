//! The playlist state machine: ordered entries, the current index, the
//! selection and the active sort criterion, kept consistent across every
//! mutation.  Changes are published as `Notification`s on a broadcast
//! channel; sending with no renderer attached is fine.

use player_proto::model::{FileId, MediaFile, PlayStatus, Selection, SortCriterion, SortOrder};
use player_proto::protocol::{Direction, Notification, PlaylistSnapshot};
use std::collections::HashSet;
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::{PlayerError, Result};
use crate::navigation::Navigation;
use crate::sort;

pub struct Playlist {
    files: Vec<MediaFile>,
    nav: Navigation,
    selection: Selection,
    sort: SortCriterion,
    status: PlayStatus,
    events: broadcast::Sender<Notification>,
}

impl Playlist {
    pub fn new(sort: SortCriterion, events: broadcast::Sender<Notification>) -> Self {
        Self::with_navigation(sort, Navigation::new(), events)
    }

    pub fn with_navigation(
        sort: SortCriterion,
        nav: Navigation,
        events: broadcast::Sender<Notification>,
    ) -> Self {
        Self {
            files: Vec::new(),
            nav,
            selection: Selection::default(),
            sort,
            status: PlayStatus::Stopped,
            events,
        }
    }

    // ── read access ──────────────────────────────────────────────────────────

    pub fn files(&self) -> &[MediaFile] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.nav.current()
    }

    pub fn current_file(&self) -> Option<&MediaFile> {
        self.nav.current().and_then(|i| self.files.get(i))
    }

    pub fn is_current(&self, id: FileId) -> bool {
        self.current_file().map(|f| f.id) == Some(id)
    }

    pub fn status(&self) -> PlayStatus {
        self.status
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn sort_criterion(&self) -> SortCriterion {
        self.sort
    }

    pub fn shuffle_enabled(&self) -> bool {
        self.nav.shuffle_enabled()
    }

    pub fn position_of(&self, id: FileId) -> Option<usize> {
        self.files.iter().position(|f| f.id == id)
    }

    pub fn get(&self, id: FileId) -> Option<&MediaFile> {
        self.files.iter().find(|f| f.id == id)
    }

    /// Entries for `selected_ids`, in selection order.
    pub fn selected_files(&self) -> Vec<MediaFile> {
        self.selection
            .selected_ids
            .iter()
            .filter_map(|id| self.get(*id).cloned())
            .collect()
    }

    /// The anchor of the selection, if it is still in the playlist.
    pub fn anchor_file(&self) -> Option<&MediaFile> {
        self.selection.selected_id.and_then(|id| self.get(id))
    }

    pub fn snapshot(&self) -> PlaylistSnapshot {
        PlaylistSnapshot {
            files: self.files.clone(),
            current_index: self.nav.current(),
            status: self.status,
            selection: self.selection.clone(),
            sort: self.sort,
            shuffle: self.nav.shuffle_enabled(),
        }
    }

    // ── membership ───────────────────────────────────────────────────────────

    /// Replace the whole playlist with `paths` and start playing the first
    /// of them.
    pub fn init_playlist(&mut self, paths: &[PathBuf]) {
        self.reset();

        self.files = to_media_files(paths.iter());
        if self.files.is_empty() {
            return;
        }

        self.nav.set_current(Some(0));
        self.arrange();
        self.nav.reseed(self.files.len());
        self.status = PlayStatus::Playing;

        debug!("playlist: init with {} files", self.files.len());
        self.emit(Notification::SortChanged { sort: self.sort });
        self.emit(Notification::PlaylistReplaced {
            files: self.files.clone(),
        });
        self.load_current(None);
    }

    /// Append the paths not already present.  Starts playback when nothing
    /// was current before.
    pub fn add_to_playlist(&mut self, paths: &[PathBuf]) {
        let mut known: HashSet<PathBuf> = self.files.iter().map(|f| f.full_path.clone()).collect();
        let fresh: Vec<&PathBuf> = paths.iter().filter(|p| known.insert((*p).clone())).collect();
        let added = to_media_files(fresh.into_iter());
        if added.is_empty() {
            return;
        }

        debug!("playlist: adding {} files", added.len());
        self.files.extend(added);
        self.arrange();
        self.nav.reseed(self.files.len());
        self.emit(Notification::PlaylistChanged {
            files: self.files.clone(),
        });

        if self.nav.current().is_none() {
            self.nav.jump(0);
            self.status = PlayStatus::Playing;
            self.load_current(None);
        }
    }

    /// Drop the entries with these ids.  Removing the current entry moves
    /// "current" to whatever now sits at the first removed position and
    /// reloads it.
    pub fn remove_from_playlist(&mut self, ids: &[FileId]) {
        let doomed: HashSet<FileId> = ids.iter().copied().collect();
        let removed: Vec<usize> = self
            .files
            .iter()
            .enumerate()
            .filter(|(_, f)| doomed.contains(&f.id))
            .map(|(i, _)| i)
            .collect();
        let Some(&first_removed) = removed.first() else {
            return;
        };

        let current = self.nav.current();
        let current_removed = current.map_or(false, |c| removed.contains(&c));

        self.files.retain(|f| !doomed.contains(&f.id));

        let next = match current {
            None => None,
            Some(_) if self.files.is_empty() => None,
            Some(_) if current_removed => Some(first_removed.min(self.files.len() - 1)),
            Some(c) => Some(c - removed.iter().filter(|i| **i < c).count()),
        };
        self.nav.set_current(next);
        self.nav.reseed(self.files.len());

        debug!("playlist: removed {} files", removed.len());
        self.emit(Notification::PlaylistChanged {
            files: self.files.clone(),
        });
        self.prune_selection();

        if current_removed {
            self.load_current(None);
        }
    }

    pub fn clear_playlist(&mut self) {
        self.reset();
        self.status = PlayStatus::Stopped;
        self.load_current(None);
    }

    /// Empty everything, including the shuffle pool.  Used before `init`.
    pub fn reset(&mut self) {
        self.files.clear();
        self.nav.clear();
        self.selection.clear();
        self.emit(Notification::PlaylistCleared);
    }

    /// Swap in a new value for an existing entry (same id), e.g. after a
    /// rename or move.  Returns its position.
    pub fn replace_file(&mut self, file: MediaFile) -> Result<usize> {
        let index = self.position_of(file.id).ok_or(PlayerError::UnknownFile(file.id))?;
        self.files[index] = file;
        Ok(index)
    }

    // ── navigation ───────────────────────────────────────────────────────────

    pub fn change_index(&mut self, direction: Direction) {
        self.nav.advance(direction, self.files.len());
        self.load_current(None);
    }

    pub fn select_file(&mut self, index: usize) {
        if index >= self.files.len() {
            warn!("playlist: select index {} out of range ({})", index, self.files.len());
            return;
        }
        self.nav.jump(index);
        self.status = PlayStatus::Playing;
        self.load_current(None);
    }

    pub fn set_status(&mut self, status: PlayStatus) {
        self.status = status;
    }

    pub fn toggle_shuffle(&mut self) -> bool {
        let enabled = !self.nav.shuffle_enabled();
        self.nav.set_shuffle(enabled, self.files.len());
        self.emit(Notification::ShuffleChanged { enabled });
        enabled
    }

    /// Tell the renderers to (re)load the current entry, optionally resuming
    /// at `start_from` seconds.
    pub fn load_current(&self, start_from: Option<f64>) {
        self.emit(Notification::CurrentFileChanged {
            file: self.current_file().cloned(),
            status: self.status,
            start_from,
        });
    }

    // ── ordering ─────────────────────────────────────────────────────────────

    /// Manual drag reorder.  The stored criterion is left alone; the next
    /// sort change discards this order.
    pub fn change_item_order(&mut self, from: usize, to: usize) {
        if from == to {
            return;
        }
        if from >= self.files.len() || to >= self.files.len() {
            warn!("playlist: reorder {} -> {} out of range ({})", from, to, self.files.len());
            return;
        }

        let current_id = self.current_file().map(|f| f.id);
        let moved = self.files.remove(from);
        self.files.insert(to, moved);
        self.relocate_current(current_id);
        self.nav.reseed(self.files.len());

        self.emit(Notification::PlaylistChanged {
            files: self.files.clone(),
        });
    }

    pub fn toggle_group_by(&mut self) -> SortCriterion {
        self.sort.group_by = !self.sort.group_by;
        self.resort();
        self.sort
    }

    pub fn change_sort_order(&mut self, order: SortOrder) -> SortCriterion {
        self.sort.order = order;
        self.resort();
        self.sort
    }

    fn resort(&mut self) {
        self.emit(Notification::SortChanged { sort: self.sort });
        if self.files.is_empty() {
            return;
        }
        self.arrange();
        self.nav.reseed(self.files.len());
        self.emit(Notification::PlaylistChanged {
            files: self.files.clone(),
        });
    }

    /// Sort by the stored criterion, keeping "current" on the same entry.
    fn arrange(&mut self) {
        let current_id = self.current_file().map(|f| f.id);
        sort::arrange(&mut self.files, self.sort);
        self.relocate_current(current_id);
    }

    fn relocate_current(&mut self, current_id: Option<FileId>) {
        if let Some(id) = current_id {
            self.nav.set_current(self.position_of(id));
        }
    }

    // ── selection ────────────────────────────────────────────────────────────

    /// Adopt the renderer's selection, dropping ids that are not in the
    /// playlist.
    pub fn set_selection(&mut self, mut selection: Selection) {
        selection.dedup();
        self.selection = selection;
        self.prune_selection();
    }

    fn prune_selection(&mut self) {
        let present: HashSet<FileId> = self.files.iter().map(|f| f.id).collect();
        if self.selection.retain(|id| present.contains(&id)) {
            self.emit(Notification::SelectionChanged {
                selection: self.selection.clone(),
            });
        }
    }

    pub(crate) fn emit(&self, notification: Notification) {
        let _ = self.events.send(notification);
    }
}

fn to_media_files<'a>(paths: impl Iterator<Item = &'a PathBuf>) -> Vec<MediaFile> {
    paths
        .filter_map(|path| match MediaFile::from_path(path) {
            Ok(file) => Some(file),
            Err(e) => {
                warn!("playlist: skipping {}: {}", path.display(), e);
                None
            }
        })
        .collect()
}
