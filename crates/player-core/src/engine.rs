//! Owns the playlist together with everything that has to touch files on
//! disk: the release handshake, the rename history, the settings snapshot
//! and the trash.  Every disk mutation of a playlist entry first asks the
//! playback surface to let go of it and afterwards reloads the current
//! entry at the position it reported.

use player_proto::model::{FileId, MediaFile, SortCriterion, SortOrder};
use player_proto::protocol::{ConvertRequest, Notification, PROTOCOL_VERSION};
use player_proto::settings::{
    AudioSettings, Settings, SettingsStore, Theme, PLAYBACK_SPEEDS, SEEK_SPEEDS,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::{PlayerError, Result};
use crate::fileops;
use crate::navigation::Navigation;
use crate::playlist::Playlist;
use crate::release::{FileRelease, ReleaseHandle};
use crate::rename::{RenameEntry, RenameHistory};
use crate::transcode;

/// Where a conversion writes and whether the result replaces the file that
/// is playing.
#[derive(Debug, Clone)]
pub struct ConversionPlan {
    pub request: ConvertRequest,
    pub output: PathBuf,
    pub replaces_current: bool,
}

pub struct PlayerEngine {
    playlist: Playlist,
    release: FileRelease,
    history: RenameHistory,
    settings: Settings,
    store: SettingsStore,
    trash_dir: PathBuf,
    events: broadcast::Sender<Notification>,
}

impl PlayerEngine {
    pub fn new(
        store: SettingsStore,
        release_timeout: Duration,
        trash_dir: PathBuf,
        events: broadcast::Sender<Notification>,
    ) -> Self {
        Self::with_navigation(store, release_timeout, trash_dir, Navigation::new(), events)
    }

    pub fn with_navigation(
        store: SettingsStore,
        release_timeout: Duration,
        trash_dir: PathBuf,
        nav: Navigation,
        events: broadcast::Sender<Notification>,
    ) -> Self {
        let settings = store.load();
        info!("engine: settings from {}", store.path().display());
        Self {
            playlist: Playlist::with_navigation(settings.sort, nav, events.clone()),
            release: FileRelease::new(release_timeout, events.clone()),
            history: RenameHistory::new(),
            settings,
            store,
            trash_dir,
            events,
        }
    }

    pub fn playlist(&self) -> &Playlist {
        &self.playlist
    }

    pub fn playlist_mut(&mut self) -> &mut Playlist {
        &mut self.playlist
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn history(&self) -> &RenameHistory {
        &self.history
    }

    /// For the IPC reader to deliver `FileReleased`.
    pub fn release_handle(&self) -> ReleaseHandle {
        self.release.handle()
    }

    pub fn hello(&self) -> Notification {
        Notification::Hello {
            protocol_version: PROTOCOL_VERSION,
            snapshot: self.playlist.snapshot(),
            settings: self.settings.clone(),
        }
    }

    fn emit(&self, notification: Notification) {
        let _ = self.events.send(notification);
    }

    // ── settings ─────────────────────────────────────────────────────────────

    pub fn save_settings(&self) -> Result<()> {
        self.store
            .save(&self.settings)
            .map_err(|e| PlayerError::Settings(e.to_string()))
    }

    pub fn toggle_group_by(&mut self) -> Result<SortCriterion> {
        self.settings.sort = self.playlist.toggle_group_by();
        self.save_settings()?;
        Ok(self.settings.sort)
    }

    pub fn change_sort_order(&mut self, order: SortOrder) -> Result<SortCriterion> {
        self.settings.sort = self.playlist.change_sort_order(order);
        self.save_settings()?;
        Ok(self.settings.sort)
    }

    pub fn save_tags(&mut self, tags: Vec<String>) -> Result<()> {
        self.settings.tags = tags;
        self.emit(Notification::TagsChanged {
            tags: self.settings.tags.clone(),
        });
        self.save_settings()
    }

    pub fn set_media_state(&mut self, volume: f64, amp_level: f64, mute: bool) -> Result<()> {
        self.settings.audio = AudioSettings {
            volume,
            amp_level,
            mute,
        };
        self.save_settings()
    }

    pub fn change_theme(&mut self, theme: Theme) -> Result<()> {
        self.settings.theme = theme;
        self.emit(Notification::ThemeChanged { theme });
        self.save_settings()
    }

    pub fn toggle_playlist_window(&mut self) -> Result<bool> {
        self.settings.playlist_visible = !self.settings.playlist_visible;
        self.emit(Notification::PlaylistVisibilityChanged {
            visible: self.settings.playlist_visible,
        });
        self.save_settings()?;
        Ok(self.settings.playlist_visible)
    }

    pub fn toggle_fit_to_window(&mut self) -> Result<bool> {
        self.settings.video.fit_to_window = !self.settings.video.fit_to_window;
        self.video_changed()?;
        Ok(self.settings.video.fit_to_window)
    }

    /// Only the preset rates are accepted.
    pub fn change_playback_speed(&mut self, speed: f64) -> Result<()> {
        if !PLAYBACK_SPEEDS.contains(&speed) {
            return Err(PlayerError::InvalidSetting(format!("playback speed {}", speed)));
        }
        self.settings.video.playback_speed = speed;
        self.video_changed()
    }

    pub fn change_seek_speed(&mut self, speed: f64) -> Result<()> {
        if !SEEK_SPEEDS.contains(&speed) {
            return Err(PlayerError::InvalidSetting(format!("seek speed {}", speed)));
        }
        self.settings.video.seek_speed = speed;
        self.video_changed()
    }

    fn video_changed(&mut self) -> Result<()> {
        self.emit(Notification::VideoSettingsChanged {
            video: self.settings.video.clone(),
        });
        self.save_settings()
    }

    fn remember_dir(&mut self, path: &Path) {
        if let Some(dir) = path.parent() {
            self.settings.default_path = Some(dir.to_path_buf());
        }
    }

    // ── release ──────────────────────────────────────────────────────────────

    /// Release `ids` from the playback surface.  A timeout is not fatal: the
    /// caller goes ahead without a resume position.
    async fn release_for(&self, ids: &[FileId]) -> Result<Option<f64>> {
        match self.release.release_file(ids).await {
            Ok(position) => Ok(Some(position)),
            Err(PlayerError::ReleaseTimeout) => {
                warn!("engine: release of {:?} timed out, continuing without position", ids);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    // ── rename ───────────────────────────────────────────────────────────────

    /// Rename an entry on disk and record it for undo.  On failure the view
    /// is told to reopen the editor with the old name.
    pub async fn rename(&mut self, id: FileId, name: &str) -> Result<MediaFile> {
        let file = self.playlist.get(id).cloned().ok_or(PlayerError::UnknownFile(id))?;

        match self.rename_on_disk(&file, name).await {
            Ok(renamed) => {
                if renamed.name != file.name {
                    self.history.commit(RenameEntry {
                        id,
                        old_name: file.name.clone(),
                        new_name: renamed.name.clone(),
                    });
                }
                self.emit(Notification::Renamed {
                    file: renamed.clone(),
                });
                Ok(renamed)
            }
            Err(e) => {
                self.emit(Notification::RenameFailed {
                    file,
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Revert the most recent rename.  `Ok(None)` when there is nothing to
    /// undo.
    pub async fn undo_rename(&mut self) -> Result<Option<MediaFile>> {
        let Some(entry) = self.history.take_undo() else {
            return Ok(None);
        };
        let Some(file) = self.playlist.get(entry.id).cloned() else {
            warn!("engine: dropping undo for {} which left the playlist", entry.id);
            return Err(PlayerError::UnknownFile(entry.id));
        };

        match self.rename_on_disk(&file, &entry.old_name).await {
            Ok(renamed) => {
                debug!("engine: undo {} -> {}", entry.new_name, entry.old_name);
                self.history.finish_undo(entry);
                self.emit(Notification::Renamed {
                    file: renamed.clone(),
                });
                Ok(Some(renamed))
            }
            Err(e) => {
                self.history.restore_undo(entry);
                Err(e)
            }
        }
    }

    pub async fn redo_rename(&mut self) -> Result<Option<MediaFile>> {
        let Some(entry) = self.history.take_redo() else {
            return Ok(None);
        };
        let Some(file) = self.playlist.get(entry.id).cloned() else {
            warn!("engine: dropping redo for {} which left the playlist", entry.id);
            return Err(PlayerError::UnknownFile(entry.id));
        };

        match self.rename_on_disk(&file, &entry.new_name).await {
            Ok(renamed) => {
                debug!("engine: redo {} -> {}", entry.old_name, entry.new_name);
                self.history.finish_redo(entry);
                self.emit(Notification::Renamed {
                    file: renamed.clone(),
                });
                Ok(Some(renamed))
            }
            Err(e) => {
                self.history.restore_redo(entry);
                Err(e)
            }
        }
    }

    /// Toggle `[tag]-` on the anchor of the selection.
    pub async fn apply_tag(&mut self, tag: &str) -> Result<Option<MediaFile>> {
        let Some(file) = self.playlist.anchor_file().cloned() else {
            return Ok(None);
        };
        let name = fileops::tagged_name(&file.name, tag);
        self.rename_on_disk(&file, &name).await.map(Some)
    }

    /// Release, rename, swap the entry, reload.  The reload happens whether
    /// or not the rename worked.
    async fn rename_on_disk(&mut self, file: &MediaFile, name: &str) -> Result<MediaFile> {
        let was_current = self.playlist.is_current(file.id);
        let position = self.release_for(&[file.id]).await?;

        let outcome = match fileops::rename_in_place(file, name).await {
            Ok(renamed) => self.playlist.replace_file(renamed.clone()).map(|_| renamed),
            Err(e) => Err(e),
        };
        if outcome.is_ok() {
            self.emit(Notification::PlaylistChanged {
                files: self.playlist.files().to_vec(),
            });
        }

        if was_current {
            self.playlist.load_current(position);
        }
        outcome
    }

    // ── move / trash ─────────────────────────────────────────────────────────

    /// Move an entry's file to `dest`, keeping it in the playlist.
    pub async fn move_file(&mut self, id: FileId, dest: &Path) -> Result<MediaFile> {
        let file = self.playlist.get(id).cloned().ok_or(PlayerError::UnknownFile(id))?;
        let was_current = self.playlist.is_current(id);
        let position = self.release_for(&[id]).await?;

        let outcome = match fileops::move_file(&file, dest).await {
            Ok(moved) => self.playlist.replace_file(moved.clone()).map(|_| moved),
            Err(e) => Err(e),
        };
        if outcome.is_ok() {
            self.remember_dir(dest);
            self.emit(Notification::PlaylistChanged {
                files: self.playlist.files().to_vec(),
            });
        }

        if was_current {
            self.playlist.load_current(position);
        }
        if outcome.is_ok() {
            self.save_settings()?;
        }
        outcome
    }

    pub fn remove_selected(&mut self) {
        let ids = self.playlist.selection().selected_ids.clone();
        self.playlist.remove_from_playlist(&ids);
    }

    /// Move every selected file to the trash and drop the ones that made it
    /// from the playlist.  Returns how many were trashed.
    pub async fn trash_selected(&mut self) -> Result<usize> {
        let files = self.playlist.selected_files();
        if files.is_empty() {
            return Ok(0);
        }

        let ids: Vec<FileId> = files.iter().map(|f| f.id).collect();
        let current_id = self.playlist.current_file().map(|f| f.id);
        let position = self.release_for(&ids).await?;

        let mut trashed = Vec::new();
        let mut failure = None;
        for file in &files {
            match fileops::trash(&file.full_path, &self.trash_dir).await {
                Ok(_) => trashed.push(file.id),
                Err(e) => {
                    warn!("engine: could not trash {}: {}", file.full_path.display(), e);
                    failure = Some(e);
                }
            }
        }

        self.playlist.remove_from_playlist(&trashed);

        // current survived (trash failed): let the surface reopen it
        let kept: HashSet<FileId> = self.playlist.files().iter().map(|f| f.id).collect();
        if let Some(id) = current_id {
            if ids.contains(&id) && kept.contains(&id) {
                self.playlist.load_current(position);
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(trashed.len()),
        }
    }

    // ── clipboard ────────────────────────────────────────────────────────────

    /// Names (or full paths) of the selected entries, one per line.
    pub fn selected_names(&self, full_path: bool) -> String {
        self.playlist
            .selected_files()
            .iter()
            .map(|f| {
                if full_path {
                    f.full_path.to_string_lossy().into_owned()
                } else {
                    f.name.clone()
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Append the existing paths found in pasted text.
    pub fn paste_paths(&mut self, text: &str) -> usize {
        let paths = paths_from_text(text);
        let count = paths.len();
        if count > 0 {
            self.playlist.add_to_playlist(&paths);
        }
        count
    }

    // ── conversion ───────────────────────────────────────────────────────────

    /// Decide where the conversion writes.  Output always goes to a staging
    /// name beside `dest` and only replaces `dest` once ffmpeg succeeded.
    pub fn plan_conversion(&mut self, request: ConvertRequest) -> Result<ConversionPlan> {
        self.remember_dir(&request.dest);
        self.save_settings()?;

        let replaces_current = self
            .playlist
            .current_file()
            .map_or(false, |f| f.full_path == request.dest);
        let output = transcode::staging_path(&request.dest);

        self.emit(Notification::ConversionStarted {
            dest: request.dest.clone(),
        });
        Ok(ConversionPlan {
            request,
            output,
            replaces_current,
        })
    }

    /// Report the outcome and swap a successful output in under `dest`.
    pub async fn finish_conversion(&mut self, plan: ConversionPlan, result: Result<()>) {
        let result = match result {
            Ok(()) => self.swap_in(&plan).await,
            Err(e) => {
                discard(&plan.output).await;
                Err(e)
            }
        };

        let error = match result {
            Ok(()) => None,
            Err(e) if e.is_cancellation() => None,
            Err(e) => Some(e.to_string()),
        };
        self.emit(Notification::ConversionEnded { error });
    }

    async fn swap_in(&mut self, plan: &ConversionPlan) -> Result<()> {
        let dest = &plan.request.dest;
        let current = self
            .playlist
            .current_file()
            .filter(|f| &f.full_path == dest)
            .cloned();

        let position = match &current {
            Some(file) => match self.release_for(&[file.id]).await {
                Ok(position) => position,
                Err(e) => {
                    discard(&plan.output).await;
                    return Err(e);
                }
            },
            None => None,
        };

        let renamed = tokio::fs::rename(&plan.output, dest).await;
        if renamed.is_err() {
            discard(&plan.output).await;
        }

        // an entry already listed under `dest` keeps its id
        let listed = self
            .playlist
            .files()
            .iter()
            .find(|f| &f.full_path == dest)
            .cloned();
        if let Some(file) = listed {
            let refreshed = MediaFile::from_path(dest)
                .map(|fresh| MediaFile {
                    id: file.id,
                    ..fresh
                })
                .unwrap_or(file);
            self.playlist.replace_file(refreshed)?;
            if current.is_some() {
                self.playlist.load_current(position);
            } else {
                self.emit(Notification::PlaylistChanged {
                    files: self.playlist.files().to_vec(),
                });
            }
        }

        renamed.map_err(PlayerError::from)
    }
}

async fn discard(staged: &Path) {
    match tokio::fs::remove_file(staged).await {
        Ok(()) => debug!("engine: removed {}", staged.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("engine: could not remove {}: {}", staged.display(), e),
    }
}

/// Split pasted text into lines and keep those naming an existing file.
pub fn paths_from_text(text: &str) -> Vec<PathBuf> {
    text.split('\n')
        .map(|line| line.trim_end_matches('\r').trim())
        .filter(|line| !line.is_empty())
        .map(PathBuf::from)
        .filter(|path| path.exists())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use player_proto::model::Selection;

    fn engine(dir: &Path) -> (PlayerEngine, broadcast::Receiver<Notification>) {
        let (tx, rx) = broadcast::channel(256);
        let store = SettingsStore::new(dir.join("settings.json"));
        let engine = PlayerEngine::with_navigation(
            store,
            Duration::from_millis(100),
            dir.join("Trash"),
            Navigation::with_seed(1),
            tx,
        );
        (engine, rx)
    }

    /// Answer every `ReleaseFile` with `position`.
    fn auto_confirm(engine: &PlayerEngine, mut rx: broadcast::Receiver<Notification>, position: f64) {
        let handle = engine.release_handle();
        tokio::spawn(async move {
            while let Ok(n) = rx.recv().await {
                if let Notification::ReleaseFile { request, .. } = n {
                    handle.confirm(request, position).await;
                }
            }
        });
    }

    #[test]
    fn test_paths_from_text() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.mp4");
        let b = dir.path().join("b.mp4");
        std::fs::write(&a, b"x").unwrap();
        std::fs::write(&b, b"x").unwrap();

        let text = format!("{}\r\n{}\n/nowhere/c.mp4\n\n", a.display(), b.display());
        assert_eq!(paths_from_text(&text), vec![a, b]);
    }

    #[tokio::test]
    async fn test_rename_reloads_current_at_position() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.mp4");
        std::fs::write(&a, b"x").unwrap();

        let (mut engine, rx) = engine(dir.path());
        let mut watch = rx.resubscribe();
        auto_confirm(&engine, rx, 17.0);
        engine.playlist_mut().init_playlist(&[a]);
        let id = engine.playlist().files()[0].id;

        let renamed = engine.rename(id, "b.mp4").await.unwrap();
        assert_eq!(renamed.id, id);
        assert!(dir.path().join("b.mp4").exists());

        let mut reloaded = None;
        while let Ok(n) = watch.try_recv() {
            if let Notification::CurrentFileChanged { file: Some(f), start_from, .. } = n {
                reloaded = Some((f.name, start_from));
            }
        }
        assert_eq!(reloaded, Some(("b.mp4".to_string(), Some(17.0))));
    }

    #[tokio::test]
    async fn test_rename_collision_is_not_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.mp4");
        std::fs::write(&a, b"x").unwrap();
        std::fs::write(dir.path().join("b.mp4"), b"y").unwrap();

        let (mut engine, rx) = engine(dir.path());
        let mut watch = rx.resubscribe();
        auto_confirm(&engine, rx, 0.0);
        engine.playlist_mut().init_playlist(&[a]);
        let id = engine.playlist().files()[0].id;

        let err = engine.rename(id, "b.mp4").await.unwrap_err();
        assert!(matches!(err, PlayerError::NameCollision(_)));
        assert!(engine.history().undo_stack().is_empty());
        assert_eq!(engine.playlist().files()[0].name, "a.mp4");

        let mut failed = false;
        while let Ok(n) = watch.try_recv() {
            if let Notification::RenameFailed { file, .. } = n {
                failed = file.name == "a.mp4";
            }
        }
        assert!(failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rename_proceeds_after_release_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.mp4");
        std::fs::write(&a, b"x").unwrap();

        // nobody answers the release request
        let (mut engine, _rx) = engine(dir.path());
        engine.playlist_mut().init_playlist(&[a]);
        let id = engine.playlist().files()[0].id;

        let renamed = engine.rename(id, "b.mp4").await.unwrap();
        assert_eq!(renamed.name, "b.mp4");
    }

    #[tokio::test]
    async fn test_apply_tag_toggles() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("song.mp3");
        std::fs::write(&a, b"x").unwrap();

        let (mut engine, rx) = engine(dir.path());
        auto_confirm(&engine, rx, 0.0);
        engine.playlist_mut().init_playlist(&[a]);
        let id = engine.playlist().files()[0].id;
        engine.playlist_mut().set_selection(Selection::single(id));

        let tagged = engine.apply_tag("live").await.unwrap().unwrap();
        assert_eq!(tagged.name, "[live]-song.mp3");
        let untagged = engine.apply_tag("live").await.unwrap().unwrap();
        assert_eq!(untagged.name, "song.mp3");
        assert!(engine.history().undo_stack().is_empty());
    }

    #[tokio::test]
    async fn test_move_keeps_entry_and_remembers_dir() {
        let dir = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.mp4");
        std::fs::write(&a, b"x").unwrap();

        let (mut engine, rx) = engine(dir.path());
        auto_confirm(&engine, rx, 0.0);
        engine.playlist_mut().init_playlist(&[a.clone()]);
        let id = engine.playlist().files()[0].id;

        let dest = elsewhere.path().join("moved.mp4");
        let moved = engine.move_file(id, &dest).await.unwrap();
        assert_eq!(moved.id, id);
        assert_eq!(engine.playlist().files()[0].full_path, dest);
        assert!(!a.exists());
        assert_eq!(engine.settings().default_path.as_deref(), Some(elsewhere.path()));

        let saved = SettingsStore::new(dir.path().join("settings.json")).load();
        assert_eq!(saved.default_path.as_deref(), Some(elsewhere.path()));
    }

    #[tokio::test]
    async fn test_trash_selected() {
        let dir = tempfile::tempdir().unwrap();
        let paths: Vec<PathBuf> = ["a.mp4", "b.mp4", "c.mp4"]
            .iter()
            .map(|n| {
                let p = dir.path().join(n);
                std::fs::write(&p, b"x").unwrap();
                p
            })
            .collect();

        let (mut engine, rx) = engine(dir.path());
        auto_confirm(&engine, rx, 0.0);
        engine.playlist_mut().init_playlist(&paths);
        let ids: Vec<FileId> = engine.playlist().files()[..2].iter().map(|f| f.id).collect();
        engine.playlist_mut().set_selection(Selection {
            selected_id: Some(ids[0]),
            selected_ids: ids.clone(),
        });

        assert_eq!(engine.trash_selected().await.unwrap(), 2);
        assert_eq!(engine.playlist().len(), 1);
        assert_eq!(engine.playlist().files()[0].name, "c.mp4");
        assert!(!paths[0].exists());
        assert!(dir.path().join("Trash/files/a.mp4").exists());
        assert!(engine.playlist().selection().selected_ids.is_empty());
    }

    #[tokio::test]
    async fn test_sort_and_tags_persist() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, _rx) = engine(dir.path());

        engine.change_sort_order(SortOrder::DateDesc).unwrap();
        engine.toggle_group_by().unwrap();
        engine.save_tags(vec!["live".into()]).unwrap();
        engine.set_media_state(0.5, 0.1, true).unwrap();

        let saved = SettingsStore::new(dir.path().join("settings.json")).load();
        assert_eq!(saved.sort.order, SortOrder::DateDesc);
        assert!(saved.sort.group_by);
        assert_eq!(saved.tags, vec!["live".to_string()]);
        assert!(saved.audio.mute);
    }

    #[tokio::test]
    async fn test_view_settings_persist() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, mut rx) = engine(dir.path());

        engine.change_theme(Theme::Light).unwrap();
        assert!(!engine.toggle_playlist_window().unwrap());
        assert!(!engine.toggle_fit_to_window().unwrap());
        engine.change_playback_speed(1.75).unwrap();
        engine.change_seek_speed(3.0).unwrap();

        let err = engine.change_playback_speed(7.0).unwrap_err();
        assert!(matches!(err, PlayerError::InvalidSetting(_)));
        assert!(engine.change_seek_speed(f64::NAN).is_err());

        let saved = SettingsStore::new(dir.path().join("settings.json")).load();
        assert_eq!(saved.theme, Theme::Light);
        assert!(!saved.playlist_visible);
        assert!(!saved.video.fit_to_window);
        assert_eq!(saved.video.playback_speed, 1.75);
        assert_eq!(saved.video.seek_speed, 3.0);

        let mut last_video = None;
        let mut visible = None;
        while let Ok(n) = rx.try_recv() {
            match n {
                Notification::VideoSettingsChanged { video } => last_video = Some(video),
                Notification::PlaylistVisibilityChanged { visible: v } => visible = Some(v),
                _ => {}
            }
        }
        assert_eq!(last_video, Some(saved.video.clone()));
        assert_eq!(visible, Some(false));

        match engine.hello() {
            Notification::Hello { settings, .. } => assert_eq!(settings, saved),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_conversion_onto_current_is_staged() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.mp3");
        std::fs::write(&a, b"old").unwrap();

        let (mut engine, rx) = engine(dir.path());
        let mut watch = rx.resubscribe();
        auto_confirm(&engine, rx, 4.0);
        engine.playlist_mut().init_playlist(&[a.clone()]);
        let id = engine.playlist().files()[0].id;

        let plan = engine
            .plan_conversion(ConvertRequest {
                source: a.clone(),
                dest: a.clone(),
                format: player_proto::protocol::ConvertFormat::Mp3,
                options: Default::default(),
            })
            .unwrap();
        assert!(plan.replaces_current);
        assert_ne!(plan.output, a);

        std::fs::write(&plan.output, b"new").unwrap();
        engine.finish_conversion(plan, Ok(())).await;

        assert_eq!(std::fs::read(&a).unwrap(), b"new");
        assert_eq!(engine.playlist().files()[0].id, id);

        let mut ended = None;
        while let Ok(n) = watch.try_recv() {
            if let Notification::ConversionEnded { error } = n {
                ended = Some(error);
            }
        }
        assert_eq!(ended, Some(None));
    }

    #[tokio::test]
    async fn test_cancelled_conversion_ends_quietly() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, mut rx) = engine(dir.path());
        let plan = engine
            .plan_conversion(ConvertRequest {
                source: dir.path().join("a.mov"),
                dest: dir.path().join("a.mp4"),
                format: player_proto::protocol::ConvertFormat::Mp4,
                options: Default::default(),
            })
            .unwrap();
        assert!(!plan.replaces_current);

        engine
            .finish_conversion(plan, Err(PlayerError::ConversionCancelled))
            .await;

        let mut ended = None;
        while let Ok(n) = rx.try_recv() {
            if let Notification::ConversionEnded { error } = n {
                ended = Some(error);
            }
        }
        assert_eq!(ended, Some(None));
    }

    #[tokio::test]
    async fn test_failed_conversion_leaves_existing_dest() {
        let dir = tempfile::tempdir().unwrap();
        let song = dir.path().join("song.mp3");
        std::fs::write(&song, b"original").unwrap();

        let (mut engine, mut rx) = engine(dir.path());
        let request = ConvertRequest {
            source: song.clone(),
            dest: song.clone(),
            format: player_proto::protocol::ConvertFormat::Mp3,
            options: Default::default(),
        };

        let plan = engine.plan_conversion(request.clone()).unwrap();
        assert!(!plan.replaces_current);
        assert_ne!(plan.output, song);
        std::fs::write(&plan.output, b"partial").unwrap();
        let staged = plan.output.clone();
        engine
            .finish_conversion(
                plan,
                Err(PlayerError::ConversionFailed("Output same as Input #0 - exiting".into())),
            )
            .await;
        assert_eq!(std::fs::read(&song).unwrap(), b"original");
        assert!(!staged.exists());

        let mut ended = None;
        while let Ok(n) = rx.try_recv() {
            if let Notification::ConversionEnded { error } = n {
                ended = Some(error);
            }
        }
        assert_eq!(
            ended,
            Some(Some("conversion failed: Output same as Input #0 - exiting".to_string()))
        );

        let plan = engine.plan_conversion(request).unwrap();
        std::fs::write(&plan.output, b"converted").unwrap();
        engine.finish_conversion(plan, Ok(())).await;
        assert_eq!(std::fs::read(&song).unwrap(), b"converted");
    }
}
