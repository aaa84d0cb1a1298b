/// DaemonCore: single owner of the playlist engine.
///
/// All inputs arrive as `DaemonEvent`s on one mpsc channel and are handled
/// in order.  Slow work (conversion, probing) runs in spawned tasks that
/// report back through the same channel.  `FileReleased` does not pass
/// through here: the stdio reader hands it straight to the release handle,
/// because the core may be suspended waiting for exactly that message.
use player_core::release::ReleaseHandle;
use player_core::transcode::Transcoder;
use player_core::{ConversionPlan, PlayerEngine, PlayerError};
use player_proto::config::Config;
use player_proto::model::MediaFile;
use player_proto::protocol::{Intent, MediaMetadata, Notification, Surface};
use player_proto::settings::SettingsStore;
use std::path::PathBuf;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::clipboard;

// ── DaemonEvent ───────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum DaemonEvent {
    /// A request from a renderer.
    Intent(Intent),
    /// A spawned conversion finished, failed or was cancelled.
    ConversionFinished {
        plan: ConversionPlan,
        result: player_core::Result<()>,
    },
    /// A spawned probe finished.
    MetadataReady {
        file: MediaFile,
        result: player_core::Result<MediaMetadata>,
    },
    /// stdin closed or the process was asked to stop.
    Shutdown,
}

enum Flow {
    Continue,
    Stop,
}

// ── DaemonCore ────────────────────────────────────────────────────────────────

pub struct DaemonCore {
    engine: PlayerEngine,
    transcoder: Transcoder,
    event_tx: mpsc::Sender<DaemonEvent>,
    broadcast_tx: broadcast::Sender<Notification>,
    /// Paths from the command line, loaded once the loop starts.
    startup_paths: Vec<PathBuf>,
    /// The running conversion task, awaited on shutdown so it can clean up.
    conversion: Option<JoinHandle<()>>,
}

impl DaemonCore {
    pub fn new(
        config: &Config,
        startup_paths: Vec<PathBuf>,
        broadcast_tx: broadcast::Sender<Notification>,
        event_tx: mpsc::Sender<DaemonEvent>,
    ) -> Self {
        let engine = PlayerEngine::new(
            SettingsStore::new(config.daemon.settings_file.clone()),
            config.release.timeout(),
            config.paths.trash_dir.clone(),
            broadcast_tx.clone(),
        );
        let transcoder = Transcoder::from_config(&config.transcoder);

        Self {
            engine,
            transcoder,
            event_tx,
            broadcast_tx,
            startup_paths,
            conversion: None,
        }
    }

    pub fn release_handle(&self) -> ReleaseHandle {
        self.engine.release_handle()
    }

    fn emit(&self, notification: Notification) {
        let _ = self.broadcast_tx.send(notification);
    }

    pub async fn run(mut self, mut event_rx: mpsc::Receiver<DaemonEvent>) -> anyhow::Result<()> {
        info!("DaemonCore: starting event loop");
        self.emit(self.engine.hello());

        let startup = std::mem::take(&mut self.startup_paths);
        if !startup.is_empty() {
            info!("DaemonCore: opening {} paths from the command line", startup.len());
            self.engine.playlist_mut().init_playlist(&startup);
        }

        loop {
            let evt = event_rx.recv().await;
            match evt {
                None => {
                    info!("DaemonCore: event channel closed, shutting down");
                    break;
                }

                Some(DaemonEvent::Shutdown) => {
                    info!("DaemonCore: shutdown requested");
                    break;
                }

                Some(DaemonEvent::Intent(intent)) => {
                    debug!("DaemonCore: intent {:?}", intent);
                    match self.handle_intent(intent).await {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Stop) => break,
                        Err(e) => {
                            error!("DaemonCore: intent failed: {}", e);
                            self.emit(Notification::Error {
                                message: e.to_string(),
                            });
                        }
                    }
                }

                Some(DaemonEvent::ConversionFinished { plan, result }) => {
                    self.conversion = None;
                    self.finish_conversion(plan, result).await;
                }

                Some(DaemonEvent::MetadataReady { file, result }) => match result {
                    Ok(metadata) => self.emit(Notification::Metadata { file, metadata }),
                    Err(e) => self.emit(Notification::Error {
                        message: e.to_string(),
                    }),
                },
            }
        }

        self.cleanup(&mut event_rx).await;
        Ok(())
    }

    async fn finish_conversion(&mut self, plan: ConversionPlan, result: player_core::Result<()>) {
        if let Err(e) = &result {
            if !e.is_cancellation() {
                warn!("DaemonCore: conversion to {} failed: {}", plan.request.dest.display(), e);
            }
        }
        self.engine.finish_conversion(plan, result).await;
    }

    /// Stop a running conversion and let it remove its output before the
    /// runtime goes away.
    async fn cleanup(&mut self, event_rx: &mut mpsc::Receiver<DaemonEvent>) {
        if self.transcoder.cancel() {
            info!("DaemonCore: waiting for the conversion to stop");
        }
        if let Some(mut handle) = self.conversion.take() {
            // keep draining so the task's final send cannot stall on a full queue
            loop {
                tokio::select! {
                    joined = &mut handle => {
                        if let Err(e) = joined {
                            error!("DaemonCore: conversion task failed: {}", e);
                        }
                        break;
                    }
                    Some(evt) = event_rx.recv() => {
                        if let DaemonEvent::ConversionFinished { plan, result } = evt {
                            self.finish_conversion(plan, result).await;
                        }
                    }
                }
            }
        }
        while let Ok(evt) = event_rx.try_recv() {
            if let DaemonEvent::ConversionFinished { plan, result } = evt {
                self.finish_conversion(plan, result).await;
            }
        }

        if let Err(e) = self.engine.save_settings() {
            error!("DaemonCore: {}", e);
        }
        info!("DaemonCore: stopped");
    }

    async fn handle_intent(&mut self, intent: Intent) -> player_core::Result<Flow> {
        match intent {
            // ── playlist ─────────────────────────────────────────────────────
            Intent::InitPlaylist { paths } => self.engine.playlist_mut().init_playlist(&paths),
            Intent::AddToPlaylist { paths } => self.engine.playlist_mut().add_to_playlist(&paths),
            Intent::DropFiles { paths, target } => match target {
                Surface::Player => self.engine.playlist_mut().init_playlist(&paths),
                Surface::Playlist => self.engine.playlist_mut().add_to_playlist(&paths),
            },
            Intent::RemoveFromPlaylist { ids } => {
                self.engine.playlist_mut().remove_from_playlist(&ids)
            }
            Intent::RemoveSelected => self.engine.remove_selected(),
            Intent::ClearPlaylist => self.engine.playlist_mut().clear_playlist(),
            Intent::ChangeIndex { direction } => {
                self.engine.playlist_mut().change_index(direction)
            }
            Intent::SelectFile { index } => self.engine.playlist_mut().select_file(index),
            Intent::ChangePlaylistItemOrder { from, to } => {
                self.engine.playlist_mut().change_item_order(from, to)
            }
            Intent::ToggleGroupBy => {
                self.engine.toggle_group_by()?;
            }
            Intent::ChangeSortOrder { order } => {
                self.engine.change_sort_order(order)?;
            }
            Intent::ToggleShuffle => {
                let enabled = self.engine.playlist_mut().toggle_shuffle();
                info!("DaemonCore: shuffle {}", if enabled { "on" } else { "off" });
            }
            Intent::SelectionChanged { selection } => {
                self.engine.playlist_mut().set_selection(selection)
            }

            // ── playback surface ─────────────────────────────────────────────
            Intent::PlayStatusChanged { status } => self.engine.playlist_mut().set_status(status),
            Intent::FileReleased { current_time, request } => {
                // normally routed by the reader; accept it here too
                self.engine.release_handle().confirm(request, current_time).await;
            }
            Intent::MediaStateChanged {
                volume,
                amp_level,
                mute,
            } => self.engine.set_media_state(volume, amp_level, mute)?,

            // ── view settings ────────────────────────────────────────────────
            Intent::ChangeTheme { theme } => self.engine.change_theme(theme)?,
            Intent::TogglePlaylistWindow => {
                self.engine.toggle_playlist_window()?;
            }
            Intent::ToggleFitToWindow => {
                self.engine.toggle_fit_to_window()?;
            }
            Intent::ChangePlaybackSpeed { speed } => self.engine.change_playback_speed(speed)?,
            Intent::ChangeSeekSpeed { speed } => self.engine.change_seek_speed(speed)?,

            // ── file operations ──────────────────────────────────────────────
            Intent::Rename { id, name } => {
                self.engine.rename(id, &name).await?;
            }
            Intent::UndoRename => {
                self.engine.undo_rename().await?;
            }
            Intent::RedoRename => {
                self.engine.redo_rename().await?;
            }
            Intent::TrashSelected => {
                let count = self.engine.trash_selected().await?;
                info!("DaemonCore: trashed {} files", count);
            }
            Intent::MoveFile { id, dest } => {
                self.engine.move_file(id, &dest).await?;
            }
            Intent::ApplyTag { tag } => {
                self.engine.apply_tag(&tag).await?;
            }
            Intent::SaveTags { tags } => self.engine.save_tags(tags)?,
            Intent::CopyFileNames { full_path } => {
                let text = self.engine.selected_names(full_path);
                if !text.is_empty() {
                    clipboard::copy_text(&text).map_err(clipboard_error)?;
                }
            }
            Intent::PasteFilePaths => {
                let text = clipboard::paste_text().map_err(clipboard_error)?;
                let added = self.engine.paste_paths(&text);
                debug!("DaemonCore: pasted {} paths", added);
            }
            Intent::ShowMetadata => self.spawn_probe(),

            // ── conversion ───────────────────────────────────────────────────
            Intent::Convert { request } => {
                let slot = self.transcoder.claim()?;
                let plan = self.engine.plan_conversion(request)?;
                let transcoder = self.transcoder.clone();
                let tx = self.event_tx.clone();
                self.conversion = Some(tokio::spawn(async move {
                    let result = transcoder.convert(slot, &plan.request, &plan.output).await;
                    let _ = tx.send(DaemonEvent::ConversionFinished { plan, result }).await;
                }));
            }
            Intent::CancelConvert => {
                if !self.transcoder.cancel() {
                    debug!("DaemonCore: no conversion to cancel");
                }
            }

            // ── system ───────────────────────────────────────────────────────
            Intent::GetState => self.emit(self.engine.hello()),
            Intent::Shutdown => return Ok(Flow::Stop),
        }
        Ok(Flow::Continue)
    }

    fn spawn_probe(&self) {
        let Some(file) = self.engine.playlist().anchor_file().cloned() else {
            debug!("DaemonCore: metadata requested with nothing selected");
            return;
        };
        let transcoder = self.transcoder.clone();
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = transcoder.probe(&file.full_path).await;
            let _ = tx.send(DaemonEvent::MetadataReady { file, result }).await;
        });
    }
}

fn clipboard_error(e: anyhow::Error) -> PlayerError {
    PlayerError::Io(std::io::Error::other(format!("clipboard: {}", e)))
}
