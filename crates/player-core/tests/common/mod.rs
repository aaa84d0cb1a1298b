#![allow(dead_code)]

use player_core::navigation::Navigation;
use player_core::PlayerEngine;
use player_proto::protocol::Notification;
use player_proto::settings::SettingsStore;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::broadcast;

pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub engine: PlayerEngine,
    pub events: broadcast::Receiver<Notification>,
}

impl Fixture {
    /// Engine over a fresh temp dir containing `names` (each file holds its
    /// own name).  A background task plays the part of the playback surface
    /// and answers every release request with `position`.
    pub fn new(names: &[&str], position: f64) -> Self {
        let dir = tempfile::tempdir().unwrap();
        for name in names {
            std::fs::write(dir.path().join(name), name.as_bytes()).unwrap();
        }

        let (tx, rx) = broadcast::channel(1024);
        let engine = PlayerEngine::with_navigation(
            SettingsStore::new(dir.path().join("settings.json")),
            Duration::from_secs(5),
            dir.path().join("Trash"),
            Navigation::with_seed(42),
            tx,
        );

        let handle = engine.release_handle();
        let mut surface = rx.resubscribe();
        tokio::spawn(async move {
            while let Ok(n) = surface.recv().await {
                if let Notification::ReleaseFile { request, .. } = n {
                    handle.confirm(request, position).await;
                }
            }
        });

        Self {
            dir,
            engine,
            events: rx,
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn paths(&self, names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(|n| self.path(n)).collect()
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn names(&self) -> Vec<String> {
        self.engine
            .playlist()
            .files()
            .iter()
            .map(|f| f.name.clone())
            .collect()
    }

    pub fn drain(&mut self) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(n) = self.events.try_recv() {
            out.push(n);
        }
        out
    }
}
