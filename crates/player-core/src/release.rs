//! Release handshake with the playback surface.
//!
//! ```text
//! begin(ids) ── ReleaseFile{ids, request} ──► playback surface
//!     │                                            │ closes the file
//!     ▼                                            ▼
//! wait() ◄──── confirm(request, position) ◄── FileReleased{current_time, request}
//! ```
//!
//! At most one request is in flight.  A second `begin` while the first is
//! unresolved fails with `Busy`.  Every request carries a fresh number and a
//! confirmation only resolves the request whose number it echoes, so a late
//! reply to a timed-out request cannot satisfy the next one.  The confirmation is delivered through a
//! cloneable [`ReleaseHandle`] so the IPC reader can resolve it while the
//! owner of the state is suspended in `wait`.

use player_proto::model::FileId;
use player_proto::protocol::Notification;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, Mutex};
use tracing::{debug, warn};

use crate::error::{PlayerError, Result};

struct Pending {
    request: u64,
    file_ids: Vec<FileId>,
    reply: oneshot::Sender<f64>,
}

type Slot = Arc<Mutex<Option<Pending>>>;

pub struct FileRelease {
    slot: Slot,
    timeout: Duration,
    events: broadcast::Sender<Notification>,
    next_request: AtomicU64,
}

/// Resolves the in-flight request from outside the owning task.
#[derive(Clone)]
pub struct ReleaseHandle {
    slot: Slot,
}

/// A claimed release slot.  Dropping it without waiting abandons the
/// request; the slot is reclaimed by the next `begin`.
pub struct PendingRelease {
    request: u64,
    reply: oneshot::Receiver<f64>,
    slot: Slot,
    timeout: Duration,
}

impl FileRelease {
    pub fn new(timeout: Duration, events: broadcast::Sender<Notification>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
            timeout,
            events,
            next_request: AtomicU64::new(1),
        }
    }

    pub fn handle(&self) -> ReleaseHandle {
        ReleaseHandle {
            slot: self.slot.clone(),
        }
    }

    /// Claim the slot and ask the playback surface to let go of `file_ids`.
    pub async fn begin(&self, file_ids: &[FileId]) -> Result<PendingRelease> {
        let mut slot = self.slot.lock().await;
        if let Some(pending) = slot.as_ref() {
            if !pending.reply.is_closed() {
                return Err(PlayerError::Busy("file release"));
            }
            debug!("release: reclaiming abandoned request for {:?}", pending.file_ids);
        }

        let request = self.next_request.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        *slot = Some(Pending {
            request,
            file_ids: file_ids.to_vec(),
            reply: reply_tx,
        });
        drop(slot);

        debug!("release: request {} for {:?}", request, file_ids);
        let _ = self.events.send(Notification::ReleaseFile {
            file_ids: file_ids.to_vec(),
            request,
        });

        Ok(PendingRelease {
            request,
            reply: reply_rx,
            slot: self.slot.clone(),
            timeout: self.timeout,
        })
    }

    /// `begin` then `wait`: the playback position reported on release.
    pub async fn release_file(&self, file_ids: &[FileId]) -> Result<f64> {
        self.begin(file_ids).await?.wait().await
    }
}

impl PendingRelease {
    /// The number the surface must echo in `FileReleased`.
    pub fn request(&self) -> u64 {
        self.request
    }

    /// Suspend until the surface confirms or the timeout expires.
    pub async fn wait(self) -> Result<f64> {
        let PendingRelease {
            request,
            reply,
            slot,
            timeout,
        } = self;
        let outcome = tokio::time::timeout(timeout, reply).await;
        match outcome {
            Ok(Ok(position)) => Ok(position),
            Ok(Err(_)) | Err(_) => {
                let mut slot = slot.lock().await;
                if slot.as_ref().map_or(false, |p| p.request == request) {
                    if let Some(stale) = slot.take() {
                        warn!("release: no confirmation for {:?} within {:?}", stale.file_ids, timeout);
                    }
                }
                Err(PlayerError::ReleaseTimeout)
            }
        }
    }
}

impl ReleaseHandle {
    /// Deliver `FileReleased`.  A confirmation with nothing pending, or for
    /// a request other than the pending one, is ignored.
    pub async fn confirm(&self, request: u64, position: f64) {
        let mut slot = self.slot.lock().await;
        match slot.as_ref().map(|p| p.request) {
            Some(pending) if pending == request => {}
            Some(pending) => {
                warn!("release: confirmation for request {} ignored, {} is pending", request, pending);
                return;
            }
            None => {
                warn!("release: confirmation for request {} with nothing pending ignored", request);
                return;
            }
        }

        if let Some(pending) = slot.take() {
            debug!("release: confirmed {:?} at {:.2}s", pending.file_ids, position);
            if pending.reply.send(position).is_err() {
                warn!("release: confirmation for {:?} arrived after the wait ended", pending.file_ids);
            }
        }
    }

    pub async fn is_pending(&self) -> bool {
        self.slot.lock().await.is_some()
    }
}
