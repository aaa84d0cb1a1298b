use crate::core::DaemonEvent;
use player_core::release::ReleaseHandle;
use player_proto::protocol::{Intent, Message, Notification};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// Serve the renderer attached to stdin/stdout until stdin closes.
pub fn start(
    release: ReleaseHandle,
    event_tx: mpsc::Sender<DaemonEvent>,
    broadcast_rx: broadcast::Receiver<Notification>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        serve(
            tokio::io::stdin(),
            tokio::io::stdout(),
            release,
            event_tx,
            broadcast_rx,
        )
        .await;
    })
}

/// Pump length-prefixed frames between one renderer and the core.
///
/// `FileReleased` is handed to the release handle directly; the core may be
/// parked inside a release wait and cannot read its own channel meanwhile.
/// Other intents are dropped with a warning when the core's queue is full.
pub async fn serve<R, W>(
    mut reader: R,
    mut writer: W,
    release: ReleaseHandle,
    event_tx: mpsc::Sender<DaemonEvent>,
    mut broadcast_rx: broadcast::Receiver<Notification>,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    loop {
        tokio::select! {
            result = reader.read(&mut tmp) => {
                match result {
                    Ok(0) => {
                        info!("stdio: input closed");
                        let _ = event_tx.send(DaemonEvent::Shutdown).await;
                        return;
                    }
                    Ok(n) => {
                        read_buf.extend_from_slice(&tmp[..n]);

                        while let Some(frame) = next_frame(&mut read_buf) {
                            match frame {
                                Ok(Message::Intent(Intent::FileReleased { current_time, request })) => {
                                    debug!("stdio: file released at {} (request {})", current_time, request);
                                    release.confirm(request, current_time).await;
                                }
                                Ok(Message::Intent(intent)) => {
                                    // never block here; the core may be waiting on a FileReleased
                                    // that is still sitting in this reader
                                    match event_tx.try_send(DaemonEvent::Intent(intent)) {
                                        Ok(()) => {}
                                        Err(mpsc::error::TrySendError::Full(DaemonEvent::Intent(dropped))) => {
                                            warn!("stdio: core is busy, dropping {:?}", dropped);
                                        }
                                        Err(mpsc::error::TrySendError::Full(_)) => {}
                                        Err(mpsc::error::TrySendError::Closed(_)) => {
                                            warn!("DaemonEvent channel closed");
                                            return;
                                        }
                                    }
                                }
                                Ok(Message::Notification(n)) => {
                                    debug!("stdio: ignoring notification from renderer: {:?}", n);
                                }
                                Err(FrameError::Malformed(e)) => {
                                    warn!("stdio: dropping malformed frame: {}", e)
                                }
                                Err(FrameError::TooLarge(len)) => {
                                    error!("stdio: frame of {} bytes exceeds {} byte limit, closing", len, MAX_FRAME_LEN);
                                    let _ = event_tx.send(DaemonEvent::Shutdown).await;
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        error!("stdio: read error: {}", e);
                        let _ = event_tx.send(DaemonEvent::Shutdown).await;
                        return;
                    }
                }
            }

            msg = broadcast_rx.recv() => {
                match msg {
                    Ok(notification) => {
                        if write_frame(&mut writer, notification).await.is_err() {
                            error!("stdio: output closed");
                            let _ = event_tx.send(DaemonEvent::Shutdown).await;
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("stdio: renderer missed {} notifications", n);
                        let _ = event_tx.send(DaemonEvent::Intent(Intent::GetState)).await;
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        }
    }
}

/// Largest frame body the renderer may send.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug)]
enum FrameError {
    /// Body did not parse; the frame was consumed.
    Malformed(anyhow::Error),
    /// Declared length over [`MAX_FRAME_LEN`]; the stream cannot be resynced.
    TooLarge(usize),
}

/// Take the next complete frame off the front of `buf`.  A frame whose body
/// does not parse is consumed and reported, so one bad message cannot stall
/// the stream.
fn next_frame(buf: &mut Vec<u8>) -> Option<Result<Message, FrameError>> {
    if buf.len() < 4 {
        return None;
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > MAX_FRAME_LEN {
        buf.clear();
        return Some(Err(FrameError::TooLarge(len)));
    }
    if buf.len() < 4 + len {
        return None;
    }
    let result = Message::decode(buf)
        .map(|(msg, _)| msg)
        .map_err(FrameError::Malformed);
    buf.drain(..4 + len);
    Some(result)
}

async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    notification: Notification,
) -> anyhow::Result<()> {
    let encoded = Message::Notification(notification).encode()?;
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}
