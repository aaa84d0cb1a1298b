use player_proto::model::FileId;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PlayerError>;

#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("file name \"{0}\" exists")]
    NameCollision(String),

    #[error("{0} already in progress")]
    Busy(&'static str),

    #[error("playback surface did not release the file in time")]
    ReleaseTimeout,

    #[error("conversion failed: {0}")]
    ConversionFailed(String),

    #[error("conversion cancelled")]
    ConversionCancelled,

    #[error("probe failed: {0}")]
    Probe(String),

    #[error("no playlist entry {0}")]
    UnknownFile(FileId),

    #[error("invalid setting: {0}")]
    InvalidSetting(String),

    #[error("could not save settings: {0}")]
    Settings(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PlayerError {
    /// Cancellation is reported to the user as a plain "ended", not an error.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, PlayerError::ConversionCancelled)
    }
}
