//! Playlist engine for the player daemon: sorting, shuffle navigation, the
//! playlist state machine, the file-release handshake, rename undo/redo and
//! the ffmpeg conversion driver.

pub mod engine;
pub mod error;
pub mod fileops;
pub mod navigation;
pub mod playlist;
pub mod release;
pub mod rename;
pub mod sort;
pub mod transcode;

pub use engine::{ConversionPlan, PlayerEngine};
pub use error::{PlayerError, Result};
