//! Types shared between the player daemon and its renderers: the media file
//! model, the intent/notification protocol, configuration and the settings
//! snapshot.

pub mod config;
pub mod model;
pub mod platform;
pub mod protocol;
pub mod settings;
