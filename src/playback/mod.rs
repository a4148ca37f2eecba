//! Narration lifecycle: the playback controller and its observable status.

pub mod controller;

pub use controller::{
    PlaybackConfig, PlaybackController, PlaybackStatus, SessionState, DEFAULT_POLL_INTERVAL,
};
