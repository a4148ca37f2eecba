//! The speech engine contract the playback controller drives, plus the
//! Piper-backed production implementation.

pub mod engine;
pub mod piper;

pub use engine::{EngineError, SpeechEngine, Utterance, DEFAULT_LANG, DEFAULT_RATE};
pub use piper::PiperEngine;
