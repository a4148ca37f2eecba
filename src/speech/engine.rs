use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// Default narration locale.
pub const DEFAULT_LANG: &str = "pt-BR";
/// Default speaking rate; 1.0 is the voice's natural pace.
pub const DEFAULT_RATE: f32 = 1.0;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("voice model not found at {0}")]
    VoiceNotFound(PathBuf),
    #[error("failed to spawn the synthesis process: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("synthesis process exited with status {status}: {stderr}")]
    Synthesis { status: i32, stderr: String },
    #[error("synthesized audio could not be decoded: {0}")]
    Decode(String),
    #[error("no audio playback device available")]
    Device,
    #[error("failed to prepare audio output: {0}")]
    Output(#[source] std::io::Error),
}

type Callback = Box<dyn Fn() + Send + Sync>;

/// One narration request: the text, the voice parameters, and the lifecycle
/// callbacks the engine fires around playback.
pub struct Utterance {
    text: String,
    lang: String,
    rate: f32,
    on_start: Callback,
    on_end: Callback,
}

impl Utterance {
    pub fn new(
        text: impl Into<String>,
        lang: impl Into<String>,
        rate: f32,
        on_start: Callback,
        on_end: Callback,
    ) -> Self {
        Self {
            text: text.into(),
            lang: lang.into(),
            rate,
            on_start,
            on_end,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn lang(&self) -> &str {
        &self.lang
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    /// Engines call this when audible playback begins.
    pub fn notify_start(&self) {
        (self.on_start)();
    }

    /// Engines call this when playback finishes, is cancelled, or fails
    /// before producing any audio.
    pub fn notify_end(&self) {
        (self.on_end)();
    }
}

impl fmt::Debug for Utterance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Utterance")
            .field("lang", &self.lang)
            .field("rate", &self.rate)
            .field("chars", &self.text.len())
            .finish()
    }
}

/// Transport contract of the external speech engine.
///
/// The engine holds at most one utterance at a time; `speaking`/`paused`
/// reflect live engine state. `notify_start`/`notify_end` fire at most once
/// per playback, and `notify_end` is not guaranteed when `cancel` pre-empts
/// the utterance, so callers must treat their own `cancel` as authoritative.
pub trait SpeechEngine: Send + Sync {
    fn speak(&self, utterance: Arc<Utterance>) -> Result<(), EngineError>;
    fn pause(&self) -> Result<(), EngineError>;
    fn resume(&self) -> Result<(), EngineError>;
    fn cancel(&self) -> Result<(), EngineError>;
    fn is_speaking(&self) -> bool;
    fn is_paused(&self) -> bool;
}
