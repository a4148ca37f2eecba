use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use log::info;

use crate::extract::{DocumentExtractor, DocumentReadError, MediaKind};
use crate::playback::{PlaybackConfig, PlaybackController};
use crate::speech::{PiperEngine, SpeechEngine};
use crate::voices;

pub struct ReaderOptions {
    pub lang: String,
    pub rate: f32,
    pub voices_dir: PathBuf,
    pub output_dir: PathBuf,
}

/// Application wiring: one extractor and one playback controller per process.
pub struct ReaderState {
    extractor: DocumentExtractor,
    controller: PlaybackController,
    uploads: AtomicU64,
}

impl ReaderState {
    pub fn initialise(options: &ReaderOptions) -> Result<Self> {
        let voice = voices::default_voice(&options.voices_dir, &options.lang)
            .context("failed to resolve a narration voice")?;
        info!("narrating with voice {} ({:?})", voice.id, voice.language);

        let engine = PiperEngine::new(voice.model_path, options.output_dir.clone())
            .context("failed to initialise the speech engine")?;
        let config = PlaybackConfig {
            lang: options.lang.clone(),
            rate: options.rate,
            ..PlaybackConfig::default()
        };
        Ok(Self::with_engine(Arc::new(engine), config))
    }

    /// Test seam: any engine honouring the transport contract will do.
    pub fn with_engine(engine: Arc<dyn SpeechEngine>, config: PlaybackConfig) -> Self {
        Self {
            extractor: DocumentExtractor::new(),
            controller: PlaybackController::new(engine, config),
            uploads: AtomicU64::new(0),
        }
    }

    /// Reads, extracts, and immediately narrates `path`, returning the
    /// transcript for display.
    ///
    /// Each call takes an upload ticket; if a newer open supersedes this one
    /// while it is extracting, the superseded result is discarded (`None`)
    /// and never reaches the controller. A failed extraction leaves current
    /// playback untouched.
    pub fn open(&self, path: &Path) -> Result<Option<String>, DocumentReadError> {
        let ticket = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
        let kind = MediaKind::from_path(path);
        let bytes = fs::read(path)?;
        let text = self.extractor.extract(kind, &bytes)?;
        if self.uploads.load(Ordering::SeqCst) != ticket {
            info!("discarding superseded extraction of {}", path.display());
            return Ok(None);
        }
        info!(
            "opened {} as {:?} ({} characters)",
            path.display(),
            kind,
            text.len()
        );
        self.controller.load(&text);
        Ok(Some(text))
    }

    pub fn controller(&self) -> &PlaybackController {
        &self.controller
    }

    pub fn shutdown(&mut self) {
        self.controller.dispose();
    }
}
