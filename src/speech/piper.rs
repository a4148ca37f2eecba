use std::fs::File;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use log::{debug, error, warn};
use parking_lot::Mutex;
use rodio::{Decoder, OutputStream, Sink};

use super::engine::{EngineError, SpeechEngine, Utterance};

#[derive(Default)]
struct EngineInner {
    sink: Option<Arc<Sink>>,
    synthesizing: bool,
}

/// Drives a local Piper subprocess for synthesis and a rodio sink for
/// playback, presented as one utterance-oriented speech engine.
///
/// `speak` returns immediately; a worker thread synthesizes the WAV, starts
/// the sink, and fires the utterance callbacks. An epoch counter invalidates
/// a synthesis still in flight when `cancel` or a newer `speak` arrives, so
/// an orphaned subprocess result can never start playback. Callbacks are
/// always invoked without the engine lock held.
pub struct PiperEngine {
    model_path: PathBuf,
    output_dir: PathBuf,
    inner: Arc<Mutex<EngineInner>>,
    epoch: Arc<AtomicU64>,
}

impl PiperEngine {
    pub fn new(model_path: PathBuf, output_dir: PathBuf) -> Result<Self, EngineError> {
        if !model_path.exists() {
            return Err(EngineError::VoiceNotFound(model_path));
        }
        std::fs::create_dir_all(&output_dir).map_err(EngineError::Output)?;
        Ok(Self {
            model_path,
            output_dir,
            inner: Arc::new(Mutex::new(EngineInner::default())),
            epoch: Arc::new(AtomicU64::new(0)),
        })
    }

    /// `VOXLEGERE_PIPER_COMMAND` overrides the synthesis command (split
    /// shell-style); otherwise a bundled `runtime/piper` executable is
    /// preferred, with `python -m piper` as the fallback.
    fn resolve_command() -> Result<Command, EngineError> {
        if let Some(raw) = std::env::var_os("VOXLEGERE_PIPER_COMMAND") {
            let raw = raw.to_string_lossy().into_owned();
            let mut parts: Vec<String> = shlex::Shlex::new(&raw).collect();
            if parts.is_empty() {
                return Err(EngineError::Spawn(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "VOXLEGERE_PIPER_COMMAND is empty",
                )));
            }
            let mut command = Command::new(parts.remove(0));
            command.args(parts);
            return Ok(command);
        }

        let bundled = PathBuf::from("runtime/piper").join(if cfg!(windows) {
            "piper.exe"
        } else {
            "piper"
        });
        if bundled.exists() {
            return Ok(Command::new(bundled));
        }

        match which::which("python") {
            Ok(python) => {
                let mut command = Command::new(python);
                command.args(["-m", "piper"]);
                Ok(command)
            }
            Err(_) => Err(EngineError::Spawn(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "neither a bundled piper nor python is available",
            ))),
        }
    }

    fn synthesize(model: &Path, wav_path: &Path, utterance: &Utterance) -> Result<(), EngineError> {
        debug!(
            "synthesizing {} characters for locale {}",
            utterance.text().len(),
            utterance.lang()
        );
        let mut command = Self::resolve_command()?;
        command.arg("--model").arg(model);
        command.arg("--output_file").arg(wav_path);
        let rate = utterance.rate();
        if rate > 0.0 {
            // Piper scales duration, so a faster rate means a shorter scale.
            command
                .arg("--length_scale")
                .arg(format!("{:.3}", 1.0 / rate));
        }

        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(EngineError::Spawn)?;
        {
            let stdin = child.stdin.as_mut().ok_or_else(|| {
                EngineError::Spawn(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "piper stdin unavailable",
                ))
            })?;
            stdin
                .write_all(utterance.text().as_bytes())
                .map_err(EngineError::Spawn)?;
        }

        let output = child.wait_with_output().map_err(EngineError::Spawn)?;
        if !output.status.success() {
            let status = output.status.code().unwrap_or_default();
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(EngineError::Synthesis { status, stderr });
        }
        Ok(())
    }

    fn start_playback(wav_path: &Path) -> Result<(Arc<Sink>, OutputStream), EngineError> {
        let file = File::open(wav_path).map_err(|err| EngineError::Decode(err.to_string()))?;
        let decoder =
            Decoder::new(BufReader::new(file)).map_err(|err| EngineError::Decode(err.to_string()))?;
        let (stream, handle) = OutputStream::try_default().map_err(|_| EngineError::Device)?;
        let sink = Sink::try_new(&handle).map_err(|err| EngineError::Decode(err.to_string()))?;
        sink.append(decoder);
        sink.play();
        Ok((Arc::new(sink), stream))
    }
}

impl SpeechEngine for PiperEngine {
    fn speak(&self, utterance: Arc<Utterance>) -> Result<(), EngineError> {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let wav_path = self.output_dir.join(format!("utterance-{epoch}.wav"));
        let model = self.model_path.clone();
        let inner = Arc::clone(&self.inner);
        let epoch_counter = Arc::clone(&self.epoch);

        {
            let mut guard = self.inner.lock();
            if let Some(sink) = guard.sink.take() {
                sink.stop();
            }
            guard.synthesizing = true;
        }

        thread::Builder::new()
            .name("voxlegere-speak".into())
            .spawn(move || {
                if let Err(err) = Self::synthesize(&model, &wav_path, &utterance) {
                    error!("synthesis failed: {err}");
                    {
                        let mut guard = inner.lock();
                        if epoch_counter.load(Ordering::SeqCst) == epoch {
                            guard.synthesizing = false;
                        }
                    }
                    utterance.notify_end();
                    return;
                }

                if epoch_counter.load(Ordering::SeqCst) != epoch {
                    debug!("utterance {epoch} superseded during synthesis");
                    return;
                }

                let (sink, _stream) = match Self::start_playback(&wav_path) {
                    Ok(pair) => pair,
                    Err(err) => {
                        error!("playback failed: {err}");
                        {
                            let mut guard = inner.lock();
                            if epoch_counter.load(Ordering::SeqCst) == epoch {
                                guard.synthesizing = false;
                            }
                        }
                        utterance.notify_end();
                        return;
                    }
                };

                {
                    let mut guard = inner.lock();
                    if epoch_counter.load(Ordering::SeqCst) != epoch {
                        // Cancelled while the sink was being prepared.
                        sink.stop();
                        return;
                    }
                    guard.synthesizing = false;
                    guard.sink = Some(Arc::clone(&sink));
                }

                utterance.notify_start();
                sink.sleep_until_end();
                {
                    let mut guard = inner.lock();
                    let is_current = guard
                        .sink
                        .as_ref()
                        .map(|current| Arc::ptr_eq(current, &sink))
                        .unwrap_or(false);
                    if is_current {
                        guard.sink = None;
                    }
                }
                utterance.notify_end();
                if let Err(err) = std::fs::remove_file(&wav_path) {
                    warn!("could not remove {}: {err}", wav_path.display());
                }
            })
            .map_err(EngineError::Spawn)?;
        Ok(())
    }

    fn pause(&self) -> Result<(), EngineError> {
        if let Some(sink) = self.inner.lock().sink.as_ref() {
            sink.pause();
        }
        Ok(())
    }

    fn resume(&self) -> Result<(), EngineError> {
        if let Some(sink) = self.inner.lock().sink.as_ref() {
            sink.play();
        }
        Ok(())
    }

    fn cancel(&self) -> Result<(), EngineError> {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.inner.lock();
        guard.synthesizing = false;
        if let Some(sink) = guard.sink.take() {
            sink.stop();
        }
        Ok(())
    }

    fn is_speaking(&self) -> bool {
        let guard = self.inner.lock();
        guard.synthesizing
            || guard
                .sink
                .as_ref()
                .map(|sink| !sink.empty())
                .unwrap_or(false)
    }

    fn is_paused(&self) -> bool {
        self.inner
            .lock()
            .sink
            .as_ref()
            .map(|sink| sink.is_paused())
            .unwrap_or(false)
    }
}
