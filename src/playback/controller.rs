use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;

use crate::speech::{EngineError, SpeechEngine, Utterance, DEFAULT_LANG, DEFAULT_RATE};

/// How often the poll reconciles the observable status with the engine flags.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Speaking,
    Paused,
    Ended,
}

/// Snapshot handed to the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlaybackStatus {
    pub speaking: bool,
}

#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    pub lang: String,
    pub rate: f32,
    pub poll_interval: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            lang: DEFAULT_LANG.to_string(),
            rate: DEFAULT_RATE,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

struct Session {
    state: SessionState,
    generation: u64,
    utterance: Option<Arc<Utterance>>,
    last_error: Option<EngineError>,
    disposed: bool,
}

impl Session {
    fn new() -> Self {
        Self {
            state: SessionState::Idle,
            generation: 0,
            utterance: None,
            last_error: None,
            disposed: false,
        }
    }
}

/// Owns the narration lifecycle for exactly one text at a time.
///
/// Commands, engine callbacks, and poll ticks all funnel through the single
/// session lock, so no handler ever observes the session mid-transition, and
/// the one current-session slot is the only place an utterance handle lives.
/// Callbacks carry the generation they were created under; a callback whose
/// generation no longer matches is from a superseded session and is dropped.
pub struct PlaybackController {
    engine: Arc<dyn SpeechEngine>,
    session: Arc<Mutex<Session>>,
    config: PlaybackConfig,
    poll: Option<PollTask>,
}

enum Transport {
    Pause,
    Resume,
    Replay(Arc<Utterance>),
}

impl PlaybackController {
    pub fn new(engine: Arc<dyn SpeechEngine>, config: PlaybackConfig) -> Self {
        let session = Arc::new(Mutex::new(Session::new()));
        let poll = PollTask::spawn(
            Arc::clone(&engine),
            Arc::clone(&session),
            config.poll_interval,
        );
        Self {
            engine,
            session,
            config,
            poll: Some(poll),
        }
    }

    /// Begins narrating `text`, superseding whatever is currently loaded.
    /// An empty text is a no-op and leaves the controller idle.
    pub fn load(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        let (generation, utterance) = {
            let mut guard = self.session.lock();
            if guard.disposed {
                return;
            }
            guard.generation += 1;
            let generation = guard.generation;
            let utterance = Arc::new(Utterance::new(
                text,
                self.config.lang.clone(),
                self.config.rate,
                self.start_callback(generation),
                self.end_callback(generation),
            ));
            guard.utterance = Some(Arc::clone(&utterance));
            guard.state = SessionState::Speaking;
            guard.last_error = None;
            (generation, utterance)
        };

        info!("narrating {} characters", text.len());
        // The previous handle is already superseded by the generation bump, so
        // a late `onend` from it cannot touch the new session.
        if let Err(err) = self.engine.cancel() {
            debug!("cancel before load failed: {err}");
        }
        if let Err(err) = self.engine.speak(utterance) {
            error!("speak command rejected: {err}");
            self.fail(generation, err);
        }
    }

    /// Pauses, resumes, or restarts narration depending on the live engine
    /// state. Does nothing until a text has been loaded.
    pub fn toggle(&self) {
        let (generation, action) = {
            let mut guard = self.session.lock();
            if guard.disposed {
                return;
            }
            let Some(utterance) = guard.utterance.clone() else {
                return;
            };
            let action = if self.engine.is_speaking() {
                if self.engine.is_paused() {
                    guard.state = SessionState::Speaking;
                    Transport::Resume
                } else {
                    guard.state = SessionState::Paused;
                    Transport::Pause
                }
            } else {
                guard.state = SessionState::Speaking;
                Transport::Replay(utterance)
            };
            (guard.generation, action)
        };

        let result = match action {
            Transport::Pause => self.engine.pause(),
            Transport::Resume => self.engine.resume(),
            Transport::Replay(utterance) => self.engine.speak(utterance),
        };
        if let Err(err) = result {
            error!("transport command failed: {err}");
            self.fail(generation, err);
        }
    }

    /// Cancels narration and discards the session. Safe to call repeatedly;
    /// a subsequent `toggle` is a no-op until the next `load`.
    pub fn stop(&self) {
        {
            let mut guard = self.session.lock();
            if guard.disposed {
                return;
            }
            guard.generation += 1;
            guard.utterance = None;
            guard.state = SessionState::Idle;
        }
        if let Err(err) = self.engine.cancel() {
            debug!("cancel on stop failed: {err}");
        }
    }

    pub fn status(&self) -> PlaybackStatus {
        PlaybackStatus {
            speaking: self.session.lock().state == SessionState::Speaking,
        }
    }

    pub fn session_state(&self) -> SessionState {
        self.session.lock().state
    }

    pub fn last_error(&self) -> Option<String> {
        self.session
            .lock()
            .last_error
            .as_ref()
            .map(|err| err.to_string())
    }

    /// Tears down the poll task and silences the engine. Further commands are
    /// no-ops. Also runs on drop, so every exit path releases the poll.
    pub fn dispose(&mut self) {
        let Some(poll) = self.poll.take() else {
            return;
        };
        {
            let mut guard = self.session.lock();
            guard.disposed = true;
            guard.generation += 1;
            guard.utterance = None;
            guard.state = SessionState::Idle;
        }
        if let Err(err) = self.engine.cancel() {
            debug!("cancel on dispose failed: {err}");
        }
        poll.stop();
    }

    fn fail(&self, generation: u64, err: EngineError) {
        let mut guard = self.session.lock();
        if guard.generation != generation {
            return;
        }
        guard.state = SessionState::Ended;
        guard.last_error = Some(err);
    }

    fn start_callback(&self, generation: u64) -> Box<dyn Fn() + Send + Sync> {
        let session = Arc::downgrade(&self.session);
        Box::new(move || {
            let Some(session) = session.upgrade() else {
                return;
            };
            let mut guard = session.lock();
            if guard.disposed || guard.generation != generation {
                debug!("ignoring stale onstart for generation {generation}");
                return;
            }
            guard.state = SessionState::Speaking;
        })
    }

    fn end_callback(&self, generation: u64) -> Box<dyn Fn() + Send + Sync> {
        let session = Arc::downgrade(&self.session);
        Box::new(move || {
            let Some(session) = session.upgrade() else {
                return;
            };
            let mut guard = session.lock();
            if guard.disposed || guard.generation != generation {
                debug!("ignoring stale onend for generation {generation}");
                return;
            }
            guard.state = SessionState::Ended;
        })
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Recurring status check on a dedicated thread, parked on a condvar so
/// `dispose` can wake and join it immediately.
struct PollTask {
    handle: Option<JoinHandle<()>>,
    shutdown: Arc<(Mutex<bool>, Condvar)>,
}

impl PollTask {
    fn spawn(
        engine: Arc<dyn SpeechEngine>,
        session: Arc<Mutex<Session>>,
        interval: Duration,
    ) -> Self {
        let shutdown = Arc::new((Mutex::new(false), Condvar::new()));
        let shutdown_for_thread = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name("voxlegere-status-poll".into())
            .spawn(move || {
                let (flag, condvar) = &*shutdown_for_thread;
                let mut stopped = flag.lock();
                while !*stopped {
                    condvar.wait_for(&mut stopped, interval);
                    if *stopped {
                        break;
                    }
                    drop(stopped);
                    reconcile(engine.as_ref(), &session);
                    stopped = flag.lock();
                }
            });
        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(err) => {
                error!("failed to spawn the status poll: {err}");
                None
            }
        };
        Self { handle, shutdown }
    }

    fn stop(self) {
        let (flag, condvar) = &*self.shutdown;
        *flag.lock() = true;
        condvar.notify_all();
        if let Some(handle) = self.handle {
            if handle.join().is_err() {
                error!("status poll thread panicked");
            }
        }
    }
}

/// Callbacks own the start/end edges; the poll only corrects drift the engine
/// never reports through a callback, such as an engine-driven pause.
fn reconcile(engine: &dyn SpeechEngine, session: &Mutex<Session>) {
    let mut guard = session.lock();
    if guard.disposed || guard.utterance.is_none() {
        return;
    }
    if !matches!(guard.state, SessionState::Speaking | SessionState::Paused) {
        return;
    }
    if engine.is_speaking() {
        guard.state = if engine.is_paused() {
            SessionState::Paused
        } else {
            SessionState::Speaking
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Command {
        Speak,
        Pause,
        Resume,
        Cancel,
    }

    #[derive(Default)]
    struct FakeEngine {
        speaking: AtomicBool,
        paused: AtomicBool,
        fail_speak: AtomicBool,
        commands: Mutex<Vec<Command>>,
        utterances: Mutex<Vec<Arc<Utterance>>>,
    }

    impl FakeEngine {
        fn commands(&self) -> Vec<Command> {
            self.commands.lock().clone()
        }

        fn speak_count(&self) -> usize {
            self.commands()
                .iter()
                .filter(|command| **command == Command::Speak)
                .count()
        }

        fn utterance(&self, index: usize) -> Arc<Utterance> {
            self.utterances.lock()[index].clone()
        }

        fn finish_current(&self) {
            self.speaking.store(false, Ordering::SeqCst);
            self.paused.store(false, Ordering::SeqCst);
            let last = self.utterances.lock().last().cloned();
            last.expect("nothing was spoken").notify_end();
        }
    }

    impl SpeechEngine for FakeEngine {
        fn speak(&self, utterance: Arc<Utterance>) -> Result<(), EngineError> {
            self.commands.lock().push(Command::Speak);
            if self.fail_speak.load(Ordering::SeqCst) {
                return Err(EngineError::Device);
            }
            self.speaking.store(true, Ordering::SeqCst);
            self.paused.store(false, Ordering::SeqCst);
            utterance.notify_start();
            self.utterances.lock().push(utterance);
            Ok(())
        }

        fn pause(&self) -> Result<(), EngineError> {
            self.commands.lock().push(Command::Pause);
            self.paused.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn resume(&self) -> Result<(), EngineError> {
            self.commands.lock().push(Command::Resume);
            self.paused.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn cancel(&self) -> Result<(), EngineError> {
            self.commands.lock().push(Command::Cancel);
            self.speaking.store(false, Ordering::SeqCst);
            self.paused.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn is_speaking(&self) -> bool {
            self.speaking.load(Ordering::SeqCst)
        }

        fn is_paused(&self) -> bool {
            self.paused.load(Ordering::SeqCst)
        }
    }

    fn controller(engine: &Arc<FakeEngine>) -> PlaybackController {
        let config = PlaybackConfig {
            poll_interval: Duration::from_millis(25),
            ..PlaybackConfig::default()
        };
        PlaybackController::new(Arc::clone(engine) as Arc<dyn SpeechEngine>, config)
    }

    #[test]
    fn toggle_without_load_is_a_noop() {
        let engine = Arc::new(FakeEngine::default());
        let controller = controller(&engine);
        controller.toggle();
        assert_eq!(controller.session_state(), SessionState::Idle);
        assert!(engine.commands().is_empty());
    }

    #[test]
    fn load_cancels_then_speaks() {
        let engine = Arc::new(FakeEngine::default());
        let controller = controller(&engine);
        controller.load("hello world");
        assert!(controller.status().speaking);
        assert_eq!(engine.commands(), vec![Command::Cancel, Command::Speak]);
    }

    #[test]
    fn empty_load_is_a_noop() {
        let engine = Arc::new(FakeEngine::default());
        let controller = controller(&engine);
        controller.load("");
        assert_eq!(controller.session_state(), SessionState::Idle);
        assert!(engine.commands().is_empty());
    }

    #[test]
    fn toggle_pauses_then_resumes_without_a_fresh_utterance() {
        let engine = Arc::new(FakeEngine::default());
        let controller = controller(&engine);
        controller.load("hello");
        controller.toggle();
        assert_eq!(controller.session_state(), SessionState::Paused);
        assert!(!controller.status().speaking);
        controller.toggle();
        assert_eq!(controller.session_state(), SessionState::Speaking);
        assert_eq!(engine.speak_count(), 1);
        assert_eq!(
            engine.commands().last().copied(),
            Some(Command::Resume)
        );
    }

    #[test]
    fn reload_supersedes_and_ignores_the_stale_onend() {
        let engine = Arc::new(FakeEngine::default());
        let controller = controller(&engine);
        controller.load("first");
        let first = engine.utterance(0);
        controller.load("second");
        // The first utterance's completion arrives after it was superseded.
        first.notify_end();
        assert_eq!(controller.session_state(), SessionState::Speaking);
        assert!(controller.status().speaking);
    }

    #[test]
    fn stale_onstart_after_stop_cannot_resurrect_the_session() {
        let engine = Arc::new(FakeEngine::default());
        let controller = controller(&engine);
        controller.load("hello");
        let utterance = engine.utterance(0);
        controller.stop();
        utterance.notify_start();
        assert_eq!(controller.session_state(), SessionState::Idle);
    }

    #[test]
    fn stop_is_idempotent_and_disables_toggle() {
        let engine = Arc::new(FakeEngine::default());
        let controller = controller(&engine);
        controller.load("hello");
        controller.stop();
        assert_eq!(controller.session_state(), SessionState::Idle);
        controller.stop();
        assert_eq!(controller.session_state(), SessionState::Idle);
        let commands_before = engine.commands().len();
        controller.toggle();
        assert_eq!(engine.commands().len(), commands_before);
    }

    #[test]
    fn natural_end_then_toggle_replays_the_same_handle() {
        let engine = Arc::new(FakeEngine::default());
        let controller = controller(&engine);
        controller.load("hello");
        engine.finish_current();
        assert_eq!(controller.session_state(), SessionState::Ended);
        assert!(!controller.status().speaking);
        controller.toggle();
        assert_eq!(controller.session_state(), SessionState::Speaking);
        assert_eq!(engine.speak_count(), 2);
        assert!(Arc::ptr_eq(&engine.utterance(0), &engine.utterance(1)));
    }

    #[test]
    fn speak_failure_surfaces_as_ended_with_an_error() {
        let engine = Arc::new(FakeEngine::default());
        engine.fail_speak.store(true, Ordering::SeqCst);
        let controller = controller(&engine);
        controller.load("hello");
        assert_eq!(controller.session_state(), SessionState::Ended);
        assert!(!controller.status().speaking);
        assert!(controller.last_error().is_some());
    }

    #[test]
    fn poll_reconciles_an_engine_driven_pause() {
        let engine = Arc::new(FakeEngine::default());
        let controller = controller(&engine);
        controller.load("hello");
        // Pause the engine behind the controller's back; only the poll can
        // observe this.
        engine.paused.store(true, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(150));
        assert_eq!(controller.session_state(), SessionState::Paused);
    }

    #[test]
    fn dispose_cancels_and_makes_further_commands_noops() {
        let engine = Arc::new(FakeEngine::default());
        let mut controller = controller(&engine);
        controller.load("hello");
        controller.dispose();
        assert_eq!(controller.session_state(), SessionState::Idle);
        assert_eq!(engine.commands().last().copied(), Some(Command::Cancel));
        let commands_before = engine.commands().len();
        controller.load("again");
        controller.toggle();
        controller.stop();
        assert_eq!(engine.commands().len(), commands_before);
        // A second dispose is a no-op as well.
        controller.dispose();
    }
}
