use crate::config::Config;
use crate::store::{HostelStore, StoreError};
use hostel_core::pipeline::{run_session, PresenceSink, Roster, SessionIo, SessionSummary};
use hostel_core::{
    Action, CameraSession, Candidate, EuclideanMatcher, FrameProcessor, Identity, MatchPolicy,
    SessionMode,
};
use chrono::NaiveDateTime;
use hostel_feed::{FeedDetector, FeedError, FeedExtractor, FeedSource, VisitorStore};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("capture feed unavailable: {0}")]
    Feed(#[from] FeedError),
    #[error("{0} camera is already running")]
    AlreadyRunning(SessionMode),
    #[error("failed to spawn session thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Everything a session thread needs besides the store.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub feed: PathBuf,
    pub tolerance: f32,
    pub policy: MatchPolicy,
    pub min_confidence: f32,
    pub frame_delay: Duration,
    /// `None` disables visitor snapshots.
    pub visitor_dir: Option<PathBuf>,
}

impl SessionSettings {
    pub fn from_config(config: &Config, mode: SessionMode) -> Self {
        Self {
            feed: match mode {
                SessionMode::Entry => config.entry_feed.clone(),
                SessionMode::Exit => config.exit_feed.clone(),
            },
            tolerance: config.tolerance,
            policy: config.match_policy,
            min_confidence: config.min_detection_confidence,
            frame_delay: config.frame_delay,
            visitor_dir: config.save_visitors.then(|| config.visitor_dir.clone()),
        }
    }
}

/// Registry reads from a session thread.
struct StoreRoster {
    store: HostelStore,
    rt: Handle,
}

impl Roster for StoreRoster {
    type Error = StoreError;

    fn candidates(&mut self) -> Result<Vec<Candidate>, StoreError> {
        self.rt.block_on(self.store.list_candidates())
    }
}

/// Log writes from a session thread.
struct StoreLog {
    store: HostelStore,
    rt: Handle,
}

impl PresenceSink for StoreLog {
    type Error = StoreError;

    fn append(&mut self, student: &Identity, action: Action) -> Result<NaiveDateTime, StoreError> {
        self.rt
            .block_on(self.store.append_log(student.id, &student.name, action))
            .map(|entry| entry.timestamp)
    }
}

struct ActiveSession {
    id: Uuid,
    stop: Arc<AtomicBool>,
    thread: JoinHandle<SessionSummary>,
}

/// One camera position (entry or exit).
#[derive(Default)]
struct Gate {
    active: Option<ActiveSession>,
    last_status: Arc<Mutex<Option<String>>>,
}

impl Gate {
    /// Join a session thread that has already returned.
    fn reap(&mut self, mode: SessionMode) {
        let finished = self
            .active
            .as_ref()
            .is_some_and(|s| s.thread.is_finished());
        if !finished {
            return;
        }
        if let Some(session) = self.active.take() {
            match session.thread.join() {
                Ok(summary) => tracing::info!(
                    session = %session.id,
                    mode = %mode,
                    frames = summary.frames,
                    logged = summary.logged,
                    visitors = summary.visitors,
                    "camera session finished"
                ),
                Err(_) => tracing::error!(session = %session.id, mode = %mode, "session thread panicked"),
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GateStatus {
    pub mode: SessionMode,
    /// "running", "stopping" or "stopped".
    pub state: &'static str,
    pub session: Option<String>,
    pub last_status: Option<String>,
}

/// Owns the entry and exit camera sessions.
pub struct Engine {
    store: HostelStore,
    rt: Handle,
    entry: Gate,
    exit: Gate,
}

impl Engine {
    pub fn new(store: HostelStore, rt: Handle) -> Self {
        Self {
            store,
            rt,
            entry: Gate::default(),
            exit: Gate::default(),
        }
    }

    fn gate_mut(&mut self, mode: SessionMode) -> &mut Gate {
        match mode {
            SessionMode::Entry => &mut self.entry,
            SessionMode::Exit => &mut self.exit,
        }
    }

    /// Start a camera session on its own thread. Returns the session id.
    ///
    /// Fails if a session for `mode` is still running or still stopping, or if
    /// the feed path does not exist. The feed itself is opened on the session
    /// thread, since opening a named pipe waits for its writer.
    pub fn start(&mut self, mode: SessionMode, settings: SessionSettings) -> Result<Uuid, EngineError> {
        let store = self.store.clone();
        let rt = self.rt.clone();
        let gate = self.gate_mut(mode);
        gate.reap(mode);
        if gate.active.is_some() {
            return Err(EngineError::AlreadyRunning(mode));
        }

        if !settings.feed.exists() {
            return Err(FeedError::NotFound(settings.feed.display().to_string()).into());
        }
        let mut session = CameraSession::new(mode);
        session.start();
        let id = session.id();

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let last_status = Arc::clone(&gate.last_status);
        if let Ok(mut slot) = last_status.lock() {
            *slot = None;
        }

        let thread = std::thread::Builder::new()
            .name(format!("hostelgate-{mode}"))
            .spawn(move || {
                let mut source = match FeedSource::open(&settings.feed) {
                    Ok(source) => source,
                    Err(e) => {
                        tracing::error!(session = %id, mode = %mode, error = %e, "capture feed unavailable");
                        if let Ok(mut slot) = last_status.lock() {
                            *slot = Some(format!("Camera unavailable: {e}"));
                        }
                        return SessionSummary::default();
                    }
                };
                let mut processor = FrameProcessor::new(
                    FeedDetector {
                        min_confidence: settings.min_confidence,
                    },
                    FeedExtractor,
                    EuclideanMatcher::new(settings.tolerance, settings.policy),
                );
                let mut io = SessionIo {
                    roster: StoreRoster {
                        store: store.clone(),
                        rt: rt.clone(),
                    },
                    log: StoreLog { store, rt },
                    visitors: settings.visitor_dir.map(VisitorStore::new),
                };
                run_session(
                    &mut session,
                    &mut source,
                    &mut processor,
                    &mut io,
                    &thread_stop,
                    settings.frame_delay,
                    |status| {
                        tracing::info!(mode = %mode, "{status}");
                        if let Ok(mut slot) = last_status.lock() {
                            *slot = Some(status.to_string());
                        }
                    },
                )
            })
            .map_err(EngineError::Spawn)?;

        gate.active = Some(ActiveSession { id, stop, thread });
        tracing::info!(session = %id, mode = %mode, "camera session started");
        Ok(id)
    }

    /// Ask the session for `mode` to stop after its current frame.
    /// Returns false if nothing was running.
    pub fn stop(&mut self, mode: SessionMode) -> bool {
        let gate = self.gate_mut(mode);
        gate.reap(mode);
        match &gate.active {
            Some(session) => {
                session.stop.store(true, Ordering::Release);
                tracing::info!(session = %session.id, mode = %mode, "camera session stop requested");
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&mut self) {
        self.stop(SessionMode::Entry);
        self.stop(SessionMode::Exit);
    }

    pub fn status(&mut self) -> Vec<GateStatus> {
        [SessionMode::Entry, SessionMode::Exit]
            .into_iter()
            .map(|mode| {
                let gate = self.gate_mut(mode);
                gate.reap(mode);
                let state = match &gate.active {
                    Some(s) if s.stop.load(Ordering::Acquire) => "stopping",
                    Some(_) => "running",
                    None => "stopped",
                };
                GateStatus {
                    mode,
                    state,
                    session: gate.active.as_ref().map(|s| s.id.to_string()),
                    last_status: gate.last_status.lock().ok().and_then(|s| s.clone()),
                }
            })
            .collect()
    }
}
