//! Camera session state: mode, running flag, and the per-session dedup set.

use crate::types::Action;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Which gate a camera watches. Fixes the action every match is logged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    Entry,
    Exit,
}

impl SessionMode {
    pub fn action(self) -> Action {
        match self {
            SessionMode::Entry => Action::Entry,
            SessionMode::Exit => Action::Exit,
        }
    }

    pub fn as_str(self) -> &'static str {
        self.action().as_str()
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "entry" => Ok(SessionMode::Entry),
            "exit" => Ok(SessionMode::Exit),
            other => Err(format!("unknown session mode '{other}' (expected 'entry' or 'exit')")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Stopped,
    Running,
}

/// One camera-on period.
///
/// Students logged while running are remembered so consecutive frames do not
/// log them again. The memory is dropped on every `start`, so a new session
/// may log the same student a second time.
#[derive(Debug)]
pub struct CameraSession {
    id: Uuid,
    mode: SessionMode,
    state: SessionState,
    logged: HashSet<i64>,
}

impl CameraSession {
    pub fn new(mode: SessionMode) -> Self {
        Self {
            id: Uuid::new_v4(),
            mode,
            state: SessionState::Stopped,
            logged: HashSet::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }

    /// Stopped -> Running. Clears the dedup set and assigns a fresh session id.
    pub fn start(&mut self) {
        self.id = Uuid::new_v4();
        self.logged.clear();
        self.state = SessionState::Running;
        tracing::debug!(session = %self.id, mode = %self.mode, "camera session started");
    }

    /// Running -> Stopped. The dedup set is discarded.
    pub fn stop(&mut self) {
        if self.state == SessionState::Running {
            tracing::debug!(
                session = %self.id,
                mode = %self.mode,
                logged = self.logged.len(),
                "camera session stopped"
            );
        }
        self.state = SessionState::Stopped;
        self.logged.clear();
    }

    /// Reserve a student for logging. Returns false if already logged this session.
    pub fn claim(&mut self, student_id: i64) -> bool {
        self.logged.insert(student_id)
    }

    /// Undo a claim whose log write failed, so a later frame can retry.
    pub fn release(&mut self, student_id: i64) {
        self.logged.remove(&student_id);
    }

    pub fn has_logged(&self, student_id: i64) -> bool {
        self.logged.contains(&student_id)
    }

    pub fn logged_count(&self) -> usize {
        self.logged.len()
    }
}
