use std::sync::Arc;
use tokio::sync::Mutex;
use zbus::interface;

use crate::config::Config;
use crate::engine::{Engine, SessionSettings};
use crate::store::{HostelStore, NewStudent, StoreError};
use hostel_core::{Embedding, PresenceSummary, SessionMode};
use hostel_feed::{VisitorError, VisitorStore};

/// Shared state accessible by D-Bus method handlers.
pub struct AppState {
    pub config: Config,
    pub engine: Engine,
    pub store: HostelStore,
    pub visitors: VisitorStore,
}

/// D-Bus interface for the hostelgate daemon.
///
/// Bus name: org.hostelgate.Gate1
/// Object path: /org/hostelgate/Gate1
pub struct GateService {
    pub state: Arc<Mutex<AppState>>,
}

fn store_error(e: StoreError) -> zbus::fdo::Error {
    match e {
        StoreError::Validation(field) => {
            tracing::warn!(field, "rejected: missing required field");
            zbus::fdo::Error::InvalidArgs(format!("please fill all details: {field} is missing"))
        }
        StoreError::NotFound(id) => {
            tracing::warn!(student_id = id, "rejected: unknown student");
            zbus::fdo::Error::InvalidArgs(format!("student {id} not found"))
        }
        other => {
            tracing::error!(error = %other, "store operation failed");
            zbus::fdo::Error::Failed(other.to_string())
        }
    }
}

fn parse_mode(mode: &str) -> zbus::fdo::Result<SessionMode> {
    mode.parse().map_err(zbus::fdo::Error::InvalidArgs)
}

fn to_json<T: serde::Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

#[interface(name = "org.hostelgate.Gate1")]
impl GateService {
    /// Register a student from a photo and the embedding extracted from it.
    ///
    /// Returns the new student id.
    async fn register_student(
        &self,
        name: &str,
        roll: &str,
        room: &str,
        embedding: Vec<f64>,
        photo: Vec<u8>,
    ) -> zbus::fdo::Result<i64> {
        tracing::info!(name, roll, room, dims = embedding.len(), "register requested");

        if embedding.is_empty() {
            tracing::warn!(name, "register: no face embedding supplied");
            return Err(zbus::fdo::Error::Failed(
                "No recognizable face found in the image. Try another photo.".into(),
            ));
        }

        let student = NewStudent {
            name: name.to_string(),
            roll: roll.to_string(),
            room: room.to_string(),
            embedding: Embedding::new(embedding.into_iter().map(|v| v as f32).collect()),
            photo,
        };

        let store = self.state.lock().await.store.clone();
        store.add_student(student).await.map_err(store_error)
    }

    /// List registered students as JSON (no embeddings or photo bytes).
    async fn list_students(&self) -> zbus::fdo::Result<String> {
        let store = self.state.lock().await.store.clone();
        let students = store.list_students().await.map_err(store_error)?;
        let rows: Vec<_> = students
            .iter()
            .map(|s| {
                serde_json::json!({
                    "id": s.id,
                    "name": s.name,
                    "roll": s.roll,
                    "room": s.room,
                    "embedding_dims": s.embedding.len(),
                    "photo_bytes": s.photo.len(),
                })
            })
            .collect();
        to_json(&rows)
    }

    /// Return the stored photo of a student.
    async fn student_photo(&self, id: i64) -> zbus::fdo::Result<Vec<u8>> {
        let store = self.state.lock().await.store.clone();
        match store.get_student(id).await.map_err(store_error)? {
            Some(student) => Ok(student.photo),
            None => Err(store_error(StoreError::NotFound(id))),
        }
    }

    /// Overwrite name, roll and room. An empty `photo` keeps the current one.
    async fn update_student(
        &self,
        id: i64,
        name: &str,
        roll: &str,
        room: &str,
        photo: Vec<u8>,
    ) -> zbus::fdo::Result<()> {
        tracing::info!(student_id = id, "update requested");
        let photo = (!photo.is_empty()).then_some(photo);
        let store = self.state.lock().await.store.clone();
        store
            .update_student(id, name, roll, room, photo)
            .await
            .map_err(store_error)
    }

    /// Start the entry or exit camera. Returns the session id.
    async fn start_session(&self, mode: &str) -> zbus::fdo::Result<String> {
        let mode = parse_mode(mode)?;
        let mut state = self.state.lock().await;
        let settings = SessionSettings::from_config(&state.config, mode);
        let id = state.engine.start(mode, settings).map_err(|e| {
            tracing::error!(mode = %mode, error = %e, "start session failed");
            zbus::fdo::Error::Failed(e.to_string())
        })?;
        Ok(id.to_string())
    }

    /// Stop the entry or exit camera. Returns false if it was not running.
    async fn stop_session(&self, mode: &str) -> zbus::fdo::Result<bool> {
        let mode = parse_mode(mode)?;
        Ok(self.state.lock().await.engine.stop(mode))
    }

    /// Log entries as JSON, most recent first. `limit == 0` returns all.
    async fn history(&self, limit: u32) -> zbus::fdo::Result<String> {
        let store = self.state.lock().await.store.clone();
        let entries = store.history(limit as usize).await.map_err(store_error)?;
        to_json(&entries)
    }

    /// Last logged action of a student: "entry", "exit" or "none".
    async fn last_action(&self, id: i64) -> zbus::fdo::Result<String> {
        let store = self.state.lock().await.store.clone();
        let action = store.last_action(id).await.map_err(store_error)?;
        Ok(action.map_or("none", |a| a.as_str()).to_string())
    }

    /// Presence summary (inside/outside, room occupancy, today's counts) as JSON.
    async fn presence(&self) -> zbus::fdo::Result<String> {
        let (store, visitors) = {
            let state = self.state.lock().await;
            (state.store.clone(), state.visitors.clone())
        };
        let students = store.list_students().await.map_err(store_error)?;
        let last = store.last_actions().await.map_err(store_error)?;
        let log = store.history(0).await.map_err(store_error)?;
        let visitors_today = visitors.count_today().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "visitor count failed");
            0
        });

        let summary = PresenceSummary::build(
            students.iter().map(|s| (s, last.get(&s.id).copied())),
            &log,
            chrono::Local::now().date_naive(),
            visitors_today,
        );
        to_json(&summary)
    }

    /// Visitor snapshots as JSON: today's count and all artifacts, newest first.
    async fn visitors(&self) -> zbus::fdo::Result<String> {
        let visitors = self.state.lock().await.visitors.clone();
        let failed = |e: VisitorError| zbus::fdo::Error::Failed(e.to_string());
        let today = visitors.count_today().map_err(failed)?;
        let artifacts = visitors.list().map_err(failed)?;
        Ok(serde_json::json!({
            "directory": visitors.dir().display().to_string(),
            "today": today,
            "artifacts": artifacts,
        })
        .to_string())
    }

    /// Delete one visitor snapshot by file name.
    async fn delete_visitor(&self, file_name: &str) -> zbus::fdo::Result<()> {
        let visitors = self.state.lock().await.visitors.clone();
        visitors.remove(file_name).map_err(|e| match &e {
            VisitorError::InvalidName(_) | VisitorError::NotFound(_) => {
                tracing::warn!(file = file_name, error = %e, "delete visitor rejected");
                zbus::fdo::Error::InvalidArgs(e.to_string())
            }
            other => {
                tracing::error!(file = file_name, error = %other, "delete visitor failed");
                zbus::fdo::Error::Failed(other.to_string())
            }
        })
    }

    /// Return daemon status information as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let mut state = self.state.lock().await;
        let students = match state.store.count_students().await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(error = %e, "status: student count unavailable");
                0
            }
        };
        let cameras = state.engine.status();

        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "students": students,
            "tolerance": state.config.tolerance,
            "match_policy": format!("{:?}", state.config.match_policy).to_lowercase(),
            "cameras": cameras,
        })
        .to_string())
    }
}
