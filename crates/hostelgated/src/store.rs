use chrono::{Local, NaiveDateTime};
use hostel_core::codec::{self, CodecError};
use hostel_core::{Action, Candidate, Embedding, LogEntry, StudentRecord, TIMESTAMP_FORMAT};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tokio_rusqlite::Connection;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] tokio_rusqlite::Error),
    #[error("rusqlite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),
    #[error("missing required field: {0}")]
    Validation(&'static str),
    #[error("student {0} not found")]
    NotFound(i64),
    #[error("stored embedding is corrupt: {0}")]
    Codec(#[from] CodecError),
    #[error("stored action is invalid: {0}")]
    InvalidAction(String),
    #[error("stored timestamp is invalid: {0}")]
    InvalidTimestamp(String),
}

/// Fields of a student at registration time.
#[derive(Debug, Clone)]
pub struct NewStudent {
    pub name: String,
    pub roll: String,
    pub room: String,
    pub embedding: Embedding,
    pub photo: Vec<u8>,
}

/// SQLite-backed student registry and presence log.
///
/// Every method is a single statement on the connection's worker thread, so
/// readers never observe a partial write. The log table is append-only.
#[derive(Clone)]
pub struct HostelStore {
    conn: Connection,
}

type StudentRow = (i64, String, String, String, Vec<u8>, Vec<u8>);
type LogRow = (i64, i64, String, String, String);

impl HostelStore {
    /// Open (or create) the database at the given path and run migrations.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        if db_path != Path::new(":memory:") {
            if let Some(parent) = db_path.parent() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    tracing::warn!(dir = %parent.display(), error = %e, "cannot create database directory");
                }
            }
        }

        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 CREATE TABLE IF NOT EXISTS students (
                     id INTEGER PRIMARY KEY AUTOINCREMENT,
                     name TEXT NOT NULL,
                     roll TEXT NOT NULL,
                     room TEXT NOT NULL,
                     embedding BLOB NOT NULL,
                     photo BLOB NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS logs (
                     id INTEGER PRIMARY KEY AUTOINCREMENT,
                     student_id INTEGER NOT NULL,
                     name TEXT NOT NULL,
                     action TEXT NOT NULL,
                     timestamp TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_logs_student ON logs(student_id, timestamp);",
            )?;
            Ok(())
        })
        .await?;

        tracing::debug!(path = %db_path.display(), "store opened");
        Ok(Self { conn })
    }

    // ── Student registry ──────────────────────────────────────────────────────

    /// Register a student. Returns the new id.
    pub async fn add_student(&self, student: NewStudent) -> Result<i64, StoreError> {
        require("name", &student.name)?;
        require("roll", &student.roll)?;
        require("room", &student.room)?;
        if student.photo.is_empty() {
            return Err(StoreError::Validation("photo"));
        }
        if !student.embedding.is_usable() {
            return Err(StoreError::Validation("embedding"));
        }

        let blob = codec::encode_embedding(&student.embedding)?;
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO students (name, roll, room, embedding, photo)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![
                        student.name.trim(),
                        student.roll.trim(),
                        student.room.trim(),
                        blob,
                        student.photo
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;

        tracing::info!(student_id = id, "student registered");
        Ok(id)
    }

    /// All students in registration order.
    pub async fn list_students(&self) -> Result<Vec<StudentRecord>, StoreError> {
        let rows: Vec<StudentRow> = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, roll, room, embedding, photo FROM students ORDER BY id",
                )?;
                let rows = stmt.query_map([], student_row)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?;

        rows.into_iter().map(to_student).collect()
    }

    pub async fn get_student(&self, id: i64) -> Result<Option<StudentRecord>, StoreError> {
        let row: Option<StudentRow> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, roll, room, embedding, photo FROM students WHERE id = ?1",
                )?;
                let mut rows = stmt.query_map([id], student_row)?;
                let row = rows.next().transpose()?;
                Ok(row)
            })
            .await?;

        row.map(to_student).transpose()
    }

    /// The matcher's view of the registry, in registration order. Photos are not read.
    pub async fn list_candidates(&self) -> Result<Vec<Candidate>, StoreError> {
        let rows: Vec<(i64, String, Vec<u8>)> = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT id, name, embedding FROM students ORDER BY id")?;
                let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?;

        rows.into_iter()
            .map(|(id, name, blob)| {
                Ok::<_, StoreError>(Candidate {
                    id,
                    name,
                    embedding: codec::decode_embedding(&blob)?,
                })
            })
            .collect()
    }

    /// Overwrite name, roll and room; replace the photo only when given.
    /// The embedding is never touched.
    pub async fn update_student(
        &self,
        id: i64,
        name: &str,
        roll: &str,
        room: &str,
        photo: Option<Vec<u8>>,
    ) -> Result<(), StoreError> {
        require("name", name)?;
        require("roll", roll)?;
        require("room", room)?;
        if photo.as_ref().is_some_and(|p| p.is_empty()) {
            return Err(StoreError::Validation("photo"));
        }

        let (name, roll, room) = (
            name.trim().to_string(),
            roll.trim().to_string(),
            room.trim().to_string(),
        );
        let affected = self
            .conn
            .call(move |conn| {
                let affected = match photo {
                    Some(photo) => conn.execute(
                        "UPDATE students SET name = ?1, roll = ?2, room = ?3, photo = ?4 WHERE id = ?5",
                        rusqlite::params![name, roll, room, photo, id],
                    )?,
                    None => conn.execute(
                        "UPDATE students SET name = ?1, roll = ?2, room = ?3 WHERE id = ?4",
                        rusqlite::params![name, roll, room, id],
                    )?,
                };
                Ok(affected)
            })
            .await?;

        if affected == 0 {
            return Err(StoreError::NotFound(id));
        }
        tracing::info!(student_id = id, "student updated");
        Ok(())
    }

    pub async fn count_students(&self) -> Result<u64, StoreError> {
        self.conn
            .call(|conn| {
                let count: u64 =
                    conn.query_row("SELECT COUNT(*) FROM students", [], |row| row.get(0))?;
                Ok(count)
            })
            .await
            .map_err(StoreError::from)
    }

    // ── Presence log ──────────────────────────────────────────────────────────

    /// Append a log entry stamped with the current local time.
    pub async fn append_log(
        &self,
        student_id: i64,
        name: &str,
        action: Action,
    ) -> Result<LogEntry, StoreError> {
        self.append_log_at(student_id, name, action, Local::now().naive_local())
            .await
    }

    /// Append a log entry with an explicit timestamp (truncated to seconds).
    pub async fn append_log_at(
        &self,
        student_id: i64,
        name: &str,
        action: Action,
        at: NaiveDateTime,
    ) -> Result<LogEntry, StoreError> {
        let stamp = at.format(TIMESTAMP_FORMAT).to_string();
        let timestamp = parse_timestamp(&stamp)?;
        let name = name.to_string();

        let (id, name) = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO logs (student_id, name, action, timestamp) VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![student_id, name, action.as_str(), stamp],
                )?;
                Ok((conn.last_insert_rowid(), name))
            })
            .await?;

        Ok(LogEntry {
            id,
            student_id,
            name,
            action,
            timestamp,
        })
    }

    /// The whole log, most recent first. `limit == 0` means no limit.
    pub async fn history(&self, limit: usize) -> Result<Vec<LogEntry>, StoreError> {
        let limit = if limit == 0 { -1 } else { limit as i64 };
        let rows: Vec<LogRow> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, student_id, name, action, timestamp FROM logs
                     ORDER BY timestamp DESC, id DESC LIMIT ?1",
                )?;
                let rows = stmt.query_map([limit], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?;

        rows.into_iter().map(to_log_entry).collect()
    }

    /// Action of the student's most recent entry, if any.
    pub async fn last_action(&self, student_id: i64) -> Result<Option<Action>, StoreError> {
        let action: Option<String> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT action FROM logs WHERE student_id = ?1
                     ORDER BY timestamp DESC, id DESC LIMIT 1",
                )?;
                let mut rows = stmt.query_map([student_id], |row| row.get::<_, String>(0))?;
                let action = rows.next().transpose()?;
                Ok(action)
            })
            .await?;

        action.map(|a| parse_action(&a)).transpose()
    }

    /// Most recent action of every student that has one.
    pub async fn last_actions(&self) -> Result<HashMap<i64, Action>, StoreError> {
        let rows: Vec<(i64, String)> = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT l.student_id, l.action FROM logs l
                     WHERE l.id = (SELECT id FROM logs WHERE student_id = l.student_id
                                   ORDER BY timestamp DESC, id DESC LIMIT 1)",
                )?;
                let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?;

        rows.into_iter()
            .map(|(id, action)| Ok::<_, StoreError>((id, parse_action(&action)?)))
            .collect()
    }
}

// ── Row helpers ───────────────────────────────────────────────────────────────

fn require(field: &'static str, value: &str) -> Result<(), StoreError> {
    if value.trim().is_empty() {
        return Err(StoreError::Validation(field));
    }
    Ok(())
}

fn student_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StudentRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn to_student((id, name, roll, room, blob, photo): StudentRow) -> Result<StudentRecord, StoreError> {
    Ok(StudentRecord {
        id,
        name,
        roll,
        room,
        embedding: codec::decode_embedding(&blob)?,
        photo,
    })
}

fn to_log_entry((id, student_id, name, action, timestamp): LogRow) -> Result<LogEntry, StoreError> {
    Ok(LogEntry {
        id,
        student_id,
        name,
        action: parse_action(&action)?,
        timestamp: parse_timestamp(&timestamp)?,
    })
}

fn parse_action(value: &str) -> Result<Action, StoreError> {
    value
        .parse()
        .map_err(|_| StoreError::InvalidAction(value.to_string()))
}

fn parse_timestamp(value: &str) -> Result<NaiveDateTime, StoreError> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
        .map_err(|_| StoreError::InvalidTimestamp(value.to_string()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
