use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Storage and display format of log timestamps (second precision).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Axis-aligned bounding box for a detected face, in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    /// Integer pixel rectangle `(x1, y1, x2, y2)` clamped to a `width`x`height` frame.
    pub fn clamp_to(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let x1 = self.x.max(0.0).min(width as f32) as u32;
        let y1 = self.y.max(0.0).min(height as f32) as u32;
        let x2 = (self.x + self.width).max(0.0).min(width as f32) as u32;
        let y2 = (self.y + self.height).max(0.0).min(height as f32) as u32;
        (x1, y1, x2.max(x1), y2.max(y1))
    }
}

/// A face region reported by a detector.
///
/// `region` is the face's position in the detector's output for the frame, so
/// two regions with identical boxes stay distinguishable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub region: usize,
    pub bbox: BoundingBox,
}

/// Face embedding vector (fixed length for a given extractor, e.g. 128).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// True when the vector is non-empty and free of NaN/Inf.
    pub fn is_usable(&self) -> bool {
        !self.values.is_empty() && self.values.iter().all(|v| v.is_finite())
    }

    /// Compute Euclidean distance between two embeddings.
    ///
    /// Only meaningful for equal-length vectors; callers check the length.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// A registered student.
#[derive(Debug, Clone, PartialEq)]
pub struct StudentRecord {
    pub id: i64,
    pub name: String,
    pub roll: String,
    pub room: String,
    pub embedding: Embedding,
    pub photo: Vec<u8>,
}

impl StudentRecord {
    pub fn candidate(&self) -> Candidate {
        Candidate {
            id: self.id,
            name: self.name.clone(),
            embedding: self.embedding.clone(),
        }
    }
}

/// The slice of a student record the matcher needs.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: i64,
    pub name: String,
    pub embedding: Embedding,
}

/// A matched student.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub id: i64,
    pub name: String,
}

/// What a log entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Entry,
    Exit,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Entry => "entry",
            Action::Exit => "exit",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown action '{0}' (expected 'entry' or 'exit')")]
pub struct ParseActionError(pub String);

impl FromStr for Action {
    type Err = ParseActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "entry" => Ok(Action::Entry),
            "exit" => Ok(Action::Exit),
            other => Err(ParseActionError(other.to_string())),
        }
    }
}

/// One row of the presence log. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub id: i64,
    pub student_id: i64,
    /// Name at the time of logging; later renames do not touch it.
    pub name: String,
    pub action: Action,
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: NaiveDateTime,
}

fn serialize_timestamp<S: serde::Serializer>(ts: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(&ts.format(TIMESTAMP_FORMAT))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance_zero_for_identical() {
        let a = Embedding::new(vec![0.25, -0.5, 1.0]);
        assert_eq!(a.euclidean_distance(&a.clone()), 0.0);
    }

    #[test]
    fn test_euclidean_distance_3_4_5() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_embedding_usable() {
        assert!(Embedding::new(vec![0.1, 0.2]).is_usable());
        assert!(!Embedding::new(vec![]).is_usable());
        assert!(!Embedding::new(vec![0.1, f32::NAN]).is_usable());
        assert!(!Embedding::new(vec![f32::INFINITY]).is_usable());
    }

    #[test]
    fn test_action_parse_and_display() {
        assert_eq!("entry".parse::<Action>().unwrap(), Action::Entry);
        assert_eq!(" EXIT ".parse::<Action>().unwrap(), Action::Exit);
        assert!("visitor".parse::<Action>().is_err());
        assert_eq!(Action::Exit.to_string(), "exit");
    }

    #[test]
    fn test_bbox_clamp() {
        let b = BoundingBox {
            x: -10.0,
            y: 5.0,
            width: 50.0,
            height: 500.0,
            confidence: 0.9,
        };
        assert_eq!(b.clamp_to(100, 100), (0, 5, 40, 100));
    }

    #[test]
    fn test_log_entry_serializes_timestamp_format() {
        let entry = LogEntry {
            id: 1,
            student_id: 7,
            name: "Amy".into(),
            action: Action::Entry,
            timestamp: NaiveDateTime::parse_from_str("2026-10-19 08:30:05", TIMESTAMP_FORMAT)
                .unwrap(),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["timestamp"], "2026-10-19 08:30:05");
        assert_eq!(json["action"], "entry");
    }
}
