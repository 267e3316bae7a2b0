//! JSON-lines capture feed.
//!
//! One object per line:
//!
//! ```json
//! {"sequence": 12, "width": 640, "height": 480, "image": "frames/12.png",
//!  "faces": [{"x": 10, "y": 20, "width": 80, "height": 90,
//!             "confidence": 0.93, "embedding": [0.01, -0.2]}]}
//! ```
//!
//! `image` is optional and resolved against the feed file's directory; it is
//! only needed to crop visitor snapshots. A face without `embedding` is one
//! the extractor could not encode.

use crate::frame::Frame;
use hostel_core::pipeline::MIN_DETECTION_CONFIDENCE;
use hostel_core::{BoundingBox, CaptureSource, Detection, Embedding, EmbeddingExtractor, FaceDetector};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("feed not found: {0}")]
    NotFound(String),
    #[error("feed I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One face as reported by the vision stage.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedFace {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

impl FeedFace {
    fn bbox(&self) -> BoundingBox {
        BoundingBox {
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
            confidence: self.confidence,
        }
    }
}

#[derive(Debug, Deserialize)]
struct FeedRecord {
    #[serde(default)]
    sequence: u32,
    #[serde(default)]
    width: u32,
    #[serde(default)]
    height: u32,
    #[serde(default)]
    image: Option<PathBuf>,
    #[serde(default)]
    faces: Vec<FeedFace>,
}

/// A frame read from the feed, with the vision stage's annotations.
#[derive(Clone)]
pub struct FeedFrame {
    pub sequence: u32,
    pub width: u32,
    pub height: u32,
    /// Decoded pixels, when the record named a readable image.
    pub pixels: Option<Frame>,
    pub faces: Vec<FeedFace>,
}

/// Capture source reading a JSON-lines feed.
///
/// Reads block on the underlying reader, so a named pipe gives live frames
/// and a regular file replays a recording. EOF, an I/O error or a malformed
/// line ends the stream.
pub struct FeedSource<R> {
    reader: R,
    base_dir: PathBuf,
    line: String,
}

impl FeedSource<BufReader<File>> {
    /// Open a feed file or named pipe.
    pub fn open(path: &Path) -> Result<Self, FeedError> {
        if !path.exists() {
            return Err(FeedError::NotFound(path.display().to_string()));
        }
        let file = File::open(path)?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        tracing::info!(path = %path.display(), "opened capture feed");
        Ok(Self::from_reader(BufReader::new(file), base_dir))
    }
}

impl<R: BufRead> FeedSource<R> {
    pub fn from_reader(reader: R, base_dir: PathBuf) -> Self {
        Self {
            reader,
            base_dir,
            line: String::new(),
        }
    }

    fn load_pixels(&self, image: &Path, sequence: u32) -> Option<Frame> {
        let path = if image.is_absolute() {
            image.to_path_buf()
        } else {
            self.base_dir.join(image)
        };
        match image::open(&path) {
            Ok(decoded) => {
                let frame = Frame::from_image(decoded, sequence);
                tracing::trace!(seq = sequence, brightness = frame.avg_brightness(), "frame decoded");
                Some(frame)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "frame image unreadable; continuing without pixels");
                None
            }
        }
    }
}

impl<R: BufRead> CaptureSource for FeedSource<R> {
    type Frame = FeedFrame;

    fn next_frame(&mut self) -> Option<FeedFrame> {
        loop {
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "feed read failed");
                    return None;
                }
            }
            if !self.line.trim().is_empty() {
                break;
            }
        }

        let record: FeedRecord = match serde_json::from_str(self.line.trim()) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(error = %e, "malformed feed record");
                return None;
            }
        };

        let pixels = record
            .image
            .as_deref()
            .and_then(|image| self.load_pixels(image, record.sequence));
        let (width, height) = match &pixels {
            Some(frame) => (frame.width, frame.height),
            None => (record.width, record.height),
        };

        Some(FeedFrame {
            sequence: record.sequence,
            width,
            height,
            pixels,
            faces: record.faces,
        })
    }
}

/// Reports the feed's faces at or above a confidence floor.
#[derive(Debug, Clone, Copy)]
pub struct FeedDetector {
    pub min_confidence: f32,
}

impl Default for FeedDetector {
    fn default() -> Self {
        Self {
            min_confidence: MIN_DETECTION_CONFIDENCE,
        }
    }
}

impl FaceDetector<FeedFrame> for FeedDetector {
    fn detect(&mut self, frame: &FeedFrame) -> Vec<Detection> {
        frame
            .faces
            .iter()
            .enumerate()
            .filter(|(_, f)| f.confidence >= self.min_confidence)
            .map(|(region, f)| Detection {
                region,
                bbox: f.bbox(),
            })
            .collect()
    }
}

/// Returns the embedding the vision stage attached to a detected face.
///
/// The face is looked up by its position in the record, not by its box.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeedExtractor;

impl EmbeddingExtractor<FeedFrame> for FeedExtractor {
    fn extract(&mut self, frame: &FeedFrame, face: &Detection) -> Option<Embedding> {
        let values = frame.faces.get(face.region)?.embedding.clone()?;
        let embedding = Embedding::new(values);
        if !embedding.is_usable() {
            tracing::debug!(seq = frame.sequence, "discarding unusable embedding");
            return None;
        }
        Some(embedding)
    }
}
