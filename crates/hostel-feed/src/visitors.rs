//! Snapshots of unrecognised faces.
//!
//! Files are named `visitor.<YYYYMMDD_HHMMSS>.jpg` for the entry camera and
//! `visitor_exit.<YYYYMMDD_HHMMSS>.jpg` for the exit camera, so the visitors
//! of a day are counted by prefix. Same-second captures get a `_<n>` suffix.

use crate::feed::FeedFrame;
use chrono::{Local, NaiveDate, NaiveDateTime};
use hostel_core::{BoundingBox, SessionMode, VisitorSink};
use image::{GrayImage, ImageFormat};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

const ENTRY_PREFIX: &str = "visitor.";
const EXIT_PREFIX: &str = "visitor_exit.";
const EXTENSION: &str = ".jpg";
const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const STAMP_LEN: usize = 15;

#[derive(Error, Debug)]
pub enum VisitorError {
    #[error("visitor directory I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] image::ImageError),
    #[error("frame carries no pixels to crop")]
    NoPixels,
    #[error("face region is empty after clamping to the frame")]
    EmptyRegion,
    #[error("not a visitor snapshot name: {0}")]
    InvalidName(String),
    #[error("visitor snapshot not found: {0}")]
    NotFound(String),
}

/// A stored visitor snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VisitorArtifact {
    pub file_name: String,
    pub mode: &'static str,
    pub captured_at: String,
}

/// Directory of visitor snapshots.
#[derive(Debug, Clone)]
pub struct VisitorStore {
    dir: PathBuf,
}

impl VisitorStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `crop` as a JPEG named after `at`. Returns the written path.
    pub fn save(
        &self,
        mode: SessionMode,
        crop: &GrayImage,
        at: NaiveDateTime,
    ) -> Result<PathBuf, VisitorError> {
        std::fs::create_dir_all(&self.dir)?;

        let stem = format!("{}{}", prefix(mode), at.format(STAMP_FORMAT));
        let mut path = self.dir.join(format!("{stem}{EXTENSION}"));
        let mut n = 1;
        while path.exists() {
            path = self.dir.join(format!("{stem}_{n}{EXTENSION}"));
            n += 1;
        }

        crop.save_with_format(&path, ImageFormat::Jpeg)?;
        tracing::info!(path = %path.display(), mode = %mode, "visitor snapshot saved");
        Ok(path)
    }

    /// Number of entry-camera visitors captured on `date`.
    pub fn count_on(&self, date: NaiveDate) -> Result<usize, VisitorError> {
        let wanted = format!("{ENTRY_PREFIX}{}", date.format("%Y%m%d"));
        Ok(self
            .file_names()?
            .iter()
            .filter(|name| name.starts_with(&wanted) && name.ends_with(EXTENSION))
            .count())
    }

    pub fn count_today(&self) -> Result<usize, VisitorError> {
        self.count_on(Local::now().date_naive())
    }

    /// All snapshots, newest first.
    pub fn list(&self) -> Result<Vec<VisitorArtifact>, VisitorError> {
        let mut artifacts: Vec<(NaiveDateTime, VisitorArtifact)> = self
            .file_names()?
            .into_iter()
            .filter_map(|file_name| {
                let (mode, rest) = if let Some(rest) = file_name.strip_prefix(EXIT_PREFIX) {
                    ("exit", rest)
                } else if let Some(rest) = file_name.strip_prefix(ENTRY_PREFIX) {
                    ("entry", rest)
                } else {
                    return None;
                };
                if !rest.ends_with(EXTENSION) {
                    return None;
                }
                let stamp = rest.get(..STAMP_LEN)?;
                let at = NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT).ok()?;
                let artifact = VisitorArtifact {
                    captured_at: at.format(hostel_core::TIMESTAMP_FORMAT).to_string(),
                    file_name,
                    mode,
                };
                Some((at, artifact))
            })
            .collect();

        artifacts.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.file_name.cmp(&a.1.file_name)));
        Ok(artifacts.into_iter().map(|(_, a)| a).collect())
    }

    /// Delete one snapshot by file name. Only bare `visitor.`/`visitor_exit.`
    /// JPEG names inside the directory are accepted.
    pub fn remove(&self, file_name: &str) -> Result<(), VisitorError> {
        let well_formed = !file_name.contains(['/', '\\'])
            && file_name != ".."
            && (file_name.starts_with(ENTRY_PREFIX) || file_name.starts_with(EXIT_PREFIX))
            && file_name.ends_with(EXTENSION);
        if !well_formed {
            return Err(VisitorError::InvalidName(file_name.to_string()));
        }

        match std::fs::remove_file(self.dir.join(file_name)) {
            Ok(()) => {
                tracing::info!(file = file_name, "visitor snapshot deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(VisitorError::NotFound(file_name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn file_names(&self) -> Result<Vec<String>, VisitorError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if let Ok(name) = entry.file_name().into_string() {
                names.push(name);
            }
        }
        Ok(names)
    }
}

impl VisitorSink<FeedFrame> for VisitorStore {
    type Error = VisitorError;

    fn record(
        &mut self,
        mode: SessionMode,
        frame: &FeedFrame,
        face: &BoundingBox,
    ) -> Result<(), VisitorError> {
        let pixels = frame.pixels.as_ref().ok_or(VisitorError::NoPixels)?;
        let crop = pixels.crop(face).ok_or(VisitorError::EmptyRegion)?;
        self.save(mode, &crop, Local::now().naive_local())?;
        Ok(())
    }
}

fn prefix(mode: SessionMode) -> &'static str {
    match mode {
        SessionMode::Entry => ENTRY_PREFIX,
        SessionMode::Exit => EXIT_PREFIX,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(tag: &str) -> VisitorStore {
        let dir = std::env::temp_dir().join(format!(
            "hostelgate-visitors-{tag}-{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        VisitorStore::new(dir)
    }

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn crop() -> GrayImage {
        GrayImage::from_pixel(8, 8, image::Luma([120]))
    }

    #[test]
    fn test_missing_dir_counts_zero() {
        let store = temp_store("missing");
        assert_eq!(store.count_today().unwrap(), 0);
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_names_and_daily_count() {
        let store = temp_store("count");
        let day = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();

        let path = store
            .save(SessionMode::Entry, &crop(), at("2026-10-19 08:15:00"))
            .unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "visitor.20261019_081500.jpg"
        );
        store
            .save(SessionMode::Entry, &crop(), at("2026-10-18 23:59:59"))
            .unwrap();
        store
            .save(SessionMode::Exit, &crop(), at("2026-10-19 09:00:00"))
            .unwrap();

        assert_eq!(store.count_on(day).unwrap(), 1);
        let _ = std::fs::remove_dir_all(store.dir());
    }

    #[test]
    fn test_same_second_gets_suffix() {
        let store = temp_store("suffix");
        let ts = at("2026-10-19 10:00:00");
        let first = store.save(SessionMode::Entry, &crop(), ts).unwrap();
        let second = store.save(SessionMode::Entry, &crop(), ts).unwrap();
        assert_ne!(first, second);
        assert_eq!(
            second.file_name().unwrap().to_str().unwrap(),
            "visitor.20261019_100000_1.jpg"
        );
        assert_eq!(store.count_on(ts.date()).unwrap(), 2);
        let _ = std::fs::remove_dir_all(store.dir());
    }

    #[test]
    fn test_list_newest_first() {
        let store = temp_store("list");
        store
            .save(SessionMode::Entry, &crop(), at("2026-10-19 08:00:00"))
            .unwrap();
        store
            .save(SessionMode::Exit, &crop(), at("2026-10-19 09:30:00"))
            .unwrap();
        std::fs::write(store.dir().join("notes.txt"), b"ignored").unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].mode, "exit");
        assert_eq!(listed[0].captured_at, "2026-10-19 09:30:00");
        assert_eq!(listed[1].file_name, "visitor.20261019_080000.jpg");
        let _ = std::fs::remove_dir_all(store.dir());
    }

    #[test]
    fn test_record_without_pixels_fails() {
        let mut store = temp_store("nopixels");
        let frame = FeedFrame {
            sequence: 0,
            width: 10,
            height: 10,
            pixels: None,
            faces: Vec::new(),
        };
        let face = BoundingBox {
            x: 0.0,
            y: 0.0,
            width: 4.0,
            height: 4.0,
            confidence: 0.9,
        };
        let err = store.record(SessionMode::Entry, &frame, &face).unwrap_err();
        assert!(matches!(err, VisitorError::NoPixels));
    }

    #[test]
    fn test_remove_lowers_daily_count_by_one() {
        let store = temp_store("remove");
        let ts = at("2026-10-19 11:00:00");
        store.save(SessionMode::Entry, &crop(), ts).unwrap();
        let second = store.save(SessionMode::Entry, &crop(), ts).unwrap();
        assert_eq!(store.count_on(ts.date()).unwrap(), 2);

        let name = second.file_name().unwrap().to_str().unwrap().to_string();
        store.remove(&name).unwrap();

        assert_eq!(store.count_on(ts.date()).unwrap(), 1);
        assert!(matches!(store.remove(&name), Err(VisitorError::NotFound(_))));
        let _ = std::fs::remove_dir_all(store.dir());
    }

    #[test]
    fn test_remove_rejects_foreign_names() {
        let store = temp_store("remove-names");
        std::fs::create_dir_all(store.dir()).unwrap();
        std::fs::write(store.dir().join("notes.jpg"), b"keep").unwrap();

        for name in ["notes.jpg", "../visitor.20261019_110000.jpg", "visitor.x/y.jpg", "visitor.20261019_110000.png"] {
            assert!(
                matches!(store.remove(name), Err(VisitorError::InvalidName(_))),
                "{name} accepted"
            );
        }
        assert!(store.dir().join("notes.jpg").exists());
        let _ = std::fs::remove_dir_all(store.dir());
    }
}
