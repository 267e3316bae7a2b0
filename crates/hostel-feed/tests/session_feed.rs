//! Drives a whole camera session from a feed file on disk.

use hostel_core::{
    run_session, Action, CameraSession, Candidate, Embedding, EuclideanMatcher, FrameProcessor,
    FrameStatus, Identity, PresenceSink, Roster, SessionIo, SessionMode,
};
use chrono::{Local, NaiveDateTime};
use hostel_feed::{FeedDetector, FeedExtractor, FeedSource, VisitorStore};
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

struct Registry(Vec<Candidate>);

impl Roster for Registry {
    type Error = Infallible;

    fn candidates(&mut self) -> Result<Vec<Candidate>, Infallible> {
        Ok(self.0.clone())
    }
}

#[derive(Default)]
struct MemoryLog(Vec<(i64, String, Action)>);

impl PresenceSink for MemoryLog {
    type Error = Infallible;

    fn append(&mut self, student: &Identity, action: Action) -> Result<NaiveDateTime, Infallible> {
        self.0.push((student.id, student.name.clone(), action));
        Ok(Local::now().naive_local())
    }
}

fn temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "hostelgate-session-feed-{tag}-{}",
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn test_feed_session_logs_student_once_and_saves_visitor() {
    let dir = temp_dir("amy");
    image::GrayImage::from_pixel(64, 64, image::Luma([128u8]))
        .save(dir.join("frame.png"))
        .unwrap();

    let amy_face = r#"{"x": 2, "y": 2, "width": 24, "height": 24, "confidence": 0.98, "embedding": [0.1, 0.2, 0.3]}"#;
    let stranger = r#"{"x": 30, "y": 30, "width": 20, "height": 20, "confidence": 0.91, "embedding": [5.0, 5.0, 5.0]}"#;
    let faint = r#"{"x": 40, "y": 2, "width": 10, "height": 10, "confidence": 0.3, "embedding": [9.0, 9.0, 9.0]}"#;
    let feed = [
        format!(r#"{{"sequence": 1, "image": "frame.png", "faces": [{amy_face}]}}"#),
        String::new(),
        format!(r#"{{"sequence": 2, "image": "frame.png", "faces": [{amy_face}, {faint}]}}"#),
        format!(r#"{{"sequence": 3, "image": "frame.png", "faces": [{stranger}]}}"#),
    ]
    .join("\n");
    let feed_path = dir.join("entry.jsonl");
    std::fs::write(&feed_path, feed).unwrap();

    let visitors = VisitorStore::new(dir.join("unknown_entries"));
    let before = visitors.count_today().unwrap();

    let mut session = CameraSession::new(SessionMode::Entry);
    session.start();
    let mut source = FeedSource::open(&feed_path).unwrap();
    let mut processor = FrameProcessor::new(
        FeedDetector::default(),
        FeedExtractor,
        EuclideanMatcher::default(),
    );
    let mut io = SessionIo {
        roster: Registry(vec![Candidate {
            id: 7,
            name: "Amy".into(),
            embedding: Embedding::new(vec![0.1, 0.2, 0.3]),
        }]),
        log: MemoryLog::default(),
        visitors: visitors.clone(),
    };
    let stop = AtomicBool::new(false);
    let mut statuses = Vec::new();

    let summary = run_session(
        &mut session,
        &mut source,
        &mut processor,
        &mut io,
        &stop,
        Duration::ZERO,
        |status| statuses.push(status.clone()),
    );

    assert_eq!(summary.frames, 3);
    assert_eq!(summary.logged, 1);
    assert_eq!(summary.visitors, 1);
    assert_eq!(io.log.0, vec![(7, "Amy".to_string(), Action::Entry)]);
    assert!(!session.is_running());

    assert!(matches!(statuses.first(), Some(FrameStatus::Logged { name, .. }) if name == "Amy"));
    assert!(matches!(statuses.last(), Some(FrameStatus::Unknown)));

    assert_eq!(visitors.count_today().unwrap(), before + 1);
    let listed = visitors.list().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].mode, "entry");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_malformed_line_ends_stream() {
    let dir = temp_dir("malformed");
    let feed_path = dir.join("exit.jsonl");
    std::fs::write(
        &feed_path,
        "{\"sequence\": 1, \"faces\": []}\nnot json\n{\"sequence\": 3, \"faces\": []}\n",
    )
    .unwrap();

    let mut session = CameraSession::new(SessionMode::Exit);
    session.start();
    let mut io = SessionIo {
        roster: Registry(Vec::new()),
        log: MemoryLog::default(),
        visitors: None::<VisitorStore>,
    };
    let summary = run_session(
        &mut session,
        &mut FeedSource::open(&feed_path).unwrap(),
        &mut FrameProcessor::new(FeedDetector::default(), FeedExtractor, EuclideanMatcher::default()),
        &mut io,
        &AtomicBool::new(false),
        Duration::ZERO,
        |_| {},
    );

    assert_eq!(summary.frames, 1);
    assert!(io.log.0.is_empty());

    let _ = std::fs::remove_dir_all(&dir);
}
