//! Per-frame orchestration and the camera session loop.
//!
//! Capture, detection, embedding extraction, registry reads, log writes and
//! visitor artifacts are all external; they plug in through the traits below.

use crate::matcher::Matcher;
use crate::session::{CameraSession, SessionMode};
use crate::types::{Action, BoundingBox, Candidate, Detection, Embedding, Identity};
use chrono::{NaiveDateTime, NaiveTime};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Default detector confidence floor.
pub const MIN_DETECTION_CONFIDENCE: f32 = 0.7;

/// Default pause between loop iterations.
pub const FRAME_DELAY: Duration = Duration::from_millis(100);

/// Yields frames on demand. `None` means the stream ended or capture failed.
pub trait CaptureSource {
    type Frame;
    fn next_frame(&mut self) -> Option<Self::Frame>;
}

/// Finds face regions in a frame.
pub trait FaceDetector<F> {
    fn detect(&mut self, frame: &F) -> Vec<Detection>;
}

/// Computes at most one embedding for a detected region.
pub trait EmbeddingExtractor<F> {
    fn extract(&mut self, frame: &F, face: &Detection) -> Option<Embedding>;
}

/// Source of the current registry, re-read on every frame.
pub trait Roster {
    type Error: std::error::Error;
    fn candidates(&mut self) -> Result<Vec<Candidate>, Self::Error>;
}

/// Destination of presence log writes.
pub trait PresenceSink {
    type Error: std::error::Error;
    /// Write one entry. Returns the timestamp the entry was stored with.
    fn append(&mut self, student: &Identity, action: Action)
        -> Result<NaiveDateTime, Self::Error>;
}

/// Destination of unmatched face regions.
pub trait VisitorSink<F> {
    type Error: std::error::Error;
    fn record(&mut self, mode: SessionMode, frame: &F, face: &BoundingBox)
        -> Result<(), Self::Error>;
}

impl<F, T: VisitorSink<F>> VisitorSink<F> for Option<T> {
    type Error = T::Error;

    fn record(
        &mut self,
        mode: SessionMode,
        frame: &F,
        face: &BoundingBox,
    ) -> Result<(), Self::Error> {
        match self {
            Some(sink) => sink.record(mode, frame, face),
            None => Ok(()),
        }
    }
}

/// Human-readable status surfaced for a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameStatus {
    Logged {
        name: String,
        action: Action,
        at: NaiveTime,
    },
    Unknown,
}

impl fmt::Display for FrameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameStatus::Logged { name, action, at } => {
                let verb = match action {
                    Action::Entry => "ENTERED",
                    Action::Exit => "EXITED",
                };
                write!(f, "{name} has {verb} the hostel at {}", at.format("%H:%M:%S"))
            }
            FrameStatus::Unknown => f.write_str("Unknown person detected!"),
        }
    }
}

/// What happened while processing one frame.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FrameOutcome {
    pub faces: usize,
    /// Regions where no embedding could be extracted.
    pub skipped: usize,
    /// Students written to the log by this frame.
    pub logged: Vec<Identity>,
    /// Matches suppressed because the student was already logged this session.
    pub duplicates: usize,
    pub visitors: usize,
    pub failed_writes: usize,
    /// At most one status per frame; the last event in region order wins.
    pub status: Option<FrameStatus>,
}

/// The external collaborators a session loop writes to.
pub struct SessionIo<R, P, V> {
    pub roster: R,
    pub log: P,
    pub visitors: V,
}

/// Counters for a finished session loop.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SessionSummary {
    pub frames: usize,
    pub logged: usize,
    pub visitors: usize,
}

/// Detector + extractor + matcher, applied region by region.
pub struct FrameProcessor<D, E, M> {
    pub detector: D,
    pub extractor: E,
    pub matcher: M,
}

impl<D, E, M: Matcher> FrameProcessor<D, E, M> {
    pub fn new(detector: D, extractor: E, matcher: M) -> Self {
        Self {
            detector,
            extractor,
            matcher,
        }
    }

    /// Process one frame against a registry snapshot.
    ///
    /// Matched students are logged with the session mode's action unless the
    /// session already logged them. A failed write releases the claim.
    pub fn process<F, P, V>(
        &mut self,
        session: &mut CameraSession,
        frame: &F,
        candidates: &[Candidate],
        log: &mut P,
        visitors: &mut V,
    ) -> FrameOutcome
    where
        D: FaceDetector<F>,
        E: EmbeddingExtractor<F>,
        P: PresenceSink,
        V: VisitorSink<F>,
    {
        let mut outcome = FrameOutcome::default();
        if !session.is_running() {
            return outcome;
        }

        let faces = self.detector.detect(frame);
        outcome.faces = faces.len();
        let action = session.mode().action();

        for face in &faces {
            let Some(embedding) = self.extractor.extract(frame, face) else {
                outcome.skipped += 1;
                continue;
            };

            match self.matcher.find(&embedding, candidates) {
                Some(student) => {
                    if !session.claim(student.id) {
                        outcome.duplicates += 1;
                        continue;
                    }
                    match log.append(&student, action) {
                        Ok(logged_at) => {
                            tracing::info!(
                                session = %session.id(),
                                student_id = student.id,
                                name = %student.name,
                                action = %action,
                                "presence logged"
                            );
                            outcome.status = Some(FrameStatus::Logged {
                                name: student.name.clone(),
                                action,
                                at: logged_at.time(),
                            });
                            outcome.logged.push(student);
                        }
                        Err(e) => {
                            tracing::warn!(
                                student_id = student.id,
                                error = %e,
                                "presence log write failed"
                            );
                            session.release(student.id);
                            outcome.failed_writes += 1;
                        }
                    }
                }
                None => {
                    outcome.visitors += 1;
                    outcome.status = Some(FrameStatus::Unknown);
                    tracing::info!(session = %session.id(), confidence = face.bbox.confidence, "unknown person detected");
                    if let Err(e) = visitors.record(session.mode(), frame, &face.bbox) {
                        tracing::warn!(error = %e, "failed to save visitor snapshot");
                    }
                }
            }
        }

        outcome
    }
}

/// Pump frames until the session is stopped or the source runs dry.
///
/// `stop` is polled once per iteration; a blocked `next_frame` is never
/// interrupted. The session is left `Stopped` on return.
pub fn run_session<S, D, E, M, R, P, V>(
    session: &mut CameraSession,
    source: &mut S,
    processor: &mut FrameProcessor<D, E, M>,
    io: &mut SessionIo<R, P, V>,
    stop: &AtomicBool,
    frame_delay: Duration,
    mut on_status: impl FnMut(&FrameStatus),
) -> SessionSummary
where
    S: CaptureSource,
    D: FaceDetector<S::Frame>,
    E: EmbeddingExtractor<S::Frame>,
    M: Matcher,
    R: Roster,
    P: PresenceSink,
    V: VisitorSink<S::Frame>,
{
    let mut summary = SessionSummary::default();

    while session.is_running() && !stop.load(Ordering::Acquire) {
        let Some(frame) = source.next_frame() else {
            tracing::info!(session = %session.id(), mode = %session.mode(), "capture source ended");
            break;
        };
        summary.frames += 1;

        match io.roster.candidates() {
            Ok(candidates) => {
                let outcome =
                    processor.process(session, &frame, &candidates, &mut io.log, &mut io.visitors);
                summary.logged += outcome.logged.len();
                summary.visitors += outcome.visitors;
                if let Some(status) = &outcome.status {
                    on_status(status);
                }
            }
            Err(e) => {
                tracing::warn!(session = %session.id(), error = %e, "registry read failed; frame skipped");
            }
        }

        if !frame_delay.is_zero() {
            std::thread::sleep(frame_delay);
        }
    }

    session.stop();
    summary
}
