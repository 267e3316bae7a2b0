//! hostel-core: face-identity matching and presence derivation.
//!
//! Everything here is independent of the camera, the vision models and the
//! storage engine. Those are plugged in through the traits in [`pipeline`].

pub mod codec;
pub mod matcher;
pub mod pipeline;
pub mod presence;
pub mod session;
pub mod types;

pub use matcher::{EuclideanMatcher, MatchPolicy, Matcher, DEFAULT_TOLERANCE};
pub use pipeline::{
    run_session, CaptureSource, EmbeddingExtractor, FaceDetector, FrameOutcome, FrameProcessor,
    FrameStatus, PresenceSink, Roster, SessionIo, SessionSummary, VisitorSink,
};
pub use presence::{PresenceState, PresenceSummary};
pub use session::{CameraSession, SessionMode, SessionState};
pub use types::{
    Action, BoundingBox, Candidate, Detection, Embedding, Identity, LogEntry, StudentRecord,
    TIMESTAMP_FORMAT,
};
