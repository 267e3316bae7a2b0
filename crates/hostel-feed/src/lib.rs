//! hostel-feed: frames and face detections produced by an external vision stage.
//!
//! The vision stage (camera, face detector, embedding model) writes one JSON
//! object per frame to a file or named pipe. This crate turns that stream into
//! the capture/detector/extractor collaborators `hostel-core` expects, and
//! stores crops of unrecognised faces.

pub mod feed;
pub mod frame;
pub mod visitors;

pub use feed::{FeedDetector, FeedError, FeedExtractor, FeedFace, FeedFrame, FeedSource};
pub use frame::Frame;
pub use visitors::{VisitorArtifact, VisitorError, VisitorStore};
