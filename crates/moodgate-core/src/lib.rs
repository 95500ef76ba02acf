//! moodgate-core — face tracking and emotion-challenge validation.
//!
//! Turns per-frame face matches and emotion labels into a stable identity
//! that has shown happy, then sad, then happy again. Detection, matching,
//! classification and storage are supplied by the caller through the traits
//! in [`pipeline`] and [`tracker`].

pub mod face;
pub mod pipeline;
pub mod tracker;
pub mod types;

pub use face::{EmotionThresholds, FaceStatus, TrackedFace, ValidationStage};
pub use pipeline::{EmotionClassifier, FaceMatcher, FrameOutcome, FrameProcessor};
pub use tracker::{CycleSummary, FaceTracker, TrackerConfig, ValidationSink};
pub use types::{BoundingBox, DetectedFace, Emotion, EmotionAnalysis, FaceMatch, ValidationRecord};
