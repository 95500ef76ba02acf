//! Per-frame entry point tying the external matcher and classifier to the
//! tracker.
//!
//! Nothing here fails: matcher errors and multi-face frames are reported as
//! [`FrameOutcome`] advisories and leave the tracker untouched.

use image::{imageops, RgbImage};

use crate::tracker::{CycleSummary, FaceTracker, ValidationSink};
use crate::types::{BoundingBox, DetectedFace, Emotion, EmotionAnalysis};

/// Face detection plus gallery matching.
pub trait FaceMatcher {
    type Error: std::fmt::Display;

    /// One entry per face found in `frame`.
    fn find_matches(&mut self, frame: &RgbImage) -> Result<Vec<DetectedFace>, Self::Error>;
}

/// Emotion classification of a face crop.
pub trait EmotionClassifier {
    type Error: std::fmt::Display;

    fn classify(&mut self, face: &RgbImage) -> Result<EmotionAnalysis, Self::Error>;
}

/// What happened to one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The matcher failed; nothing was updated.
    MatcherFailed(String),
    /// More than one face in view; nothing was updated.
    MultipleFaces(usize),
    /// No usable detection. Tracks still aged.
    NoDetection(CycleSummary),
    /// A detection was tracked.
    Tracked {
        name: String,
        emotion: Option<Emotion>,
        summary: CycleSummary,
    },
}

impl FrameOutcome {
    /// Caller-facing advice, for frames the tracker could not use.
    pub fn advisory(&self) -> Option<&'static str> {
        match self {
            FrameOutcome::MatcherFailed(_) => Some("Face could not be analysed, please try again."),
            FrameOutcome::MultipleFaces(_) => Some("Please provide only one face in the frame."),
            _ => None,
        }
    }

    pub fn summary(&self) -> Option<&CycleSummary> {
        match self {
            FrameOutcome::NoDetection(summary) | FrameOutcome::Tracked { summary, .. } => {
                Some(summary)
            }
            _ => None,
        }
    }
}

/// Owns the tracker and its collaborators for the lifetime of a session.
pub struct FrameProcessor<M, C, S> {
    matcher: M,
    classifier: C,
    sink: S,
    tracker: FaceTracker,
}

impl<M, C, S> FrameProcessor<M, C, S>
where
    M: FaceMatcher,
    C: EmotionClassifier,
    S: ValidationSink,
{
    pub fn new(matcher: M, classifier: C, sink: S, tracker: FaceTracker) -> Self {
        Self {
            matcher,
            classifier,
            sink,
            tracker,
        }
    }

    pub fn tracker(&self) -> &FaceTracker {
        &self.tracker
    }

    pub fn matcher_mut(&mut self) -> &mut M {
        &mut self.matcher
    }

    pub fn classifier_mut(&mut self) -> &mut C {
        &mut self.classifier
    }

    /// Run one processing cycle on `frame`.
    pub fn process(&mut self, frame: &RgbImage) -> FrameOutcome {
        let faces = match self.matcher.find_matches(frame) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(error = %e, "face matching failed; skipping frame");
                return FrameOutcome::MatcherFailed(e.to_string());
            }
        };

        if faces.len() > 1 {
            tracing::debug!(count = faces.len(), "multiple faces in frame");
            return FrameOutcome::MultipleFaces(faces.len());
        }

        let Some(best) = faces.first().and_then(DetectedFace::best_match) else {
            return FrameOutcome::NoDetection(self.tracker.update_faces_status(&mut self.sink));
        };

        if best.bbox.is_empty() {
            tracing::debug!(bbox = ?best.bbox, "discarding zero-area detection");
            return FrameOutcome::NoDetection(self.tracker.update_faces_status(&mut self.sink));
        }

        let name = best.name().to_string();
        let bbox = best.bbox;
        let face = crop(frame, bbox);
        let emotion = self.classify(&face);

        self.tracker.track_face(&name, face, bbox, emotion);
        let summary = self.tracker.update_faces_status(&mut self.sink);

        FrameOutcome::Tracked {
            name,
            emotion,
            summary,
        }
    }

    fn classify(&mut self, face: &RgbImage) -> Option<Emotion> {
        let analysis = match self.classifier.classify(face) {
            Ok(analysis) => analysis,
            Err(e) => {
                tracing::warn!(error = %e, "emotion classification failed");
                return None;
            }
        };

        match analysis.dominant_emotion.parse() {
            Ok(emotion) => Some(emotion),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring classifier output");
                None
            }
        }
    }
}

/// Copy the part of `frame` under `bbox`, clipped to the frame.
pub fn crop(frame: &RgbImage, bbox: BoundingBox) -> RgbImage {
    let x = bbox.x.clamp(0, frame.width() as i32) as u32;
    let y = bbox.y.clamp(0, frame.height() as i32) as u32;
    let right = (bbox.x.saturating_add(bbox.width)).clamp(0, frame.width() as i32) as u32;
    let bottom = (bbox.y.saturating_add(bbox.height)).clamp(0, frame.height() as i32) as u32;

    imageops::crop_imm(frame, x, y, right.saturating_sub(x), bottom.saturating_sub(y)).to_image()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FaceMatch, ValidationRecord};
    use std::collections::VecDeque;

    #[derive(Default)]
    struct QueueMatcher {
        frames: VecDeque<Result<Vec<DetectedFace>, String>>,
    }

    impl FaceMatcher for QueueMatcher {
        type Error = String;

        fn find_matches(&mut self, _frame: &RgbImage) -> Result<Vec<DetectedFace>, String> {
            self.frames.pop_front().unwrap_or(Ok(Vec::new()))
        }
    }

    struct FixedClassifier(Result<&'static str, &'static str>);

    impl EmotionClassifier for FixedClassifier {
        type Error = String;

        fn classify(&mut self, _face: &RgbImage) -> Result<EmotionAnalysis, String> {
            self.0
                .map(|label| EmotionAnalysis {
                    dominant_emotion: label.to_string(),
                })
                .map_err(str::to_string)
        }
    }

    #[derive(Default)]
    struct VecSink(Vec<ValidationRecord>);

    impl ValidationSink for VecSink {
        type Error = String;

        fn persist(&mut self, record: &ValidationRecord, _image: &RgbImage) -> Result<(), String> {
            self.0.push(record.clone());
            Ok(())
        }
    }

    fn face(identity: &str, bbox: BoundingBox, distance: f32) -> FaceMatch {
        FaceMatch {
            identity: identity.into(),
            bbox,
            distance,
        }
    }

    fn single(candidates: Vec<FaceMatch>) -> Result<Vec<DetectedFace>, String> {
        Ok(vec![DetectedFace { candidates }])
    }

    fn processor(
        frames: Vec<Result<Vec<DetectedFace>, String>>,
        label: Result<&'static str, &'static str>,
    ) -> FrameProcessor<QueueMatcher, FixedClassifier, VecSink> {
        FrameProcessor::new(
            QueueMatcher {
                frames: frames.into(),
            },
            FixedClassifier(label),
            VecSink::default(),
            FaceTracker::new(),
        )
    }

    fn frame() -> RgbImage {
        RgbImage::new(640, 480)
    }

    #[test]
    fn test_tracks_best_candidate() {
        let bbox = BoundingBox::new(10, 20, 100, 120);
        let mut p = processor(
            vec![single(vec![
                face("db/bob.jpg", bbox, 0.6),
                face("db/alice.jpg", bbox, 0.3),
            ])],
            Ok("happy"),
        );

        let outcome = p.process(&frame());
        match outcome {
            FrameOutcome::Tracked { name, emotion, .. } => {
                assert_eq!(name, "alice");
                assert_eq!(emotion, Some(Emotion::Happy));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        let tracked = p.tracker().face("alice").unwrap();
        assert_eq!(tracked.image().dimensions(), (100, 120));
    }

    #[test]
    fn test_matcher_error_leaves_tracker_untouched() {
        let bbox = BoundingBox::new(10, 20, 100, 120);
        let mut p = processor(
            vec![
                single(vec![face("db/alice.jpg", bbox, 0.3)]),
                Err("spoof detected".into()),
            ],
            Ok("neutral"),
        );
        p.process(&frame());
        let outcome = p.process(&frame());

        assert_eq!(outcome, FrameOutcome::MatcherFailed("spoof detected".into()));
        assert!(outcome.advisory().is_some());
        assert_eq!(p.tracker().face("alice").unwrap().absence(), 0);
    }

    #[test]
    fn test_multiple_faces_is_advisory_only() {
        let a = BoundingBox::new(10, 20, 100, 120);
        let b = BoundingBox::new(300, 20, 100, 120);
        let mut p = processor(
            vec![Ok(vec![
                DetectedFace {
                    candidates: vec![face("db/alice.jpg", a, 0.3)],
                },
                DetectedFace {
                    candidates: vec![face("db/bob.jpg", b, 0.3)],
                },
            ])],
            Ok("happy"),
        );

        let outcome = p.process(&frame());
        assert_eq!(outcome, FrameOutcome::MultipleFaces(2));
        assert_eq!(
            outcome.advisory(),
            Some("Please provide only one face in the frame.")
        );
        assert!(p.tracker().is_empty());
    }

    #[test]
    fn test_zero_area_box_is_a_non_detection() {
        let bbox = BoundingBox::new(10, 20, 100, 120);
        let mut p = processor(
            vec![
                single(vec![face("db/alice.jpg", bbox, 0.3)]),
                single(vec![face("db/alice.jpg", BoundingBox::new(10, 20, 0, 120), 0.3)]),
            ],
            Ok("happy"),
        );
        p.process(&frame());
        let outcome = p.process(&frame());

        assert!(matches!(outcome, FrameOutcome::NoDetection(_)));
        assert_eq!(p.tracker().len(), 1);
        assert_eq!(p.tracker().face("alice").unwrap().absence(), 1);
    }

    #[test]
    fn test_unknown_face_and_empty_frame_age_tracks() {
        let bbox = BoundingBox::new(10, 20, 100, 120);
        let mut p = processor(
            vec![
                single(vec![face("db/alice.jpg", bbox, 0.3)]),
                single(Vec::new()),
                Ok(Vec::new()),
            ],
            Ok("happy"),
        );
        p.process(&frame());
        assert!(matches!(p.process(&frame()), FrameOutcome::NoDetection(_)));
        assert!(matches!(p.process(&frame()), FrameOutcome::NoDetection(_)));
        assert_eq!(p.tracker().face("alice").unwrap().absence(), 2);
    }

    #[test]
    fn test_classifier_failure_still_tracks_presence() {
        let bbox = BoundingBox::new(10, 20, 100, 120);
        let detection = single(vec![face("db/alice.jpg", bbox, 0.3)]);
        let mut p = processor(vec![detection.clone(), detection], Err("model crashed"));
        p.process(&frame());
        let outcome = p.process(&frame());

        match outcome {
            FrameOutcome::Tracked { emotion, .. } => assert_eq!(emotion, None),
            other => panic!("unexpected outcome: {other:?}"),
        }
        let tracked = p.tracker().face("alice").unwrap();
        assert_eq!(tracked.presence(), 1);
        assert_eq!(tracked.current_emotion(), None);
    }

    #[test]
    fn test_unknown_label_is_ignored() {
        let bbox = BoundingBox::new(10, 20, 100, 120);
        let mut p = processor(
            vec![single(vec![face("db/alice.jpg", bbox, 0.3)])],
            Ok("contempt"),
        );
        match p.process(&frame()) {
            FrameOutcome::Tracked { emotion, .. } => assert_eq!(emotion, None),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_crop_clips_to_frame() {
        let img = RgbImage::new(100, 80);
        assert_eq!(crop(&img, BoundingBox::new(90, 70, 30, 30)).dimensions(), (10, 10));
        assert_eq!(crop(&img, BoundingBox::new(-10, -5, 30, 30)).dimensions(), (20, 25));
        assert_eq!(crop(&img, BoundingBox::new(200, 200, 30, 30)).dimensions(), (0, 0));
    }
}
