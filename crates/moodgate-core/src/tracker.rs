//! Face tracker: re-identifies detections across frames, picks the stable
//! face, ages out stale tracks and persists validated faces.

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::face::{EmotionThresholds, FaceStatus, TrackedFace};
use crate::types::{BoundingBox, Emotion, ValidationRecord};

/// Default positional tolerance, as a fraction of the detection size.
pub const DEFAULT_TOLERANCE: f32 = 0.2;
/// Minimum presence before a face can be the stable face.
pub const PRESENCE_SHOW_THRESHOLD: u32 = 5;
/// Unmatched cycles after which a face is dropped.
pub const ABSENCE_COUNTER_THRESHOLD: u32 = 15;
/// Cycles a persisted face stays tracked after the cycle it was saved in.
pub const DELETION_COUNTER_THRESHOLD: u32 = 10;

/// Tracker tuning. Every field falls back to its default when deserialized
/// from a partial document.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub tolerance: f32,
    pub presence_show_threshold: u32,
    pub absence_counter_threshold: u32,
    pub deletion_counter_threshold: u32,
    pub emotion: EmotionThresholds,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            presence_show_threshold: PRESENCE_SHOW_THRESHOLD,
            absence_counter_threshold: ABSENCE_COUNTER_THRESHOLD,
            deletion_counter_threshold: DELETION_COUNTER_THRESHOLD,
            emotion: EmotionThresholds::default(),
        }
    }
}

/// Destination for validated faces (record list plus face image).
pub trait ValidationSink {
    type Error: std::fmt::Display;

    fn persist(&mut self, record: &ValidationRecord, image: &RgbImage) -> Result<(), Self::Error>;
}

/// What one call to [`FaceTracker::update_faces_status`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    /// Name of the stable face at the start of the cycle.
    pub stable: Option<String>,
    /// Progress signal after the cycle (0–4).
    pub validation_step: u8,
    /// What the stable face has to show next, for progress display.
    pub expected_emotion: Option<Emotion>,
    /// Face persisted during this cycle.
    pub saved: Option<ValidationRecord>,
    /// Faces dropped after their post-save countdown.
    pub retired: Vec<String>,
    /// Faces dropped for being absent too long.
    pub expired: Vec<String>,
}

/// Owns every tracked face.
///
/// Faces are kept in insertion order. Positional matching scans that order
/// and takes the first hit, and stable-face ties go to the earliest face.
pub struct FaceTracker {
    faces: Vec<TrackedFace>,
    config: TrackerConfig,
    validation_step: u8,
}

impl Default for FaceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl FaceTracker {
    pub fn new() -> Self {
        Self::with_config(TrackerConfig::default())
    }

    pub fn with_config(config: TrackerConfig) -> Self {
        Self {
            faces: Vec::new(),
            config,
            validation_step: 0,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Tracked faces in insertion order.
    pub fn faces(&self) -> &[TrackedFace] {
        &self.faces
    }

    pub fn face(&self, name: &str) -> Option<&TrackedFace> {
        self.faces.iter().find(|f| f.name == name)
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// Progress signal for display: 0 without a stable face, otherwise
    /// 1 + completed challenge steps.
    pub fn validation_step(&self) -> u8 {
        self.validation_step
    }

    /// Register a detection using the configured tolerance.
    pub fn track_face(
        &mut self,
        name: &str,
        image: RgbImage,
        bbox: BoundingBox,
        emotion: Option<Emotion>,
    ) {
        self.track_face_with_tolerance(name, image, bbox, emotion, self.config.tolerance);
    }

    /// Register a detection.
    ///
    /// The first tracked face within `tolerance` of `bbox` absorbs the
    /// detection: its presence grows, its absence resets and `emotion` (if
    /// any) feeds its challenge. Its position is left as first seen. Without
    /// a match a fresh face is tracked, replacing any face of the same name.
    pub fn track_face_with_tolerance(
        &mut self,
        name: &str,
        image: RgbImage,
        bbox: BoundingBox,
        emotion: Option<Emotion>,
        tolerance: f32,
    ) {
        if let Some(face) = self
            .faces
            .iter_mut()
            .find(|f| bbox.within_tolerance_of(&f.bbox, tolerance))
        {
            face.increment_presence();
            face.matched = true;
            face.image = image;
            if let Some(emotion) = emotion {
                face.increment_emotion_counter(emotion);
            }
            return;
        }

        let mut face = TrackedFace::with_thresholds(name, image, bbox, self.config.emotion);
        face.matched = true;

        match self.faces.iter_mut().find(|f| f.name == name) {
            Some(slot) => {
                tracing::debug!(name, ?bbox, "face moved out of tolerance; restarting track");
                *slot = face;
            }
            None => {
                tracing::debug!(name, ?bbox, "tracking new face");
                self.faces.push(face);
            }
        }
    }

    /// The face with the highest presence, if it reached the show threshold.
    pub fn get_stable_face(&self) -> Option<&TrackedFace> {
        self.stable_index().map(|i| &self.faces[i])
    }

    fn stable_index(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (i, face) in self.faces.iter().enumerate() {
            let better = match best {
                None => true,
                Some(b) => face.presence > self.faces[b].presence,
            };
            if better {
                best = Some(i);
            }
        }
        best.filter(|&i| self.faces[i].presence >= self.config.presence_show_threshold)
    }

    /// Advance one processing cycle.
    ///
    /// Updates the progress signal from the stable face, persists it once it
    /// is validated, retires persisted faces after their countdown and ages
    /// out faces that went unmatched.
    pub fn update_faces_status<S: ValidationSink + ?Sized>(&mut self, sink: &mut S) -> CycleSummary {
        let mut summary = CycleSummary::default();
        let stable = self.stable_index();

        self.validation_step = match stable {
            Some(i) => 1 + self.faces[i].stage.completed_steps(),
            None => 0,
        };
        summary.stable = stable.map(|i| self.faces[i].name.clone());
        summary.expected_emotion = stable.and_then(|i| self.faces[i].next_expected_emotion());

        let mut just_saved = None;
        if let Some(i) = stable {
            let face = &mut self.faces[i];
            if face.validated && !face.saved {
                if let Some(record) = persist_face(face, sink) {
                    face.saved = true;
                    face.deletion_countdown = Some(0);
                    just_saved = Some(i);
                    summary.saved = Some(record);
                }
            }
        }

        let deletion_threshold = self.config.deletion_counter_threshold;
        let mut index = 0;
        self.faces.retain_mut(|face| {
            let current = index;
            index += 1;
            if just_saved == Some(current) {
                return true;
            }
            let Some(countdown) = face.deletion_countdown.as_mut() else {
                return true;
            };
            *countdown += 1;
            if *countdown > deletion_threshold {
                tracing::info!(name = %face.name, "retiring persisted face");
                summary.retired.push(face.name.clone());
                return false;
            }
            true
        });
        if !summary.retired.is_empty() {
            self.validation_step = 0;
            summary.expected_emotion = None;
        }

        let absence_threshold = self.config.absence_counter_threshold;
        self.faces.retain_mut(|face| {
            if !face.matched {
                face.increment_absence();
            }
            face.matched = false;
            if face.absence >= absence_threshold {
                tracing::info!(name = %face.name, absence = face.absence, "face lost");
                summary.expired.push(face.name.clone());
                return false;
            }
            true
        });

        for face in &self.faces {
            tracing::trace!(status = ?face.status(), "face status");
        }

        summary.validation_step = self.validation_step;
        summary
    }

    /// Status snapshot of every tracked face.
    pub fn faces_status(&self) -> Vec<FaceStatus> {
        self.faces.iter().map(TrackedFace::status).collect()
    }
}

/// Hand a validated face to the sink. Failures are logged and leave the face
/// unsaved so the next cycle retries.
fn persist_face<S: ValidationSink + ?Sized>(
    face: &TrackedFace,
    sink: &mut S,
) -> Option<ValidationRecord> {
    let record = ValidationRecord {
        name: face.name.clone(),
        timestamp: face.validation_timestamp()?,
    };

    match sink.persist(&record, &face.image) {
        Ok(()) => {
            tracing::info!(name = %record.name, timestamp = %record.timestamp, "validated face saved");
            Some(record)
        }
        Err(e) => {
            tracing::warn!(name = %record.name, error = %e, "failed to save validated face; will retry");
            None
        }
    }
}
