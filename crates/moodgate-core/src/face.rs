//! A single tracked face: presence bookkeeping, emotion debouncing and the
//! happy → sad → happy validation challenge.
//!
//! # Shared emotion counter
//!
//! One counter, `emotion_counter`, drives two things:
//!
//! - **debouncing**: a label different from the current emotion bumps the
//!   counter, and the label only takes over once the counter reaches
//!   [`INCORRECT_DETECTION_THRESHOLD`]; the counter then restarts at 0;
//! - **dwell time**: while the label agrees the counter keeps growing, and
//!   the validation stages read it against [`EMOTION_CHANGE_THRESHOLD`] and
//!   [`EMOTION_VALIDATION_THRESHOLD`].
//!
//! Because the counter is shared, a freshly switched emotion needs three
//! disagreeing readings before it can change again, while an emotion that has
//! been held for a while yields to the first disagreeing reading. Splitting
//! the counter would change when stages complete, so the coupling is kept.

use chrono::{DateTime, Local};
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::types::{BoundingBox, Emotion};

/// Disagreeing readings needed before the current emotion switches.
pub const INCORRECT_DETECTION_THRESHOLD: u32 = 3;
/// Dwell after which an off-sequence emotion wipes challenge progress.
pub const EMOTION_CHANGE_THRESHOLD: u32 = 10;
/// Dwell after which the expected emotion completes its stage.
pub const EMOTION_VALIDATION_THRESHOLD: u32 = 20;

/// Format used for validation timestamps in records and file names.
pub const TIMESTAMP_FORMAT: &str = "%H:%M:%S-%d/%m/%Y";

/// Counter thresholds for the emotion debouncer and the challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmotionThresholds {
    pub incorrect_detection: u32,
    pub change: u32,
    pub validation: u32,
}

impl Default for EmotionThresholds {
    fn default() -> Self {
        Self {
            incorrect_detection: INCORRECT_DETECTION_THRESHOLD,
            change: EMOTION_CHANGE_THRESHOLD,
            validation: EMOTION_VALIDATION_THRESHOLD,
        }
    }
}

/// Progress through the emotion challenge. Variants are ordered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStage {
    #[default]
    None,
    FirstHappy,
    Sad,
    /// Terminal: the challenge is complete.
    SecondHappy,
}

impl ValidationStage {
    /// Number of completed challenge steps (0–3).
    pub fn completed_steps(self) -> u8 {
        match self {
            ValidationStage::None => 0,
            ValidationStage::FirstHappy => 1,
            ValidationStage::Sad => 2,
            ValidationStage::SecondHappy => 3,
        }
    }
}

/// Snapshot of a face's counters, for logs and status output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceStatus {
    pub name: String,
    pub presence: u32,
    pub absence: u32,
    pub emotion: Option<Emotion>,
    pub emotion_counter: u32,
    pub stage: ValidationStage,
    pub validated: bool,
    pub saved: bool,
    pub next_emotion: Option<Emotion>,
}

/// One identity currently being observed.
#[derive(Debug, Clone)]
pub struct TrackedFace {
    pub(crate) name: String,
    pub(crate) bbox: BoundingBox,
    pub(crate) presence: u32,
    pub(crate) absence: u32,
    pub(crate) emotion_counter: u32,
    pub(crate) current_emotion: Option<Emotion>,
    pub(crate) stage: ValidationStage,
    pub(crate) validated: bool,
    pub(crate) validated_at: Option<DateTime<Local>>,
    pub(crate) saved: bool,
    /// `None` until the face has been persisted.
    pub(crate) deletion_countdown: Option<u32>,
    pub(crate) image: RgbImage,
    /// Set when a detection matched this face during the current cycle.
    pub(crate) matched: bool,
    thresholds: EmotionThresholds,
}

impl TrackedFace {
    pub fn new(name: impl Into<String>, image: RgbImage, bbox: BoundingBox) -> Self {
        Self::with_thresholds(name, image, bbox, EmotionThresholds::default())
    }

    pub fn with_thresholds(
        name: impl Into<String>,
        image: RgbImage,
        bbox: BoundingBox,
        thresholds: EmotionThresholds,
    ) -> Self {
        Self {
            name: name.into(),
            bbox,
            presence: 0,
            absence: 0,
            emotion_counter: 0,
            current_emotion: None,
            stage: ValidationStage::None,
            validated: false,
            validated_at: None,
            saved: false,
            deletion_countdown: None,
            image,
            matched: false,
            thresholds,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Position at creation; matches do not move it.
    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    pub fn presence(&self) -> u32 {
        self.presence
    }

    pub fn absence(&self) -> u32 {
        self.absence
    }

    pub fn emotion_counter(&self) -> u32 {
        self.emotion_counter
    }

    pub fn current_emotion(&self) -> Option<Emotion> {
        self.current_emotion
    }

    pub fn stage(&self) -> ValidationStage {
        self.stage
    }

    pub fn is_validated(&self) -> bool {
        self.validated
    }

    pub fn validated_at(&self) -> Option<DateTime<Local>> {
        self.validated_at
    }

    /// Validation time formatted with [`TIMESTAMP_FORMAT`].
    pub fn validation_timestamp(&self) -> Option<String> {
        self.validated_at
            .map(|t| t.format(TIMESTAMP_FORMAT).to_string())
    }

    pub fn is_saved(&self) -> bool {
        self.saved
    }

    pub fn deletion_countdown(&self) -> Option<u32> {
        self.deletion_countdown
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn increment_presence(&mut self) {
        self.presence += 1;
        self.absence = 0;
    }

    pub fn increment_absence(&mut self) {
        self.absence += 1;
    }

    /// Feed one classifier reading: debounce it, then advance the challenge.
    pub fn increment_emotion_counter(&mut self, emotion: Emotion) {
        self.update_emotion(emotion);
        self.update_validation_status();
    }

    /// Debounce a raw label into `current_emotion`.
    pub fn update_emotion(&mut self, emotion: Emotion) {
        let emotion = emotion.normalized();

        self.emotion_counter += 1;
        if self.current_emotion != Some(emotion)
            && self.emotion_counter >= self.thresholds.incorrect_detection
        {
            tracing::debug!(
                name = %self.name,
                from = ?self.current_emotion,
                to = %emotion,
                "emotion switched"
            );
            self.emotion_counter = 0;
            self.current_emotion = Some(emotion);
        }
    }

    /// Advance or reset the challenge using the current emotion and counter.
    pub fn update_validation_status(&mut self) {
        let Some(emotion) = self.current_emotion else {
            return;
        };
        let before = self.stage;

        if self.emotion_counter >= self.thresholds.validation {
            match emotion {
                Emotion::Happy if self.stage < ValidationStage::Sad => {
                    // Repeated happy before sad restarts the sequence.
                    self.stage = ValidationStage::FirstHappy;
                }
                Emotion::Sad if self.stage == ValidationStage::FirstHappy => {
                    self.stage = ValidationStage::Sad;
                }
                Emotion::Happy => {
                    self.stage = ValidationStage::SecondHappy;
                    self.mark_validated();
                }
                _ => {}
            }
        } else if self.emotion_counter >= self.thresholds.change && !self.is_expected(emotion) {
            self.stage = ValidationStage::None;
        }

        if self.stage != before {
            tracing::info!(
                name = %self.name,
                emotion = %emotion,
                from = ?before,
                to = ?self.stage,
                "validation stage changed"
            );
        }
    }

    /// Whether holding `emotion` is progress toward the next stage.
    fn is_expected(&self, emotion: Emotion) -> bool {
        match emotion {
            Emotion::Sad => self.stage >= ValidationStage::FirstHappy,
            Emotion::Happy => self.stage >= ValidationStage::Sad,
            _ => false,
        }
    }

    fn mark_validated(&mut self) {
        if !self.validated {
            self.validated = true;
            self.validated_at = Some(Local::now());
        }
    }

    /// Emotion the subject has to show next, `None` once the challenge is done.
    pub fn next_expected_emotion(&self) -> Option<Emotion> {
        match self.stage {
            ValidationStage::None => Some(Emotion::Happy),
            ValidationStage::FirstHappy => Some(Emotion::Sad),
            ValidationStage::Sad => Some(Emotion::Happy),
            ValidationStage::SecondHappy => None,
        }
    }

    pub fn status(&self) -> FaceStatus {
        FaceStatus {
            name: self.name.clone(),
            presence: self.presence,
            absence: self.absence,
            emotion: self.current_emotion,
            emotion_counter: self.emotion_counter,
            stage: self.stage,
            validated: self.validated,
            saved: self.saved,
            next_emotion: self.next_expected_emotion(),
        }
    }
}
