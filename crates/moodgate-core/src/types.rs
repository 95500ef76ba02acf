use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Pixel bounding box of a detected face (top-left corner plus size).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// True when the box covers no pixels.
    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Whether `self` (a fresh detection) lies within `tolerance` of `tracked`.
    ///
    /// Tolerance windows are derived from the detection's own size and
    /// truncated to whole pixels. The width window also bounds the width
    /// delta and the height window the height delta. A negative window
    /// matches nothing.
    pub fn within_tolerance_of(&self, tracked: &BoundingBox, tolerance: f32) -> bool {
        let window = |size: i32| u32::try_from((size as f32 * tolerance) as i64).ok();
        let (Some(x_tol), Some(y_tol)) = (window(self.width), window(self.height)) else {
            return false;
        };

        self.x.abs_diff(tracked.x) <= x_tol
            && self.y.abs_diff(tracked.y) <= y_tol
            && self.width.abs_diff(tracked.width) <= x_tol
            && self.height.abs_diff(tracked.height) <= y_tol
    }
}

/// Emotion labels produced by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Angry,
    Disgust,
    Fear,
    Happy,
    Sad,
    Surprise,
    Neutral,
}

impl Emotion {
    /// Fold the negative labels the challenge treats as equivalent into `Sad`.
    pub fn normalized(self) -> Emotion {
        match self {
            Emotion::Fear | Emotion::Angry => Emotion::Sad,
            other => other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Angry => "angry",
            Emotion::Disgust => "disgust",
            Emotion::Fear => "fear",
            Emotion::Happy => "happy",
            Emotion::Sad => "sad",
            Emotion::Surprise => "surprise",
            Emotion::Neutral => "neutral",
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown emotion label: {0:?}")]
pub struct EmotionParseError(pub String);

impl FromStr for Emotion {
    type Err = EmotionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "angry" => Ok(Emotion::Angry),
            "disgust" => Ok(Emotion::Disgust),
            "fear" => Ok(Emotion::Fear),
            "happy" => Ok(Emotion::Happy),
            "sad" => Ok(Emotion::Sad),
            "surprise" => Ok(Emotion::Surprise),
            "neutral" => Ok(Emotion::Neutral),
            _ => Err(EmotionParseError(s.to_string())),
        }
    }
}

/// One gallery candidate for a detected face.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceMatch {
    /// Gallery entry the face matched, usually an image path such as
    /// `faces_database/alice.jpg`.
    pub identity: String,
    pub bbox: BoundingBox,
    /// Embedding distance to the gallery entry. Lower = more similar.
    pub distance: f32,
}

impl FaceMatch {
    /// Display name derived from the identity: the last path component up
    /// to its first `.`.
    pub fn name(&self) -> &str {
        let file = Path::new(&self.identity)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or(self.identity.as_str());
        file.split('.').next().unwrap_or(file)
    }
}

/// A face found in a frame together with its ranked gallery candidates.
///
/// An empty candidate list means a face was seen but nobody in the gallery
/// matched it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectedFace {
    pub candidates: Vec<FaceMatch>,
}

impl DetectedFace {
    /// Candidate with the smallest distance, first one wins on ties.
    pub fn best_match(&self) -> Option<&FaceMatch> {
        self.candidates.iter().fold(None, |best: Option<&FaceMatch>, m| match best {
            Some(b) if b.distance <= m.distance => Some(b),
            _ => Some(m),
        })
    }
}

/// Output of the emotion classifier for one face crop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmotionAnalysis {
    pub dominant_emotion: String,
}

/// Persisted proof that `name` completed the challenge at `timestamp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub name: String,
    /// Local time formatted as `%H:%M:%S-%d/%m/%Y`.
    pub timestamp: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(identity: &str, distance: f32) -> FaceMatch {
        FaceMatch {
            identity: identity.into(),
            bbox: BoundingBox::new(0, 0, 10, 10),
            distance,
        }
    }

    #[test]
    fn test_tolerance_uses_detection_size() {
        let tracked = BoundingBox::new(100, 100, 50, 50);
        assert!(BoundingBox::new(110, 92, 60, 42).within_tolerance_of(&tracked, 0.2));
        assert!(!BoundingBox::new(111, 100, 50, 50).within_tolerance_of(&tracked, 0.2));
        assert!(!BoundingBox::new(100, 100, 50, 39).within_tolerance_of(&tracked, 0.2));
    }

    #[test]
    fn test_tolerance_truncates() {
        let tracked = BoundingBox::new(0, 0, 49, 49);
        // 49 * 0.2 = 9.8 → 9
        assert!(BoundingBox::new(9, 0, 49, 49).within_tolerance_of(&tracked, 0.2));
        assert!(!BoundingBox::new(10, 0, 49, 49).within_tolerance_of(&tracked, 0.2));
    }

    #[test]
    fn test_tolerance_with_extreme_coordinates() {
        let far = BoundingBox::new(i32::MIN, i32::MIN, i32::MAX, i32::MAX);
        let near = BoundingBox::new(i32::MAX, i32::MAX, 50, 50);
        assert!(!near.within_tolerance_of(&far, 0.2));
        assert!(!far.within_tolerance_of(&near, 0.2));
        assert!(far.within_tolerance_of(&far, 0.2));
        assert!(!BoundingBox::new(0, 0, -50, 50).within_tolerance_of(&BoundingBox::new(0, 0, -50, 50), 0.2));
    }

    #[test]
    fn test_empty_box() {
        assert!(BoundingBox::new(5, 5, 0, 10).is_empty());
        assert!(BoundingBox::new(5, 5, 10, -1).is_empty());
        assert!(!BoundingBox::new(5, 5, 1, 1).is_empty());
    }

    #[test]
    fn test_emotion_parse_and_normalize() {
        assert_eq!("Happy".parse::<Emotion>(), Ok(Emotion::Happy));
        assert_eq!(" fear ".parse::<Emotion>().map(Emotion::normalized), Ok(Emotion::Sad));
        assert_eq!(Emotion::Angry.normalized(), Emotion::Sad);
        assert_eq!(Emotion::Surprise.normalized(), Emotion::Surprise);
        assert!("bored".parse::<Emotion>().is_err());
    }

    #[test]
    fn test_match_name_from_identity_path() {
        assert_eq!(candidate("faces_database/alice.jpg", 0.1).name(), "alice");
        assert_eq!(candidate("/db/bob.smith.png", 0.1).name(), "bob");
        assert_eq!(candidate("carol", 0.1).name(), "carol");
    }

    #[test]
    fn test_best_match_lowest_distance() {
        let face = DetectedFace {
            candidates: vec![
                candidate("db/a.jpg", 0.5),
                candidate("db/b.jpg", 0.2),
                candidate("db/c.jpg", 0.2),
            ],
        };
        assert_eq!(face.best_match().map(|m| m.name()), Some("b"));
        assert!(DetectedFace::default().best_match().is_none());
    }
}
