//! JSON-lines detection scripts.
//!
//! Each non-blank line is one frame as the matcher and classifier would have
//! reported it:
//!
//! ```text
//! {"faces": [{"identity": "db/alice.jpg", "x": 200, "y": 150, "w": 120, "h": 140, "distance": 0.31, "emotion": "happy"}], "repeat": 25}
//! {"error": "Face could not be detected."}
//! {"faces": []}
//! ```
//!
//! Lines starting with `#` are comments.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use image::RgbImage;
use moodgate_core::{
    BoundingBox, DetectedFace, EmotionAnalysis, EmotionClassifier, FaceMatch, FaceMatcher,
};
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("failed to read script {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0}")]
    Matcher(String),
    #[error("no frame staged")]
    NothingStaged,
    #[error("no emotion scripted for this face")]
    NoEmotion,
}

/// One face as reported by the matcher, with the label the classifier gives it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScriptedFace {
    pub identity: String,
    pub x: i32,
    pub y: i32,
    #[serde(alias = "w")]
    pub width: i32,
    #[serde(alias = "h")]
    pub height: i32,
    #[serde(default)]
    pub distance: f32,
    #[serde(default)]
    pub emotion: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScriptedFrame {
    #[serde(default)]
    pub faces: Vec<ScriptedFace>,
    /// Matcher failure reported instead of `faces`.
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default = "default_repeat")]
    pub repeat: usize,
}

fn default_repeat() -> usize {
    1
}

impl ScriptedFrame {
    /// Matcher result for this frame. Each scripted face is one detection
    /// with a single gallery candidate.
    pub fn detections(&self) -> Result<Vec<DetectedFace>, String> {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        Ok(self
            .faces
            .iter()
            .map(|face| DetectedFace {
                candidates: vec![FaceMatch {
                    identity: face.identity.clone(),
                    bbox: BoundingBox::new(face.x, face.y, face.width, face.height),
                    distance: face.distance,
                }],
            })
            .collect())
    }

    /// Label the classifier reports for the face that gets tracked.
    pub fn emotion(&self) -> Option<String> {
        self.faces.first().and_then(|face| face.emotion.clone())
    }
}

pub fn parse_script(text: &str) -> Result<Vec<ScriptedFrame>, ScriptError> {
    let mut frames = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let frame = serde_json::from_str(line).map_err(|source| ScriptError::Parse {
            line: idx + 1,
            source,
        })?;
        frames.push(frame);
    }
    Ok(frames)
}

pub fn load_script(path: &Path) -> Result<Vec<ScriptedFrame>, ScriptError> {
    let text = std::fs::read_to_string(path).map_err(|source| ScriptError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let frames = parse_script(&text)?;
    tracing::info!(path = %path.display(), frames = frames.len(), "script loaded");
    Ok(frames)
}

/// Matcher that answers with results staged ahead of each frame.
#[derive(Debug, Default)]
pub struct ScriptedMatcher {
    staged: VecDeque<Result<Vec<DetectedFace>, String>>,
}

impl ScriptedMatcher {
    pub fn stage(&mut self, result: Result<Vec<DetectedFace>, String>) {
        self.staged.push_back(result);
    }
}

impl FaceMatcher for ScriptedMatcher {
    type Error = ScriptError;

    fn find_matches(&mut self, _frame: &RgbImage) -> Result<Vec<DetectedFace>, ScriptError> {
        match self.staged.pop_front() {
            Some(result) => result.map_err(ScriptError::Matcher),
            None => Err(ScriptError::NothingStaged),
        }
    }
}

/// Classifier counterpart of [`ScriptedMatcher`].
#[derive(Debug, Default)]
pub struct ScriptedClassifier {
    staged: Option<String>,
}

impl ScriptedClassifier {
    /// Replaces any label not consumed by the previous frame.
    pub fn stage(&mut self, label: Option<String>) {
        self.staged = label;
    }
}

impl EmotionClassifier for ScriptedClassifier {
    type Error = ScriptError;

    fn classify(&mut self, _face: &RgbImage) -> Result<EmotionAnalysis, ScriptError> {
        self.staged
            .take()
            .map(|dominant_emotion| EmotionAnalysis { dominant_emotion })
            .ok_or(ScriptError::NoEmotion)
    }
}
