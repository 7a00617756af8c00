// Core data models for the mood capture client

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Represents a single video frame or still image with RGB data
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    /// Raw RGB pixel data (width * height * 3 bytes)
    pub data: Vec<u8>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
}

impl Frame {
    /// Creates a new Frame with the given parameters
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
        }
    }

    /// Returns (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Size of the surface the user sees; detection boxes are expressed in it
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DisplaySize {
    pub width: f32,
    pub height: f32,
}

impl DisplaySize {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

impl Default for DisplaySize {
    fn default() -> Self {
        Self::new(640.0, 480.0)
    }
}

/// Face bounding box in display pixels
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rescales a box measured against a `from` sized image onto `to`.
    pub fn rescale(&self, from: (u32, u32), to: DisplaySize) -> Self {
        let (src_w, src_h) = from;
        if src_w == 0 || src_h == 0 {
            return *self;
        }
        let sx = to.width / src_w as f32;
        let sy = to.height / src_h as f32;
        Self::new(self.x * sx, self.y * sy, self.width * sx, self.height * sy)
    }
}

/// Label with the highest score in an [`ExpressionScores`] mapping
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DominantEmotion {
    pub label: String,
    pub confidence: f32,
}

/// Per-face mapping from emotion label to confidence, in detector order
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpressionScores(Vec<(String, f32)>);

impl ExpressionScores {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Sets a label's score, keeping the label's original position if present
    pub fn insert(&mut self, label: impl Into<String>, score: f32) {
        let label = label.into();
        match self.0.iter_mut().find(|(l, _)| *l == label) {
            Some(entry) => entry.1 = score,
            None => self.0.push((label, score)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.0.iter().map(|(l, s)| (l.as_str(), *s))
    }

    /// Entries sorted by descending score; ties keep mapping order.
    pub fn ranked(&self) -> Vec<(&str, f32)> {
        let mut entries: Vec<(&str, f32)> = self.iter().collect();
        // sort_by is stable, so equal scores stay in insertion order
        entries.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        entries
    }

    /// The first entry of [`ranked`](Self::ranked), `None` when empty
    pub fn dominant(&self) -> Option<DominantEmotion> {
        self.ranked()
            .first()
            .map(|(label, confidence)| DominantEmotion {
                label: (*label).to_string(),
                confidence: *confidence,
            })
    }
}

impl<L: Into<String>> FromIterator<(L, f32)> for ExpressionScores {
    fn from_iter<I: IntoIterator<Item = (L, f32)>>(iter: I) -> Self {
        let mut scores = ExpressionScores::new();
        for (label, score) in iter {
            scores.insert(label, score);
        }
        scores
    }
}

/// One detected face: where it is and how it looks
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub scores: ExpressionScores,
}

impl Detection {
    pub fn new(bbox: BoundingBox, scores: ExpressionScores) -> Self {
        Self { bbox, scores }
    }
}

/// Which input the capture loop analyzes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CaptureMode {
    Video,
    StillImage,
}

impl std::fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureMode::Video => write!(f, "video"),
            CaptureMode::StillImage => write!(f, "still image"),
        }
    }
}

/// Payload of an "emotion changed" event
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MoodChange {
    pub label: String,
    pub confidence: f32,
}

impl MoodChange {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

impl From<DominantEmotion> for MoodChange {
    fn from(dominant: DominantEmotion) -> Self {
        Self::new(dominant.label, dominant.confidence)
    }
}

impl std::fmt::Display for MoodChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&crate::presentation::format_confidence(
            &self.label,
            self.confidence,
        ))
    }
}

/// Client-visible state of the capture surface
#[derive(Clone, Debug, PartialEq)]
pub enum UiState {
    LoadingModels,
    WebcamActive,
    NoWebcam,
    AnalyzingImage,
    NoFaceDetected,
    Mood(MoodChange),
    Error(String),
}

impl std::fmt::Display for UiState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UiState::LoadingModels => write!(f, "Loading AI models..."),
            UiState::WebcamActive => write!(f, "Detecting face..."),
            UiState::NoWebcam => {
                write!(f, "Webcam access denied. Try uploading an image instead.")
            }
            UiState::AnalyzingImage => write!(f, "Analyzing..."),
            UiState::NoFaceDetected => write!(f, "No face detected"),
            UiState::Mood(change) => write!(f, "{change}"),
            UiState::Error(message) => write!(f, "Error: {message}"),
        }
    }
}
