// Error types for the mood capture client

use thiserror::Error;

/// Main error type for the mood capture client
#[derive(Debug, Error)]
pub enum MoodSyncError {
    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("Camera access failed: {0}")]
    DeviceAccess(String),

    #[error("Detection cycle failed: {0}")]
    DetectionCycle(String),

    #[error("Backend request failed: {0}")]
    Backend(String),

    #[error("Frame processing failed: {0}")]
    FrameProcessing(String),

    #[error("Image loading failed: {0}")]
    ImageLoad(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("ONNX Runtime error: {0}")]
    OnnxRuntime(String),

    #[error("OpenCV error: {0}")]
    OpenCV(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image decoding error: {0}")]
    ImageDecode(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MoodSyncError {
    /// Whether the failure only affects the current cycle or request.
    ///
    /// Model and camera failures are persistent until the user restarts or
    /// picks another input; everything else is retried by the next user action
    /// or the next poll.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            MoodSyncError::ModelLoad(_) | MoodSyncError::DeviceAccess(_) | MoodSyncError::Config(_)
        )
    }
}

/// Result type alias for mood capture operations
pub type Result<T> = std::result::Result<T, MoodSyncError>;

// Conversion from nokhwa errors
impl From<nokhwa::NokhwaError> for MoodSyncError {
    fn from(err: nokhwa::NokhwaError) -> Self {
        match err {
            nokhwa::NokhwaError::OpenDeviceError(device, error) => {
                MoodSyncError::DeviceAccess(format!("Device {device}: {error}"))
            }
            nokhwa::NokhwaError::OpenStreamError(error) => {
                MoodSyncError::DeviceAccess(format!("Stream: {error}"))
            }
            nokhwa::NokhwaError::ReadFrameError(error) => {
                MoodSyncError::FrameProcessing(format!("Read frame: {error}"))
            }
            _ => MoodSyncError::DeviceAccess(err.to_string()),
        }
    }
}

// Conversion from OpenCV errors
impl From<opencv::Error> for MoodSyncError {
    fn from(err: opencv::Error) -> Self {
        MoodSyncError::OpenCV(err.to_string())
    }
}

// Conversion from ONNX Runtime errors
impl From<ort::Error> for MoodSyncError {
    fn from(err: ort::Error) -> Self {
        MoodSyncError::OnnxRuntime(err.to_string())
    }
}

// Conversion from HTTP client errors
impl From<reqwest::Error> for MoodSyncError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => MoodSyncError::Backend(format!("HTTP {status}: {err}")),
            None => MoodSyncError::Backend(err.to_string()),
        }
    }
}
