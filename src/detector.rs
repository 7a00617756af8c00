//! Detector capability consumed by the capture loop.
//!
//! Face detection and expression classification live behind this trait so the
//! loop can be driven by the bundled ONNX model, a remote service, or a test
//! double without knowing which.

use crate::error::Result;
use crate::models::{Detection, DisplaySize, Frame};
use async_trait::async_trait;

/// Runs face detection and expression classification on a frame.
///
/// Lifecycle: `initialize` loads whatever the detector needs, `detect` may then
/// be called any number of times, `dispose` releases resources. Calling
/// `detect` on a detector that is not ready returns an error.
#[async_trait]
pub trait Detector: Send {
    /// Short name for logs and the status line.
    fn name(&self) -> &str;

    /// Loads models. A failure here is a model load failure and is not retried.
    async fn initialize(&mut self) -> Result<()>;

    fn is_ready(&self) -> bool;

    /// Detects faces in `frame`, with boxes rescaled to `display`.
    ///
    /// The order of the returned detections is not stable across calls.
    async fn detect(&mut self, frame: &Frame, display: DisplaySize) -> Result<Vec<Detection>>;

    /// Releases model resources; safe to call more than once.
    fn dispose(&mut self) {}
}
