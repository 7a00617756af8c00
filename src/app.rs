//! Top-level controller.
//!
//! Owns everything the front-end talks to: the backend client, the frame slot
//! the camera pumps into, and the handle of the capture loop task. Nothing in
//! here is global; the UI receives a `Controller` and goes through it.

use crate::backend::BackendClient;
use crate::camera::{load_still_image, CameraManager, FrameSlot};
use crate::capture::{CaptureEvent, CaptureHandle, CaptureLoop, CaptureOptions};
use crate::config::{AppConfig, CaptureConfig};
use crate::detector::Detector;
use crate::error::{MoodSyncError, Result};
use crate::models::{DisplaySize, Frame, UiState};
use crate::reporter::{BackendReporter, EmotionTransport};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

pub struct Controller {
    runtime: Handle,
    backend: BackendClient,
    frames: FrameSlot,
    capture: Option<CaptureHandle>,
    status: UiState,
}

impl Controller {
    /// Builds the backend client from `config` and launches with it
    pub async fn from_config(config: &AppConfig, detector: Box<dyn Detector>) -> Result<Self> {
        let backend = BackendClient::new(
            config.backend.base_url.clone(),
            config.backend.request_timeout(),
        )?;
        let transport: Arc<dyn EmotionTransport> = Arc::new(backend.clone());
        let reporter = BackendReporter::new(transport, config.backend.report_sample_rate);
        info!(
            "Reporting {:.0}% of video mood changes to {}",
            reporter.sample_rate() * 100.0,
            backend.base_url()
        );
        let options = CaptureOptions {
            poll_interval: config.capture.poll_interval(),
            display: config.capture.display_size(),
        };
        Ok(Self::launch(backend, detector, reporter, options).await)
    }

    /// Initializes the detector and spawns the capture loop.
    ///
    /// A detector that fails to load leaves the controller in a persistent
    /// error state with no capture loop; uploads and recommendations still work.
    pub async fn launch(
        backend: BackendClient,
        mut detector: Box<dyn Detector>,
        reporter: BackendReporter,
        options: CaptureOptions,
    ) -> Self {
        let runtime = Handle::current();
        let frames = FrameSlot::new();

        info!("Loading {} detector", detector.name());
        if let Err(e) = detector.initialize().await {
            error!("Detector failed to load: {}", e);
            return Self {
                runtime,
                backend,
                frames,
                capture: None,
                status: UiState::Error(e.to_string()),
            };
        }

        let (capture, handle) = CaptureLoop::new(detector, frames.clone(), reporter, options);
        runtime.spawn(capture.run());

        Self {
            runtime,
            backend,
            frames,
            capture: Some(handle),
            status: UiState::LoadingModels,
        }
    }

    /// State to show before the first capture event arrives
    pub fn status(&self) -> &UiState {
        &self.status
    }

    pub fn frames(&self) -> &FrameSlot {
        &self.frames
    }

    pub fn subscribe(&self) -> Option<broadcast::Receiver<CaptureEvent>> {
        self.capture.as_ref().map(CaptureHandle::subscribe)
    }

    /// The webcam is streaming: start polling it
    pub fn camera_ready(&mut self) {
        if let Some(capture) = &self.capture {
            capture.start();
            self.status = UiState::WebcamActive;
        }
    }

    /// No webcam; the user can still analyze images
    pub fn camera_unavailable(&mut self, err: &MoodSyncError) {
        warn!("Continuing without webcam: {}", err);
        if self.capture.is_some() {
            self.status = UiState::NoWebcam;
        }
    }

    /// Analyzes a still image; false if there is no capture loop
    pub fn show_image(&self, image: Frame) -> bool {
        self.capture
            .as_ref()
            .is_some_and(|capture| capture.show_image(image))
    }

    pub fn switch_to_video(&self) -> bool {
        self.capture
            .as_ref()
            .is_some_and(CaptureHandle::switch_to_video)
    }

    pub fn resize(&self, display: DisplaySize) {
        if let Some(capture) = &self.capture {
            capture.resize(display);
        }
    }

    /// Decodes an image file on the blocking pool and hands the frame to `done`
    pub fn load_image<F>(&self, path: PathBuf, done: F)
    where
        F: FnOnce(Result<Frame>) + Send + 'static,
    {
        self.runtime.spawn_blocking(move || {
            let result = load_still_image(&path);
            if let Err(e) = &result {
                warn!("{}", e);
            }
            done(result);
        });
    }

    /// Fetches a recommendation in the background and hands the result to `done`
    pub fn recommend<F>(&self, emotion: String, done: F)
    where
        F: FnOnce(Result<String>) + Send + 'static,
    {
        let backend = self.backend.clone();
        self.runtime.spawn(async move {
            let result = backend.get_recommendation(&emotion).await;
            if let Err(e) = &result {
                warn!("Recommendation for {} failed: {}", emotion, e);
            }
            done(result);
        });
    }

    pub fn shutdown(&self) {
        if let Some(capture) = &self.capture {
            capture.shutdown();
        }
    }
}

/// Opens and starts the configured webcam
pub fn open_camera(config: &CaptureConfig) -> Result<CameraManager> {
    let mut camera = CameraManager::new(config.camera_index, config.width, config.height)?;
    camera.start()?;
    let (width, height) = camera.resolution();
    info!("Camera streaming at {}x{}", width, height);
    Ok(camera)
}
