// Frame sources: the webcam and uploaded still images

use crate::error::{MoodSyncError, Result};
use crate::models::Frame;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{error, info, warn};

struct SlotInner {
    latest: Mutex<Option<Frame>>,
    playable: watch::Sender<bool>,
}

/// Latest webcam frame, shared between whoever pumps the camera and the
/// capture loop.
///
/// The slot is "playable" while the camera stream is running; the capture loop
/// only polls while it is, and resumes when it becomes playable again.
#[derive(Clone)]
pub struct FrameSlot {
    inner: Arc<SlotInner>,
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSlot {
    pub fn new() -> Self {
        let (playable, _) = watch::channel(false);
        Self {
            inner: Arc::new(SlotInner {
                latest: Mutex::new(None),
                playable,
            }),
        }
    }

    /// Stores a frame and marks the stream playable
    pub fn publish(&self, frame: Frame) {
        if let Ok(mut latest) = self.inner.latest.lock() {
            *latest = Some(frame);
        }
        self.set_playable(true);
    }

    /// Marks the stream paused or ended; the last frame is kept for display
    pub fn set_playable(&self, playable: bool) {
        self.inner.playable.send_if_modified(|current| {
            let changed = *current != playable;
            *current = playable;
            changed
        });
    }

    pub fn is_playable(&self) -> bool {
        *self.inner.playable.borrow()
    }

    /// Watches playability changes
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.playable.subscribe()
    }

    /// Clones the most recent frame, if any has arrived yet
    pub fn latest(&self) -> Option<Frame> {
        self.inner.latest.lock().ok().and_then(|latest| latest.clone())
    }
}

/// Manages the webcam stream
pub struct CameraManager {
    camera: Camera,
    is_running: bool,
}

impl CameraManager {
    /// Opens the camera at `index`, falling back to `index + 1`
    pub fn new(index: u32, width: u32, height: u32) -> Result<Self> {
        let requested_format = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(
            nokhwa::utils::CameraFormat::new(
                nokhwa::utils::Resolution::new(width, height),
                nokhwa::utils::FrameFormat::YUYV,
                30,
            ),
        ));

        // Some systems expose the built-in camera at 0, others at 1
        let camera = Self::try_open_camera(index, requested_format)
            .or_else(|_| Self::try_open_camera(index + 1, requested_format))
            .map_err(|e| {
                error!("Failed to open camera {} or {}: {}", index, index + 1, e);
                MoodSyncError::DeviceAccess(format!(
                    "Could not open camera. Make sure a camera is connected, \
                     no other app is using it and camera permissions are granted. Error: {e}"
                ))
            })?;

        info!("Opened camera: {}", camera.info().human_name());
        Ok(Self {
            camera,
            is_running: false,
        })
    }

    fn try_open_camera(index: u32, requested_format: RequestedFormat) -> Result<Camera> {
        Camera::new(CameraIndex::Index(index), requested_format).map_err(MoodSyncError::from)
    }

    /// Lists available camera devices
    pub fn list_devices() -> Result<Vec<String>> {
        let devices = nokhwa::query(nokhwa::utils::ApiBackend::Auto)
            .map_err(|e| MoodSyncError::DeviceAccess(format!("Failed to query cameras: {e}")))?;

        Ok(devices
            .iter()
            .map(|info| format!("{}: {}", info.index(), info.human_name()))
            .collect())
    }

    /// Returns the current camera resolution
    pub fn resolution(&self) -> (u32, u32) {
        let res = self.camera.resolution();
        (res.width(), res.height())
    }

    /// Opens the stream and checks that a frame can be read
    pub fn start(&mut self) -> Result<()> {
        if self.is_running {
            return Ok(());
        }
        self.camera.open_stream()?;
        // the first read after opening can fail while the sensor warms up
        if let Err(e) = self.camera.frame() {
            warn!("First frame after opening the stream failed: {}", e);
        }
        self.is_running = true;
        Ok(())
    }

    /// Stops the camera stream
    pub fn stop(&mut self) {
        if !self.is_running {
            return;
        }
        self.is_running = false;
        if let Err(e) = self.camera.stop_stream() {
            error!("Error stopping camera stream: {}", e);
        }
    }

    /// Grabs and decodes the next frame (blocking)
    pub fn capture(&mut self) -> Result<Frame> {
        let frame_data = self.camera.frame()?;

        let buffer = frame_data.decode_image::<RgbFormat>().map_err(|e| {
            MoodSyncError::FrameProcessing(format!("Failed to decode frame: {e}"))
        })?;

        let (width, height) = (buffer.width(), buffer.height());
        Ok(Frame::new(buffer.into_raw(), width, height))
    }

    /// Grabs one frame into `slot`; a failed read pauses the slot
    pub fn pump(&mut self, slot: &FrameSlot) -> Option<Frame> {
        if !self.is_running {
            slot.set_playable(false);
            return None;
        }
        match self.capture() {
            Ok(frame) => {
                slot.publish(frame.clone());
                Some(frame)
            }
            Err(e) => {
                warn!("Failed to capture frame: {}", e);
                slot.set_playable(false);
                None
            }
        }
    }
}

impl Drop for CameraManager {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Decodes an image file into an RGB frame
pub fn load_still_image<P: AsRef<Path>>(path: P) -> Result<Frame> {
    let img = image::open(path.as_ref()).map_err(|e| {
        MoodSyncError::ImageLoad(format!("Failed to load image from {:?}: {}", path.as_ref(), e))
    })?;
    Ok(frame_from_image(img))
}

fn frame_from_image(img: image::DynamicImage) -> Frame {
    let rgb = img.to_rgb8();
    let (width, height) = rgb.dimensions();
    Frame::new(rgb.into_raw(), width, height)
}
