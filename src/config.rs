// Application configuration, persisted as JSON next to the binary

use crate::error::{MoodSyncError, Result};
use crate::models::DisplaySize;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_CONFIG_PATH: &str = "moodsync.json";

/// Where a loaded configuration came from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigOrigin {
    File,
    CreatedDefault,
    /// The file could not be parsed; carries the parse error
    Fallback(String),
}

impl ConfigOrigin {
    pub fn log(&self, path: &Path) {
        match self {
            ConfigOrigin::File => info!("Loaded configuration from {}", path.display()),
            ConfigOrigin::CreatedDefault => info!(
                "Configuration file not found. Created default at {}",
                path.display()
            ),
            ConfigOrigin::Fallback(e) => {
                warn!("Error parsing {}: {}. Using defaults.", path.display(), e)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub capture: CaptureConfig,
    pub models: ModelConfig,
    pub log_file: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    /// Share of video-mode mood changes forwarded to `/update_emotion`
    pub report_sample_rate: f64,
    /// 0 disables the client-side timeout
    pub request_timeout_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Delay between the end of one detection cycle and the next
    pub poll_interval_ms: u64,
    pub camera_index: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub face_cascade: PathBuf,
    pub emotion_model: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            capture: CaptureConfig::default(),
            models: ModelConfig::default(),
            log_file: PathBuf::from("moodsync.log"),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".to_string(),
            report_sample_rate: 0.1,
            request_timeout_secs: 30,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 200,
            camera_index: 0,
            width: 640,
            height: 480,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            face_cascade: PathBuf::from("assets/models/haarcascade_frontalface_default.xml"),
            emotion_model: PathBuf::from("assets/models/emotion.onnx"),
        }
    }
}

impl CaptureConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn display_size(&self) -> DisplaySize {
        DisplaySize::new(self.width as f32, self.height as f32)
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }
}

impl AppConfig {
    /// Loads the config at `path`.
    ///
    /// A missing file is created with defaults; an unparsable one is replaced
    /// by defaults in memory only. Nothing is logged here since this runs before
    /// logging is set up; the returned [`ConfigOrigin`] says what happened.
    /// Call [`AppConfig::validated`] once logging is up.
    pub fn load(path: &Path) -> Result<(Self, ConfigOrigin)> {
        if !path.exists() {
            let config = Self::default();
            config.save(path)?;
            return Ok((config, ConfigOrigin::CreatedDefault));
        }

        let content = fs::read_to_string(path)?;
        Ok(match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => (config, ConfigOrigin::File),
            Err(e) => (Self::default(), ConfigOrigin::Fallback(e.to_string())),
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Clamps soft limits and rejects values the capture loop cannot run with
    pub fn validated(mut self) -> Result<Self> {
        if self.capture.poll_interval_ms == 0 {
            return Err(MoodSyncError::Config(
                "capture.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(MoodSyncError::Config(
                "capture.width and capture.height must be non-zero".to_string(),
            ));
        }
        if self.backend.base_url.trim().is_empty() {
            return Err(MoodSyncError::Config("backend.base_url is empty".to_string()));
        }
        let rate = self.backend.report_sample_rate;
        if !(0.0..=1.0).contains(&rate) || rate.is_nan() {
            warn!("report_sample_rate {} outside [0, 1], clamping", rate);
            self.backend.report_sample_rate = if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) };
        }
        Ok(self)
    }
}
