// Command line interface: desktop UI by default, plus one-shot subcommands

use crate::backend::BackendClient;
use crate::camera::{load_still_image, CameraManager};
use crate::config::{AppConfig, DEFAULT_CONFIG_PATH};
use crate::detector::Detector;
use crate::emotion::OnnxDetector;
use crate::error::{MoodSyncError, Result};
use crate::models::{Detection, DisplaySize, Frame};
use crate::mood::{MoodSignal, MoodState};
use crate::overlay;
use crate::presentation::{format_confidence, plain_recommendation};
use clap::{Parser, Subcommand};
use image::{DynamicImage, RgbImage, RgbaImage};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Webcam emotion capture with backend recommendations.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Configuration file (created with defaults if missing).
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,
    /// Camera index override.
    #[arg(long)]
    pub camera: Option<u32>,
    /// Backend base URL override.
    #[arg(long)]
    pub backend_url: Option<String>,
    /// Share of video mood changes reported to the backend, in [0, 1].
    #[arg(long)]
    pub sample_rate: Option<f64>,
    /// Delay between detection cycles in milliseconds.
    #[arg(long)]
    pub poll_ms: Option<u64>,
    /// Log file override.
    #[arg(long)]
    pub log_file: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Detect emotions in an image locally and report the mood.
    Analyze {
        image: PathBuf,
        /// Write a copy of the image with face boxes drawn on it.
        #[arg(long)]
        annotate: Option<PathBuf>,
    },
    /// Send an image to the backend for analysis.
    Upload {
        image: PathBuf,
        /// Where to save the annotated image the backend returns.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Ask the backend for a recommendation for an emotion.
    Recommend { emotion: String },
    /// List camera devices.
    Devices,
}

impl Cli {
    /// Applies flag overrides on top of the file configuration
    pub fn apply(&self, mut config: AppConfig) -> Result<AppConfig> {
        if let Some(index) = self.camera {
            config.capture.camera_index = index;
        }
        if let Some(url) = &self.backend_url {
            config.backend.base_url = url.clone();
        }
        if let Some(rate) = self.sample_rate {
            config.backend.report_sample_rate = rate;
        }
        if let Some(ms) = self.poll_ms {
            config.capture.poll_interval_ms = ms;
        }
        if let Some(path) = &self.log_file {
            config.log_file = path.clone();
        }
        config.validated()
    }
}

fn backend_client(config: &AppConfig) -> Result<BackendClient> {
    BackendClient::new(
        config.backend.base_url.clone(),
        config.backend.request_timeout(),
    )
}

/// Runs a subcommand to completion
pub async fn run(command: Command, config: &AppConfig) -> Result<()> {
    match command {
        Command::Analyze { image, annotate } => analyze(config, &image, annotate.as_deref()).await,
        Command::Upload { image, out } => upload(config, &image, out.as_deref()).await,
        Command::Recommend { emotion } => recommend(config, &emotion).await,
        Command::Devices => {
            for device in CameraManager::list_devices()? {
                println!("{device}");
            }
            Ok(())
        }
    }
}

async fn analyze(config: &AppConfig, image: &Path, annotate: Option<&Path>) -> Result<()> {
    let frame = load_still_image(image)?;
    let mut detector = OnnxDetector::new(
        config.models.face_cascade.clone(),
        config.models.emotion_model.clone(),
    );
    detector.initialize().await?;

    // boxes stay in the image's own pixel space
    let native = DisplaySize::new(frame.width as f32, frame.height as f32);
    let detections = detector.detect(&frame, native).await;
    detector.dispose();
    let detections = detections?;

    for (i, detection) in detections.iter().enumerate() {
        let ranked: Vec<String> = detection
            .scores
            .ranked()
            .into_iter()
            .map(|(label, score)| format_confidence(label, score))
            .collect();
        println!("face {}: {}", i + 1, ranked.join(", "));
    }

    let mut mood = MoodState::new();
    match mood.consider(&detections) {
        MoodSignal::NoFace => println!("No face detected"),
        MoodSignal::Unchanged => println!("Mood: {}", mood.current()),
        MoodSignal::Changed(change) => {
            println!("Mood: {change}");
            // a still image is always reported; failures are not fatal here either
            let backend = backend_client(config)?;
            if let Err(e) = backend.update_emotion(&change.label, change.confidence).await {
                warn!("Backend error while reporting {}: {}", change.label, e);
            }
        }
    }

    if let Some(out) = annotate {
        annotated_copy(&frame, &detections)?.save(out)?;
        info!("Wrote annotated image to {}", out.display());
        println!("Annotated image written to {}", out.display());
    }
    Ok(())
}

/// Copy of `frame` with detection boxes drawn in the frame's pixel space
fn annotated_copy(frame: &Frame, detections: &[Detection]) -> Result<RgbaImage> {
    let rgb = RgbImage::from_raw(frame.width, frame.height, frame.data.clone()).ok_or_else(|| {
        MoodSyncError::FrameProcessing(format!(
            "frame buffer does not match {}x{}",
            frame.width, frame.height
        ))
    })?;
    let mut img = DynamicImage::ImageRgb8(rgb).to_rgba8();
    overlay::annotate(&mut img, detections);
    Ok(img)
}

async fn upload(config: &AppConfig, image: &Path, out: Option<&Path>) -> Result<()> {
    let bytes = std::fs::read(image)?;
    let file_name = image
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image.jpg".to_string());

    let analysis = backend_client(config)?
        .upload_image(bytes, &file_name)
        .await?;
    if let Some(error) = &analysis.error {
        return Err(MoodSyncError::Backend(error.clone()));
    }

    match (&analysis.emotion, analysis.confidence) {
        (Some(emotion), Some(confidence)) => {
            println!("Mood: {}", format_confidence(emotion, confidence))
        }
        (Some(emotion), None) => println!("Mood: {emotion}"),
        _ => println!("No face detected"),
    }

    if let Some(out) = out {
        match analysis.annotated_image_bytes()? {
            Some(bytes) => {
                std::fs::write(out, bytes)?;
                println!("Annotated image written to {}", out.display());
            }
            None => warn!("Backend returned no annotated image"),
        }
    }
    Ok(())
}

async fn recommend(config: &AppConfig, emotion: &str) -> Result<()> {
    let recommendation = backend_client(config)?.get_recommendation(emotion).await?;
    println!("{}", plain_recommendation(&recommendation));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BoundingBox, ExpressionScores};

    #[test]
    fn no_subcommand_means_desktop_ui() {
        let cli = Cli::try_parse_from(["moodsync"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
    }

    #[test]
    fn analyze_takes_optional_annotation_path() {
        let cli =
            Cli::try_parse_from(["moodsync", "analyze", "me.png", "--annotate", "out.png"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Command::Analyze {
                image: PathBuf::from("me.png"),
                annotate: Some(PathBuf::from("out.png")),
            })
        );
    }

    #[test]
    fn flags_override_file_values() {
        let cli = Cli::try_parse_from([
            "moodsync",
            "--camera",
            "2",
            "--backend-url",
            "http://backend:8080",
            "--sample-rate",
            "3.0",
            "recommend",
            "sad",
        ])
        .unwrap();
        let config = cli.apply(AppConfig::default()).unwrap();
        assert_eq!(config.capture.camera_index, 2);
        assert_eq!(config.backend.base_url, "http://backend:8080");
        // clamped by validation
        assert_eq!(config.backend.report_sample_rate, 1.0);
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let cli = Cli::try_parse_from(["moodsync", "--poll-ms", "0"]).unwrap();
        let err = cli.apply(AppConfig::default()).unwrap_err();
        assert!(matches!(err, MoodSyncError::Config(_)));
    }

    #[test]
    fn annotated_copy_draws_on_a_same_sized_image() {
        let frame = Frame::new(vec![0; 32 * 32 * 3], 32, 32);
        let scores: ExpressionScores = [("happy", 0.9)].into_iter().collect();
        let img = annotated_copy(
            &frame,
            &[Detection::new(BoundingBox::new(4.0, 4.0, 20.0, 20.0), scores)],
        )
        .unwrap();
        assert_eq!(img.dimensions(), (32, 32));
        assert_ne!(img.get_pixel(4, 4).0, [0, 0, 0, 255]);
    }

    #[test]
    fn mismatched_frame_buffer_is_rejected() {
        let frame = Frame::new(vec![0; 5], 32, 32);
        assert!(annotated_copy(&frame, &[]).is_err());
    }
}
