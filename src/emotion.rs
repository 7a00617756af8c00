// Bundled detector: Haar cascade face boxes + ONNX expression classifier

use crate::detector::Detector;
use crate::error::{MoodSyncError, Result};
use crate::models::{BoundingBox, Detection, DisplaySize, ExpressionScores, Frame};
use async_trait::async_trait;
use opencv::core::{Mat, Rect, Size, Vector};
use opencv::imgproc;
use opencv::objdetect::CascadeClassifier;
use opencv::prelude::*;
use ort::session::Session;
use ort::value::Value;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

/// Side length of the classifier input
const CLASSIFIER_INPUT: usize = 260;

/// HSEmotion output order
pub const EMOTION_LABELS: [&str; 8] = [
    "angry",
    "disgusted",
    "fearful",
    "happy",
    "sad",
    "surprised",
    "neutral",
    "contempt",
];

/// A face found by the cascade, cropped out of the grayscale frame
struct FaceRegion {
    rect: BoundingBox,
    data: Vec<u8>,
    height: u32,
}

/// Face detector using OpenCV Haar Cascade
pub struct FaceDetector {
    classifier: CascadeClassifier,
}

impl FaceDetector {
    /// Creates a new FaceDetector by loading the Haar Cascade classifier
    pub fn new(cascade_path: &str) -> Result<Self> {
        let classifier = CascadeClassifier::new(cascade_path).map_err(|e| {
            error!("Failed to load Haar Cascade: {}", e);
            MoodSyncError::ModelLoad(format!("Haar Cascade load failed: {e}"))
        })?;

        if classifier.empty()? {
            return Err(MoodSyncError::ModelLoad(
                "Haar Cascade classifier is empty".to_string(),
            ));
        }

        Ok(Self { classifier })
    }

    /// Detects faces and returns each face box with its grayscale crop
    fn detect_faces(&mut self, frame: &Frame) -> Result<Vec<FaceRegion>> {
        let mat = Mat::from_slice(&frame.data).map_err(|e| {
            MoodSyncError::FrameProcessing(format!("Failed to create Mat: {e}"))
        })?;

        let mat = mat.reshape(3, frame.height as i32).map_err(|e| {
            MoodSyncError::FrameProcessing(format!("Failed to reshape Mat: {e}"))
        })?;

        let mut gray = Mat::default();
        imgproc::cvt_color(
            &mat,
            &mut gray,
            imgproc::COLOR_RGB2GRAY,
            0,
            opencv::core::AlgorithmHint::ALGO_HINT_DEFAULT,
        )
        .map_err(|e| {
            MoodSyncError::FrameProcessing(format!("Failed to convert to grayscale: {e}"))
        })?;

        let mut faces = Vector::<Rect>::new();
        self.classifier
            .detect_multi_scale(
                &gray,
                &mut faces,
                1.1,               // scale factor
                5,                 // min neighbors
                0,                 // flags
                Size::new(40, 40), // min size
                Size::new(0, 0),   // no max size
            )
            .map_err(|e| MoodSyncError::DetectionCycle(format!("Face detection failed: {e}")))?;

        let mut regions = Vec::with_capacity(faces.len());
        for face_rect in faces.iter() {
            match extract_face_region(&gray, face_rect) {
                Ok((data, height)) => regions.push(FaceRegion {
                    rect: BoundingBox::new(
                        face_rect.x as f32,
                        face_rect.y as f32,
                        face_rect.width as f32,
                        face_rect.height as f32,
                    ),
                    data,
                    height,
                }),
                Err(e) => {
                    warn!("Failed to extract face region: {}", e);
                    continue;
                }
            }
        }

        Ok(regions)
    }
}

/// Crops a face region out of the grayscale image
fn extract_face_region(gray: &Mat, rect: Rect) -> Result<(Vec<u8>, u32)> {
    let face_roi = Mat::roi(gray, rect).map_err(|e| {
        MoodSyncError::FrameProcessing(format!("Failed to crop face region: {e}"))
    })?;

    // ROI views are not continuous; clone before reading bytes
    let face_continuous = face_roi.try_clone().map_err(|e| {
        MoodSyncError::FrameProcessing(format!("Failed to clone face ROI: {e}"))
    })?;

    let face_data = face_continuous.data_bytes().map_err(|e| {
        MoodSyncError::FrameProcessing(format!("Failed to get face data: {e}"))
    })?;

    Ok((face_data.to_vec(), rect.height as u32))
}

/// Grayscale crop -> RGB 260x260 -> normalized HWC floats
fn preprocess_face(face_data: &[u8], face_height: u32) -> Result<Vec<f32>> {
    let face_mat = Mat::from_slice(face_data).map_err(|e| {
        MoodSyncError::FrameProcessing(format!("Failed to create face Mat: {e}"))
    })?;

    let face_mat = face_mat.reshape(1, face_height as i32).map_err(|e| {
        MoodSyncError::FrameProcessing(format!("Failed to reshape face Mat: {e}"))
    })?;

    let mut rgb_mat = Mat::default();
    imgproc::cvt_color_def(&face_mat, &mut rgb_mat, imgproc::COLOR_GRAY2RGB).map_err(|e| {
        MoodSyncError::FrameProcessing(format!("Failed to convert to RGB: {e}"))
    })?;

    let mut resized = Mat::default();
    imgproc::resize(
        &rgb_mat,
        &mut resized,
        Size::new(CLASSIFIER_INPUT as i32, CLASSIFIER_INPUT as i32),
        0.0,
        0.0,
        imgproc::INTER_LINEAR,
    )
    .map_err(|e| MoodSyncError::FrameProcessing(format!("Failed to resize face: {e}")))?;

    let data = resized.data_bytes().map_err(|e| {
        MoodSyncError::FrameProcessing(format!("Failed to get resized data: {e}"))
    })?;

    Ok(data.iter().map(|&pixel| pixel as f32 / 255.0).collect())
}

/// HWC -> CHW for a square RGB input
fn hwc_to_chw(hwc: &[f32], side: usize) -> Vec<f32> {
    let channels = 3;
    let mut chw = vec![0.0f32; channels * side * side];
    for h in 0..side {
        for w in 0..side {
            for c in 0..channels {
                chw[c * side * side + h * side + w] = hwc[(h * side + w) * channels + c];
            }
        }
    }
    chw
}

/// Converts raw logits into probabilities
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max_logit = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exp_sum: f32 = logits.iter().map(|&x| (x - max_logit).exp()).sum();
    logits
        .iter()
        .map(|&x| (x - max_logit).exp() / exp_sum)
        .collect()
}

/// Pairs probabilities with labels in model output order
pub fn scores_from_probabilities(probabilities: &[f32]) -> ExpressionScores {
    if probabilities.len() > EMOTION_LABELS.len() {
        warn!(
            "Model produced {} classes, only {} are labelled",
            probabilities.len(),
            EMOTION_LABELS.len()
        );
    }
    EMOTION_LABELS
        .iter()
        .zip(probabilities.iter())
        .map(|(label, p)| (*label, *p))
        .collect()
}

/// Emotion classifier using ONNX Runtime
pub struct EmotionClassifier {
    session: Session,
}

impl EmotionClassifier {
    /// Creates a new EmotionClassifier by loading the ONNX model
    pub fn new(model_path: &str) -> Result<Self> {
        let session = Session::builder()
            .map_err(|e| {
                MoodSyncError::ModelLoad(format!("Failed to create session builder: {e}"))
            })?
            .commit_from_file(model_path)
            .map_err(|e| {
                error!("Failed to load ONNX model: {}", e);
                MoodSyncError::ModelLoad(format!("ONNX model load failed: {e}"))
            })?;

        Ok(Self { session })
    }

    /// Returns the full probability mapping for one preprocessed face
    fn classify(&mut self, preprocessed_face: &[f32]) -> Result<ExpressionScores> {
        let chw_data = hwc_to_chw(preprocessed_face, CLASSIFIER_INPUT);

        let input_array = ndarray::Array4::from_shape_vec(
            (1, 3, CLASSIFIER_INPUT, CLASSIFIER_INPUT),
            chw_data,
        )
        .map_err(|e| MoodSyncError::OnnxRuntime(format!("Failed to create input array: {e}")))?;

        let input_tensor = Value::from_array(input_array).map_err(|e| {
            MoodSyncError::OnnxRuntime(format!("Failed to create input tensor: {e}"))
        })?;

        let outputs = self.session.run(ort::inputs![input_tensor]).map_err(|e| {
            error!("ONNX inference failed: {}", e);
            MoodSyncError::OnnxRuntime(format!("Inference failed: {e}"))
        })?;

        let (_, output_value) = outputs
            .iter()
            .next()
            .ok_or_else(|| MoodSyncError::OnnxRuntime("No output from model".to_string()))?;

        let (_, logits) = output_value.try_extract_tensor::<f32>().map_err(|e| {
            MoodSyncError::OnnxRuntime(format!("Failed to extract output tensor: {e}"))
        })?;

        Ok(scores_from_probabilities(&softmax(logits)))
    }
}

/// Runs `work` on tokio's blocking pool and hands `state` back with its output.
///
/// A panic inside `work` loses `state` and is reported as a cycle failure.
pub async fn off_runtime<S, R, F>(mut state: S, work: F) -> Result<(S, R)>
where
    S: Send + 'static,
    R: Send + 'static,
    F: FnOnce(&mut S) -> R + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let output = work(&mut state);
        (state, output)
    })
    .await
    .map_err(|e| MoodSyncError::DetectionCycle(format!("inference task failed: {e}")))
}

/// Cascade and classifier, loaded together
struct Models {
    face_detector: FaceDetector,
    classifier: EmotionClassifier,
}

impl Models {
    fn detect(&mut self, frame: &Frame, display: DisplaySize) -> Result<Vec<Detection>> {
        let faces = self.face_detector.detect_faces(frame)?;
        let mut detections = Vec::with_capacity(faces.len());
        for face in faces {
            let preprocessed = preprocess_face(&face.data, face.height)?;
            let scores = self.classifier.classify(&preprocessed)?;
            detections.push(Detection::new(
                face.rect.rescale(frame.dimensions(), display),
                scores,
            ));
        }
        Ok(detections)
    }
}

/// Local detector backed by the cascade and the ONNX classifier.
///
/// Inference runs on the blocking pool; the models travel there and back with
/// each call.
pub struct OnnxDetector {
    cascade_path: PathBuf,
    model_path: PathBuf,
    models: Option<Models>,
}

impl OnnxDetector {
    /// Creates an unloaded detector; models are read by `initialize`
    pub fn new(cascade_path: impl Into<PathBuf>, model_path: impl Into<PathBuf>) -> Self {
        Self {
            cascade_path: cascade_path.into(),
            model_path: model_path.into(),
            models: None,
        }
    }
}

#[async_trait]
impl Detector for OnnxDetector {
    fn name(&self) -> &str {
        "onnx"
    }

    async fn initialize(&mut self) -> Result<()> {
        if self.is_ready() {
            return Ok(());
        }
        let cascade = self.cascade_path.to_string_lossy().into_owned();
        let model = self.model_path.to_string_lossy().into_owned();

        let loaded = off_runtime((), move |_| -> Result<Models> {
            Ok(Models {
                face_detector: FaceDetector::new(&cascade)?,
                classifier: EmotionClassifier::new(&model)?,
            })
        })
        .await
        .and_then(|(_, loaded)| loaded)
        .map_err(|e| match e {
            MoodSyncError::ModelLoad(_) => e,
            other => MoodSyncError::ModelLoad(other.to_string()),
        })?;
        self.models = Some(loaded);
        info!(
            "Loaded face cascade {} and emotion model {}",
            self.cascade_path.display(),
            self.model_path.display()
        );
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.models.is_some()
    }

    async fn detect(&mut self, frame: &Frame, display: DisplaySize) -> Result<Vec<Detection>> {
        if frame.data.len() != (frame.width * frame.height * 3) as usize {
            return Err(MoodSyncError::FrameProcessing(format!(
                "frame buffer is {} bytes, expected {}x{}x3",
                frame.data.len(),
                frame.width,
                frame.height
            )));
        }
        let Some(models) = self.models.take() else {
            return Err(MoodSyncError::DetectionCycle(
                "detector used before initialize".to_string(),
            ));
        };

        let frame = frame.clone();
        let (models, detections) =
            off_runtime(models, move |models| models.detect(&frame, display)).await?;
        self.models = Some(models);

        let detections = detections?;
        debug!("{} face(s) in frame", detections.len());
        Ok(detections)
    }

    fn dispose(&mut self) {
        if self.models.take().is_some() {
            info!("Released detector models");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn softmax_sums_to_one() {
        let probabilities = softmax(&[1.0, 2.0, 3.0]);
        let sum: f32 = probabilities.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(probabilities[2] > probabilities[1]);
    }

    #[test]
    fn probabilities_keep_model_order() {
        let scores = scores_from_probabilities(&[0.1, 0.0, 0.0, 0.7, 0.1, 0.0, 0.1, 0.0]);
        let labels: Vec<&str> = scores.iter().map(|(l, _)| l).collect();
        assert_eq!(labels, EMOTION_LABELS.to_vec());
        assert_eq!(scores.dominant().unwrap().label, "happy");
    }

    #[test]
    fn chw_layout_groups_channels() {
        // 1x1 pixel: r, g, b
        assert_eq!(hwc_to_chw(&[0.1, 0.2, 0.3], 1), vec![0.1, 0.2, 0.3]);
        // 2x2 pixels, channel planes come out contiguous
        let hwc: Vec<f32> = (0..12).map(|v| v as f32).collect();
        let chw = hwc_to_chw(&hwc, 2);
        assert_eq!(&chw[0..4], &[0.0, 3.0, 6.0, 9.0]);
        assert_eq!(&chw[4..8], &[1.0, 4.0, 7.0, 10.0]);
    }

    #[tokio::test]
    async fn detect_before_initialize_is_an_error() {
        let mut detector = OnnxDetector::new("missing.xml", "missing.onnx");
        assert!(!detector.is_ready());
        let frame = Frame::new(vec![0; 12], 2, 2);
        let err = detector
            .detect(&frame, DisplaySize::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MoodSyncError::DetectionCycle(_)));
    }

    #[tokio::test]
    async fn missing_models_fail_to_load() {
        let mut detector = OnnxDetector::new("missing.xml", "missing.onnx");
        let err = detector.initialize().await.unwrap_err();
        assert!(!err.is_transient(), "{err:?}");
        assert!(!detector.is_ready());
    }

    #[tokio::test]
    async fn blocking_work_leaves_the_runtime_free() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let ticker = tokio::spawn(async move {
            loop {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        });

        let (state, doubled) = off_runtime(5u32, |n| {
            std::thread::sleep(Duration::from_millis(50));
            *n += 1;
            *n * 2
        })
        .await
        .unwrap();
        ticker.abort();

        assert_eq!((state, doubled), (6, 12));
        assert!(ticks.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn panicking_work_is_a_cycle_failure() {
        let err = off_runtime((), |_| -> u32 { panic!("classifier blew up") })
            .await
            .unwrap_err();
        assert!(matches!(err, MoodSyncError::DetectionCycle(_)));
    }
}
