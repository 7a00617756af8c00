use async_trait::async_trait;
use moodsync::camera::FrameSlot;
use moodsync::capture::{CaptureEvent, CaptureHandle, CaptureLoop, CaptureOptions};
use moodsync::detector::Detector;
use moodsync::error::{MoodSyncError, Result};
use moodsync::models::{
    BoundingBox, CaptureMode, Detection, DisplaySize, ExpressionScores, Frame, MoodChange, UiState,
};
use moodsync::reporter::{BackendReporter, EmotionTransport};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{sleep, Instant};

const POLL: Duration = Duration::from_millis(100);

#[derive(Clone)]
enum Step {
    Faces(Vec<Detection>),
    Fail,
}

fn face(scores: &[(&str, f32)]) -> Detection {
    Detection::new(
        BoundingBox::new(0.0, 0.0, 10.0, 10.0),
        scores.iter().copied().collect::<ExpressionScores>(),
    )
}

fn happy() -> Step {
    Step::Faces(vec![face(&[("happy", 0.8), ("sad", 0.1)])])
}

/// Shared view into what the scripted detector was asked to do
#[derive(Clone, Default)]
struct Recorder {
    starts: Arc<Mutex<Vec<(Instant, u32)>>>,
    displays: Arc<Mutex<Vec<DisplaySize>>>,
    running: Arc<AtomicUsize>,
    max_running: Arc<AtomicUsize>,
    disposed: Arc<AtomicUsize>,
}

impl Recorder {
    fn calls(&self) -> usize {
        self.starts.lock().unwrap().len()
    }

    fn start_times(&self) -> Vec<Instant> {
        self.starts.lock().unwrap().iter().map(|(t, _)| *t).collect()
    }

    fn frame_widths(&self) -> Vec<u32> {
        self.starts.lock().unwrap().iter().map(|(_, w)| *w).collect()
    }

    fn displays(&self) -> Vec<DisplaySize> {
        self.displays.lock().unwrap().clone()
    }
}

struct ScriptedDetector {
    script: VecDeque<Step>,
    fallback: Step,
    latency: Duration,
    recorder: Recorder,
}

impl ScriptedDetector {
    fn new(script: Vec<Step>, fallback: Step, latency: Duration, recorder: Recorder) -> Self {
        Self {
            script: script.into(),
            fallback,
            latency,
            recorder,
        }
    }
}

#[async_trait]
impl Detector for ScriptedDetector {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_ready(&self) -> bool {
        true
    }

    async fn detect(&mut self, frame: &Frame, display: DisplaySize) -> Result<Vec<Detection>> {
        let running = self.recorder.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.recorder.max_running.fetch_max(running, Ordering::SeqCst);
        self.recorder
            .starts
            .lock()
            .unwrap()
            .push((Instant::now(), frame.width));
        self.recorder.displays.lock().unwrap().push(display);

        sleep(self.latency).await;

        self.recorder.running.fetch_sub(1, Ordering::SeqCst);
        match self.script.pop_front().unwrap_or_else(|| self.fallback.clone()) {
            Step::Faces(detections) => Ok(detections),
            Step::Fail => Err(MoodSyncError::DetectionCycle("model hiccup".into())),
        }
    }

    fn dispose(&mut self) {
        self.recorder.disposed.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct Transport {
    sent: Mutex<Vec<(String, f32)>>,
}

#[async_trait]
impl EmotionTransport for Transport {
    async fn update_emotion(&self, label: &str, confidence: f32) -> Result<()> {
        self.sent.lock().unwrap().push((label.to_string(), confidence));
        Ok(())
    }
}

impl Transport {
    fn labels(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(l, _)| l.clone()).collect()
    }
}

fn video_frame() -> Frame {
    Frame::new(vec![0; 4 * 4 * 3], 4, 4)
}

fn still_frame() -> Frame {
    Frame::new(vec![0; 8 * 8 * 3], 8, 8)
}

struct Harness {
    handle: CaptureHandle,
    events: broadcast::Receiver<CaptureEvent>,
    frames: FrameSlot,
    transport: Arc<Transport>,
    recorder: Recorder,
}

fn spawn_loop(detector: ScriptedDetector, sample_rate: f64, playable: bool) -> Harness {
    let recorder = detector.recorder.clone();
    let frames = FrameSlot::new();
    if playable {
        frames.publish(video_frame());
    }
    let transport = Arc::new(Transport::default());
    let reporter = BackendReporter::seeded(transport.clone(), sample_rate, 11);
    let (capture, handle) = CaptureLoop::new(
        Box::new(detector),
        frames.clone(),
        reporter,
        CaptureOptions {
            poll_interval: POLL,
            display: DisplaySize::new(640.0, 480.0),
        },
    );
    let events = handle.subscribe();
    tokio::spawn(capture.run());
    Harness {
        handle,
        events,
        frames,
        transport,
        recorder,
    }
}

fn drain(events: &mut broadcast::Receiver<CaptureEvent>) -> Vec<CaptureEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

/// Status events emitted after the loop entered still-image mode
fn still_statuses(events: &[CaptureEvent]) -> Vec<UiState> {
    events
        .iter()
        .skip_while(|e| **e != CaptureEvent::ModeChanged(CaptureMode::StillImage))
        .filter_map(|e| match e {
            CaptureEvent::Status(status) => Some(status.clone()),
            _ => None,
        })
        .collect()
}

fn mood_changes(events: &[CaptureEvent]) -> Vec<MoodChange> {
    events
        .iter()
        .filter_map(|e| match e {
            CaptureEvent::MoodChanged(change) => Some(change.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn video_polling_announces_a_persistent_mood_once() {
    let recorder = Recorder::default();
    let detector = ScriptedDetector::new(vec![], happy(), Duration::from_millis(50), recorder);
    let mut h = spawn_loop(detector, 1.0, true);

    h.handle.start();
    sleep(Duration::from_secs(1)).await;

    let events = drain(&mut h.events);
    assert_eq!(mood_changes(&events), vec![MoodChange::new("happy", 0.8)]);
    assert!(events.contains(&CaptureEvent::Status(UiState::WebcamActive)));
    assert!(h.recorder.calls() >= 5, "only {} cycles", h.recorder.calls());
    assert_eq!(h.transport.labels(), vec!["happy"]);
    assert_eq!(h.handle.stats().max_in_flight, 1);
}

#[tokio::test(start_paused = true)]
async fn poll_delay_is_measured_from_cycle_completion() {
    let recorder = Recorder::default();
    let latency = Duration::from_millis(150);
    let detector = ScriptedDetector::new(vec![], happy(), latency, recorder);
    let h = spawn_loop(detector, 1.0, true);

    h.handle.start();
    sleep(Duration::from_millis(1200)).await;

    let starts = h.recorder.start_times();
    assert!(starts.len() >= 3);
    for pair in starts.windows(2) {
        assert!(pair[1] - pair[0] >= latency + POLL);
    }
    assert_eq!(h.recorder.max_running.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn second_request_while_in_flight_is_dropped() {
    let recorder = Recorder::default();
    let detector = ScriptedDetector::new(vec![], happy(), Duration::from_millis(200), recorder);
    let mut h = spawn_loop(detector, 1.0, true);

    h.handle.run_once();
    h.handle.run_once();
    h.handle.run_once();
    sleep(Duration::from_millis(500)).await;

    assert_eq!(h.recorder.calls(), 1);
    let stats = h.handle.stats();
    assert_eq!(stats.requests_dropped, 2);
    assert_eq!(stats.max_in_flight, 1);
    let events = drain(&mut h.events);
    let dropped = events
        .iter()
        .filter(|e| **e == CaptureEvent::CycleDropped)
        .count();
    assert_eq!(dropped, 2);

    // the loop was never started, so nothing polls afterwards
    sleep(Duration::from_secs(1)).await;
    assert_eq!(h.recorder.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_cycle_is_skipped_and_polling_continues() {
    let recorder = Recorder::default();
    let detector =
        ScriptedDetector::new(vec![Step::Fail], happy(), Duration::from_millis(20), recorder);
    let mut h = spawn_loop(detector, 1.0, true);

    h.handle.start();
    sleep(Duration::from_millis(600)).await;

    let events = drain(&mut h.events);
    assert!(events
        .iter()
        .any(|e| matches!(e, CaptureEvent::CycleFailed(msg) if msg.contains("model hiccup"))));
    assert_eq!(mood_changes(&events).len(), 1);
    let stats = h.handle.stats();
    assert_eq!(stats.cycles_failed, 1);
    assert!(stats.cycles_completed >= 3);
}

#[tokio::test(start_paused = true)]
async fn no_face_keeps_mood_and_sends_nothing() {
    let recorder = Recorder::default();
    let detector =
        ScriptedDetector::new(vec![], Step::Faces(vec![]), Duration::from_millis(20), recorder);
    let mut h = spawn_loop(detector, 1.0, true);

    h.handle.start();
    sleep(Duration::from_millis(500)).await;

    let events = drain(&mut h.events);
    assert!(events.contains(&CaptureEvent::Status(UiState::NoFaceDetected)));
    assert!(mood_changes(&events).is_empty());
    assert!(h.transport.labels().is_empty());
}

#[tokio::test(start_paused = true)]
async fn empty_score_mapping_counts_as_no_face() {
    let recorder = Recorder::default();
    let detector = ScriptedDetector::new(
        vec![],
        Step::Faces(vec![face(&[])]),
        Duration::from_millis(20),
        recorder,
    );
    let mut h = spawn_loop(detector, 1.0, true);

    h.handle.start();
    sleep(Duration::from_millis(300)).await;

    let events = drain(&mut h.events);
    assert!(events.contains(&CaptureEvent::Status(UiState::NoFaceDetected)));
    assert!(mood_changes(&events).is_empty());
}

#[tokio::test(start_paused = true)]
async fn switching_to_image_discards_the_in_flight_video_result() {
    let recorder = Recorder::default();
    let detector = ScriptedDetector::new(
        vec![happy(), Step::Faces(vec![face(&[("sad", 0.6), ("happy", 0.3)])])],
        Step::Faces(vec![]),
        Duration::from_millis(300),
        recorder,
    );
    // sampling at zero: only the unconditional still-image report may go out
    let mut h = spawn_loop(detector, 0.0, true);

    h.handle.start();
    sleep(Duration::from_millis(50)).await;
    assert_eq!(h.handle.stats().in_flight, 1);
    h.handle.show_image(still_frame());
    sleep(Duration::from_secs(1)).await;

    let events = drain(&mut h.events);
    assert!(events.contains(&CaptureEvent::CycleDiscarded));
    assert!(events.contains(&CaptureEvent::ModeChanged(CaptureMode::StillImage)));
    assert_eq!(mood_changes(&events), vec![MoodChange::new("sad", 0.6)]);
    assert_eq!(h.transport.labels(), vec!["sad"]);

    // still cycle waited for the video cycle and no video polling followed
    assert_eq!(h.recorder.frame_widths(), vec![4, 8]);
    let starts = h.recorder.start_times();
    assert!(starts[1] - starts[0] >= Duration::from_millis(300));
    assert_eq!(h.handle.stats().stale_discarded, 1);
}

#[tokio::test(start_paused = true)]
async fn video_mood_change_is_subject_to_sampling() {
    let recorder = Recorder::default();
    let detector = ScriptedDetector::new(vec![], happy(), Duration::from_millis(20), recorder);
    let mut h = spawn_loop(detector, 0.0, true);

    h.handle.start();
    sleep(Duration::from_millis(300)).await;

    assert_eq!(mood_changes(&drain(&mut h.events)).len(), 1);
    assert!(h.transport.labels().is_empty());
}

#[tokio::test(start_paused = true)]
async fn back_to_video_resumes_only_once_the_stream_plays() {
    let recorder = Recorder::default();
    let detector = ScriptedDetector::new(vec![], happy(), Duration::from_millis(20), recorder);
    let mut h = spawn_loop(detector, 1.0, false);

    h.handle.start();
    h.handle.show_image(still_frame());
    sleep(Duration::from_millis(200)).await;
    assert_eq!(h.recorder.frame_widths(), vec![8]);

    h.handle.switch_to_video();
    sleep(Duration::from_millis(500)).await;
    assert_eq!(h.recorder.calls(), 1, "no video cycles without a playable stream");

    h.frames.publish(video_frame());
    sleep(Duration::from_millis(500)).await;
    assert!(h.recorder.calls() > 2);
    assert!(h.recorder.frame_widths()[1..].iter().all(|w| *w == 4));

    let events = drain(&mut h.events);
    assert!(events.contains(&CaptureEvent::ModeChanged(CaptureMode::Video)));
    assert!(events.contains(&CaptureEvent::OverlayCleared));
}

#[tokio::test(start_paused = true)]
async fn pausing_the_stream_or_stopping_halts_polling() {
    let recorder = Recorder::default();
    let detector = ScriptedDetector::new(vec![], happy(), Duration::from_millis(20), recorder);
    let h = spawn_loop(detector, 1.0, true);

    h.handle.start();
    sleep(Duration::from_millis(400)).await;
    h.frames.set_playable(false);
    sleep(Duration::from_millis(50)).await;
    let paused_at = h.recorder.calls();
    sleep(Duration::from_millis(500)).await;
    assert_eq!(h.recorder.calls(), paused_at);

    h.frames.set_playable(true);
    sleep(Duration::from_millis(400)).await;
    assert!(h.recorder.calls() > paused_at);

    h.handle.stop();
    sleep(Duration::from_millis(50)).await;
    let stopped_at = h.recorder.calls();
    sleep(Duration::from_millis(500)).await;
    assert_eq!(h.recorder.calls(), stopped_at);
}

#[tokio::test(start_paused = true)]
async fn only_the_first_face_drives_the_mood() {
    let recorder = Recorder::default();
    let detector = ScriptedDetector::new(
        vec![],
        Step::Faces(vec![face(&[("angry", 0.9)]), face(&[("happy", 0.99)])]),
        Duration::from_millis(20),
        recorder,
    );
    let mut h = spawn_loop(detector, 1.0, true);

    h.handle.start();
    sleep(Duration::from_millis(300)).await;

    let events = drain(&mut h.events);
    assert_eq!(mood_changes(&events), vec![MoodChange::new("angry", 0.9)]);
    assert!(events
        .iter()
        .any(|e| matches!(e, CaptureEvent::Overlay(boxes) if boxes.len() == 2)));
}

#[tokio::test(start_paused = true)]
async fn shutdown_ends_the_loop() {
    let recorder = Recorder::default();
    let detector = ScriptedDetector::new(vec![], happy(), Duration::from_millis(20), recorder);
    let h = spawn_loop(detector, 1.0, true);

    h.handle.start();
    sleep(Duration::from_millis(100)).await;
    assert!(h.handle.shutdown());
    sleep(Duration::from_millis(10)).await;
    assert!(!h.handle.run_once());
}

#[tokio::test(start_paused = true)]
async fn still_image_with_the_current_mood_restores_the_indicator() {
    let recorder = Recorder::default();
    let detector = ScriptedDetector::new(vec![], happy(), Duration::from_millis(20), recorder);
    let mut h = spawn_loop(detector, 0.0, true);

    h.handle.start();
    sleep(Duration::from_millis(300)).await;
    h.handle.show_image(still_frame());
    sleep(Duration::from_millis(200)).await;

    let events = drain(&mut h.events);
    assert_eq!(mood_changes(&events).len(), 1, "mood was already happy");
    let statuses = still_statuses(&events);
    assert_eq!(statuses.first(), Some(&UiState::AnalyzingImage));
    assert_eq!(
        statuses.last(),
        Some(&UiState::Mood(MoodChange::new("happy", 0.8)))
    );
    assert!(h.transport.labels().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_still_image_cycle_reports_an_error() {
    let recorder = Recorder::default();
    let detector =
        ScriptedDetector::new(vec![Step::Fail], happy(), Duration::from_millis(20), recorder);
    let mut h = spawn_loop(detector, 1.0, false);

    h.handle.show_image(still_frame());
    sleep(Duration::from_millis(200)).await;

    let events = drain(&mut h.events);
    let statuses = still_statuses(&events);
    assert!(
        matches!(statuses.last(), Some(UiState::Error(msg)) if msg.contains("model hiccup")),
        "still waiting on {:?}",
        statuses.last()
    );
    assert!(mood_changes(&events).is_empty());
    assert_eq!(h.recorder.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn resize_reaches_the_next_cycle() {
    let recorder = Recorder::default();
    let detector = ScriptedDetector::new(vec![], happy(), Duration::from_millis(20), recorder);
    let h = spawn_loop(detector, 1.0, true);

    h.handle.start();
    sleep(Duration::from_millis(50)).await;
    assert!(h.handle.resize(DisplaySize::new(320.0, 240.0)));
    sleep(Duration::from_millis(400)).await;

    let displays = h.recorder.displays();
    assert!(displays.len() >= 3);
    assert_eq!(displays[0], DisplaySize::new(640.0, 480.0));
    assert!(displays[1..]
        .iter()
        .all(|d| *d == DisplaySize::new(320.0, 240.0)));
}

#[tokio::test(start_paused = true)]
async fn switching_back_to_video_discards_the_in_flight_still_result() {
    let recorder = Recorder::default();
    let detector = ScriptedDetector::new(
        vec![Step::Faces(vec![face(&[("sad", 0.7)])])],
        Step::Faces(vec![]),
        Duration::from_millis(300),
        recorder,
    );
    let mut h = spawn_loop(detector, 1.0, true);

    h.handle.start();
    h.handle.show_image(still_frame());
    sleep(Duration::from_millis(50)).await;
    assert_eq!(h.handle.stats().in_flight, 1);
    h.handle.switch_to_video();
    sleep(Duration::from_secs(1)).await;

    let events = drain(&mut h.events);
    assert!(events.contains(&CaptureEvent::CycleDiscarded));
    assert!(mood_changes(&events).is_empty());
    assert!(h.transport.labels().is_empty());
    assert_eq!(h.handle.stats().stale_discarded, 1);

    let widths = h.recorder.frame_widths();
    assert_eq!(widths[0], 8);
    assert!(widths.len() > 1, "video polling resumed");
    assert!(widths[1..].iter().all(|w| *w == 4));
}

#[tokio::test(start_paused = true)]
async fn shutdown_mid_cycle_still_disposes_the_detector() {
    let recorder = Recorder::default();
    let detector = ScriptedDetector::new(vec![], happy(), Duration::from_millis(300), recorder);
    let h = spawn_loop(detector, 1.0, true);

    h.handle.start();
    sleep(Duration::from_millis(50)).await;
    assert_eq!(h.handle.stats().in_flight, 1);
    assert!(h.handle.shutdown());
    sleep(Duration::from_millis(500)).await;

    assert_eq!(h.recorder.disposed.load(Ordering::SeqCst), 1);
    assert!(!h.handle.run_once());
}
