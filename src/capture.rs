//! Capture loop: owns the detector, schedules detection cycles and applies
//! their results.
//!
//! The loop is a single task. Callers talk to it through a [`CaptureHandle`],
//! which never blocks: commands are queued and mode switches bump a shared
//! epoch right away. A cycle remembers the epoch the loop had acknowledged when
//! it started and its result is thrown away if the epoch moved on before it
//! completed.
//!
//! The detector is moved into the running cycle and handed back with the
//! result, so there is never more than one cycle in flight.

use crate::camera::FrameSlot;
use crate::detector::Detector;
use crate::error::Result;
use crate::models::{CaptureMode, Detection, DisplaySize, Frame, MoodChange, UiState};
use crate::mood::{MoodSignal, MoodState};
use crate::reporter::BackendReporter;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 256;

/// Something the UI may want to react to
#[derive(Clone, Debug, PartialEq)]
pub enum CaptureEvent {
    Status(UiState),
    ModeChanged(CaptureMode),
    /// Boxes to draw, in display coordinates
    Overlay(Vec<Detection>),
    OverlayCleared,
    MoodChanged(MoodChange),
    /// A cycle request arrived while another cycle was running
    CycleDropped,
    /// A cycle finished after a mode switch and its result was ignored
    CycleDiscarded,
    CycleFailed(String),
}

/// Counters describing what the loop has done so far
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub cycles_started: u64,
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub requests_dropped: u64,
    pub stale_discarded: u64,
    pub in_flight: u32,
    pub max_in_flight: u32,
}

#[derive(Clone, Copy, Debug)]
pub struct CaptureOptions {
    /// Delay between the end of one video cycle and the start of the next
    pub poll_interval: Duration,
    pub display: DisplaySize,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            display: DisplaySize::default(),
        }
    }
}

enum Command {
    Start,
    Stop,
    RunOnce,
    ShowImage { epoch: u64, image: Frame },
    SwitchToVideo { epoch: u64 },
    Resize(DisplaySize),
    Shutdown,
}

/// Cheap, cloneable control surface of a running [`CaptureLoop`]
#[derive(Clone)]
pub struct CaptureHandle {
    commands: mpsc::UnboundedSender<Command>,
    epoch: Arc<AtomicU64>,
    events: broadcast::Sender<CaptureEvent>,
    stats: watch::Receiver<CaptureStats>,
}

impl CaptureHandle {
    fn send(&self, command: Command) -> bool {
        if self.commands.send(command).is_err() {
            debug!("Capture loop is gone, command dropped");
            return false;
        }
        true
    }

    /// Begins periodic sampling while in video mode
    pub fn start(&self) -> bool {
        self.send(Command::Start)
    }

    /// Halts periodic sampling; an in-flight cycle still completes
    pub fn stop(&self) -> bool {
        self.send(Command::Stop)
    }

    /// Requests one cycle against the current input; dropped if one is running
    pub fn run_once(&self) -> bool {
        self.send(Command::RunOnce)
    }

    /// Switches to still-image mode and analyzes `image` once
    pub fn show_image(&self, image: Frame) -> bool {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.send(Command::ShowImage { epoch, image })
    }

    /// Returns to video mode; polling resumes if the stream is playable
    pub fn switch_to_video(&self) -> bool {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.send(Command::SwitchToVideo { epoch })
    }

    /// Updates the size detection boxes are scaled to
    pub fn resize(&self, display: DisplaySize) -> bool {
        self.send(Command::Resize(display))
    }

    pub fn shutdown(&self) -> bool {
        self.send(Command::Shutdown)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CaptureEvent> {
        self.events.subscribe()
    }

    pub fn stats(&self) -> CaptureStats {
        *self.stats.borrow()
    }
}

struct CycleDone {
    detector: Box<dyn Detector>,
    result: Result<Vec<Detection>>,
}

struct InFlight {
    epoch: u64,
    mode: CaptureMode,
    future: Pin<Box<dyn Future<Output = CycleDone> + Send>>,
}

enum Wake {
    Command(Option<Command>),
    CycleDone(CycleDone),
    Playable(bool),
    PollDue,
}

async fn wait_for_cycle(in_flight: &mut Option<InFlight>) -> CycleDone {
    match in_flight {
        Some(cycle) => cycle.future.as_mut().await,
        None => std::future::pending().await,
    }
}

/// The capture loop task; see the module docs
pub struct CaptureLoop {
    detector: Option<Box<dyn Detector>>,
    frames: FrameSlot,
    reporter: BackendReporter,
    mood: MoodState,
    mode: CaptureMode,
    still_image: Option<Frame>,
    display: DisplaySize,
    poll_interval: Duration,
    active: bool,
    face_visible: bool,
    next_poll: Option<Instant>,
    pending_still: bool,
    acknowledged_epoch: u64,
    shared_epoch: Arc<AtomicU64>,
    in_flight: Option<InFlight>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: broadcast::Sender<CaptureEvent>,
    stats: CaptureStats,
    stats_tx: watch::Sender<CaptureStats>,
}

impl CaptureLoop {
    /// Creates the loop in video mode, not yet started
    pub fn new(
        detector: Box<dyn Detector>,
        frames: FrameSlot,
        reporter: BackendReporter,
        options: CaptureOptions,
    ) -> (Self, CaptureHandle) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (stats_tx, stats_rx) = watch::channel(CaptureStats::default());
        let shared_epoch = Arc::new(AtomicU64::new(0));

        let handle = CaptureHandle {
            commands: commands_tx,
            epoch: Arc::clone(&shared_epoch),
            events: events.clone(),
            stats: stats_rx,
        };

        let capture = Self {
            detector: Some(detector),
            frames,
            reporter,
            mood: MoodState::new(),
            mode: CaptureMode::Video,
            still_image: None,
            display: options.display,
            poll_interval: options.poll_interval,
            active: false,
            face_visible: false,
            next_poll: None,
            pending_still: false,
            acknowledged_epoch: 0,
            shared_epoch,
            in_flight: None,
            commands,
            events,
            stats: CaptureStats::default(),
            stats_tx,
        };
        (capture, handle)
    }

    /// Runs until `shutdown` is requested or every handle is dropped.
    ///
    /// A cycle still running at that point is awaited so its detector can be
    /// disposed.
    pub async fn run(mut self) {
        info!("Capture loop running (poll every {:?})", self.poll_interval);
        let mut playable = self.frames.subscribe();
        let mut watching_playable = true;

        loop {
            let cycle_running = self.in_flight.is_some();
            let deadline = self.next_poll;

            let wake = {
                let commands = &mut self.commands;
                let in_flight = &mut self.in_flight;
                tokio::select! {
                    biased;
                    command = commands.recv() => Wake::Command(command),
                    done = wait_for_cycle(in_flight), if cycle_running => Wake::CycleDone(done),
                    changed = playable.changed(), if watching_playable => {
                        Wake::Playable(changed.is_ok())
                    }
                    _ = time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                        if deadline.is_some() && !cycle_running => Wake::PollDue,
                }
            };

            match wake {
                Wake::Command(None) => break,
                Wake::Command(Some(command)) => {
                    if !self.handle_command(command) {
                        break;
                    }
                }
                Wake::CycleDone(done) => self.finish_cycle(done),
                Wake::Playable(true) => {
                    let now_playable = *playable.borrow_and_update();
                    self.on_playable_changed(now_playable);
                }
                Wake::Playable(false) => watching_playable = false,
                Wake::PollDue => {
                    self.next_poll = None;
                    if !self.begin_cycle(CaptureMode::Video) {
                        self.schedule_poll(self.poll_interval);
                    }
                }
            }
        }

        if let Some(cycle) = self.in_flight.take() {
            debug!("Waiting for the in-flight {} cycle before shutting down", cycle.mode);
            let done = cycle.future.await;
            self.detector = Some(done.detector);
        }
        if let Some(mut detector) = self.detector.take() {
            detector.dispose();
        }
        info!("Capture loop stopped");
    }

    fn emit(&self, event: CaptureEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn publish_stats(&self) {
        self.stats_tx.send_replace(self.stats);
    }

    /// Applies one command; returns false on shutdown
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Start => {
                if self.active {
                    return true;
                }
                self.active = true;
                info!("Capture started in {} mode", self.mode);
                if self.mode == CaptureMode::Video {
                    self.emit(CaptureEvent::Status(UiState::WebcamActive));
                    self.schedule_poll(Duration::ZERO);
                }
            }
            Command::Stop => {
                self.active = false;
                self.next_poll = None;
                info!("Capture stopped");
            }
            Command::RunOnce => {
                self.begin_cycle(self.mode);
            }
            Command::ShowImage { epoch, image } => {
                self.acknowledged_epoch = epoch;
                self.mode = CaptureMode::StillImage;
                self.next_poll = None;
                self.still_image = Some(image);
                self.face_visible = false;
                self.emit(CaptureEvent::OverlayCleared);
                self.emit(CaptureEvent::ModeChanged(CaptureMode::StillImage));
                self.emit(CaptureEvent::Status(UiState::AnalyzingImage));
                if self.in_flight.is_some() {
                    // starts as soon as the running cycle hands the detector back
                    self.pending_still = true;
                } else {
                    self.begin_cycle(CaptureMode::StillImage);
                }
            }
            Command::SwitchToVideo { epoch } => {
                self.acknowledged_epoch = epoch;
                self.mode = CaptureMode::Video;
                self.still_image = None;
                self.pending_still = false;
                self.face_visible = false;
                self.emit(CaptureEvent::OverlayCleared);
                self.emit(CaptureEvent::ModeChanged(CaptureMode::Video));
                self.emit(CaptureEvent::Status(UiState::WebcamActive));
                if self.in_flight.is_none() {
                    self.schedule_poll(Duration::ZERO);
                }
            }
            Command::Resize(display) => {
                self.display = display;
            }
            Command::Shutdown => return false,
        }
        true
    }

    fn on_playable_changed(&mut self, playable: bool) {
        debug!("Frame source playable: {}", playable);
        if playable {
            if self.in_flight.is_none() && self.next_poll.is_none() {
                self.schedule_poll(Duration::ZERO);
            }
        } else {
            self.next_poll = None;
        }
    }

    /// Schedules the next video cycle if video polling should be running
    fn schedule_poll(&mut self, delay: Duration) {
        self.next_poll = if self.mode == CaptureMode::Video
            && self.active
            && self.frames.is_playable()
        {
            Some(Instant::now() + delay)
        } else {
            None
        };
    }

    /// Starts a cycle for `mode`; returns false if nothing was started
    fn begin_cycle(&mut self, mode: CaptureMode) -> bool {
        if self.in_flight.is_some() {
            debug!("Detection cycle already running, dropping request");
            self.stats.requests_dropped += 1;
            self.publish_stats();
            self.emit(CaptureEvent::CycleDropped);
            return false;
        }

        let frame = match mode {
            CaptureMode::Video => self.frames.latest(),
            CaptureMode::StillImage => self.still_image.clone(),
        };
        let Some(frame) = frame else {
            debug!("No {} input available yet", mode);
            return false;
        };
        let Some(mut detector) = self.detector.take() else {
            warn!("Detector missing while no cycle is running");
            return false;
        };

        let display = self.display;
        let future = Box::pin(async move {
            let result = detector.detect(&frame, display).await;
            CycleDone { detector, result }
        });
        self.in_flight = Some(InFlight {
            epoch: self.acknowledged_epoch,
            mode,
            future,
        });

        self.stats.cycles_started += 1;
        self.stats.in_flight += 1;
        self.stats.max_in_flight = self.stats.max_in_flight.max(self.stats.in_flight);
        self.publish_stats();
        true
    }

    fn finish_cycle(&mut self, done: CycleDone) {
        self.detector = Some(done.detector);
        let Some(cycle) = self.in_flight.take() else {
            return;
        };
        self.stats.in_flight -= 1;
        self.stats.cycles_completed += 1;

        // the caller may have switched modes after this cycle began
        let stale = cycle.epoch != self.shared_epoch.load(Ordering::SeqCst);
        if stale {
            debug!("Discarding {} cycle result after a mode switch", cycle.mode);
            self.stats.stale_discarded += 1;
            self.emit(CaptureEvent::CycleDiscarded);
        } else {
            self.apply(cycle.mode, done.result);
        }
        self.publish_stats();

        if self.pending_still {
            self.pending_still = false;
            if self.mode == CaptureMode::StillImage {
                self.begin_cycle(CaptureMode::StillImage);
                return;
            }
        }
        let delay = if stale {
            Duration::ZERO
        } else {
            self.poll_interval
        };
        self.schedule_poll(delay);
    }

    fn apply(&mut self, mode: CaptureMode, result: Result<Vec<Detection>>) {
        let detections = match result {
            Ok(detections) => detections,
            Err(e) => {
                warn!("Detection error: {}", e);
                self.stats.cycles_failed += 1;
                self.emit(CaptureEvent::OverlayCleared);
                self.emit(CaptureEvent::CycleFailed(e.to_string()));
                // the user is waiting on a still image; a broken detector stays visible too
                if mode == CaptureMode::StillImage || !e.is_transient() {
                    self.emit(CaptureEvent::Status(UiState::Error(e.to_string())));
                }
                return;
            }
        };

        self.emit(CaptureEvent::Overlay(detections.clone()));
        match self.mood.consider(&detections) {
            MoodSignal::NoFace => {
                self.face_visible = false;
                self.emit(CaptureEvent::Status(UiState::NoFaceDetected));
            }
            MoodSignal::Unchanged => {
                if !self.face_visible || mode == CaptureMode::StillImage {
                    // same mood as before; restore the indicator only
                    self.face_visible = true;
                    let current = self.mood.current().clone();
                    self.emit(CaptureEvent::Status(UiState::Mood(current)));
                }
            }
            MoodSignal::Changed(change) => {
                self.face_visible = true;
                info!("Mood changed to {}", change);
                self.emit(CaptureEvent::MoodChanged(change.clone()));
                self.emit(CaptureEvent::Status(UiState::Mood(change.clone())));
                self.reporter.report(&change, mode);
            }
        }
    }
}
