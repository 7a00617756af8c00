// UI module for the desktop client

use crate::app::Controller;
use crate::camera::CameraManager;
use crate::capture::CaptureEvent;
use crate::error::Result;
use crate::models::{CaptureMode, Detection, DisplaySize, Frame, MoodChange, UiState};
use crate::presentation::{emoticon, emotion_color, plain_recommendation, prompt_for};
use std::path::PathBuf;
use std::sync::mpsc;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, warn};

const PANEL_WIDTH: f32 = 320.0;

enum Recommendation {
    Idle,
    Pending(mpsc::Receiver<Result<String>>),
    Ready(String),
    Failed(String),
}

/// Main application window
pub struct MoodSyncApp {
    controller: Controller,
    camera: Option<CameraManager>,
    events: Option<broadcast::Receiver<CaptureEvent>>,
    camera_texture: Option<egui::TextureHandle>,
    still_texture: Option<egui::TextureHandle>,
    mode: CaptureMode,
    status: UiState,
    mood: Option<MoodChange>,
    overlay: Vec<Detection>,
    display: Option<DisplaySize>,
    image_path: String,
    image_error: Option<String>,
    image_pending: Option<mpsc::Receiver<Result<Frame>>>,
    recommendation: Recommendation,
}

impl MoodSyncApp {
    pub fn new(controller: Controller, camera: Option<CameraManager>) -> Self {
        let events = controller.subscribe();
        let status = controller.status().clone();
        Self {
            controller,
            camera,
            events,
            camera_texture: None,
            still_texture: None,
            mode: CaptureMode::Video,
            status,
            mood: None,
            overlay: Vec::new(),
            display: None,
            image_path: String::new(),
            image_error: None,
            image_pending: None,
            recommendation: Recommendation::Idle,
        }
    }

    /// Reads the next webcam frame into the shared slot and the texture
    fn update_camera_texture(&mut self, ctx: &egui::Context) {
        let Some(camera) = self.camera.as_mut() else {
            return;
        };
        if let Some(frame) = camera.pump(self.controller.frames()) {
            self.camera_texture = Some(load_frame(ctx, "camera", &frame));
        }
    }

    fn drain_events(&mut self) {
        let Some(events) = self.events.as_mut() else {
            return;
        };
        loop {
            let event = match events.try_recv() {
                Ok(event) => event,
                Err(TryRecvError::Lagged(skipped)) => {
                    debug!("UI lagged {} capture events", skipped);
                    continue;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            };
            match event {
                CaptureEvent::Status(status) => self.status = status,
                CaptureEvent::ModeChanged(mode) => self.mode = mode,
                CaptureEvent::Overlay(detections) => self.overlay = detections,
                CaptureEvent::OverlayCleared => self.overlay.clear(),
                CaptureEvent::MoodChanged(change) => {
                    self.mood = Some(change);
                    self.recommendation = Recommendation::Idle;
                }
                CaptureEvent::CycleFailed(message) => debug!("Cycle failed: {}", message),
                CaptureEvent::CycleDropped | CaptureEvent::CycleDiscarded => {}
            }
        }
    }

    fn poll_recommendation(&mut self) {
        let Recommendation::Pending(rx) = &self.recommendation else {
            return;
        };
        match rx.try_recv() {
            Ok(Ok(text)) => self.recommendation = Recommendation::Ready(plain_recommendation(&text)),
            Ok(Err(e)) => self.recommendation = Recommendation::Failed(e.to_string()),
            Err(mpsc::TryRecvError::Empty) => {}
            Err(mpsc::TryRecvError::Disconnected) => {
                self.recommendation = Recommendation::Failed("request was cancelled".to_string())
            }
        }
    }

    fn request_recommendation(&mut self, ctx: &egui::Context, emotion: String) {
        let (tx, rx) = mpsc::channel();
        let ctx = ctx.clone();
        self.controller.recommend(emotion, move |result| {
            let _ = tx.send(result);
            ctx.request_repaint();
        });
        self.recommendation = Recommendation::Pending(rx);
    }

    /// Starts decoding the file named in the path field
    fn open_image(&mut self, ctx: &egui::Context) {
        let path = PathBuf::from(self.image_path.trim());
        let (tx, rx) = mpsc::channel();
        let ctx = ctx.clone();
        self.controller.load_image(path, move |result| {
            let _ = tx.send(result);
            ctx.request_repaint();
        });
        self.image_error = None;
        self.image_pending = Some(rx);
    }

    fn poll_image(&mut self, ctx: &egui::Context) {
        let Some(rx) = &self.image_pending else {
            return;
        };
        let result = match rx.try_recv() {
            Ok(result) => result,
            Err(mpsc::TryRecvError::Empty) => return,
            Err(mpsc::TryRecvError::Disconnected) => {
                self.image_pending = None;
                return;
            }
        };
        self.image_pending = None;
        match result {
            Ok(frame) => {
                self.still_texture = Some(load_frame(ctx, "still", &frame));
                self.overlay.clear();
                self.mode = CaptureMode::StillImage;
                if !self.controller.show_image(frame) {
                    warn!("No capture loop to analyze {}", self.image_path.trim());
                }
            }
            Err(e) => self.image_error = Some(e.to_string()),
        }
    }

    fn back_to_webcam(&mut self) {
        self.still_texture = None;
        self.overlay.clear();
        self.mode = CaptureMode::Video;
        self.controller.switch_to_video();
    }

    /// Renders the mood panel on the right
    fn render_side_panel(&mut self, ctx: &egui::Context) {
        egui::SidePanel::right("mood_panel")
            .exact_width(PANEL_WIDTH)
            .show(ctx, |ui| {
                ui.add_space(12.0);
                let label = self.mood.as_ref().map(|m| m.label.clone());
                let face = match (&self.status, &label) {
                    (UiState::Mood(change), _) => emoticon(&change.label),
                    (UiState::NoFaceDetected, _) => "?",
                    (_, Some(label)) => emoticon(label),
                    _ => ":-|",
                };
                ui.heading(egui::RichText::new(face).size(48.0));
                ui.label(egui::RichText::new(self.status.to_string()).size(20.0));
                ui.separator();

                if let Some(label) = label {
                    let prompt = prompt_for(&label);
                    ui.label(prompt.text.as_str());
                    let pending = matches!(self.recommendation, Recommendation::Pending(_));
                    let button =
                        ui.add_enabled(!pending, egui::Button::new(prompt.action.as_str()));
                    if button.clicked() {
                        self.request_recommendation(ctx, label);
                    }
                    match &self.recommendation {
                        Recommendation::Idle => {}
                        Recommendation::Pending(_) => {
                            ui.spinner();
                        }
                        Recommendation::Ready(text) => {
                            ui.label(text.as_str());
                        }
                        Recommendation::Failed(message) => {
                            ui.colored_label(egui::Color32::LIGHT_RED, message.as_str());
                        }
                    }
                    ui.separator();
                }

                ui.label("Analyze an image file:");
                ui.text_edit_singleline(&mut self.image_path);
                ui.horizontal(|ui| {
                    let idle = self.image_pending.is_none() && !self.image_path.trim().is_empty();
                    if ui.add_enabled(idle, egui::Button::new("Analyze")).clicked() {
                        self.open_image(ctx);
                    }
                    let can_go_back =
                        self.mode == CaptureMode::StillImage && self.camera.is_some();
                    if ui
                        .add_enabled(can_go_back, egui::Button::new("Back to webcam"))
                        .clicked()
                    {
                        self.back_to_webcam();
                    }
                });
                if let Some(message) = &self.image_error {
                    ui.colored_label(egui::Color32::LIGHT_RED, message.as_str());
                }
            });
    }

    /// Renders the camera or still image with the detection overlay
    fn render_view(&mut self, ctx: &egui::Context) {
        egui::CentralPanel::default()
            .frame(egui::Frame::none())
            .show(ctx, |ui| {
                let texture = match self.mode {
                    CaptureMode::StillImage => self.still_texture.as_ref(),
                    CaptureMode::Video => self.camera_texture.as_ref(),
                };
                let Some(texture) = texture else {
                    ui.centered_and_justified(|ui| ui.label(self.status.to_string()));
                    return;
                };

                let available = ui.available_rect_before_wrap();
                let size = fit(texture.size_vec2(), available.size());
                let rect = egui::Rect::from_center_size(available.center(), size);
                ui.painter().image(
                    texture.id(),
                    rect,
                    egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
                    egui::Color32::WHITE,
                );

                for detection in &self.overlay {
                    let label = detection
                        .scores
                        .dominant()
                        .map(|d| d.label)
                        .unwrap_or_default();
                    let [r, g, b] = emotion_color(&label);
                    let bbox = detection.bbox;
                    let face = egui::Rect::from_min_size(
                        rect.min + egui::vec2(bbox.x, bbox.y),
                        egui::vec2(bbox.width, bbox.height),
                    );
                    ui.painter().rect_stroke(
                        face,
                        10.0,
                        egui::Stroke::new(3.0, egui::Color32::from_rgb(r, g, b)),
                    );
                }

                let display = DisplaySize::new(size.x, size.y);
                let changed = self.display.map_or(true, |last| {
                    (last.width - display.width).abs() > 0.5
                        || (last.height - display.height).abs() > 0.5
                });
                if changed {
                    self.display = Some(display);
                    self.controller.resize(display);
                }
            });
    }
}

/// Largest size with `content`'s aspect ratio that fits in `available`
fn fit(content: egui::Vec2, available: egui::Vec2) -> egui::Vec2 {
    if content.x <= 0.0 || content.y <= 0.0 {
        return available;
    }
    let scale = (available.x / content.x).min(available.y / content.y);
    content * scale
}

fn load_frame(ctx: &egui::Context, name: &str, frame: &Frame) -> egui::TextureHandle {
    let color_image =
        egui::ColorImage::from_rgb([frame.width as usize, frame.height as usize], &frame.data);
    ctx.load_texture(name, color_image, egui::TextureOptions::LINEAR)
}

impl eframe::App for MoodSyncApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        ctx.request_repaint();

        self.update_camera_texture(ctx);
        self.drain_events();
        self.poll_recommendation();
        self.poll_image(ctx);

        self.render_side_panel(ctx);
        self.render_view(ctx);
    }
}

impl Drop for MoodSyncApp {
    fn drop(&mut self) {
        self.controller.shutdown();
    }
}
