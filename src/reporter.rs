// Forwards mood changes to the backend, sampled in video mode

use crate::backend::BackendClient;
use crate::error::Result;
use crate::models::{CaptureMode, MoodChange};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tracing::{debug, warn};

/// Where emotion reports go
#[async_trait]
pub trait EmotionTransport: Send + Sync {
    async fn update_emotion(&self, label: &str, confidence: f32) -> Result<()>;
}

#[async_trait]
impl EmotionTransport for BackendClient {
    async fn update_emotion(&self, label: &str, confidence: f32) -> Result<()> {
        BackendClient::update_emotion(self, label, confidence).await
    }
}

/// Whether a report is always sent or only a random share of them
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ReportPolicy {
    /// Send with the given probability in [0, 1]
    Sampled(f64),
    Always,
}

impl ReportPolicy {
    /// Video changes are sampled; a still image is a deliberate user action
    pub fn for_mode(mode: CaptureMode, video_rate: f64) -> Self {
        match mode {
            CaptureMode::Video => ReportPolicy::Sampled(video_rate),
            CaptureMode::StillImage => ReportPolicy::Always,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportDecision {
    Sent,
    SampledOut,
}

/// Fire-and-forget emotion reporter
pub struct BackendReporter {
    transport: Arc<dyn EmotionTransport>,
    sample_rate: f64,
    rng: StdRng,
}

impl BackendReporter {
    pub fn new(transport: Arc<dyn EmotionTransport>, sample_rate: f64) -> Self {
        Self::with_rng(transport, sample_rate, StdRng::from_os_rng())
    }

    /// Reporter with a fixed seed, for reproducible sampling
    pub fn seeded(transport: Arc<dyn EmotionTransport>, sample_rate: f64, seed: u64) -> Self {
        Self::with_rng(transport, sample_rate, StdRng::seed_from_u64(seed))
    }

    fn with_rng(transport: Arc<dyn EmotionTransport>, sample_rate: f64, rng: StdRng) -> Self {
        Self {
            transport,
            sample_rate: sample_rate.clamp(0.0, 1.0),
            rng,
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn should_send(&mut self, policy: ReportPolicy) -> bool {
        match policy {
            ReportPolicy::Always => true,
            ReportPolicy::Sampled(rate) => self.rng.random::<f64>() < rate,
        }
    }

    /// Sends one event without waiting for the response.
    ///
    /// Must be called from within a tokio runtime. Transport failures are
    /// logged and dropped.
    pub fn report(&mut self, change: &MoodChange, mode: CaptureMode) -> ReportDecision {
        let policy = ReportPolicy::for_mode(mode, self.sample_rate);
        if !self.should_send(policy) {
            debug!("Report of {} sampled out", change.label);
            return ReportDecision::SampledOut;
        }

        let transport = Arc::clone(&self.transport);
        let label = change.label.clone();
        let confidence = change.confidence;
        tokio::spawn(async move {
            if let Err(e) = transport.update_emotion(&label, confidence).await {
                warn!("Backend error while reporting {}: {}", label, e);
            }
        });
        ReportDecision::Sent
    }
}
