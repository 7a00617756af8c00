// Last announced mood and the change-suppression rule

use crate::models::{Detection, MoodChange};
use tracing::debug;

/// Label the UI shows before anything has been detected
pub const INITIAL_MOOD: &str = "neutral";

/// Outcome of considering one cycle's detections
#[derive(Clone, Debug, PartialEq)]
pub enum MoodSignal {
    /// No usable face; the stored mood is untouched
    NoFace,
    /// Same dominant label as last time
    Unchanged,
    /// A new dominant label; the stored mood now holds it
    Changed(MoodChange),
}

/// Holds the last emotion announced to the UI and the backend
#[derive(Clone, Debug)]
pub struct MoodState {
    current: MoodChange,
}

impl Default for MoodState {
    fn default() -> Self {
        Self::new()
    }
}

impl MoodState {
    pub fn new() -> Self {
        Self {
            current: MoodChange::new(INITIAL_MOOD, 0.0),
        }
    }

    pub fn current(&self) -> &MoodChange {
        &self.current
    }

    /// Applies one cycle's detections.
    ///
    /// Only the first detection counts. Labels are compared by string; a
    /// different confidence alone is not a change.
    pub fn consider(&mut self, detections: &[Detection]) -> MoodSignal {
        let Some(first) = detections.first() else {
            return MoodSignal::NoFace;
        };
        let Some(dominant) = first.scores.dominant() else {
            debug!("First detection carried no expression scores");
            return MoodSignal::NoFace;
        };

        if dominant.label == self.current.label {
            return MoodSignal::Unchanged;
        }

        debug!(
            "Mood changed from {} to {} ({:.2})",
            self.current.label, dominant.label, dominant.confidence
        );
        self.current = MoodChange::from(dominant);
        MoodSignal::Changed(self.current.clone())
    }
}
