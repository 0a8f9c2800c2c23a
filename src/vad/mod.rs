//! Voice Activity Detection (VAD).
//!
//! The detector walks resampled audio in fixed windows, asks an [`InferenceEngine`] for a speech
//! probability per window, and turns the probabilities into [`SpeechTimestamp`] runs. The merger
//! then closes small gaps and pads the runs into the [`Segment`]s the stitcher keeps.

mod detector;
mod energy;
mod engine;
mod merge;
#[cfg(feature = "silero")]
mod silero;

use serde::Serialize;

pub use detector::{DetectorReport, SpeechDetector, WindowGeometry};
pub use energy::EnergyEngine;
pub use engine::{InferenceEngine, InferenceOutput, RecurrentState, StateShape};
pub use merge::merge;
pub(crate) use merge::gap_samples;
#[cfg(feature = "silero")]
pub use silero::SileroEngine;

/// A run of speech, in samples at the processing (classifier) rate. `end` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SpeechTimestamp {
    pub start: usize,
    pub end: usize,
}

impl SpeechTimestamp {
    pub fn new(start: usize, end: usize) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// A merged and padded speech run. Segments produced by [`merge`] are sorted and disjoint.
pub type Segment = SpeechTimestamp;
