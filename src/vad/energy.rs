use super::detector::WindowGeometry;
use super::engine::{InferenceEngine, InferenceOutput, RecurrentState, StateShape};
use crate::Result;

/// RMS level treated as certain speech by default (about -26 dBFS).
pub const DEFAULT_FULL_SCALE_RMS: f32 = 0.05;

/// Deterministic level-based classifier.
///
/// Probability is the window's RMS divided by `full_scale_rms`, clamped to `[0, 1]`. The context
/// prefix is ignored and the recurrent state passes through unchanged. Useful where no trained
/// model is available (tests, the CLI without the `silero` feature) and as a baseline.
#[derive(Debug, Clone)]
pub struct EnergyEngine {
    full_scale_rms: f32,
    shape: StateShape,
}

impl Default for EnergyEngine {
    fn default() -> Self {
        Self::new(DEFAULT_FULL_SCALE_RMS)
    }
}

impl EnergyEngine {
    pub fn new(full_scale_rms: f32) -> Self {
        Self {
            full_scale_rms: full_scale_rms.max(f32::EPSILON),
            shape: StateShape::default(),
        }
    }
}

impl InferenceEngine for EnergyEngine {
    fn state_shape(&self) -> StateShape {
        self.shape.clone()
    }

    fn infer(
        &mut self,
        input: &[f32],
        sample_rate: u32,
        state: &RecurrentState,
    ) -> Result<InferenceOutput> {
        let window = WindowGeometry::for_rate(sample_rate)?.window.min(input.len());
        let tail = &input[input.len() - window..];

        let rms = if tail.is_empty() {
            0.0
        } else {
            (tail.iter().map(|v| v * v).sum::<f32>() / tail.len() as f32).sqrt()
        };

        Ok(InferenceOutput {
            probability: (rms / self.full_scale_rms).clamp(0.0, 1.0),
            state: state.clone(),
        })
    }
}
