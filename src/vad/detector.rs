use std::mem;

use tracing::{debug, error, warn};

use super::SpeechTimestamp;
use super::engine::{InferenceEngine, RecurrentState, StateShape};
use crate::resample::{NARROWBAND_RATE_HZ, PROCESSING_RATE_HZ};
use crate::{Error, Result};

/// Window and context lengths (in samples) for a classifier rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowGeometry {
    pub window: usize,
    pub context: usize,
}

impl WindowGeometry {
    pub fn for_rate(sample_rate: u32) -> Result<Self> {
        match sample_rate {
            PROCESSING_RATE_HZ => Ok(Self {
                window: 512,
                context: 64,
            }),
            NARROWBAND_RATE_HZ => Ok(Self {
                window: 256,
                context: 32,
            }),
            other => Err(Error::UnsupportedRate(format!(
                "speech detector runs at {PROCESSING_RATE_HZ} or {NARROWBAND_RATE_HZ} Hz, got {other} Hz"
            ))),
        }
    }
}

/// Result of a detector run.
#[derive(Debug)]
pub struct DetectorReport {
    pub timestamps: Vec<SpeechTimestamp>,
    /// Set when inference failed part-way; `timestamps` then covers audio up to the failure.
    pub error: Option<Error>,
}

/// Stateful windowed speech detector.
///
/// Audio is fed in arbitrary chunk sizes; complete windows are classified in order and the
/// remainder waits for the next chunk. The recurrent state and the context prefix are owned
/// here and only ever touched by the thread driving the detector.
pub struct SpeechDetector<E> {
    engine: E,
    sample_rate: u32,
    geometry: WindowGeometry,
    threshold: f32,
    state_shape: StateShape,

    state: RecurrentState,
    context: Vec<f32>,
    scratch: Vec<f32>,
    pending: Vec<f32>,

    // Global sample offset of the next window.
    offset: usize,
    in_speech: bool,
    run_start: usize,
    timestamps: Vec<SpeechTimestamp>,
    error: Option<Error>,
}

impl<E: InferenceEngine> SpeechDetector<E> {
    pub fn new(engine: E, sample_rate: u32, threshold: f32) -> Result<Self> {
        let geometry = WindowGeometry::for_rate(sample_rate)?;
        let state_shape = engine.state_shape();
        Ok(Self {
            engine,
            sample_rate,
            geometry,
            threshold,
            state: RecurrentState::zeros(state_shape.clone()),
            state_shape,
            context: vec![0.0; geometry.context],
            scratch: Vec::with_capacity(geometry.context + geometry.window),
            pending: Vec::with_capacity(geometry.window),
            offset: 0,
            in_speech: false,
            run_start: 0,
            timestamps: Vec::new(),
            error: None,
        })
    }

    /// Start a new run: fresh state, zero context, no timestamps.
    pub fn reset(&mut self) {
        self.state = RecurrentState::zeros(self.state_shape.clone());
        self.context.clear();
        self.context.resize(self.geometry.context, 0.0);
        self.pending.clear();
        self.offset = 0;
        self.in_speech = false;
        self.run_start = 0;
        self.timestamps.clear();
        self.error = None;
    }

    pub fn geometry(&self) -> WindowGeometry {
        self.geometry
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn state(&self) -> &RecurrentState {
        &self.state
    }

    /// Samples classified so far.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Whether an inference failure stopped this run.
    pub fn is_aborted(&self) -> bool {
        self.error.is_some()
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// Classify one full window, updating recurrent state and context.
    ///
    /// A returned state with the wrong shape is rejected: the previous state is kept and the
    /// probability is still used.
    pub fn process_window(&mut self, window: &[f32]) -> Result<f32> {
        if window.len() != self.geometry.window {
            return Err(Error::Inference(format!(
                "window has {} samples, expected {}",
                window.len(),
                self.geometry.window
            )));
        }

        self.scratch.clear();
        self.scratch.extend_from_slice(&self.context);
        self.scratch.extend_from_slice(window);

        let output = self
            .engine
            .infer(&self.scratch, self.sample_rate, &self.state)?;
        if !output.probability.is_finite() {
            return Err(Error::Inference(format!(
                "non-finite speech probability {}",
                output.probability
            )));
        }

        match output.state.validate(&self.state_shape) {
            Ok(()) => self.state = output.state,
            Err(err) => warn!(
                error = %err,
                offset = self.offset,
                "keeping previous recurrent state"
            ),
        }

        self.context.clear();
        self.context
            .extend_from_slice(&window[window.len() - self.geometry.context..]);

        Ok(output.probability.clamp(0.0, 1.0))
    }

    /// Classify every complete window available after appending `samples`.
    ///
    /// After an inference failure further input is ignored.
    pub fn feed(&mut self, samples: &[f32]) {
        if self.error.is_some() {
            return;
        }
        let window = self.geometry.window;
        let mut rest = samples;

        if !self.pending.is_empty() {
            let need = window - self.pending.len();
            let take = need.min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.pending.len() < window {
                return;
            }
            let full = mem::take(&mut self.pending);
            let ok = self.step(&full);
            self.pending = full;
            self.pending.clear();
            if !ok {
                return;
            }
        }

        let mut chunks = rest.chunks_exact(window);
        for chunk in chunks.by_ref() {
            if !self.step(chunk) {
                return;
            }
        }
        self.pending.extend_from_slice(chunks.remainder());
    }

    /// Close the run. The partial trailing window is dropped; a run still open is closed at
    /// `total_samples` (or, after a failure, where classification stopped).
    pub fn finish(&mut self, total_samples: usize) -> DetectorReport {
        if self.in_speech {
            let end = if self.error.is_some() {
                self.offset
            } else {
                total_samples.max(self.offset)
            };
            self.timestamps.push(SpeechTimestamp::new(self.run_start, end));
            self.in_speech = false;
        }
        self.pending.clear();

        debug!(
            windows = self.offset / self.geometry.window,
            runs = self.timestamps.len(),
            "speech detection finished"
        );

        DetectorReport {
            timestamps: mem::take(&mut self.timestamps),
            error: self.error.take(),
        }
    }

    fn step(&mut self, window: &[f32]) -> bool {
        let probability = match self.process_window(window) {
            Ok(p) => p,
            Err(err) => {
                error!(
                    error = %err,
                    offset = self.offset,
                    "speech inference failed; keeping partial result"
                );
                self.error = Some(err);
                return false;
            }
        };

        if probability >= self.threshold && !self.in_speech {
            self.in_speech = true;
            self.run_start = self.offset;
        } else if probability < self.threshold && self.in_speech {
            self.in_speech = false;
            self.timestamps
                .push(SpeechTimestamp::new(self.run_start, self.offset));
        }

        self.offset += window.len();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vad::engine::InferenceOutput;

    /// Returns scripted probabilities and records every input it sees.
    struct ScriptedEngine {
        probabilities: Vec<f32>,
        calls: usize,
        inputs: Vec<Vec<f32>>,
        fail_at: Option<usize>,
        bad_state_at: Option<usize>,
    }

    impl ScriptedEngine {
        fn new(probabilities: Vec<f32>) -> Self {
            Self {
                probabilities,
                calls: 0,
                inputs: Vec::new(),
                fail_at: None,
                bad_state_at: None,
            }
        }
    }

    impl InferenceEngine for ScriptedEngine {
        fn state_shape(&self) -> StateShape {
            StateShape::new(vec![2, 1, 2])
        }

        fn infer(
            &mut self,
            input: &[f32],
            _sample_rate: u32,
            state: &RecurrentState,
        ) -> Result<InferenceOutput> {
            let call = self.calls;
            self.calls += 1;
            self.inputs.push(input.to_vec());
            if self.fail_at == Some(call) {
                return Err(Error::Inference("model crashed".into()));
            }

            let state = if self.bad_state_at == Some(call) {
                RecurrentState::zeros(StateShape::new(vec![3]))
            } else {
                // Count calls in the hidden tensor so state threading is observable.
                let hidden = state.hidden().iter().map(|v| v + 1.0).collect();
                RecurrentState::from_parts(self.state_shape(), hidden, state.cell().to_vec())
            };
            Ok(InferenceOutput {
                probability: self.probabilities.get(call).copied().unwrap_or(0.0),
                state,
            })
        }
    }

    fn ramp(len: usize) -> Vec<f32> {
        (0..len).map(|i| i as f32).collect()
    }

    #[test]
    fn unsupported_rate_is_rejected() {
        let res = SpeechDetector::new(ScriptedEngine::new(vec![]), 44_100, 0.4);
        assert!(matches!(res, Err(Error::UnsupportedRate(_))));
    }

    #[test]
    fn context_prefix_carries_the_previous_window_tail() -> Result<()> {
        let mut det = SpeechDetector::new(ScriptedEngine::new(vec![]), 8_000, 0.4)?;
        let audio = ramp(512);
        det.feed(&audio);

        let inputs = &det.engine_mut().inputs;
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[0].len(), 32 + 256);
        assert!(inputs[0][..32].iter().all(|&v| v == 0.0));
        assert_eq!(inputs[1][..32], audio[224..256]);
        assert_eq!(inputs[1][32..], audio[256..]);
        Ok(())
    }

    #[test]
    fn chunking_does_not_change_windows() -> Result<()> {
        let audio = ramp(256 * 5 + 17);

        let mut whole = SpeechDetector::new(ScriptedEngine::new(vec![]), 8_000, 0.4)?;
        whole.feed(&audio);

        let mut pieces = SpeechDetector::new(ScriptedEngine::new(vec![]), 8_000, 0.4)?;
        for chunk in audio.chunks(100) {
            pieces.feed(chunk);
        }

        assert_eq!(whole.offset(), 256 * 5);
        assert_eq!(pieces.offset(), 256 * 5);
        assert_eq!(whole.engine_mut().inputs, pieces.engine_mut().inputs);
        Ok(())
    }

    #[test]
    fn threshold_state_machine_opens_and_closes_runs() -> Result<()> {
        let probs = vec![0.1, 0.4, 0.9, 0.2, 0.5, 0.6];
        let mut det = SpeechDetector::new(ScriptedEngine::new(probs), 8_000, 0.4)?;
        det.feed(&vec![0.0; 256 * 6 + 100]);
        let report = det.finish(256 * 6 + 100);

        assert!(report.error.is_none());
        assert_eq!(
            report.timestamps,
            vec![
                SpeechTimestamp::new(256, 768),
                SpeechTimestamp::new(1024, 256 * 6 + 100),
            ]
        );
        Ok(())
    }

    #[test]
    fn recurrent_state_is_threaded_through_calls() -> Result<()> {
        let mut det = SpeechDetector::new(ScriptedEngine::new(vec![]), 16_000, 0.4)?;
        det.feed(&vec![0.0; 512 * 3]);
        assert!(det.state().hidden().iter().all(|&v| v == 3.0));

        det.reset();
        assert!(det.state().hidden().iter().all(|&v| v == 0.0));
        assert_eq!(det.offset(), 0);
        Ok(())
    }

    #[test]
    fn bad_state_shape_keeps_previous_state() -> Result<()> {
        let mut engine = ScriptedEngine::new(vec![0.9, 0.9, 0.9]);
        engine.bad_state_at = Some(1);
        let mut det = SpeechDetector::new(engine, 16_000, 0.4)?;
        det.feed(&vec![0.0; 512 * 3]);

        // Calls 0 and 2 advanced the state; call 1 was rejected.
        assert!(det.state().hidden().iter().all(|&v| v == 2.0));
        let report = det.finish(512 * 3);
        assert!(report.error.is_none());
        assert_eq!(report.timestamps, vec![SpeechTimestamp::new(0, 512 * 3)]);
        Ok(())
    }

    #[test]
    fn inference_failure_returns_partial_timestamps() -> Result<()> {
        let mut engine = ScriptedEngine::new(vec![0.0, 0.9, 0.0, 0.9, 0.9]);
        engine.fail_at = Some(4);
        let mut det = SpeechDetector::new(engine, 8_000, 0.4)?;
        det.feed(&vec![0.0; 256 * 6]);
        det.feed(&vec![0.0; 256]);
        assert!(det.is_aborted());

        let report = det.finish(256 * 7);
        assert!(matches!(report.error, Some(Error::Inference(_))));
        assert_eq!(
            report.timestamps,
            vec![SpeechTimestamp::new(256, 512), SpeechTimestamp::new(768, 1024)]
        );
        Ok(())
    }

    #[test]
    fn short_stream_produces_nothing() -> Result<()> {
        let mut det = SpeechDetector::new(ScriptedEngine::new(vec![1.0]), 16_000, 0.4)?;
        det.feed(&[0.5; 100]);
        let report = det.finish(100);
        assert!(report.timestamps.is_empty());
        assert_eq!(det.engine_mut().calls, 0);
        Ok(())
    }
}
