use std::path::Path;

use anyhow::{Context, anyhow, ensure};
use ort::session::Session;
use ort::value::Tensor;
use tracing::debug;

use super::engine::{InferenceEngine, InferenceOutput, RecurrentState, StateShape};
use crate::{Error, Result};

const INPUT: &str = "input";
const SAMPLE_RATE: &str = "sr";
const HIDDEN: &str = "h";
const CELL: &str = "c";
const OUTPUT: &str = "output";
const HIDDEN_OUT: &str = "hn";
const CELL_OUT: &str = "cn";

/// Silero VAD (v4 graph layout) on ONNX Runtime.
///
/// Inputs `input [1, n]`, `sr` (i64 scalar), `h`/`c` `[2, 1, 64]`; outputs `output [1, 1]`,
/// `hn`, `cn`. The session holds no recurrent state of its own.
pub struct SileroEngine {
    session: Session,
    shape: StateShape,
}

impl SileroEngine {
    /// Load an ONNX model from disk.
    pub fn new(model_path: impl AsRef<Path>) -> Result<Self> {
        let path = model_path.as_ref();
        let session = Session::builder()
            .context("failed to create ONNX Runtime session builder")?
            .commit_from_file(path)
            .with_context(|| format!("failed to load Silero VAD model from '{}'", path.display()))?;

        for name in [INPUT, SAMPLE_RATE, HIDDEN, CELL] {
            ensure!(
                session.inputs.iter().any(|i| i.name == name),
                "model '{}' has no `{name}` input; expected a Silero VAD v4 graph",
                path.display()
            );
        }

        debug!(model = %path.display(), "loaded Silero VAD model");

        Ok(Self {
            session,
            shape: StateShape::default(),
        })
    }

    fn run(
        &mut self,
        input: &[f32],
        sample_rate: u32,
        state: &RecurrentState,
    ) -> anyhow::Result<InferenceOutput> {
        let dims = state.shape().dims().to_vec();

        let audio = Tensor::from_array(([1usize, input.len()], input.to_vec().into_boxed_slice()))
            .context("failed to build audio tensor")?;
        let sr = Tensor::from_array(((), vec![i64::from(sample_rate)].into_boxed_slice()))
            .context("failed to build sample-rate tensor")?;
        let h = Tensor::from_array((dims.clone(), state.hidden().to_vec().into_boxed_slice()))
            .context("failed to build hidden-state tensor")?;
        let c = Tensor::from_array((dims, state.cell().to_vec().into_boxed_slice()))
            .context("failed to build cell-state tensor")?;

        let outputs = self
            .session
            .run(ort::inputs![
                INPUT => audio,
                SAMPLE_RATE => sr,
                HIDDEN => h,
                CELL => c
            ])
            .context("failed to run Silero VAD model")?;

        let (_, probability) = outputs[OUTPUT]
            .try_extract_tensor::<f32>()
            .context("`output` is not an f32 tensor")?;
        let probability = probability
            .first()
            .copied()
            .ok_or_else(|| anyhow!("`output` tensor is empty"))?;

        let (hidden_shape, hidden) = outputs[HIDDEN_OUT]
            .try_extract_tensor::<f32>()
            .context("`hn` is not an f32 tensor")?;
        let (_, cell) = outputs[CELL_OUT]
            .try_extract_tensor::<f32>()
            .context("`cn` is not an f32 tensor")?;

        let shape = StateShape::new(
            hidden_shape
                .iter()
                .map(|&d| usize::try_from(d).unwrap_or(0))
                .collect::<Vec<_>>(),
        );

        Ok(InferenceOutput {
            probability,
            state: RecurrentState::from_parts(shape, hidden.to_vec(), cell.to_vec()),
        })
    }
}

impl InferenceEngine for SileroEngine {
    fn state_shape(&self) -> StateShape {
        self.shape.clone()
    }

    fn infer(
        &mut self,
        input: &[f32],
        sample_rate: u32,
        state: &RecurrentState,
    ) -> Result<InferenceOutput> {
        self.run(input, sample_rate, state)
            .map_err(|err| Error::Inference(format!("{err:#}")))
    }
}
