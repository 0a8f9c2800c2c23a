use crate::{Error, Result};

/// Shape of each recurrent state tensor, e.g. `[2, 1, 64]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateShape(Vec<usize>);

impl StateShape {
    pub fn new(dims: impl Into<Vec<usize>>) -> Self {
        Self(dims.into())
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    pub fn numel(&self) -> usize {
        self.0.iter().product()
    }
}

impl Default for StateShape {
    /// Silero-style LSTM state: two layers, batch of one, 64 units.
    fn default() -> Self {
        Self(vec![2, 1, 64])
    }
}

/// Hidden and cell tensors carried between inference calls.
#[derive(Debug, Clone, PartialEq)]
pub struct RecurrentState {
    shape: StateShape,
    hidden: Vec<f32>,
    cell: Vec<f32>,
}

impl RecurrentState {
    pub fn zeros(shape: StateShape) -> Self {
        let n = shape.numel();
        Self {
            shape,
            hidden: vec![0.0; n],
            cell: vec![0.0; n],
        }
    }

    /// Build a state from raw tensors. The shape is not checked here; see [`Self::validate`].
    pub fn from_parts(shape: StateShape, hidden: Vec<f32>, cell: Vec<f32>) -> Self {
        Self {
            shape,
            hidden,
            cell,
        }
    }

    pub fn shape(&self) -> &StateShape {
        &self.shape
    }

    pub fn hidden(&self) -> &[f32] {
        &self.hidden
    }

    pub fn cell(&self) -> &[f32] {
        &self.cell
    }

    /// Check that this state has `expected` shape and that both tensors hold that many values.
    pub fn validate(&self, expected: &StateShape) -> Result<()> {
        let n = expected.numel();
        if self.shape != *expected || self.hidden.len() != n || self.cell.len() != n {
            return Err(Error::ShapeMismatch {
                expected: expected.dims().to_vec(),
                actual: self.shape.dims().to_vec(),
            });
        }
        Ok(())
    }
}

/// One classifier step: speech probability plus the updated state.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceOutput {
    pub probability: f32,
    pub state: RecurrentState,
}

/// Speech/non-speech classifier driven one window at a time.
///
/// `input` is the detector's context prefix followed by the current window. Implementations
/// must not keep their own copy of the recurrent state; the detector owns it and passes it in.
pub trait InferenceEngine {
    /// Shape the engine expects for both state tensors.
    fn state_shape(&self) -> StateShape;

    fn infer(
        &mut self,
        input: &[f32],
        sample_rate: u32,
        state: &RecurrentState,
    ) -> Result<InferenceOutput>;
}

impl<E: InferenceEngine + ?Sized> InferenceEngine for &mut E {
    fn state_shape(&self) -> StateShape {
        (**self).state_shape()
    }

    fn infer(
        &mut self,
        input: &[f32],
        sample_rate: u32,
        state: &RecurrentState,
    ) -> Result<InferenceOutput> {
        (**self).infer(input, sample_rate, state)
    }
}

impl<E: InferenceEngine + ?Sized> InferenceEngine for Box<E> {
    fn state_shape(&self) -> StateShape {
        (**self).state_shape()
    }

    fn infer(
        &mut self,
        input: &[f32],
        sample_rate: u32,
        state: &RecurrentState,
    ) -> Result<InferenceOutput> {
        (**self).infer(input, sample_rate, state)
    }
}
