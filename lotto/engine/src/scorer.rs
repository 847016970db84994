use std::sync::Arc;

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use crate::{
    error::EngineError,
    features::FeatureSnapshot,
    model::{ModelHandle, ModelKind, OutputNotTensor, OutputTensor},
};

/// Position of the class-probability output among the model's declared outputs.
pub const PROBABILITY_OUTPUT_INDEX: usize = 1;
/// Column of the probability output holding P(drawn).
pub const POSITIVE_CLASS_COLUMN: usize = 1;

const PROBABILITY_SLACK: f32 = 1e-4;

/// One probability per candidate; index `i` belongs to number `i + 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScoreVector(Vec<f32>);

impl ScoreVector {
    /// Wraps raw probabilities.
    #[must_use]
    pub const fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    /// Values in number order.
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Number of candidates scored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no candidate was scored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Probability assigned to lotto `number` (1-based).
    #[must_use]
    pub fn for_number(&self, number: u32) -> Option<f32> {
        let idx = usize::try_from(number).ok()?.checked_sub(1)?;
        self.0.get(idx).copied()
    }

    /// Unwraps the values.
    #[must_use]
    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }
}

impl From<Vec<f32>> for ScoreVector {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

/// Runs `handle` over the feature matrix and extracts P(drawn) per row.
///
/// The model's second declared output must be a `[rows, 2]` probability tensor.
pub fn score(
    handle: &ModelHandle,
    features: &FeatureSnapshot,
    input_name: &str,
) -> Result<ScoreVector, EngineError> {
    let kind = handle.kind();
    let matrix = features.matrix()?;
    let rows = matrix.nrows();
    let session = handle.session();
    let output_name = session
        .output_names()
        .get(PROBABILITY_OUTPUT_INDEX)
        .cloned()
        .ok_or_else(|| {
            EngineError::score_shape(
                kind,
                format!(
                    "model declares {} output(s); the probability output is missing",
                    session.output_names().len()
                ),
            )
        })?;
    let output = session
        .run(input_name, matrix.view(), &output_name)
        .map_err(|err| {
            if err.downcast_ref::<OutputNotTensor>().is_some() {
                EngineError::score_shape(kind, format!("{err:#}"))
            } else {
                EngineError::Inference(format!("{kind} session run failed: {err:#}"))
            }
        })?;
    positive_class_column(kind, &output, rows)
}

/// Moves scoring onto the blocking pool so both models can run in parallel.
pub async fn score_blocking(
    handle: ModelHandle,
    features: Arc<FeatureSnapshot>,
    input_name: String,
) -> Result<ScoreVector, EngineError> {
    let kind = handle.kind();
    tokio::task::spawn_blocking(move || score(&handle, &features, &input_name))
        .await
        .map_err(|err| EngineError::Inference(format!("{kind} scoring task failed: {err}")))?
}

fn positive_class_column(
    kind: ModelKind,
    output: &OutputTensor,
    rows: usize,
) -> Result<ScoreVector, EngineError> {
    if output.shape != [rows, 2] {
        return Err(EngineError::score_shape(
            kind,
            format!(
                "output '{}' has shape {:?}, expected [{rows}, 2]",
                output.name, output.shape
            ),
        ));
    }
    let probabilities = ArrayView2::from_shape((rows, 2), output.data.as_slice()).map_err(|err| {
        EngineError::score_shape(
            kind,
            format!(
                "output '{}' holds {} values: {err}",
                output.name,
                output.data.len()
            ),
        )
    })?;
    let drawn = probabilities.column(POSITIVE_CLASS_COLUMN).to_vec();
    if let Some((idx, value)) = drawn.iter().enumerate().find(|(_, value)| {
        !value.is_finite() || **value < -PROBABILITY_SLACK || **value > 1.0 + PROBABILITY_SLACK
    }) {
        return Err(EngineError::score_shape(
            kind,
            format!("number {} has probability {value}", idx + 1),
        ));
    }
    Ok(ScoreVector(
        drawn.into_iter().map(|value| value.clamp(0.0, 1.0)).collect(),
    ))
}
