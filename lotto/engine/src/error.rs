use serde::Serialize;
use thiserror::Error;

use crate::model::ModelKind;

/// Failures raised anywhere in the prediction pipeline.
///
/// Every variant is recoverable: [`crate::LottoPredictor::predict`] absorbs them
/// and substitutes a random pick.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Feature artifact unreachable, unparsable, or of the wrong shape.
    #[error("feature load failed: {0}")]
    FeatureLoad(String),
    /// Model artifact could not be fetched or turned into a session.
    #[error("{model} model load failed: {reason}")]
    ModelLoad {
        /// Model being loaded.
        model: ModelKind,
        /// Underlying cause.
        reason: String,
    },
    /// The probability output did not have the `[rows, 2]` layout.
    #[error("{model} score output malformed: {reason}")]
    ScoreShape {
        /// Model that produced the output.
        model: ModelKind,
        /// What was wrong with it.
        reason: String,
    },
    /// Runtime failure while executing a model (or the whole call timed out).
    #[error("inference failed: {0}")]
    Inference(String),
    /// Score vectors of unexpected length.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Required length.
        expected: usize,
        /// Offending length.
        actual: usize,
    },
    /// Invalid engine configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// History log could not be read or written.
    #[error("history log error: {0}")]
    History(String),
}

/// Stable tag for an [`EngineError`], used in logs and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// See [`EngineError::FeatureLoad`].
    FeatureLoad,
    /// See [`EngineError::ModelLoad`].
    ModelLoad,
    /// See [`EngineError::ScoreShape`].
    ScoreShape,
    /// See [`EngineError::Inference`].
    Inference,
    /// See [`EngineError::DimensionMismatch`].
    DimensionMismatch,
    /// See [`EngineError::Config`].
    Config,
    /// See [`EngineError::History`].
    History,
}

impl ErrorKind {
    /// Snake-case name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FeatureLoad => "feature_load",
            Self::ModelLoad => "model_load",
            Self::ScoreShape => "score_shape",
            Self::Inference => "inference",
            Self::DimensionMismatch => "dimension_mismatch",
            Self::Config => "config",
            Self::History => "history",
        }
    }
}

impl EngineError {
    /// Returns the kind tag of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::FeatureLoad(_) => ErrorKind::FeatureLoad,
            Self::ModelLoad { .. } => ErrorKind::ModelLoad,
            Self::ScoreShape { .. } => ErrorKind::ScoreShape,
            Self::Inference(_) => ErrorKind::Inference,
            Self::DimensionMismatch { .. } => ErrorKind::DimensionMismatch,
            Self::Config(_) => ErrorKind::Config,
            Self::History(_) => ErrorKind::History,
        }
    }

    pub(crate) fn model_load(model: ModelKind, reason: impl std::fmt::Display) -> Self {
        Self::ModelLoad {
            model,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn score_shape(model: ModelKind, reason: impl Into<String>) -> Self {
        Self::ScoreShape {
            model,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_match_variants() {
        let err = EngineError::model_load(ModelKind::Xgb, "missing file");
        assert_eq!(err.kind(), ErrorKind::ModelLoad);
        assert_eq!(err.kind().as_str(), "model_load");
        assert_eq!(err.to_string(), "xgb model load failed: missing file");

        let err = EngineError::DimensionMismatch {
            expected: 45,
            actual: 44,
        };
        assert_eq!(err.kind().as_str(), "dimension_mismatch");
        assert_eq!(
            serde_json::to_value(err.kind()).unwrap(),
            serde_json::json!("dimension_mismatch")
        );
    }
}
