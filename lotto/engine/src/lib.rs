#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rust_2018_idioms,
    missing_docs
)]

//! Lotto ensemble engine: loads a precomputed 45-row feature matrix, scores it
//! with a random-forest and a gradient-boosting classifier, blends the two
//! probability vectors and picks the six most likely numbers. Any failure on
//! the way degrades to a uniform random pick.

/// Engine error taxonomy.
pub mod error;

/// Artifact locations and fetching (local files or HTTP).
pub mod source;

/// TOML configuration.
pub mod config;

/// Structured logs and events.
pub mod telemetry;

/// Feature document parsing and caching.
pub mod features;

/// Model kinds, inference sessions and the model cache.
pub mod model;

/// Per-model probability extraction.
pub mod scorer;

/// Weighted blending.
pub mod ensemble;

/// Top-k selection.
pub mod selector;

/// Random fallback pick.
pub mod fallback;

/// Prediction orchestration.
pub mod predictor;

/// Saved picks.
pub mod history;

/// ONNX Runtime sessions.
#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{ArtifactLocations, EngineConfig, EnsembleWeights, NUM_NUMBERS, PICK_COUNT};
pub use error::{EngineError, ErrorKind};
pub use fallback::random_pick;
pub use features::{FeatureProvider, FeatureSnapshot};
pub use history::{HistoryEntry, HistoryLog};
pub use model::{ClassifierSession, ModelKind, ModelLoader, SessionFactory};
pub use predictor::{LottoPredictor, PredictionResult, PredictionSource};
pub use scorer::ScoreVector;
pub use source::{ArtifactFetcher, ArtifactSource, DefaultFetcher};
pub use telemetry::EngineTelemetry;
