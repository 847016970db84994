use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{error::EngineError, model::ModelKind, source::ArtifactSource};

/// Size of the number universe (1..=45).
pub const NUM_NUMBERS: usize = 45;
/// Numbers in a pick.
pub const PICK_COUNT: usize = 6;

const WEIGHT_TOLERANCE: f32 = 1e-6;

/// Fixed ensemble weights; non-negative and summing to one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleWeights {
    /// Random-forest contribution.
    pub rf: f32,
    /// Gradient-boosting contribution.
    pub xgb: f32,
}

impl EnsembleWeights {
    /// Builds validated weights.
    pub fn new(rf: f32, xgb: f32) -> Result<Self, EngineError> {
        let weights = Self { rf, xgb };
        weights.validate()?;
        Ok(weights)
    }

    /// Checks the non-negative, unit-sum contract.
    pub fn validate(&self) -> Result<(), EngineError> {
        for kind in ModelKind::ALL {
            let weight = self.for_model(kind);
            if !weight.is_finite() || weight < 0.0 {
                return Err(EngineError::Config(format!(
                    "{kind} weight must be a non-negative number, got {weight}"
                )));
            }
        }
        let sum = self.rf + self.xgb;
        if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(EngineError::Config(format!(
                "ensemble weights must sum to 1.0, got {sum}"
            )));
        }
        Ok(())
    }

    /// Weight applied to `kind`.
    #[must_use]
    pub fn for_model(&self, kind: ModelKind) -> f32 {
        kind.weight(self)
    }
}

impl Default for EnsembleWeights {
    fn default() -> Self {
        Self { rf: 0.5, xgb: 0.5 }
    }
}

/// Where the frozen artifacts live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactLocations {
    /// Feature document for the next draw.
    pub features: ArtifactSource,
    /// Serialized random-forest classifier.
    pub rf_model: ArtifactSource,
    /// Serialized gradient-boosting classifier.
    pub xgb_model: ArtifactSource,
}

impl ArtifactLocations {
    /// Artifact of the given model.
    #[must_use]
    pub fn model(&self, kind: ModelKind) -> &ArtifactSource {
        kind.artifact(self)
    }

    fn resolve_relative_to(&mut self, base: &Path) {
        self.features = self.features.resolve_relative_to(base);
        self.rf_model = self.rf_model.resolve_relative_to(base);
        self.xgb_model = self.xgb_model.resolve_relative_to(base);
    }
}

impl Default for ArtifactLocations {
    fn default() -> Self {
        Self {
            features: ArtifactSource::from("models/next_draw_features.json"),
            rf_model: ArtifactSource::from("models/rf_model.onnx"),
            xgb_model: ArtifactSource::from("models/xgb_model.onnx"),
        }
    }
}

/// Engine configuration, usually read from `lotto.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Candidate numbers, one feature row each.
    pub universe: usize,
    /// Numbers returned per prediction.
    pub pick_count: usize,
    /// Blend weights.
    pub weights: EnsembleWeights,
    /// Artifact locations.
    pub artifacts: ArtifactLocations,
    /// Upper bound for one `predict()` call in milliseconds; `0` disables it.
    pub predict_timeout_ms: u64,
    /// History log used by the CLI.
    pub history_path: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            universe: NUM_NUMBERS,
            pick_count: PICK_COUNT,
            weights: EnsembleWeights::default(),
            artifacts: ArtifactLocations::default(),
            predict_timeout_ms: 30_000,
            history_path: PathBuf::from("data/history.jsonl"),
        }
    }
}

impl EngineConfig {
    /// Loads and validates a TOML file; relative paths are anchored at its directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|err| {
            EngineError::Config(format!("reading {}: {err}", path.display()))
        })?;
        let base = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::from_toml_str(&raw, &base)
    }

    /// Parses and validates TOML text, anchoring relative paths at `base_dir`.
    pub fn from_toml_str(raw: &str, base_dir: &Path) -> Result<Self, EngineError> {
        let mut config: Self =
            toml::from_str(raw).map_err(|err| EngineError::Config(err.to_string()))?;
        config.resolve_relative_to(base_dir);
        config.validate()?;
        Ok(config)
    }

    /// Anchors every relative path at `base`.
    pub fn resolve_relative_to(&mut self, base: &Path) {
        self.artifacts.resolve_relative_to(base);
        if self.history_path.is_relative() {
            self.history_path = base.join(&self.history_path);
        }
    }

    /// Fails fast on configurations the pipeline cannot honor.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.universe == 0 {
            return Err(EngineError::Config("universe must be positive".into()));
        }
        if self.pick_count == 0 || self.pick_count > self.universe {
            return Err(EngineError::Config(format!(
                "pick_count must be within 1..={}, got {}",
                self.universe, self.pick_count
            )));
        }
        if u32::try_from(self.universe).is_err() {
            return Err(EngineError::Config(format!(
                "universe {} does not fit a lotto number",
                self.universe
            )));
        }
        self.weights.validate()
    }

    /// Timeout for a whole prediction, if any.
    #[must_use]
    pub const fn predict_timeout(&self) -> Option<Duration> {
        if self.predict_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.predict_timeout_ms))
        }
    }
}
