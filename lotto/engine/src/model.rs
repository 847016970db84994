use std::{fmt, sync::Arc};

use anyhow::Result;
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::{
    config::{ArtifactLocations, EnsembleWeights},
    error::EngineError,
    source::{ArtifactFetcher, ArtifactSource},
    telemetry::{self, EngineTelemetry},
};

/// The two classifiers making up the ensemble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Random forest.
    Rf,
    /// Gradient-boosted trees.
    Xgb,
}

struct ModelSpec {
    kind: ModelKind,
    label: &'static str,
    family: &'static str,
    artifact: fn(&ArtifactLocations) -> &ArtifactSource,
    weight: fn(&EnsembleWeights) -> f32,
}

fn rf_artifact(locations: &ArtifactLocations) -> &ArtifactSource {
    &locations.rf_model
}

fn xgb_artifact(locations: &ArtifactLocations) -> &ArtifactSource {
    &locations.xgb_model
}

const fn rf_weight(weights: &EnsembleWeights) -> f32 {
    weights.rf
}

const fn xgb_weight(weights: &EnsembleWeights) -> f32 {
    weights.xgb
}

static MODEL_TABLE: [ModelSpec; 2] = [
    ModelSpec {
        kind: ModelKind::Rf,
        label: "rf",
        family: "random forest",
        artifact: rf_artifact,
        weight: rf_weight,
    },
    ModelSpec {
        kind: ModelKind::Xgb,
        label: "xgb",
        family: "gradient boosting",
        artifact: xgb_artifact,
        weight: xgb_weight,
    },
];

impl ModelKind {
    /// Every model, in blend order.
    pub const ALL: [Self; 2] = [Self::Rf, Self::Xgb];

    fn spec(self) -> &'static ModelSpec {
        let spec = match self {
            Self::Rf => &MODEL_TABLE[0],
            Self::Xgb => &MODEL_TABLE[1],
        };
        debug_assert_eq!(spec.kind, self);
        spec
    }

    /// Key used in configs and in the feature document's `model_metadata`.
    #[must_use]
    pub fn label(self) -> &'static str {
        self.spec().label
    }

    /// Human-readable model family.
    #[must_use]
    pub fn family(self) -> &'static str {
        self.spec().family
    }

    pub(crate) fn artifact(self, locations: &ArtifactLocations) -> &ArtifactSource {
        (self.spec().artifact)(locations)
    }

    pub(crate) fn weight(self, weights: &EnsembleWeights) -> f32 {
        (self.spec().weight)(weights)
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A named f32 tensor returned by a session.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTensor {
    /// Output name as declared by the model.
    pub name: String,
    /// Dimensions.
    pub shape: Vec<usize>,
    /// Row-major values.
    pub data: Vec<f32>,
}

/// Raised by a session when the requested output exists but is not a dense
/// f32 tensor (e.g. a sequence of per-class maps).
#[derive(Debug, Error)]
#[error("output '{name}' is not an f32 tensor: {reason}")]
pub struct OutputNotTensor {
    /// Output name.
    pub name: String,
    /// What the runtime reported.
    pub reason: String,
}

/// Runnable inference session over a tabular classifier.
pub trait ClassifierSession: Send + Sync {
    /// Output names in declaration order.
    fn output_names(&self) -> &[String];

    /// Runs the model with `input` bound to `input_name` and returns `output_name`.
    fn run(
        &self,
        input_name: &str,
        input: ArrayView2<'_, f32>,
        output_name: &str,
    ) -> Result<OutputTensor>;
}

/// Builds sessions from serialized model bytes.
pub trait SessionFactory: Send + Sync {
    /// Deserializes and compiles a model artifact.
    fn create(&self, kind: ModelKind, bytes: &[u8]) -> Result<Arc<dyn ClassifierSession>>;
}

/// Factory used when no inference runtime is compiled in; every load fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableRuntime;

impl SessionFactory for UnavailableRuntime {
    fn create(&self, kind: ModelKind, _bytes: &[u8]) -> Result<Arc<dyn ClassifierSession>> {
        anyhow::bail!("no inference runtime for {kind}; rebuild with the `onnx` feature")
    }
}

/// Loaded classifier; cheap to clone, shared for the process lifetime.
#[derive(Clone)]
pub struct ModelHandle {
    kind: ModelKind,
    session: Arc<dyn ClassifierSession>,
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("kind", &self.kind)
            .field("outputs", &self.session.output_names())
            .finish()
    }
}

impl ModelHandle {
    /// Wraps an existing session.
    #[must_use]
    pub fn new(kind: ModelKind, session: Arc<dyn ClassifierSession>) -> Self {
        Self { kind, session }
    }

    /// Which model this is.
    #[must_use]
    pub const fn kind(&self) -> ModelKind {
        self.kind
    }

    /// Underlying session.
    #[must_use]
    pub fn session(&self) -> &dyn ClassifierSession {
        self.session.as_ref()
    }
}

/// Loads each model artifact at most once and keeps the handles alive.
pub struct ModelLoader {
    inner: Arc<LoaderInner>,
}

struct LoaderInner {
    artifacts: ArtifactLocations,
    fetcher: Arc<dyn ArtifactFetcher>,
    factory: Arc<dyn SessionFactory>,
    rf: OnceCell<ModelHandle>,
    xgb: OnceCell<ModelHandle>,
    telemetry: Option<EngineTelemetry>,
}

impl fmt::Debug for ModelLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelLoader")
            .field("artifacts", &self.inner.artifacts)
            .field("rf_loaded", &self.inner.rf.initialized())
            .field("xgb_loaded", &self.inner.xgb.initialized())
            .finish_non_exhaustive()
    }
}

impl ModelLoader {
    /// Creates a loader; artifacts are fetched lazily.
    #[must_use]
    pub fn new(
        artifacts: ArtifactLocations,
        fetcher: Arc<dyn ArtifactFetcher>,
        factory: Arc<dyn SessionFactory>,
        telemetry: Option<EngineTelemetry>,
    ) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                artifacts,
                fetcher,
                factory,
                rf: OnceCell::new(),
                xgb: OnceCell::new(),
                telemetry,
            }),
        }
    }

    /// Returns the handle for `kind`, loading it on first use.
    ///
    /// Concurrent first callers wait on the same load; the first successful
    /// result is shared with all of them. The load runs as its own task, so a
    /// caller that gives up (e.g. on a timeout) does not cancel it.
    pub async fn get_model(&self, kind: ModelKind) -> Result<ModelHandle, EngineError> {
        if let Some(handle) = self.inner.cell(kind).get() {
            return Ok(handle.clone());
        }
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner
                .cell(kind)
                .get_or_try_init(|| inner.load(kind))
                .await
                .cloned()
        })
        .await
        .map_err(|err| EngineError::model_load(kind, format!("load task failed: {err}")))?
    }

    /// Whether `kind` has been loaded.
    #[must_use]
    pub fn is_loaded(&self, kind: ModelKind) -> bool {
        self.inner.cell(kind).initialized()
    }
}

impl LoaderInner {
    const fn cell(&self, kind: ModelKind) -> &OnceCell<ModelHandle> {
        match kind {
            ModelKind::Rf => &self.rf,
            ModelKind::Xgb => &self.xgb,
        }
    }

    async fn load(&self, kind: ModelKind) -> Result<ModelHandle, EngineError> {
        let source = self.artifacts.model(kind);
        let bytes = self
            .fetcher
            .fetch(source)
            .await
            .map_err(|err| EngineError::model_load(kind, format!("{source}: {err:#}")))?;
        let size = bytes.len();
        let factory = Arc::clone(&self.factory);
        let session = tokio::task::spawn_blocking(move || factory.create(kind, &bytes))
            .await
            .map_err(|err| EngineError::model_load(kind, err))?
            .map_err(|err| EngineError::model_load(kind, format!("{err:#}")))?;
        let payload = json!({
            "model": kind.label(),
            "family": kind.family(),
            "source": source.to_string(),
            "bytes": size,
            "outputs": session.output_names(),
        });
        telemetry::log(
            self.telemetry.as_ref(),
            LogLevel::Info,
            "lotto.model.loaded",
            payload.clone(),
        );
        telemetry::event(self.telemetry.as_ref(), "lotto.model.loaded", payload).await;
        Ok(ModelHandle::new(kind, session))
    }
}
