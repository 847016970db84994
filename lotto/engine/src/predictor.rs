use std::{sync::Arc, time::Duration, time::Instant};

use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;

use crate::{
    config::EngineConfig,
    ensemble::Ensembler,
    error::EngineError,
    fallback::random_pick,
    features::FeatureProvider,
    model::{ModelKind, ModelLoader, SessionFactory},
    scorer::score_blocking,
    selector::select_top_k,
    source::{ArtifactFetcher, DefaultFetcher},
    telemetry::{self, EngineTelemetry},
};

const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Where the numbers of a [`PredictionResult`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionSource {
    /// Blended model probabilities.
    Ensemble,
    /// Uniform random pick after a pipeline failure.
    Fallback,
}

impl PredictionSource {
    /// Lower-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ensemble => "ensemble",
            Self::Fallback => "fallback",
        }
    }
}

/// Final pick plus the probabilities behind it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Distinct numbers, strictly ascending.
    pub numbers: Vec<u32>,
    /// Blended probability per number; empty for fallback picks.
    pub blended_probabilities: Vec<f32>,
    /// Random-forest probability per number; empty for fallback picks.
    pub rf_probabilities: Vec<f32>,
    /// Gradient-boosting probability per number; empty for fallback picks.
    pub xgb_probabilities: Vec<f32>,
    /// Ensemble or fallback.
    pub source: PredictionSource,
    /// Draw the features were computed for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_draw_no: Option<u32>,
}

impl PredictionResult {
    fn fallback(numbers: Vec<u32>) -> Self {
        Self {
            numbers,
            blended_probabilities: Vec::new(),
            rf_probabilities: Vec::new(),
            xgb_probabilities: Vec::new(),
            source: PredictionSource::Fallback,
            next_draw_no: None,
        }
    }

    /// Whether the numbers are a random substitute.
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.source == PredictionSource::Fallback
    }
}

/// Builder for [`LottoPredictor`].
pub struct LottoPredictorBuilder {
    config: EngineConfig,
    fetcher: Option<Arc<dyn ArtifactFetcher>>,
    factory: Option<Arc<dyn SessionFactory>>,
    telemetry: Option<EngineTelemetry>,
}

impl LottoPredictorBuilder {
    /// Overrides how artifacts are fetched.
    #[must_use]
    pub fn fetcher(mut self, fetcher: Arc<dyn ArtifactFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Overrides the inference runtime.
    #[must_use]
    pub fn session_factory(mut self, factory: Arc<dyn SessionFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Attaches telemetry.
    #[must_use]
    pub fn telemetry(mut self, telemetry: EngineTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Validates the configuration and assembles the predictor.
    pub fn build(self) -> Result<LottoPredictor, EngineError> {
        let config = self.config;
        config.validate()?;
        let universe = u32::try_from(config.universe)
            .map_err(|err| EngineError::Config(format!("universe: {err}")))?;
        let ensembler = Ensembler::new(config.weights, config.universe)?;
        let fetcher = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(
                DefaultFetcher::new(config.predict_timeout().unwrap_or(DEFAULT_FETCH_TIMEOUT))
                    .map_err(|err| EngineError::Config(format!("{err:#}")))?,
            ),
        };
        let factory = self.factory.unwrap_or_else(default_session_factory);
        let features = FeatureProvider::new(
            config.artifacts.features.clone(),
            config.universe,
            Arc::clone(&fetcher),
            self.telemetry.clone(),
        );
        let models = ModelLoader::new(
            config.artifacts.clone(),
            fetcher,
            factory,
            self.telemetry.clone(),
        );
        Ok(LottoPredictor {
            config,
            universe,
            ensembler,
            features,
            models,
            telemetry: self.telemetry,
        })
    }
}

#[cfg(feature = "onnx")]
fn default_session_factory() -> Arc<dyn SessionFactory> {
    Arc::new(crate::onnx::OrtSessionFactory::default())
}

#[cfg(not(feature = "onnx"))]
fn default_session_factory() -> Arc<dyn SessionFactory> {
    Arc::new(crate::model::UnavailableRuntime)
}

/// Prediction service owning the feature and model caches.
///
/// Build one per process and share it; concurrent [`predict`](Self::predict)
/// calls reuse the cached snapshot and sessions.
pub struct LottoPredictor {
    config: EngineConfig,
    universe: u32,
    ensembler: Ensembler,
    features: FeatureProvider,
    models: ModelLoader,
    telemetry: Option<EngineTelemetry>,
}

impl std::fmt::Debug for LottoPredictor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LottoPredictor")
            .field("config", &self.config)
            .field("features", &self.features)
            .field("models", &self.models)
            .finish_non_exhaustive()
    }
}

impl LottoPredictor {
    /// Starts a builder from `config`.
    #[must_use]
    pub fn builder(config: EngineConfig) -> LottoPredictorBuilder {
        LottoPredictorBuilder {
            config,
            fetcher: None,
            factory: None,
            telemetry: None,
        }
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Feature cache.
    #[must_use]
    pub const fn feature_provider(&self) -> &FeatureProvider {
        &self.features
    }

    /// Model cache.
    #[must_use]
    pub const fn model_loader(&self) -> &ModelLoader {
        &self.models
    }

    /// Loads features and both models without predicting.
    pub async fn warm_up(&self) -> Result<(), EngineError> {
        tokio::try_join!(
            self.features.get_features(),
            self.models.get_model(ModelKind::Rf),
            self.models.get_model(ModelKind::Xgb),
        )?;
        Ok(())
    }

    /// Runs the full pipeline and reports any failure.
    pub async fn try_predict(&self) -> Result<PredictionResult, EngineError> {
        let (snapshot, rf, xgb) = tokio::try_join!(
            self.features.get_features(),
            self.models.get_model(ModelKind::Rf),
            self.models.get_model(ModelKind::Xgb),
        )?;
        let rf_input = snapshot.input_name(ModelKind::Rf)?.to_owned();
        let xgb_input = snapshot.input_name(ModelKind::Xgb)?.to_owned();
        let (rf_scores, xgb_scores) = tokio::try_join!(
            score_blocking(rf, Arc::clone(&snapshot), rf_input),
            score_blocking(xgb, Arc::clone(&snapshot), xgb_input),
        )?;
        let blended = self.ensembler.blend(&rf_scores, &xgb_scores)?;
        let numbers = select_top_k(&blended, self.config.pick_count)?;
        Ok(PredictionResult {
            numbers,
            blended_probabilities: blended.into_inner(),
            rf_probabilities: rf_scores.into_inner(),
            xgb_probabilities: xgb_scores.into_inner(),
            source: PredictionSource::Ensemble,
            next_draw_no: Some(snapshot.next_draw_no),
        })
    }

    /// Always yields a valid pick; pipeline failures are logged and replaced
    /// by a random pick.
    pub async fn predict(&self) -> PredictionResult {
        let started = Instant::now();
        let outcome = match self.config.predict_timeout() {
            Some(limit) => tokio::time::timeout(limit, self.try_predict())
                .await
                .unwrap_or_else(|_| {
                    Err(EngineError::Inference(format!(
                        "prediction timed out after {} ms",
                        limit.as_millis()
                    )))
                }),
            None => self.try_predict().await,
        };
        match outcome {
            Ok(result) => {
                let payload = json!({
                    "numbers": result.numbers,
                    "next_draw_no": result.next_draw_no,
                    "elapsed_ms": elapsed_ms(started),
                    "source": PredictionSource::Ensemble.as_str(),
                });
                telemetry::log(
                    self.telemetry.as_ref(),
                    LogLevel::Info,
                    "lotto.prediction.completed",
                    payload.clone(),
                );
                telemetry::event(self.telemetry.as_ref(), "lotto.prediction.completed", payload)
                    .await;
                result
            }
            Err(err) => self.fall_back(&err, started).await,
        }
    }

    async fn fall_back(&self, err: &EngineError, started: Instant) -> PredictionResult {
        let numbers = random_pick(self.config.pick_count, self.universe);
        let payload = json!({
            "error_kind": err.kind(),
            "error": err.to_string(),
            "numbers": numbers,
            "elapsed_ms": elapsed_ms(started),
            "source": PredictionSource::Fallback.as_str(),
        });
        telemetry::log(
            self.telemetry.as_ref(),
            LogLevel::Warn,
            "lotto.prediction.fallback",
            payload.clone(),
        );
        telemetry::event(self.telemetry.as_ref(), "lotto.prediction.fallback", payload).await;
        PredictionResult::fallback(numbers)
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
