use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use indexmap::IndexMap;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;
use tokio::sync::OnceCell;

use crate::{
    error::EngineError,
    model::ModelKind,
    source::{ArtifactFetcher, ArtifactSource},
    telemetry::{self, EngineTelemetry},
};

/// Per-model metadata shipped with the feature document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// Name of the input tensor the model expects.
    pub input_name: String,
    /// Declared output names, informational.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_names: Vec<String>,
}

/// Feature matrix for the next draw: row `i` describes candidate number `i + 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSnapshot {
    /// Draw the features were computed for.
    pub next_draw_no: u32,
    /// Last draw included in the history.
    pub based_on_draws: u32,
    /// When the offline job produced the document (ISO 8601, zone optional).
    pub computed_at: String,
    /// Column names, defining the width `F`.
    pub feature_names: Vec<String>,
    /// `universe x F` feature rows.
    pub features: Vec<Vec<f32>>,
    /// Metadata keyed by model label (`rf`, `xgb`).
    pub model_metadata: IndexMap<String, ModelMetadata>,
}

impl FeatureSnapshot {
    /// Parses a JSON document and checks its shape against `universe`.
    pub fn from_json_slice(bytes: &[u8], universe: usize) -> Result<Self, EngineError> {
        let snapshot: Self = serde_json::from_slice(bytes)
            .map_err(|err| EngineError::FeatureLoad(format!("invalid feature document: {err}")))?;
        snapshot.validate(universe)?;
        Ok(snapshot)
    }

    /// Enforces the `universe x F` shape, finite values and model metadata.
    pub fn validate(&self, universe: usize) -> Result<(), EngineError> {
        let width = self.width();
        if width == 0 {
            return Err(EngineError::FeatureLoad("feature_names is empty".into()));
        }
        if self.features.len() != universe {
            return Err(EngineError::FeatureLoad(format!(
                "expected {universe} feature rows, found {}",
                self.features.len()
            )));
        }
        for (idx, row) in self.features.iter().enumerate() {
            if row.len() != width {
                return Err(EngineError::FeatureLoad(format!(
                    "row {} (number {}) has {} columns, expected {width}",
                    idx,
                    idx + 1,
                    row.len()
                )));
            }
            if row.iter().any(|value| !value.is_finite()) {
                return Err(EngineError::FeatureLoad(format!(
                    "row {idx} contains non-finite values"
                )));
            }
        }
        for kind in ModelKind::ALL {
            let name = self.input_name(kind)?;
            if name.trim().is_empty() {
                return Err(EngineError::FeatureLoad(format!(
                    "{kind} input_name is empty"
                )));
            }
        }
        Ok(())
    }

    /// Parsed `computed_at`; naive timestamps are read as UTC.
    #[must_use]
    pub fn computed_at_utc(&self) -> Option<DateTime<Utc>> {
        let raw = self.computed_at.trim();
        DateTime::parse_from_rfc3339(raw)
            .map(|ts| ts.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc())
            })
    }

    /// Number of feature columns `F`.
    #[must_use]
    pub fn width(&self) -> usize {
        self.feature_names.len()
    }

    /// Number of candidate rows.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.features.len()
    }

    /// Input tensor name expected by `kind`.
    pub fn input_name(&self, kind: ModelKind) -> Result<&str, EngineError> {
        self.model_metadata
            .get(kind.label())
            .map(|meta| meta.input_name.as_str())
            .ok_or_else(|| {
                EngineError::FeatureLoad(format!("model_metadata.{} missing", kind.label()))
            })
    }

    /// Dense row-major `[rows, F]` matrix, row order preserved.
    pub fn matrix(&self) -> Result<Array2<f32>, EngineError> {
        let flat: Vec<f32> = self.features.iter().flatten().copied().collect();
        let actual = flat.len();
        Array2::from_shape_vec((self.rows(), self.width()), flat).map_err(|_| {
            EngineError::DimensionMismatch {
                expected: self.rows() * self.width(),
                actual,
            }
        })
    }
}

/// Loads the feature document once and hands out the cached snapshot.
pub struct FeatureProvider {
    inner: Arc<ProviderInner>,
}

struct ProviderInner {
    source: ArtifactSource,
    universe: usize,
    fetcher: Arc<dyn ArtifactFetcher>,
    cache: OnceCell<Arc<FeatureSnapshot>>,
    telemetry: Option<EngineTelemetry>,
}

impl std::fmt::Debug for FeatureProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureProvider")
            .field("source", &self.inner.source)
            .field("cached", &self.inner.cache.initialized())
            .finish_non_exhaustive()
    }
}

impl FeatureProvider {
    /// Creates a provider for `source`; nothing is fetched until first use.
    #[must_use]
    pub fn new(
        source: ArtifactSource,
        universe: usize,
        fetcher: Arc<dyn ArtifactFetcher>,
        telemetry: Option<EngineTelemetry>,
    ) -> Self {
        Self {
            inner: Arc::new(ProviderInner {
                source,
                universe,
                fetcher,
                cache: OnceCell::new(),
                telemetry,
            }),
        }
    }

    /// Returns the snapshot, fetching it on the first successful call only.
    ///
    /// Concurrent first callers share a single in-flight load, which runs as
    /// its own task and completes even if every caller stops waiting. A
    /// failed load leaves the cache empty so a later call may retry.
    pub async fn get_features(&self) -> Result<Arc<FeatureSnapshot>, EngineError> {
        if let Some(snapshot) = self.inner.cache.get() {
            return Ok(Arc::clone(snapshot));
        }
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner
                .cache
                .get_or_try_init(|| inner.load())
                .await
                .map(Arc::clone)
        })
        .await
        .map_err(|err| EngineError::FeatureLoad(format!("load task failed: {err}")))?
    }

    /// Cached snapshot, if already loaded.
    #[must_use]
    pub fn cached(&self) -> Option<Arc<FeatureSnapshot>> {
        self.inner.cache.get().cloned()
    }
}

impl ProviderInner {
    async fn load(&self) -> Result<Arc<FeatureSnapshot>, EngineError> {
        let bytes = self
            .fetcher
            .fetch(&self.source)
            .await
            .map_err(|err| EngineError::FeatureLoad(format!("{}: {err:#}", self.source)))?;
        let snapshot = FeatureSnapshot::from_json_slice(&bytes, self.universe)?;
        let payload = json!({
            "source": self.source.to_string(),
            "next_draw_no": snapshot.next_draw_no,
            "based_on_draws": snapshot.based_on_draws,
            "computed_at": snapshot.computed_at_utc().map(|ts| ts.to_rfc3339()),
            "rows": snapshot.rows(),
            "columns": snapshot.width(),
        });
        telemetry::log(
            self.telemetry.as_ref(),
            LogLevel::Info,
            "lotto.features.loaded",
            payload.clone(),
        );
        telemetry::event(self.telemetry.as_ref(), "lotto.features.loaded", payload).await;
        Ok(Arc::new(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{feature_document, CountingFetcher};

    #[test]
    fn parses_and_validates_document() {
        let doc = feature_document(45, 3);
        let snapshot = FeatureSnapshot::from_json_slice(doc.to_string().as_bytes(), 45).unwrap();
        assert_eq!(snapshot.rows(), 45);
        assert_eq!(snapshot.width(), 3);
        assert_eq!(snapshot.input_name(ModelKind::Rf).unwrap(), "float_input");
        let matrix = snapshot.matrix().unwrap();
        assert_eq!(matrix.dim(), (45, 3));
        assert_eq!(matrix[[4, 0]], snapshot.features[4][0]);
        assert!(snapshot.computed_at_utc().is_some());
    }

    #[test]
    fn rejects_wrong_row_count() {
        let doc = feature_document(44, 3);
        let err = FeatureSnapshot::from_json_slice(doc.to_string().as_bytes(), 45).unwrap_err();
        assert!(matches!(err, EngineError::FeatureLoad(_)));
        assert!(err.to_string().contains("expected 45 feature rows"));
    }

    #[test]
    fn rejects_ragged_rows_and_missing_metadata() {
        let mut doc = feature_document(45, 3);
        doc["features"][10] = serde_json::json!([0.1, 0.2]);
        let err = FeatureSnapshot::from_json_slice(doc.to_string().as_bytes(), 45).unwrap_err();
        assert!(err.to_string().contains("number 11"));

        let mut doc = feature_document(45, 3);
        doc["model_metadata"].as_object_mut().unwrap().remove("xgb");
        let err = FeatureSnapshot::from_json_slice(doc.to_string().as_bytes(), 45).unwrap_err();
        assert!(err.to_string().contains("model_metadata.xgb"));
    }

    #[test]
    fn rejects_malformed_json() {
        let err = FeatureSnapshot::from_json_slice(b"{not json", 45).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::FeatureLoad);
    }

    #[tokio::test]
    async fn caches_snapshot_after_first_fetch() {
        let fetcher = Arc::new(CountingFetcher::with_features(feature_document(45, 4)));
        let provider = FeatureProvider::new(
            ArtifactSource::from("models/next_draw_features.json"),
            45,
            fetcher.clone(),
            None,
        );
        assert!(provider.cached().is_none());
        let first = provider.get_features().await.unwrap();
        let second = provider.get_features().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(fetcher.calls("models/next_draw_features.json"), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_callers_share_one_fetch() {
        let fetcher = Arc::new(
            CountingFetcher::with_features(feature_document(45, 2))
                .delayed(std::time::Duration::from_millis(30)),
        );
        let provider = Arc::new(FeatureProvider::new(
            ArtifactSource::from("models/next_draw_features.json"),
            45,
            fetcher.clone(),
            None,
        ));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let provider = Arc::clone(&provider);
                tokio::spawn(async move { provider.get_features().await })
            })
            .collect();
        let mut snapshots = Vec::new();
        for handle in handles {
            snapshots.push(handle.await.unwrap().unwrap());
        }
        assert!(snapshots.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(fetcher.calls("models/next_draw_features.json"), 1);
    }

    #[tokio::test]
    async fn abandoned_caller_does_not_cancel_the_load() {
        let fetcher = Arc::new(
            CountingFetcher::with_features(feature_document(45, 3))
                .delayed(std::time::Duration::from_millis(60)),
        );
        let provider = FeatureProvider::new(
            ArtifactSource::from("models/next_draw_features.json"),
            45,
            fetcher.clone(),
            None,
        );
        let gave_up =
            tokio::time::timeout(std::time::Duration::from_millis(10), provider.get_features())
                .await;
        assert!(gave_up.is_err());
        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
        assert!(provider.cached().is_some());
        provider.get_features().await.unwrap();
        assert_eq!(fetcher.calls("models/next_draw_features.json"), 1);
    }

    #[tokio::test]
    async fn failed_load_is_not_cached() {
        let fetcher = Arc::new(CountingFetcher::default());
        let provider = FeatureProvider::new(
            ArtifactSource::from("models/next_draw_features.json"),
            45,
            fetcher.clone(),
            None,
        );
        assert!(provider.get_features().await.is_err());
        assert!(provider.get_features().await.is_err());
        assert_eq!(fetcher.calls("models/next_draw_features.json"), 2);
        assert!(provider.cached().is_none());
    }
}
