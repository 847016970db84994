//! Fixtures and stub runtimes shared by the unit tests.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use ndarray::ArrayView2;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::{
    features::FeatureSnapshot,
    model::{ClassifierSession, ModelKind, OutputNotTensor, OutputTensor, SessionFactory},
    scorer::ScoreVector,
    source::{ArtifactFetcher, ArtifactSource},
};

pub(crate) const FEATURES_KEY: &str = "models/next_draw_features.json";
const RF_KEY: &str = "models/rf_model.onnx";
const XGB_KEY: &str = "models/xgb_model.onnx";

/// Feature document with `rows` candidates and `cols` features.
pub(crate) fn feature_document(rows: usize, cols: usize) -> Value {
    let features: Vec<Vec<f32>> = (0..rows)
        .map(|r| {
            (0..cols)
                .map(|c| ((r * cols + c) % 17) as f32 / 17.0)
                .collect()
        })
        .collect();
    json!({
        "next_draw_no": 1150,
        "based_on_draws": 1149,
        "computed_at": "2024-12-07T12:00:00+09:00",
        "feature_names": (0..cols).map(|c| format!("f{c}")).collect::<Vec<_>>(),
        "features": features,
        "model_metadata": {
            "rf": {"input_name": "float_input", "output_names": ["label", "probabilities"]},
            "xgb": {"input_name": "float_input", "output_names": ["label", "probabilities"]},
        },
    })
}

pub(crate) fn snapshot(rows: usize, cols: usize) -> FeatureSnapshot {
    serde_json::from_value(feature_document(rows, cols)).unwrap()
}

/// Baseline 0.2 with a handful of hand-placed peaks; blended top six is
/// `[1, 3, 10, 20, 30, 41]` with #1 and #2 tied at the cutoff.
pub(crate) fn fixture_scores() -> (ScoreVector, ScoreVector) {
    let mut rf = vec![0.2_f32; 45];
    let mut xgb = vec![0.2_f32; 45];
    for (number, p_rf, p_xgb) in [
        (1, 0.9, 0.1),
        (2, 0.1, 0.9),
        (3, 0.8, 0.7),
        (10, 0.6, 0.8),
        (20, 0.7, 0.6),
        (30, 0.5, 0.7),
        (41, 0.55, 0.6),
    ] {
        rf[number - 1] = p_rf;
        xgb[number - 1] = p_xgb;
    }
    (ScoreVector::new(rf), ScoreVector::new(xgb))
}

/// In-memory fetcher counting requests per source.
#[derive(Default)]
pub(crate) struct CountingFetcher {
    artifacts: HashMap<String, Vec<u8>>,
    calls: Mutex<HashMap<String, usize>>,
    delay: Option<Duration>,
}

impl CountingFetcher {
    pub(crate) fn with_features(doc: Value) -> Self {
        Self::default().with(FEATURES_KEY, doc.to_string().into_bytes())
    }

    pub(crate) fn with_models() -> Self {
        Self::default().with_model_artifacts()
    }

    /// Model bytes are the model label, so factories can check routing.
    pub(crate) fn with_model_artifacts(self) -> Self {
        self.with(RF_KEY, b"rf".to_vec()).with(XGB_KEY, b"xgb".to_vec())
    }

    pub(crate) fn with(mut self, key: &str, bytes: Vec<u8>) -> Self {
        self.artifacts.insert(key.to_owned(), bytes);
        self
    }

    pub(crate) fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn calls(&self, key: &str) -> usize {
        self.calls.lock().get(key).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ArtifactFetcher for CountingFetcher {
    async fn fetch(&self, source: &ArtifactSource) -> Result<Vec<u8>> {
        let key = source.to_string();
        *self.calls.lock().entry(key.clone()).or_default() += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.artifacts
            .get(&key)
            .cloned()
            .ok_or_else(|| anyhow!("{key}: not found"))
    }
}

/// Features plus both models.
pub(crate) fn full_fetcher() -> CountingFetcher {
    CountingFetcher::with_features(feature_document(45, 4)).with_model_artifacts()
}

#[derive(Debug, Clone)]
pub(crate) enum StubBehavior {
    /// P(drawn) per row, emitted as `[1 - p, p]`.
    Scores(Vec<f32>),
    /// Exact output tensor.
    Raw { shape: Vec<usize>, data: Vec<f32> },
    /// Declares only the label output.
    LabelOnly,
    /// Probability output is a sequence of per-class maps.
    SequenceOutput,
    /// Every run errors.
    Fail(String),
}

type Call = (String, (usize, usize), Vec<f32>);

pub(crate) struct StubSession {
    behavior: StubBehavior,
    outputs: Vec<String>,
    last_call: Mutex<Option<Call>>,
}

impl StubSession {
    pub(crate) fn new(behavior: StubBehavior) -> Self {
        let outputs = match behavior {
            StubBehavior::LabelOnly => vec!["label".to_owned()],
            _ => vec!["label".to_owned(), "probabilities".to_owned()],
        };
        Self {
            behavior,
            outputs,
            last_call: Mutex::new(None),
        }
    }

    /// Input name, matrix shape and first row of the latest run.
    pub(crate) fn last_call(&self) -> Option<Call> {
        self.last_call.lock().clone()
    }
}

impl ClassifierSession for StubSession {
    fn output_names(&self) -> &[String] {
        &self.outputs
    }

    fn run(
        &self,
        input_name: &str,
        input: ArrayView2<'_, f32>,
        output_name: &str,
    ) -> Result<OutputTensor> {
        let first_row = input.outer_iter().next().map(|row| row.to_vec()).unwrap_or_default();
        *self.last_call.lock() = Some((input_name.to_owned(), input.dim(), first_row));
        let (shape, data) = match &self.behavior {
            StubBehavior::Scores(values) => (
                vec![values.len(), 2],
                values.iter().flat_map(|p| [1.0 - p, *p]).collect(),
            ),
            StubBehavior::Raw { shape, data } => (shape.clone(), data.clone()),
            StubBehavior::LabelOnly => bail!("no probability output"),
            StubBehavior::SequenceOutput => {
                return Err(OutputNotTensor {
                    name: output_name.to_owned(),
                    reason: "value is a sequence of maps".to_owned(),
                }
                .into())
            }
            StubBehavior::Fail(reason) => bail!("{reason}"),
        };
        Ok(OutputTensor {
            name: output_name.to_owned(),
            shape,
            data,
        })
    }
}

pub(crate) struct StubFactory {
    behaviors: HashMap<ModelKind, StubBehavior>,
    created: AtomicUsize,
}

impl StubFactory {
    pub(crate) fn uniform(p: f32) -> Self {
        Self::from_scores(vec![p; 45], vec![p; 45])
    }

    pub(crate) fn from_scores(rf: Vec<f32>, xgb: Vec<f32>) -> Self {
        let behaviors = HashMap::from([
            (ModelKind::Rf, StubBehavior::Scores(rf)),
            (ModelKind::Xgb, StubBehavior::Scores(xgb)),
        ]);
        Self {
            behaviors,
            created: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with(mut self, kind: ModelKind, behavior: StubBehavior) -> Self {
        self.behaviors.insert(kind, behavior);
        self
    }

    pub(crate) fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl SessionFactory for StubFactory {
    fn create(&self, kind: ModelKind, bytes: &[u8]) -> Result<Arc<dyn ClassifierSession>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        if bytes != kind.label().as_bytes() {
            bail!("{kind} factory received the wrong artifact");
        }
        let behavior = self
            .behaviors
            .get(&kind)
            .cloned()
            .ok_or_else(|| anyhow!("no stub for {kind}"))?;
        Ok(Arc::new(StubSession::new(behavior)))
    }
}
