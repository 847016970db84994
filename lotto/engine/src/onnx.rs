//! ONNX Runtime backend, compiled with the `onnx` feature.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use ndarray::ArrayView2;
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::Tensor,
};
use parking_lot::Mutex;

use crate::model::{ClassifierSession, ModelKind, OutputNotTensor, OutputTensor, SessionFactory};

/// Compiles model bytes into ONNX Runtime sessions.
#[derive(Debug, Default, Clone, Copy)]
pub struct OrtSessionFactory;

impl SessionFactory for OrtSessionFactory {
    fn create(&self, kind: ModelKind, bytes: &[u8]) -> Result<Arc<dyn ClassifierSession>> {
        let session = Session::builder()
            .and_then(|builder| builder.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|builder| builder.commit_from_memory(bytes))
            .map_err(|err| anyhow!("compiling {kind} model: {err}"))?;
        let output_names = session.outputs.iter().map(|output| output.name.clone()).collect();
        Ok(Arc::new(OrtSession {
            session: Mutex::new(session),
            output_names,
        }))
    }
}

/// `Session::run` needs exclusive access, so runs are serialized per model.
struct OrtSession {
    session: Mutex<Session>,
    output_names: Vec<String>,
}

impl ClassifierSession for OrtSession {
    fn output_names(&self) -> &[String] {
        &self.output_names
    }

    fn run(
        &self,
        input_name: &str,
        input: ArrayView2<'_, f32>,
        output_name: &str,
    ) -> Result<OutputTensor> {
        let (rows, cols) = input.dim();
        let data: Vec<f32> = input.iter().copied().collect();
        let tensor = Tensor::from_array(([rows, cols], data))
            .map_err(|err| anyhow!("building input tensor: {err}"))?;
        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![input_name => tensor])
            .map_err(|err| anyhow!("{err}"))?;
        let value = outputs
            .get(output_name)
            .with_context(|| format!("output '{output_name}' missing from run"))?;
        let (shape, values) = value
            .try_extract_tensor::<f32>()
            .map_err(|err| OutputNotTensor {
                name: output_name.to_owned(),
                reason: err.to_string(),
            })?;
        let shape = shape
            .iter()
            .map(|dim| usize::try_from(*dim).context("negative output dimension"))
            .collect::<Result<Vec<_>>>()?;
        Ok(OutputTensor {
            name: output_name.to_owned(),
            shape,
            data: values.to_vec(),
        })
    }
}
