//! The pretrained classifier, treated as an opaque function from an
//! [`InputTensor`] to a [`ProbabilityVector`].

use std::{fmt, path::Path, sync::Arc};

use thiserror::Error;
use tract_onnx::prelude::*;

use crate::config::ServerConfig;
use crate::vision::{InputTensor, PreprocessConfig};

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("model runtime error: {0}")]
    Runtime(#[from] anyhow::Error),
    #[error("model produced no output tensor")]
    MissingOutput,
    #[error("model produced {actual} scores but {expected} labels are configured")]
    OutputLength { expected: usize, actual: usize },
    #[error("model produced a non-finite score at index {0}")]
    NonFinite(usize),
}

/// One score per label, in label-set order.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilityVector(Vec<f32>);

impl ProbabilityVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check the vector against the number of configured labels.
    pub fn validate(&self, expected_len: usize) -> Result<(), InferenceError> {
        if self.0.len() != expected_len {
            return Err(InferenceError::OutputLength {
                expected: expected_len,
                actual: self.0.len(),
            });
        }
        match self.0.iter().position(|v| !v.is_finite()) {
            Some(idx) => Err(InferenceError::NonFinite(idx)),
            None => Ok(()),
        }
    }
}

impl From<Vec<f32>> for ProbabilityVector {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

/// A loaded model. Implementations are read-only after construction and are
/// shared across concurrent requests.
pub trait Classifier: Send + Sync {
    fn infer(&self, input: &InputTensor) -> Result<ProbabilityVector, InferenceError>;
}

type OnnxPlan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// ONNX graph executed with tract, with its input pinned to `[1, H, W, 3]` f32.
pub struct OnnxClassifier {
    plan: OnnxPlan,
}

impl OnnxClassifier {
    pub fn load(path: &Path, preprocess: &PreprocessConfig) -> Result<Self, InferenceError> {
        let [n, h, w, c] = preprocess.tensor_shape();
        let plan = tract_onnx::onnx()
            .model_for_path(path)?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(n, h, w, c)),
            )?
            .into_optimized()?
            .into_runnable()?;
        Ok(Self { plan })
    }
}

impl Classifier for OnnxClassifier {
    fn infer(&self, input: &InputTensor) -> Result<ProbabilityVector, InferenceError> {
        let tensor = Tensor::from_shape(&input.shape(), input.to_vec().as_slice())?;
        let outputs = self.plan.run(tvec!(tensor.into()))?;
        let scores = outputs.first().ok_or(InferenceError::MissingOutput)?;
        let view = scores.to_array_view::<f32>()?;
        Ok(ProbabilityVector::new(view.iter().copied().collect()))
    }
}

/// The process-wide model handle, decided once at startup and injected into
/// the request handler.
#[derive(Clone)]
pub enum OracleState {
    Ready(Arc<dyn Classifier>),
    Unavailable { reason: String },
}

impl OracleState {
    pub fn ready<C: Classifier + 'static>(classifier: C) -> Self {
        OracleState::Ready(Arc::new(classifier))
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        OracleState::Unavailable {
            reason: reason.into(),
        }
    }

    /// Load the configured model and run it once on a zero tensor so a
    /// label-count mismatch is caught before serving. Failures leave the
    /// service running without predictions.
    pub fn load(config: &ServerConfig) -> Self {
        let Some(model_path) = &config.model_path else {
            log::warn!("No model path configured; predictions will not be available");
            return Self::unavailable("no model path configured");
        };

        let loaded = OnnxClassifier::load(model_path, &config.preprocess).and_then(|model| {
            let warmup = model.infer(&InputTensor::zeros(&config.preprocess))?;
            warmup.validate(config.labels.len())?;
            Ok(model)
        });

        match loaded {
            Ok(model) => {
                log::info!("Model loaded successfully from {}", model_path.display());
                Self::ready(model)
            }
            Err(e) => {
                log::warn!("Could not load model from {}: {}", model_path.display(), e);
                log::warn!("Application will run but predictions will not be available");
                Self::unavailable(e.to_string())
            }
        }
    }

    pub fn classifier(&self) -> Option<Arc<dyn Classifier>> {
        match self {
            OracleState::Ready(classifier) => Some(classifier.clone()),
            OracleState::Unavailable { .. } => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, OracleState::Ready(_))
    }
}

impl fmt::Debug for OracleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OracleState::Ready(_) => f.write_str("Ready"),
            OracleState::Unavailable { reason } => {
                f.debug_struct("Unavailable").field("reason", reason).finish()
            }
        }
    }
}
