//! Per-request orchestration of decode, preprocess, inference and formatting.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use bytes::Bytes;
use tokio::task;

use crate::config::{ConfigError, ConfigResult, ServerConfig};
use crate::error::{ApiError, PipelineError};
use crate::oracle::{Classifier, OracleState};
use crate::prediction::{LabelSet, PredictionResult, format_prediction};
use crate::upload::{UploadError, UploadPolicy};
use crate::vision::{Preprocessor, decode};

static REQUEST_SEQ: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStage {
    Received,
    Validating,
    Decoding,
    Preprocessing,
    Inferring,
    Formatting,
    Responded,
    Errored,
}

impl RequestStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStage::Responded | RequestStage::Errored)
    }
}

impl fmt::Display for RequestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestStage::Received => "received",
            RequestStage::Validating => "validating",
            RequestStage::Decoding => "decoding",
            RequestStage::Preprocessing => "preprocessing",
            RequestStage::Inferring => "inferring",
            RequestStage::Formatting => "formatting",
            RequestStage::Responded => "responded",
            RequestStage::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Lifecycle of one prediction request. Moves forward through the stages
/// and ends in exactly one terminal stage.
#[derive(Debug)]
pub struct RequestTracker {
    id: u64,
    stage: RequestStage,
    started: Instant,
}

impl RequestTracker {
    pub fn new() -> Self {
        let tracker = Self {
            id: REQUEST_SEQ.fetch_add(1, Ordering::Relaxed),
            stage: RequestStage::Received,
            started: Instant::now(),
        };
        log::debug!("[req {}] received", tracker.id);
        tracker
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn stage(&self) -> RequestStage {
        self.stage
    }

    pub fn advance(&mut self, next: RequestStage) {
        if self.stage.is_terminal() {
            return;
        }
        log::debug!("[req {}] {} -> {}", self.id, self.stage, next);
        self.stage = next;
    }

    pub fn fail(&mut self, err: &dyn fmt::Display) {
        if self.stage.is_terminal() {
            return;
        }
        log::warn!(
            "[req {}] failed while {} after {:?}: {}",
            self.id,
            self.stage,
            self.started.elapsed(),
            err
        );
        self.stage = RequestStage::Errored;
    }

    pub fn finish(&mut self) {
        self.advance(RequestStage::Responded);
        log::debug!("[req {}] done in {:?}", self.id, self.started.elapsed());
    }
}

impl Default for RequestTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Where the image for a prediction comes from.
#[derive(Debug, Clone)]
pub enum ImageInput {
    /// Uploaded bytes with the client-supplied filename, already checked
    /// against the extension allow-list and the size limit.
    Upload { filename: String, bytes: Bytes },
    /// A server-side path reference. Never deleted.
    Path(String),
}

/// Shared, read-only state for every prediction request.
#[derive(Debug, Clone)]
pub struct RequestHandler {
    oracle: OracleState,
    preprocessor: Preprocessor,
    labels: LabelSet,
    uploads: UploadPolicy,
    inference_timeout: Option<Duration>,
}

impl RequestHandler {
    pub fn new(config: &ServerConfig, oracle: OracleState) -> ConfigResult<Self> {
        let preprocessor =
            Preprocessor::new(config.preprocess).map_err(|e| ConfigError::InvalidValue {
                field: "image_size".to_string(),
                value: format!(
                    "{}x{}",
                    config.preprocess.target_width, config.preprocess.target_height
                ),
                reason: e.to_string(),
            })?;
        Ok(Self {
            oracle,
            preprocessor,
            labels: config.label_set()?,
            uploads: config.upload_policy(),
            inference_timeout: config.inference_timeout(),
        })
    }

    pub fn oracle(&self) -> &OracleState {
        &self.oracle
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    pub fn uploads(&self) -> &UploadPolicy {
        &self.uploads
    }

    /// Fail fast when no model is loaded, before any payload is read.
    pub fn ready_classifier(
        &self,
        tracker: &mut RequestTracker,
    ) -> Result<Arc<dyn Classifier>, ApiError> {
        match &self.oracle {
            OracleState::Ready(classifier) => {
                tracker.advance(RequestStage::Validating);
                Ok(classifier.clone())
            }
            OracleState::Unavailable { reason } => {
                let err = ApiError::model_not_loaded();
                tracker.fail(&format_args!("{} ({})", err, reason));
                Err(err)
            }
        }
    }

    /// Run a validated input through the pipeline. Uploaded copies are removed
    /// before returning, whatever the outcome.
    pub async fn predict(
        &self,
        tracker: &mut RequestTracker,
        classifier: Arc<dyn Classifier>,
        input: ImageInput,
    ) -> Result<PredictionResult, ApiError> {
        let outcome = match input {
            ImageInput::Upload { filename, bytes } => {
                match self.uploads.persist(&filename, &bytes).await {
                    Ok(temp) => {
                        let outcome = match temp.read().await {
                            Ok(saved) => self.run(tracker, classifier, saved).await,
                            Err(e) => Err(e.into()),
                        };
                        temp.discard().await;
                        outcome
                    }
                    Err(e) => Err(e.into()),
                }
            }
            ImageInput::Path(raw) => match self.read_path(&raw).await {
                Ok(bytes) => self.run(tracker, classifier, bytes).await,
                Err(e) => Err(e.into()),
            },
        };

        match outcome {
            Ok(prediction) => {
                tracker.finish();
                Ok(prediction)
            }
            Err(e) => {
                tracker.fail(&e);
                Err(e.into())
            }
        }
    }

    async fn read_path(&self, raw: &str) -> Result<Bytes, UploadError> {
        let path = self.uploads.resolve_path(raw).await?;
        let bytes = tokio::fs::read(&path).await.map_err(UploadError::Read)?;
        self.uploads.check_size(bytes.len() as u64)?;
        Ok(Bytes::from(bytes))
    }

    async fn run(
        &self,
        tracker: &mut RequestTracker,
        classifier: Arc<dyn Classifier>,
        bytes: Bytes,
    ) -> Result<PredictionResult, PipelineError> {
        tracker.advance(RequestStage::Decoding);
        let pixels = task::spawn_blocking(move || decode(&bytes)).await??;

        tracker.advance(RequestStage::Preprocessing);
        let preprocessor = self.preprocessor.clone();
        let tensor = task::spawn_blocking(move || preprocessor.preprocess(pixels)).await??;

        tracker.advance(RequestStage::Inferring);
        let job = task::spawn_blocking(move || classifier.infer(&tensor));
        let joined = match self.inference_timeout {
            Some(limit) => tokio::time::timeout(limit, job)
                .await
                .map_err(|_| PipelineError::Timeout(limit))?,
            None => job.await,
        };
        let probs = joined??;
        probs.validate(self.labels.len())?;

        tracker.advance(RequestStage::Formatting);
        Ok(format_prediction(&probs, &self.labels)?)
    }
}
