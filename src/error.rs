use std::time::Duration;

use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use thiserror::Error;

use crate::io_struct::ErrorResponse;
use crate::oracle::InferenceError;
use crate::prediction::LabelMismatch;
use crate::upload::UploadError;
use crate::vision::{DecodeError, PreprocessError};

pub const MODEL_NOT_LOADED: &str = "Model is not loaded. Please ensure the model file exists.";
pub const NOT_FOUND: &str = "The requested resource was not found.";

/// Failure of one stage of the prediction pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error("{0}")]
    Decode(#[from] DecodeError),
    #[error("preprocessing failed: {0}")]
    Preprocess(#[from] PreprocessError),
    #[error("inference failed: {0}")]
    Inference(#[from] InferenceError),
    #[error("{0}")]
    Labels(#[from] LabelMismatch),
    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("inference timed out after {0:?}")]
    Timeout(Duration),
}

/// Client-facing error classes. Each renders as `{"success": false, "error": ...}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    PayloadTooLarge(String),
    #[error("{0}")]
    ServiceUnavailable(String),
    #[error("{0}")]
    ProcessingFault(String),
    #[error("{0}")]
    NotFound(String),
}

impl ApiError {
    pub fn model_not_loaded() -> Self {
        ApiError::ServiceUnavailable(MODEL_NOT_LOADED.to_string())
    }

    pub fn not_found() -> Self {
        ApiError::NotFound(NOT_FOUND.to_string())
    }

    pub fn unexpected(err: impl std::fmt::Display) -> Self {
        ApiError::ProcessingFault(format!("An unexpected error occurred: {}", err))
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::TooLarge { .. } => ApiError::PayloadTooLarge(err.to_string()),
            UploadError::Save(_) | UploadError::Read(_) => {
                ApiError::ProcessingFault(err.to_string())
            }
            UploadError::NoFile
            | UploadError::EmptyFilename
            | UploadError::InvalidExtension { .. }
            | UploadError::PathNotFound
            | UploadError::PathOutsideRoot => ApiError::BadRequest(err.to_string()),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Upload(e) => e.into(),
            PipelineError::Decode(e) => ApiError::BadRequest(format!(
                "Failed to load image. Image may be corrupted or in unsupported format: {}",
                e
            )),
            other => ApiError::unexpected(other),
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::ProcessingFault(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse::new(self.to_string()))
    }
}
