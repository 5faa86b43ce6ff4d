use serde::{Deserialize, Serialize};

use crate::prediction::PredictionResult;
use crate::vision::PreprocessConfig;

/// JSON body of a prediction on an image already on the server.
#[derive(Debug, Deserialize, Serialize)]
pub struct PredictPathRequest {
    pub image_path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub success: bool,
    pub prediction: PredictionResult,
}

impl PredictResponse {
    pub fn new(prediction: PredictionResult) -> Self {
        Self {
            success: true,
            prediction,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InputSize {
    pub height: u32,
    pub width: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreprocessingInfo {
    pub normalization: &'static str,
    pub channel_order: String,
    pub resample: String,
}

impl From<&PreprocessConfig> for PreprocessingInfo {
    fn from(config: &PreprocessConfig) -> Self {
        Self {
            normalization: config.normalization.name(),
            channel_order: config.channel_order.to_string(),
            resample: config.filter.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfoResponse {
    pub title: String,
    pub description: String,
    pub instructions: String,
    pub model_name: String,
    pub classes: Vec<String>,
    pub input_size: InputSize,
    pub preprocessing: PreprocessingInfo,
    pub model_loaded: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassesResponse {
    pub classes: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub message: String,
    pub model_loaded: bool,
}
