use std::{path::PathBuf, time::Duration};

use log::LevelFilter;

use crate::prediction::LabelSet;
use crate::upload::UploadPolicy;
use crate::vision::PreprocessConfig;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Validation failed: {reason}")]
    ValidationFailed { reason: String },

    #[error("Invalid value for field '{field}': {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required field: {field}")]
    MissingRequired { field: String },
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

pub const DEFAULT_TITLE: &str = "Skin Disease Prediction System";
pub const DEFAULT_DESCRIPTION: &str = "This deep learning model analyzes medical images and \
     predicts the likelihood of various skin conditions including Chickenpox, Measles, \
     Monkeypox and Normal skin.";
pub const DEFAULT_INSTRUCTIONS: &str = "Upload a clear image of the affected skin area in JPG, \
     PNG, or GIF format. The image will be analyzed and a prediction with confidence scores \
     will be provided.";

/// Deployment-time settings, fixed for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub model_path: Option<PathBuf>,
    pub model_name: String,
    pub title: String,
    pub description: String,
    pub instructions: String,
    /// Must match the order of the model's output scores.
    pub labels: Vec<String>,
    pub preprocess: PreprocessConfig,
    pub allowed_extensions: Vec<String>,
    pub max_upload_bytes: u64,
    pub upload_dir: PathBuf,
    pub allowed_image_root: Option<PathBuf>,
    pub inference_timeout_secs: Option<u64>,
    pub workers: Option<usize>,
    pub log_level: LevelFilter,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            model_path: None,
            model_name: "skin-disease-classifier".to_string(),
            title: DEFAULT_TITLE.to_string(),
            description: DEFAULT_DESCRIPTION.to_string(),
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            labels: ["Chickenpox", "Measles", "Monkeypox", "Normal"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            preprocess: PreprocessConfig::default(),
            allowed_extensions: ["png", "jpg", "jpeg", "gif", "bmp"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_upload_bytes: 10 * 1024 * 1024,
            upload_dir: PathBuf::from("uploads"),
            allowed_image_root: None,
            inference_timeout_secs: None,
            workers: None,
            log_level: LevelFilter::Info,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        self.label_set()?;

        let pre = &self.preprocess;
        if pre.target_height == 0 || pre.target_width == 0 {
            return Err(ConfigError::InvalidValue {
                field: "image_size".to_string(),
                value: format!("{}x{}", pre.target_width, pre.target_height),
                reason: "target resolution must be non-zero".to_string(),
            });
        }

        if self.allowed_extensions.iter().all(|e| e.trim().is_empty()) {
            return Err(ConfigError::MissingRequired {
                field: "allowed_extensions".to_string(),
            });
        }

        if self.max_upload_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_upload_bytes".to_string(),
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        if self.upload_dir.as_os_str().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "upload_dir".to_string(),
            });
        }

        if self.inference_timeout_secs == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "inference_timeout_secs".to_string(),
                value: "0".to_string(),
                reason: "must be greater than zero when set".to_string(),
            });
        }

        if self.workers == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "workers".to_string(),
                value: "0".to_string(),
                reason: "must be greater than zero when set".to_string(),
            });
        }

        Ok(())
    }

    pub fn label_set(&self) -> ConfigResult<LabelSet> {
        LabelSet::new(self.labels.iter().cloned()).map_err(|e| ConfigError::ValidationFailed {
            reason: format!("invalid label set: {}", e),
        })
    }

    pub fn upload_policy(&self) -> UploadPolicy {
        UploadPolicy::new(
            &self.allowed_extensions,
            self.max_upload_bytes,
            &self.upload_dir,
            self.allowed_image_root.clone(),
        )
    }

    pub fn inference_timeout(&self) -> Option<Duration> {
        self.inference_timeout_secs.map(Duration::from_secs)
    }
}
