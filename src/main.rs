use std::path::PathBuf;

use clap::Parser;
use log::LevelFilter;
use sgl_classifier_rs::config::{ConfigError, ConfigResult, ServerConfig};
use sgl_classifier_rs::logging::init_logging;
use sgl_classifier_rs::oracle::OracleState;
use sgl_classifier_rs::prediction::LabelSet;
use sgl_classifier_rs::server;
use sgl_classifier_rs::vision::{
    ChannelOrder, NormalizationMode, NormalizationPolicy, PreprocessConfig, ResampleFilter,
};

#[derive(Parser, Debug)]
#[command(name = "sgl-classifier")]
#[command(about = "Image classification inference server backed by an ONNX model")]
#[command(long_about = r#"
Image classification inference server backed by an ONNX model

Examples:
  # Serve a 4-class skin lesion model
  sgl-classifier --model-path model.onnx --labels Chickenpox,Measles,Monkeypox,Normal

  # Caffe-style model fed BGR, mean-subtracted input
  sgl-classifier --model-path resnet50.onnx --labels-file labels.txt \
    --channel-order bgr --normalization mean-subtraction
"#)]
struct CliArgs {
    /// Host address to bind the server
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port number to bind the server
    #[arg(long, default_value_t = 5000)]
    port: u16,

    /// Path to the ONNX model. Without it the server runs but cannot predict
    #[arg(long)]
    model_path: Option<PathBuf>,

    /// Model name reported by /api/info
    #[arg(long, default_value = "skin-disease-classifier")]
    model_name: String,

    /// Comma-separated class labels, in model output order
    #[arg(long, value_delimiter = ',', conflicts_with = "labels_file")]
    labels: Vec<String>,

    /// File with one class label per line, in model output order
    #[arg(long)]
    labels_file: Option<PathBuf>,

    /// Model input height
    #[arg(long, default_value_t = 224)]
    image_height: u32,

    /// Model input width
    #[arg(long, default_value_t = 224)]
    image_width: u32,

    /// Resampling filter used to resize inputs
    #[arg(long, value_enum, default_value = "bilinear")]
    resample: ResampleFilter,

    /// Normalization the model was trained with
    #[arg(long, value_enum, default_value = "unit-scale")]
    normalization: NormalizationMode,

    /// Channel order the model expects
    #[arg(long, value_enum, default_value = "rgb")]
    channel_order: ChannelOrder,

    /// Per-channel mean (three comma-separated values, in tensor channel order)
    #[arg(long, value_delimiter = ',')]
    norm_mean: Vec<f32>,

    /// Per-channel std (three comma-separated values), for standardize only
    #[arg(long, value_delimiter = ',')]
    norm_std: Vec<f32>,

    /// Allowed upload file extensions
    #[arg(long, value_delimiter = ',', default_value = "png,jpg,jpeg,gif,bmp")]
    allowed_extensions: Vec<String>,

    /// Maximum upload size in MB
    #[arg(long, default_value_t = 10)]
    max_upload_mb: u64,

    /// Directory for temporary copies of uploaded images
    #[arg(long, default_value = "uploads")]
    upload_dir: PathBuf,

    /// Restrict JSON image_path references to this directory
    #[arg(long)]
    allowed_image_root: Option<PathBuf>,

    /// Fail a prediction when inference takes longer than this
    #[arg(long)]
    inference_timeout_secs: Option<u64>,

    /// Number of HTTP worker threads (defaults to the number of CPUs)
    #[arg(long)]
    workers: Option<usize>,

    /// Log level (error, warn, info, debug, trace). RUST_LOG overrides it
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
}

fn channel_triple(field: &str, values: &[f32]) -> ConfigResult<Option<[f32; 3]>> {
    if values.is_empty() {
        return Ok(None);
    }
    let triple: [f32; 3] = values.try_into().map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        value: format!("{:?}", values),
        reason: "expected exactly three values".to_string(),
    })?;
    Ok(Some(triple))
}

impl CliArgs {
    fn into_server_config(self) -> ConfigResult<ServerConfig> {
        let defaults = ServerConfig::default();

        let labels = match &self.labels_file {
            Some(path) => {
                let text =
                    std::fs::read_to_string(path).map_err(|e| ConfigError::InvalidValue {
                        field: "labels_file".to_string(),
                        value: path.display().to_string(),
                        reason: e.to_string(),
                    })?;
                let parsed = LabelSet::parse_lines(&text).map_err(|e| {
                    ConfigError::ValidationFailed {
                        reason: format!("invalid labels file: {}", e),
                    }
                })?;
                parsed.into()
            }
            None if self.labels.is_empty() => defaults.labels,
            None => self.labels,
        };

        let mean = channel_triple("norm_mean", &self.norm_mean)?;
        let std = channel_triple("norm_std", &self.norm_std)?;

        Ok(ServerConfig {
            host: self.host,
            port: self.port,
            model_path: self.model_path,
            model_name: self.model_name,
            labels,
            preprocess: PreprocessConfig {
                target_height: self.image_height,
                target_width: self.image_width,
                filter: self.resample,
                channel_order: self.channel_order,
                normalization: NormalizationPolicy::from_mode(self.normalization, mean, std),
            },
            allowed_extensions: self.allowed_extensions,
            max_upload_bytes: self.max_upload_mb.saturating_mul(1024 * 1024),
            upload_dir: self.upload_dir,
            allowed_image_root: self.allowed_image_root,
            inference_timeout_secs: self.inference_timeout_secs,
            workers: self.workers,
            log_level: self.log_level,
            ..defaults
        })
    }
}

fn main() -> anyhow::Result<()> {
    let cli_args = CliArgs::parse();
    let config = cli_args.into_server_config()?;

    init_logging(config.log_level);
    config.validate()?;

    let oracle = OracleState::load(&config);
    actix_web::rt::System::new().block_on(server::startup(config, oracle))?;
    Ok(())
}
