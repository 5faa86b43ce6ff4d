use std::fmt;

use image::imageops::FilterType;
use ndarray::Array4;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{ChannelOrder, PixelBuffer, transforms};

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("cannot resize a zero-area image ({width}x{height})")]
    ZeroArea { width: u32, height: u32 },
    #[error("invalid target size {width}x{height}")]
    InvalidTargetSize { width: u32, height: u32 },
    #[error("pixel buffer does not match its dimensions")]
    InvalidBuffer,
    #[error("invalid tensor shape: expected {expected:?}, got {actual:?}")]
    InvalidShape {
        expected: [usize; 4],
        actual: Vec<usize>,
    },
    #[error("shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// Resampling filter used to bring images to the model resolution.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ResampleFilter {
    Nearest,
    #[default]
    Bilinear,
    Bicubic,
    Lanczos,
}

impl ResampleFilter {
    pub fn filter_type(self) -> FilterType {
        match self {
            ResampleFilter::Nearest => FilterType::Nearest,
            ResampleFilter::Bilinear => FilterType::Triangle,
            ResampleFilter::Bicubic => FilterType::CatmullRom,
            ResampleFilter::Lanczos => FilterType::Lanczos3,
        }
    }
}

impl fmt::Display for ResampleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResampleFilter::Nearest => write!(f, "nearest"),
            ResampleFilter::Bilinear => write!(f, "bilinear"),
            ResampleFilter::Bicubic => write!(f, "bicubic"),
            ResampleFilter::Lanczos => write!(f, "lanczos"),
        }
    }
}

/// Selector for [`NormalizationPolicy`], as exposed on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum NormalizationMode {
    #[default]
    UnitScale,
    MeanSubtraction,
    Standardize,
}

/// How samples are mapped from 0..=255 into the range the model was fitted on.
///
/// Exactly one policy is active per deployment. Means and stds are given in the
/// tensor's channel order.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum NormalizationPolicy {
    /// `x / 255`, giving values in [0, 1].
    #[default]
    UnitScale,
    /// `x - mean[c]` on the raw 0..=255 samples (Caffe style).
    MeanSubtraction { mean: [f32; 3] },
    /// `(x / 255 - mean[c]) / std[c]`.
    Standardize { mean: [f32; 3], std: [f32; 3] },
}

impl NormalizationPolicy {
    /// Caffe/ImageNet channel means, in BGR order.
    pub const CAFFE_BGR_MEAN: [f32; 3] = [103.939, 116.779, 123.68];

    pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
    pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

    /// Build a policy from its selector, falling back to the well-known constants
    /// for any value that is not given.
    pub fn from_mode(
        mode: NormalizationMode,
        mean: Option<[f32; 3]>,
        std: Option<[f32; 3]>,
    ) -> Self {
        match mode {
            NormalizationMode::UnitScale => NormalizationPolicy::UnitScale,
            NormalizationMode::MeanSubtraction => NormalizationPolicy::MeanSubtraction {
                mean: mean.unwrap_or(Self::CAFFE_BGR_MEAN),
            },
            NormalizationMode::Standardize => NormalizationPolicy::Standardize {
                mean: mean.unwrap_or(Self::IMAGENET_MEAN),
                std: std.unwrap_or(Self::IMAGENET_STD),
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            NormalizationPolicy::UnitScale => "unit-scale",
            NormalizationPolicy::MeanSubtraction { .. } => "mean-subtraction",
            NormalizationPolicy::Standardize { .. } => "standardize",
        }
    }

    pub fn apply(&self, tensor: &mut Array4<f32>) {
        match self {
            NormalizationPolicy::UnitScale => transforms::rescale(tensor, 1.0 / 255.0),
            NormalizationPolicy::MeanSubtraction { mean } => {
                transforms::subtract_mean(tensor, mean)
            }
            NormalizationPolicy::Standardize { mean, std } => {
                transforms::rescale(tensor, 1.0 / 255.0);
                transforms::normalize(tensor, mean, std);
            }
        }
    }
}

/// Deployment-time preprocessing settings. They must match what the model
/// artifact was fitted against; a mismatch degrades predictions silently.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PreprocessConfig {
    pub target_height: u32,
    pub target_width: u32,
    pub filter: ResampleFilter,
    pub channel_order: ChannelOrder,
    pub normalization: NormalizationPolicy,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            target_height: 224,
            target_width: 224,
            filter: ResampleFilter::Bilinear,
            channel_order: ChannelOrder::Rgb,
            normalization: NormalizationPolicy::UnitScale,
        }
    }
}

impl PreprocessConfig {
    pub fn tensor_shape(&self) -> [usize; 4] {
        [
            1,
            self.target_height as usize,
            self.target_width as usize,
            3,
        ]
    }
}

/// Model input of shape `[1, height, width, 3]`.
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
    data: Array4<f32>,
    order: ChannelOrder,
}

impl InputTensor {
    pub fn shape(&self) -> [usize; 4] {
        let s = self.data.shape();
        [s[0], s[1], s[2], s[3]]
    }

    pub fn channel_order(&self) -> ChannelOrder {
        self.order
    }

    /// Samples in row-major NHWC order.
    pub fn to_vec(&self) -> Vec<f32> {
        self.data.iter().copied().collect()
    }

    /// An all-zero tensor of the configured shape, used to check a freshly loaded model.
    pub fn zeros(config: &PreprocessConfig) -> Self {
        let [n, h, w, c] = config.tensor_shape();
        Self {
            data: Array4::zeros((n, h, w, c)),
            order: config.channel_order,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Preprocessor {
    config: PreprocessConfig,
}

impl Preprocessor {
    pub fn new(config: PreprocessConfig) -> Result<Self, PreprocessError> {
        if config.target_width == 0 || config.target_height == 0 {
            return Err(PreprocessError::InvalidTargetSize {
                width: config.target_width,
                height: config.target_height,
            });
        }
        Ok(Self { config })
    }

    pub fn preprocess(&self, pixels: PixelBuffer) -> Result<InputTensor, PreprocessError> {
        let cfg = &self.config;
        let resized = transforms::resize(
            &pixels,
            cfg.target_width,
            cfg.target_height,
            cfg.filter.filter_type(),
        )?;
        let ordered = resized.into_order(cfg.channel_order);

        let mut data = transforms::to_tensor(&ordered);
        cfg.normalization.apply(&mut data);

        let expected = cfg.tensor_shape();
        if data.shape() != expected {
            return Err(PreprocessError::InvalidShape {
                expected,
                actual: data.shape().to_vec(),
            });
        }

        Ok(InputTensor {
            data,
            order: cfg.channel_order,
        })
    }
}
