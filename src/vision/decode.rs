use std::{fmt, io::Cursor};

use image::{ImageFormat, ImageReader, RgbImage};
use ndarray::{Array3, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Container formats the decoder accepts. Anything else is rejected even if the
/// `image` crate could guess it.
pub const SUPPORTED_FORMATS: [ImageFormat; 4] = [
    ImageFormat::Png,
    ImageFormat::Jpeg,
    ImageFormat::Gif,
    ImageFormat::Bmp,
];

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unrecognised image format")]
    UnknownFormat,
    #[error("unsupported image format: {0:?}")]
    UnsupportedFormat(ImageFormat),
    #[error("image decode error: {0}")]
    Image(#[from] image::ImageError),
    #[error("I/O error while sniffing image format: {0}")]
    Io(#[from] std::io::Error),
    #[error("image has zero-sized dimensions ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },
    #[error("decoded pixels do not match the image dimensions: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// Order of the three color samples inside a pixel.
///
/// The two orders are never interchangeable: the classifier was fitted on one of
/// them and every conversion between them goes through [`PixelBuffer::into_order`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    #[default]
    Rgb,
    Bgr,
}

impl fmt::Display for ChannelOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelOrder::Rgb => write!(f, "rgb"),
            ChannelOrder::Bgr => write!(f, "bgr"),
        }
    }
}

/// Decoded image samples laid out as `[height, width, 3]`.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    pixels: Array3<u8>,
    order: ChannelOrder,
}

impl PixelBuffer {
    pub fn new(pixels: Array3<u8>, order: ChannelOrder) -> Self {
        Self { pixels, order }
    }

    /// Wrap an `image` RGB buffer without copying its samples.
    pub fn from_rgb_image(image: RgbImage) -> Result<Self, ndarray::ShapeError> {
        let (width, height) = image.dimensions();
        let pixels =
            Array3::from_shape_vec((height as usize, width as usize, 3), image.into_raw())?;
        Ok(Self::new(pixels, ChannelOrder::Rgb))
    }

    pub fn height(&self) -> usize {
        self.pixels.shape()[0]
    }

    pub fn width(&self) -> usize {
        self.pixels.shape()[1]
    }

    pub fn channel_order(&self) -> ChannelOrder {
        self.order
    }

    pub fn pixels(&self) -> &Array3<u8> {
        &self.pixels
    }

    /// Samples in row-major `[y][x][c]` order, regardless of the internal strides.
    pub fn to_raw(&self) -> Vec<u8> {
        self.pixels.iter().copied().collect()
    }

    /// Reorder the color channels to `target`. No-op when already in that order.
    pub fn into_order(mut self, target: ChannelOrder) -> Self {
        if self.order != target {
            // RGB <-> BGR is a reversal of the channel axis.
            self.pixels.invert_axis(Axis(2));
            self.pixels = self.pixels.as_standard_layout().into_owned();
            self.order = target;
        }
        self
    }
}

/// Decode raw bytes into an RGB [`PixelBuffer`].
///
/// The format is sniffed from the content, never from a filename.
pub fn decode(bytes: &[u8]) -> Result<PixelBuffer, DecodeError> {
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    let format = reader.format().ok_or(DecodeError::UnknownFormat)?;
    if !SUPPORTED_FORMATS.contains(&format) {
        return Err(DecodeError::UnsupportedFormat(format));
    }

    let image = reader.decode()?;
    let (width, height) = (image.width(), image.height());
    if width == 0 || height == 0 {
        return Err(DecodeError::EmptyImage { width, height });
    }

    Ok(PixelBuffer::from_rgb_image(image.to_rgb8())?)
}
