//! Composable pixel and tensor transforms used by the [`Preprocessor`].
//!
//! [`Preprocessor`]: super::Preprocessor

use image::{RgbImage, imageops, imageops::FilterType};
use ndarray::{Array3, Array4, s};

use super::{PixelBuffer, PreprocessError};

/// Resize a pixel buffer to exact dimensions.
///
/// Resampling is channel-agnostic, so the buffer's channel order is carried over
/// untouched.
pub fn resize(
    buffer: &PixelBuffer,
    width: u32,
    height: u32,
    filter: FilterType,
) -> Result<PixelBuffer, PreprocessError> {
    let (src_w, src_h) = (buffer.width() as u32, buffer.height() as u32);
    if src_w == 0 || src_h == 0 {
        return Err(PreprocessError::ZeroArea {
            width: src_w,
            height: src_h,
        });
    }

    let src = RgbImage::from_raw(src_w, src_h, buffer.to_raw())
        .ok_or(PreprocessError::InvalidBuffer)?;
    let resized = if (src_w, src_h) == (width, height) {
        src
    } else {
        imageops::resize(&src, width, height, filter)
    };

    let pixels = Array3::from_shape_vec((height as usize, width as usize, 3), resized.into_raw())?;
    Ok(PixelBuffer::new(pixels, buffer.channel_order()))
}

/// Convert `[H, W, 3]` samples into a `[1, H, W, 3]` tensor, keeping the 0..=255 range.
pub fn to_tensor(buffer: &PixelBuffer) -> Array4<f32> {
    let (h, w) = (buffer.height(), buffer.width());
    let mut tensor = Array4::<f32>::zeros((1, h, w, 3));
    tensor
        .slice_mut(s![0, .., .., ..])
        .zip_mut_with(buffer.pixels(), |dst, &src| *dst = src as f32);
    tensor
}

/// Multiply every sample by a constant factor (typically 1/255).
pub fn rescale(tensor: &mut Array4<f32>, factor: f32) {
    tensor.mapv_inplace(|v| v * factor);
}

/// Subtract a per-channel mean: `x - mean[c]`.
pub fn subtract_mean(tensor: &mut Array4<f32>, mean: &[f32; 3]) {
    for (c, &mean_c) in mean.iter().enumerate() {
        tensor
            .slice_mut(s![.., .., .., c])
            .mapv_inplace(|v| v - mean_c);
    }
}

/// Normalize per channel: `(x - mean[c]) / std[c]`.
pub fn normalize(tensor: &mut Array4<f32>, mean: &[f32; 3], std: &[f32; 3]) {
    for c in 0..3 {
        let (mean_c, std_c) = (mean[c], std[c]);
        tensor
            .slice_mut(s![.., .., .., c])
            .mapv_inplace(|v| (v - mean_c) / std_c);
    }
}
