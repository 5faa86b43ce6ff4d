//! Image decoding and preprocessing for the classifier input.
//!
//! The pipeline is split the same way the model artifact sees it:
//!
//! - `decode`: raw bytes into a [`PixelBuffer`] with an explicit channel order
//! - `transforms`: resize, channel reordering and tensor conversion helpers
//! - `preprocess`: the deployment-pinned [`Preprocessor`] producing an [`InputTensor`]

pub mod decode;
pub mod preprocess;
pub mod transforms;

pub use decode::{ChannelOrder, DecodeError, PixelBuffer, SUPPORTED_FORMATS, decode};
pub use preprocess::{
    InputTensor, NormalizationMode, NormalizationPolicy, PreprocessConfig, PreprocessError,
    Preprocessor, ResampleFilter,
};
