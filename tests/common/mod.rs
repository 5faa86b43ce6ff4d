// Shared fixtures for the integration tests
#![allow(dead_code)]

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use actix_web::web;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use sgl_classifier_rs::config::ServerConfig;
use sgl_classifier_rs::handler::RequestHandler;
use sgl_classifier_rs::oracle::{Classifier, InferenceError, OracleState, ProbabilityVector};
use sgl_classifier_rs::server::AppState;
use sgl_classifier_rs::vision::InputTensor;

pub const BOUNDARY: &str = "----sglclassifierboundary";

/// Returns the same scores for every input.
pub struct FixedClassifier(pub Vec<f32>);

impl Classifier for FixedClassifier {
    fn infer(&self, _input: &InputTensor) -> Result<ProbabilityVector, InferenceError> {
        Ok(self.0.clone().into())
    }
}

/// Counts calls and checks it always receives the configured tensor shape.
pub struct CountingClassifier {
    pub calls: AtomicUsize,
    pub expected_shape: [usize; 4],
    pub probs: Vec<f32>,
}

impl CountingClassifier {
    pub fn new(expected_shape: [usize; 4], probs: Vec<f32>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            expected_shape,
            probs,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Classifier for CountingClassifier {
    fn infer(&self, input: &InputTensor) -> Result<ProbabilityVector, InferenceError> {
        assert_eq!(input.shape(), self.expected_shape);
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.probs.clone().into())
    }
}

/// Empties the upload directory during inference, so the request's own
/// cleanup finds nothing left to delete.
pub struct SweepingClassifier {
    pub upload_dir: PathBuf,
    pub probs: Vec<f32>,
}

impl Classifier for SweepingClassifier {
    fn infer(&self, _input: &InputTensor) -> Result<ProbabilityVector, InferenceError> {
        for entry in std::fs::read_dir(&self.upload_dir).unwrap() {
            std::fs::remove_file(entry.unwrap().path()).unwrap();
        }
        Ok(self.probs.clone().into())
    }
}

pub fn encode(width: u32, height: u32, color: [u8; 3], format: ImageFormat) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)))
        .write_to(&mut out, format)
        .unwrap();
    out.into_inner()
}

pub fn png_bytes() -> Vec<u8> {
    encode(40, 30, [180, 90, 60], ImageFormat::Png)
}

pub fn jpeg_bytes() -> Vec<u8> {
    encode(64, 48, [200, 120, 100], ImageFormat::Jpeg)
}

/// A JPEG cut off right after its header: recognisable, but not decodable.
pub fn corrupted_jpeg_bytes() -> Vec<u8> {
    let mut bytes = jpeg_bytes();
    bytes.truncate(20);
    bytes
}

/// Body of a `multipart/form-data` request with a single file field.
pub fn multipart_body(field: &str, filename: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field, filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={}", BOUNDARY)
}

pub fn test_config(upload_dir: &Path) -> ServerConfig {
    ServerConfig {
        upload_dir: upload_dir.to_path_buf(),
        ..Default::default()
    }
}

pub fn app_state(config: &ServerConfig, oracle: OracleState) -> web::Data<AppState> {
    let handler = RequestHandler::new(config, oracle).unwrap();
    web::Data::new(AppState::new(config, handler))
}

pub fn dir_is_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir).unwrap().next().is_none()
}
