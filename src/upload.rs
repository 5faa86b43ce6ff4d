//! Upload validation and the short-lived on-disk copy of each uploaded image.

use std::{
    io,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use bytes::Bytes;
use thiserror::Error;

const MIB: u64 = 1024 * 1024;

static UPLOAD_SEQ: AtomicU64 = AtomicU64::new(0);

/// Upload and path-reference rejections. The display text is what the client sees.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("No file provided. Please select an image to upload.")]
    NoFile,
    #[error("No file selected. Please choose an image.")]
    EmptyFilename,
    #[error("Invalid file format. Allowed formats: {allowed}")]
    InvalidExtension { allowed: String },
    #[error("File too large. Maximum size is {}.", format_limit(.limit))]
    TooLarge { limit: u64 },
    #[error("Invalid image path. File does not exist.")]
    PathNotFound,
    #[error("Invalid image path. Access outside the allowed image directory is not permitted.")]
    PathOutsideRoot,
    #[error("Error saving file: {0}")]
    Save(io::Error),
    #[error("Error reading file: {0}")]
    Read(io::Error),
}

fn format_limit(limit: &u64) -> String {
    let limit = *limit;
    if limit % MIB == 0 {
        format!("{}MB", limit / MIB)
    } else {
        format!("{} bytes", limit)
    }
}

/// Rules applied to every incoming image before it is decoded.
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    allowed_extensions: Vec<String>,
    max_bytes: u64,
    upload_dir: PathBuf,
    allowed_image_root: Option<PathBuf>,
}

impl UploadPolicy {
    pub fn new(
        allowed_extensions: &[String],
        max_bytes: u64,
        upload_dir: impl Into<PathBuf>,
        allowed_image_root: Option<PathBuf>,
    ) -> Self {
        Self {
            allowed_extensions: allowed_extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            max_bytes,
            upload_dir: upload_dir.into(),
            allowed_image_root,
        }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Reject empty filenames and anything whose extension is not allow-listed.
    pub fn check_filename(&self, filename: &str) -> Result<(), UploadError> {
        if filename.trim().is_empty() {
            return Err(UploadError::EmptyFilename);
        }
        let allowed = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .is_some_and(|ext| self.allowed_extensions.contains(&ext));
        if allowed {
            Ok(())
        } else {
            Err(UploadError::InvalidExtension {
                allowed: self.allowed_extensions.join(", "),
            })
        }
    }

    pub fn check_size(&self, len: u64) -> Result<(), UploadError> {
        if len > self.max_bytes {
            return Err(UploadError::TooLarge {
                limit: self.max_bytes,
            });
        }
        Ok(())
    }

    /// Write an accepted upload under the upload directory with a unique,
    /// sanitised name.
    pub async fn persist(&self, filename: &str, bytes: &[u8]) -> Result<TempUpload, UploadError> {
        let name = format!(
            "{}_{}_{}",
            chrono::Local::now().format("%Y%m%d_%H%M%S%6f"),
            UPLOAD_SEQ.fetch_add(1, Ordering::Relaxed),
            sanitize_filename(filename)
        );
        let path = self.upload_dir.join(name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(UploadError::Save)?;
        log::debug!("Saved upload to {}", path.display());
        Ok(TempUpload { path })
    }

    /// Resolve a server-side image reference. The file must exist, fit the size
    /// limit and, when a root is configured, live under it.
    pub async fn resolve_path(&self, raw: &str) -> Result<PathBuf, UploadError> {
        if raw.trim().is_empty() {
            return Err(UploadError::PathNotFound);
        }
        let canonical = tokio::fs::canonicalize(raw)
            .await
            .map_err(|_| UploadError::PathNotFound)?;

        if let Some(root) = &self.allowed_image_root {
            let root = tokio::fs::canonicalize(root)
                .await
                .map_err(|_| UploadError::PathOutsideRoot)?;
            if !canonical.starts_with(&root) {
                return Err(UploadError::PathOutsideRoot);
            }
        }

        let metadata = tokio::fs::metadata(&canonical)
            .await
            .map_err(|_| UploadError::PathNotFound)?;
        if !metadata.is_file() {
            return Err(UploadError::PathNotFound);
        }
        self.check_size(metadata.len())?;
        Ok(canonical)
    }
}

/// An uploaded image persisted for the duration of one request.
#[derive(Debug)]
pub struct TempUpload {
    path: PathBuf,
}

impl TempUpload {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back the saved copy; decoding always works from the file on disk.
    pub async fn read(&self) -> Result<Bytes, UploadError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(UploadError::Read)?;
        Ok(Bytes::from(bytes))
    }

    /// Delete the file. Failures are logged and otherwise ignored.
    pub async fn discard(self) {
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            log::warn!(
                "Could not delete temporary file {}: {}",
                self.path.display(),
                e
            );
        }
    }
}

/// Reduce a client-supplied filename to a safe single path component made of
/// ASCII letters, digits, `_`, `-` and `.`.
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    let cleaned: String = base
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '.' || c == '_');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}
