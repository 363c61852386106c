//! Custom error types for leafguard.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the leafguard library.
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to load an image file.
    #[error("failed to load image from {path}: {source}")]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Failed to decode an in-memory image buffer.
    #[error("failed to decode image: {source}")]
    ImageDecode {
        #[source]
        source: image::ImageError,
    },

    /// Failed to save an image file.
    #[error("failed to save image to {path}: {source}")]
    ImageSave {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Failed to load an ONNX model.
    #[error("failed to load ONNX model {name}: {source}")]
    ModelLoad {
        name: String,
        #[source]
        source: ort::Error,
    },

    /// Model inference failed.
    #[error("model inference failed: {source}")]
    Inference {
        #[source]
        source: ort::Error,
    },

    /// The reference table is missing, empty or malformed.
    #[error("invalid reference table: {reason}")]
    ReferenceTable { reason: String },

    /// The pipeline was wired with an unusable model, layer or table.
    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    /// Invalid parameter value.
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    /// Failed to read or write JSON artifacts.
    #[error("failed to parse {path}: {source}")]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Shape mismatch in tensor operations.
    #[error("tensor shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },
}

impl Error {
    pub(crate) fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Whether the error stems from the caller's input rather than setup.
    #[must_use]
    pub const fn is_input_error(&self) -> bool {
        matches!(self, Self::ImageLoad { .. } | Self::ImageDecode { .. })
    }
}

/// Result type alias for leafguard operations.
pub type Result<T> = std::result::Result<T, Error>;
