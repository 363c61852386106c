//! ONNX model loading.

use std::path::{Path, PathBuf};

use ort::session::Session;

use crate::error::{Error, Result};

/// Roles a model plays in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    /// Pretrained backbone producing image embeddings.
    FeatureExtractor,
    /// Convolutional backbone exposing the feature map explained by Grad-CAM.
    AttributionBackbone,
}

impl ModelKind {
    /// Human-readable name used in logs and errors.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::FeatureExtractor => "feature extractor",
            Self::AttributionBackbone => "attribution backbone",
        }
    }
}

/// Locations of every model artifact the diagnosis pipeline needs.
#[derive(Debug, Clone)]
pub struct ModelPaths {
    /// ONNX embedding model.
    pub feature_extractor: PathBuf,
    /// ONNX backbone whose named output is the explained feature map.
    pub attribution_backbone: PathBuf,
    /// JSON weights of the linear head on top of the backbone.
    pub attribution_head: PathBuf,
}

impl ModelPaths {
    /// Conventional artifact names inside a single model directory.
    #[must_use]
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            feature_extractor: dir.join("feature_extractor.onnx"),
            attribution_backbone: dir.join("attribution_backbone.onnx"),
            attribution_head: dir.join("attribution_head.json"),
        }
    }
}

/// Load an ONNX model session.
///
/// # Errors
///
/// Returns [`Error::Configuration`] if the file is missing and
/// [`Error::ModelLoad`] if ONNX Runtime rejects it.
pub fn load_session(path: &Path, kind: ModelKind) -> Result<Session> {
    if !path.is_file() {
        return Err(Error::configuration(format!(
            "{} model not found at {}",
            kind.name(),
            path.display()
        )));
    }

    tracing::info!("Loading {} from {}", kind.name(), path.display());

    let name = path
        .file_name()
        .map_or_else(|| kind.name().to_string(), |n| n.to_string_lossy().into_owned());

    Session::builder()
        .map_err(|source| Error::ModelLoad {
            name: name.clone(),
            source,
        })?
        .commit_from_file(path)
        .map_err(|source| Error::ModelLoad { name, source })
}
