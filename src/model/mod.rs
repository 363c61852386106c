//! Model collaborators: ONNX sessions, feature extraction, activations and
//! the labeled reference table.

mod activation;
mod extractor;
mod loader;
mod reference;

pub use activation::{ActivationModel, LinearHead, OnnxCamModel};
pub use extractor::{Embedding, FeatureExtractor, OnnxFeatureExtractor};
pub use loader::{load_session, ModelKind, ModelPaths};
pub use reference::ReferenceTable;

use ndarray::{ArrayD, IxDyn};

use crate::error::{Error, Result};

/// Extract a dynamically shaped `f32` array from an ONNX value.
#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
pub(crate) fn extract_array(value: &ort::value::ValueRef<'_>) -> Result<ArrayD<f32>> {
    let (shape_info, data) = value
        .try_extract_tensor::<f32>()
        .map_err(|source| Error::Inference { source })?;

    // Safe: tensor dimensions are always non-negative and within bounds
    let dims: Vec<usize> = shape_info.iter().map(|&x| x as usize).collect();

    ArrayD::from_shape_vec(IxDyn(&dims), data.to_vec()).map_err(|_| Error::ShapeMismatch {
        expected: format!("{dims:?}"),
        actual: "reshape failed".to_string(),
    })
}
