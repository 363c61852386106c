//! Image embedding extraction.

use std::path::Path;

use ndarray::{Array1, ArrayD, Axis, Ix2, Ix3};
use ort::session::Session;
use ort::value::Tensor;

use crate::error::{Error, Result};
use crate::image::ImageTensor;

use super::extract_array;
use super::loader::{load_session, ModelKind};

/// Fixed-length image signature produced by a feature model.
pub type Embedding = Array1<f32>;

/// Maps a normalized image tensor to an embedding.
///
/// Implemented for closures so tests and offline tools can plug in any
/// embedding function.
pub trait FeatureExtractor {
    /// Embed a single NCHW image tensor.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying model fails.
    fn extract(&mut self, image: &ImageTensor) -> Result<Embedding>;
}

impl<F> FeatureExtractor for F
where
    F: FnMut(&ImageTensor) -> Result<Embedding>,
{
    fn extract(&mut self, image: &ImageTensor) -> Result<Embedding> {
        self(image)
    }
}

/// Embedding model backed by an ONNX transformer or CNN.
///
/// A `(1, tokens, dim)` hidden state is mean-pooled over tokens; a `(1, dim)`
/// output is used as-is.
pub struct OnnxFeatureExtractor {
    session: Session,
}

impl OnnxFeatureExtractor {
    #[must_use]
    pub const fn new(session: Session) -> Self {
        Self { session }
    }

    /// Load the ONNX model at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the model is missing or cannot be loaded.
    pub fn load(path: &Path) -> Result<Self> {
        load_session(path, ModelKind::FeatureExtractor).map(Self::new)
    }
}

impl FeatureExtractor for OnnxFeatureExtractor {
    fn extract(&mut self, image: &ImageTensor) -> Result<Embedding> {
        let input_value =
            Tensor::from_array(image.clone()).map_err(|source| Error::Inference { source })?;

        let outputs = self
            .session
            .run(ort::inputs![input_value])
            .map_err(|source| Error::Inference { source })?;

        let output = outputs
            .values()
            .next()
            .ok_or_else(|| Error::ShapeMismatch {
                expected: "hidden state output".to_string(),
                actual: "no output".to_string(),
            })?;

        pool_hidden_state(extract_array(&output)?)
    }
}

/// Reduce a batch-of-one model output to a single embedding vector.
fn pool_hidden_state(hidden: ArrayD<f32>) -> Result<Embedding> {
    let shape = hidden.shape().to_vec();
    let mismatch = || Error::ShapeMismatch {
        expected: "(1, tokens, dim) or (1, dim)".to_string(),
        actual: format!("{shape:?}"),
    };

    if shape.first() != Some(&1) || shape.iter().any(|&d| d == 0) {
        return Err(mismatch());
    }

    match shape.len() {
        3 => {
            let hidden = hidden.into_dimensionality::<Ix3>().map_err(|_| mismatch())?;
            hidden
                .index_axis(Axis(0), 0)
                .mean_axis(Axis(0))
                .ok_or_else(mismatch)
        }
        2 => {
            let hidden = hidden.into_dimensionality::<Ix2>().map_err(|_| mismatch())?;
            Ok(hidden.row(0).to_owned())
        }
        _ => Err(mismatch()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array4, IxDyn};

    #[test]
    fn test_pool_token_sequence() {
        let hidden = ArrayD::from_shape_vec(IxDyn(&[1, 2, 3]), vec![1.0, 2.0, 3.0, 3.0, 4.0, 5.0])
            .unwrap();
        assert_eq!(pool_hidden_state(hidden).unwrap(), array![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_pool_pooled_output() {
        let hidden = ArrayD::from_shape_vec(IxDyn(&[1, 4]), vec![0.5, 1.5, 2.5, 3.5]).unwrap();
        assert_eq!(pool_hidden_state(hidden).unwrap(), array![0.5, 1.5, 2.5, 3.5]);
    }

    #[test]
    fn test_pool_rejects_batches_and_odd_ranks() {
        let batch = ArrayD::<f32>::zeros(IxDyn(&[2, 4]));
        assert!(matches!(pool_hidden_state(batch), Err(Error::ShapeMismatch { .. })));

        let rank4 = ArrayD::<f32>::zeros(IxDyn(&[1, 2, 2, 2]));
        assert!(matches!(pool_hidden_state(rank4), Err(Error::ShapeMismatch { .. })));

        let no_tokens = ArrayD::<f32>::zeros(IxDyn(&[1, 0, 8]));
        assert!(matches!(pool_hidden_state(no_tokens), Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn test_closure_extractor() {
        let mut extractor = |image: &ImageTensor| -> Result<Embedding> { Ok(array![image.sum()]) };
        let image = Array4::<f32>::ones((1, 3, 2, 2));
        assert_eq!(extractor.extract(&image).unwrap(), array![12.0]);
    }
}
