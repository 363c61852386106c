//! Layer activations and score gradients for class-activation mapping.

use std::path::Path;

use ndarray::{Array1, Array2, Array3, ArrayD, Axis, Ix4};
use ort::session::Session;
use ort::value::Tensor;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::image::ImageTensor;

use super::extract_array;
use super::loader::{load_session, ModelKind};

/// A classifier that can expose one intermediate layer to the attribution engine.
///
/// The contract is two explicit calls rather than registered hooks: one
/// forward pass capturing activations and one backward pass returning the
/// gradient of a class score with respect to those activations.
pub trait ActivationModel {
    /// Raw (pre-softmax) score for every class.
    ///
    /// # Errors
    ///
    /// Returns an error if the forward pass fails.
    fn class_scores(&mut self, image: &ImageTensor) -> Result<Array1<f32>>;

    /// Activations of `layer` as a `(channels, height, width)` tensor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the layer does not exist.
    fn forward_with_activations(&mut self, image: &ImageTensor, layer: &str) -> Result<Array3<f32>>;

    /// Gradient of the score of `class_index` with respect to `layer`'s activations.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if there is no gradient path from the
    /// class score to the layer.
    fn backward_score_gradient(
        &mut self,
        image: &ImageTensor,
        layer: &str,
        class_index: usize,
    ) -> Result<Array3<f32>>;

    /// Output index of a class label, when the model knows its labels.
    fn class_index(&self, _label: &str) -> Option<usize> {
        None
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct HeadFile {
    weights: Vec<Vec<f32>>,
    bias: Vec<f32>,
    labels: Vec<String>,
}

/// Global-average-pool followed by a dense layer: `s = W * mean_hw(A) + b`.
///
/// For this head the score gradient is exact and independent of the
/// activations: `dS_c / dA[k, i, j] = W[c, k] / (h * w)`.
#[derive(Debug, Clone)]
pub struct LinearHead {
    weights: Array2<f32>,
    bias: Array1<f32>,
    labels: Vec<String>,
}

impl LinearHead {
    /// Build a head from a `(classes, channels)` weight matrix.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if shapes disagree or are empty.
    pub fn new(weights: Array2<f32>, bias: Array1<f32>, labels: Vec<String>) -> Result<Self> {
        let (classes, channels) = weights.dim();
        if classes == 0 || channels == 0 {
            return Err(Error::configuration(format!(
                "linear head needs at least one class and one channel, got {classes}x{channels}"
            )));
        }
        if bias.len() != classes {
            return Err(Error::configuration(format!(
                "linear head has {classes} classes but {} biases",
                bias.len()
            )));
        }
        if !labels.is_empty() && labels.len() != classes {
            return Err(Error::configuration(format!(
                "linear head has {classes} classes but {} labels",
                labels.len()
            )));
        }

        Ok(Self {
            weights,
            bias,
            labels,
        })
    }

    /// Load head weights from a JSON file of the form
    /// `{"weights": [[..]], "bias": [..], "labels": [..]}`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let file: HeadFile = serde_json::from_str(&text).map_err(|source| Error::Serialization {
            path: path.to_path_buf(),
            source,
        })?;

        let classes = file.weights.len();
        let channels = file.weights.first().map_or(0, Vec::len);
        if file.weights.iter().any(|row| row.len() != channels) {
            return Err(Error::configuration(format!(
                "ragged weight rows in {}",
                path.display()
            )));
        }
        let flat: Vec<f32> = file.weights.into_iter().flatten().collect();
        let weights = Array2::from_shape_vec((classes, channels), flat).map_err(|_| {
            Error::ShapeMismatch {
                expected: format!("({classes}, {channels})"),
                actual: "reshape failed".to_string(),
            }
        })?;

        Self::new(weights, Array1::from(file.bias), file.labels)
    }

    #[must_use]
    pub fn num_classes(&self) -> usize {
        self.weights.nrows()
    }

    #[must_use]
    pub fn channels(&self) -> usize {
        self.weights.ncols()
    }

    #[must_use]
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    #[must_use]
    pub fn class_index(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }

    /// Class scores for a `(channels, h, w)` feature map.
    ///
    /// # Errors
    ///
    /// Returns an error on channel mismatch or an empty spatial extent.
    pub fn scores(&self, activations: &Array3<f32>) -> Result<Array1<f32>> {
        self.check_channels(activations.dim().0)?;

        let pooled = activations
            .mean_axis(Axis(2))
            .and_then(|rows| rows.mean_axis(Axis(1)))
            .ok_or_else(|| Error::configuration("feature map has no spatial extent"))?;

        Ok(self.weights.dot(&pooled) + &self.bias)
    }

    /// Gradient of class `class_index`'s score for a feature map of shape `dim`.
    ///
    /// # Errors
    ///
    /// Returns an error on channel mismatch, empty spatial extent or an
    /// unknown class.
    #[allow(clippy::cast_precision_loss)]
    pub fn gradient(&self, dim: (usize, usize, usize), class_index: usize) -> Result<Array3<f32>> {
        let (channels, height, width) = dim;
        self.check_channels(channels)?;

        if class_index >= self.num_classes() {
            return Err(Error::configuration(format!(
                "no gradient path to class {class_index}: head has {} classes",
                self.num_classes()
            )));
        }
        if height == 0 || width == 0 {
            return Err(Error::configuration("feature map has no spatial extent"));
        }

        let area = (height * width) as f32;
        let row = self.weights.row(class_index);
        Ok(Array3::from_shape_fn(dim, |(k, _, _)| row[k] / area))
    }

    fn check_channels(&self, channels: usize) -> Result<()> {
        if channels == self.channels() {
            Ok(())
        } else {
            Err(Error::ShapeMismatch {
                expected: format!("{} channels", self.channels()),
                actual: format!("{channels} channels"),
            })
        }
    }
}

/// Most recent backbone output, keyed by layer and input tensor.
///
/// Scoring, the forward pass and the backward pass of one explanation all
/// need the same feature map; the cache lets them share one backbone run.
#[derive(Debug, Default)]
struct FeatureMapCache {
    entry: Option<(String, ImageTensor, Array3<f32>)>,
}

impl FeatureMapCache {
    fn get(&self, layer: &str, image: &ImageTensor) -> Option<&Array3<f32>> {
        self.entry
            .as_ref()
            .filter(|(cached_layer, input, _)| cached_layer == layer && input == image)
            .map(|(_, _, activations)| activations)
    }

    fn store(&mut self, layer: &str, image: &ImageTensor, activations: Array3<f32>) {
        self.entry = Some((layer.to_string(), image.clone(), activations));
    }
}

/// ONNX backbone exposing a named feature map, topped with a [`LinearHead`].
pub struct OnnxCamModel {
    session: Session,
    head: LinearHead,
    head_layer: String,
    cache: FeatureMapCache,
}

impl OnnxCamModel {
    /// Wrap a loaded backbone whose output `head_layer` feeds `head`.
    #[must_use]
    pub fn new(session: Session, head: LinearHead, head_layer: impl Into<String>) -> Self {
        Self {
            session,
            head,
            head_layer: head_layer.into(),
            cache: FeatureMapCache::default(),
        }
    }

    /// Load the backbone ONNX model and the head weights.
    ///
    /// # Errors
    ///
    /// Returns an error if either artifact is missing or invalid, or if the
    /// backbone has no output named `head_layer`.
    pub fn load(backbone: &Path, head: &Path, head_layer: &str) -> Result<Self> {
        let session = load_session(backbone, ModelKind::AttributionBackbone)?;
        let head = LinearHead::load(head)?;
        let model = Self::new(session, head, head_layer);
        model.check_layer(head_layer)?;
        Ok(model)
    }

    #[must_use]
    pub const fn head(&self) -> &LinearHead {
        &self.head
    }

    fn check_layer(&self, layer: &str) -> Result<()> {
        if self.session.outputs.iter().any(|output| output.name == layer) {
            return Ok(());
        }
        let available: Vec<&str> = self
            .session
            .outputs
            .iter()
            .map(|output| output.name.as_str())
            .collect();
        Err(Error::configuration(format!(
            "backbone has no layer output '{layer}' (available: {})",
            available.join(", ")
        )))
    }

    fn feature_map(&mut self, image: &ImageTensor, layer: &str) -> Result<Array3<f32>> {
        self.check_layer(layer)?;

        if let Some(activations) = self.cache.get(layer, image) {
            tracing::debug!("Reusing cached '{layer}' feature map");
            return Ok(activations.clone());
        }

        let input_value =
            Tensor::from_array(image.clone()).map_err(|source| Error::Inference { source })?;

        let outputs = self
            .session
            .run(ort::inputs![input_value])
            .map_err(|source| Error::Inference { source })?;

        let (_, output) = outputs
            .iter()
            .find(|(name, _)| *name == layer)
            .ok_or_else(|| Error::ShapeMismatch {
                expected: format!("output '{layer}'"),
                actual: "no output".to_string(),
            })?;

        let activations = first_in_batch(extract_array(&output)?)?;
        self.cache.store(layer, image, activations.clone());
        Ok(activations)
    }
}

impl ActivationModel for OnnxCamModel {
    fn class_scores(&mut self, image: &ImageTensor) -> Result<Array1<f32>> {
        let layer = self.head_layer.clone();
        let activations = self.feature_map(image, &layer)?;
        self.head.scores(&activations)
    }

    fn forward_with_activations(&mut self, image: &ImageTensor, layer: &str) -> Result<Array3<f32>> {
        self.feature_map(image, layer)
    }

    fn backward_score_gradient(
        &mut self,
        image: &ImageTensor,
        layer: &str,
        class_index: usize,
    ) -> Result<Array3<f32>> {
        if layer != self.head_layer {
            return Err(Error::configuration(format!(
                "no gradient path from the head to '{layer}': head is attached to '{}'",
                self.head_layer
            )));
        }
        let activations = self.feature_map(image, layer)?;
        self.head.gradient(activations.dim(), class_index)
    }

    fn class_index(&self, label: &str) -> Option<usize> {
        self.head.class_index(label)
    }
}

/// Drop the batch axis of a `(1, C, H, W)` feature map.
fn first_in_batch(array: ArrayD<f32>) -> Result<Array3<f32>> {
    let shape = array.shape().to_vec();
    let array = array
        .into_dimensionality::<Ix4>()
        .map_err(|_| Error::ShapeMismatch {
            expected: "(1, channels, height, width)".to_string(),
            actual: format!("{shape:?}"),
        })?;

    if array.dim().0 != 1 {
        return Err(Error::ShapeMismatch {
            expected: "batch of 1".to_string(),
            actual: format!("batch of {}", array.dim().0),
        });
    }

    Ok(array.index_axis_move(Axis(0), 0))
}
