//! Gradient-weighted class activation mapping (Grad-CAM).
//!
//! The map is computed on the model's target layer, upsampled to the
//! analysis image and rendered as a jet overlay. All rendering happens in RGB
//! order; the analysis image and the false-color map are never mixed across
//! channel orders.

use image::{Rgb, RgbImage};
use ndarray::{Array2, Array3, Axis};

use crate::error::{Error, Result};
use crate::image::image_to_tensor;
use crate::model::ActivationModel;

/// Guards min-max normalization of a flat map.
const NORM_EPSILON: f32 = 1e-8;

/// Per-pixel class evidence in [0, 1], shaped `(height, width)`.
pub type AttributionMap = Array2<f32>;

/// Result of explaining one prediction.
#[derive(Debug, Clone)]
pub struct Explanation {
    /// Normalized attribution at the analysis image's resolution.
    pub map: AttributionMap,
    /// Jet rendering of `map` blended over the analysis image.
    pub heatmap: RgbImage,
    /// Class whose score was explained.
    pub class_index: usize,
}

/// Explain `class_index` (or the model's top class) for an analysis image.
///
/// # Errors
///
/// Returns [`Error::Configuration`] if the layer is unusable or the class has
/// no gradient path, and [`Error::ShapeMismatch`] if activations and
/// gradients disagree.
pub fn explain<M: ActivationModel + ?Sized>(
    model: &mut M,
    image: &RgbImage,
    layer: &str,
    class_index: Option<usize>,
    alpha: f32,
) -> Result<Explanation> {
    let tensor = image_to_tensor(image);

    // an explicit class is bounds-checked by the backward pass
    let class_index = match class_index {
        Some(index) => index,
        None => top_class(model.class_scores(&tensor)?.iter().copied())
            .ok_or_else(|| Error::configuration("model produced no class scores"))?,
    };

    let activations = model.forward_with_activations(&tensor, layer)?;
    let gradients = model.backward_score_gradient(&tensor, layer, class_index)?;

    let cam = grad_cam(&activations, &gradients)?;
    let map = upsample_bilinear(&cam, image.width() as usize, image.height() as usize);
    let heatmap = render_overlay(image, &map, alpha);

    tracing::debug!(
        "Explained class {class_index} on layer '{layer}' ({}x{} map)",
        cam.ncols(),
        cam.nrows()
    );

    Ok(Explanation {
        map,
        heatmap,
        class_index,
    })
}

/// Index of the largest score; the first one wins ties.
fn top_class(scores: impl Iterator<Item = f32>) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (index, score) in scores.enumerate() {
        if best.map_or(true, |(_, top)| score > top) {
            best = Some((index, score));
        }
    }
    best.map(|(index, _)| index)
}

/// Channel weights from pooled gradients, weighted sum, ReLU, min-max to [0, 1].
///
/// # Errors
///
/// Returns an error if the tensors are empty or differ in shape.
pub fn grad_cam(activations: &Array3<f32>, gradients: &Array3<f32>) -> Result<Array2<f32>> {
    let (channels, height, width) = activations.dim();
    if channels == 0 {
        return Err(Error::configuration("target layer has zero channels"));
    }
    if height == 0 || width == 0 {
        return Err(Error::configuration("target layer has no spatial extent"));
    }
    if gradients.dim() != activations.dim() {
        return Err(Error::ShapeMismatch {
            expected: format!("gradients shaped {:?}", activations.dim()),
            actual: format!("{:?}", gradients.dim()),
        });
    }

    let weights = gradients
        .mean_axis(Axis(2))
        .and_then(|rows| rows.mean_axis(Axis(1)))
        .ok_or_else(|| Error::configuration("target layer has no spatial extent"))?;

    let mut cam = Array2::<f32>::zeros((height, width));
    for (weight, channel) in weights.iter().zip(activations.outer_iter()) {
        cam.scaled_add(*weight, &channel);
    }

    cam.mapv_inplace(|v| if v.is_finite() { v.max(0.0) } else { 0.0 });

    let min = cam.iter().copied().fold(f32::INFINITY, f32::min);
    cam.mapv_inplace(|v| v - min);
    let max = cam.iter().copied().fold(0.0, f32::max);
    cam.mapv_inplace(|v| v / (max + NORM_EPSILON));

    Ok(cam)
}

/// Bilinear resize of a scalar field using half-pixel centers.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
#[must_use]
pub fn upsample_bilinear(field: &Array2<f32>, width: usize, height: usize) -> Array2<f32> {
    let (src_height, src_width) = field.dim();
    if src_height == 0 || src_width == 0 {
        return Array2::zeros((height, width));
    }

    let scale_x = src_width as f32 / width.max(1) as f32;
    let scale_y = src_height as f32 / height.max(1) as f32;

    // Safe: sample coordinates are clamped to the source grid before casting
    let axis = |dst: usize, scale: f32, len: usize| {
        let src = ((dst as f32 + 0.5).mul_add(scale, -0.5)).clamp(0.0, (len - 1) as f32);
        let i0 = src.floor() as usize;
        let i1 = (i0 + 1).min(len - 1);
        (i0, i1, src - i0 as f32)
    };

    Array2::from_shape_fn((height, width), |(y, x)| {
        let (y0, y1, dy) = axis(y, scale_y, src_height);
        let (x0, x1, dx) = axis(x, scale_x, src_width);
        let top = field[[y0, x0]].mul_add(1.0 - dx, field[[y0, x1]] * dx);
        let bottom = field[[y1, x0]].mul_add(1.0 - dx, field[[y1, x1]] * dx);
        top.mul_add(1.0 - dy, bottom * dy)
    })
}

/// Jet palette: dark blue through cyan, yellow and red.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
#[must_use]
pub fn jet(value: f32) -> Rgb<u8> {
    let v = value.clamp(0.0, 1.0);
    let channel = |center: f32| {
        let intensity = (1.5 - 4.0_f32.mul_add(v, -center).abs()).clamp(0.0, 1.0);
        // Safe: intensity is in [0, 1]
        (intensity * 255.0).round() as u8
    };
    Rgb([channel(3.0), channel(2.0), channel(1.0)])
}

/// Blend the jet rendering of `map` over `image` with weight `alpha`.
///
/// `map` must match the image dimensions; missing cells render as zero.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
#[must_use]
pub fn render_overlay(image: &RgbImage, map: &Array2<f32>, alpha: f32) -> RgbImage {
    let alpha = alpha.clamp(0.0, 1.0);

    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let value = map.get([y as usize, x as usize]).copied().unwrap_or(0.0);
        // quantize like an 8-bit colormap lookup
        let level = f32::from((value.clamp(0.0, 1.0) * 255.0) as u8) / 255.0;
        let heat = jet(level).0;
        let base = image.get_pixel(x, y).0;
        Rgb(std::array::from_fn(|c| {
            let blended = alpha.mul_add(f32::from(heat[c]), (1.0 - alpha) * f32::from(base[c]));
            // Safe: convex combination of two bytes
            blended.round().clamp(0.0, 255.0) as u8
        }))
    })
}
