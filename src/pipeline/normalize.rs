//! Leaf-focused normalization: enhance, auto-crop, letterbox.

use image::{imageops, imageops::FilterType, Rgb, RgbImage};

use crate::image::{enhance, EnhancementSettings};

use super::segment::{clean_mask, largest_contour_bbox, leaf_mask, BoundingBox, LeafMaskSettings};
use super::Config;

/// Canvas color behind letterboxed images.
const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);

/// Output of [`Normalizer::normalize_detailed`].
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    /// Square analysis image of exactly the configured target size.
    pub image: RgbImage,
    /// Crop applied in the enhanced image's coordinates, if a leaf was found.
    pub crop: Option<BoundingBox>,
}

/// Turns arbitrary photographs into fixed-size, leaf-centered analysis images.
#[derive(Debug, Clone)]
pub struct Normalizer {
    target_size: u32,
    crop_padding: u32,
    enhancement: EnhancementSettings,
    leaf_mask: LeafMaskSettings,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

impl Normalizer {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            target_size: config.target_size,
            crop_padding: config.crop_padding,
            enhancement: config.enhancement,
            leaf_mask: config.leaf_mask,
        }
    }

    /// Side length of the produced square image.
    #[must_use]
    pub const fn target_size(&self) -> u32 {
        self.target_size
    }

    /// Normalize an image. Never fails; see [`Self::normalize_detailed`].
    #[must_use]
    pub fn normalize(&self, image: &RgbImage) -> RgbImage {
        self.normalize_detailed(image).image
    }

    /// Enhance, crop to the dominant leaf and letterbox onto the target canvas.
    ///
    /// When no leaf region is found the enhanced image is letterboxed as-is.
    #[must_use]
    pub fn normalize_detailed(&self, image: &RgbImage) -> NormalizedImage {
        let enhanced = enhance(image, &self.enhancement);

        let crop = self.leaf_crop(&enhanced);
        let focused = match crop {
            Some(bbox) => {
                imageops::crop_imm(&enhanced, bbox.x, bbox.y, bbox.width, bbox.height).to_image()
            }
            None => enhanced,
        };

        NormalizedImage {
            image: letterbox(&focused, self.target_size),
            crop,
        }
    }

    /// Padded bounding box of the dominant leaf region, if there is one.
    #[must_use]
    pub fn leaf_crop(&self, image: &RgbImage) -> Option<BoundingBox> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            tracing::warn!("Auto-crop skipped: empty image");
            return None;
        }

        let mask = leaf_mask(image, &self.leaf_mask);
        let mask = clean_mask(&mask, self.leaf_mask.morph_radius);

        let Some(bbox) = largest_contour_bbox(&mask) else {
            tracing::warn!("Auto-crop found no leaf-colored region, keeping full frame");
            return None;
        };

        let padded = bbox.padded(self.crop_padding, width, height);
        if padded.is_empty() {
            tracing::warn!("Auto-crop produced a degenerate box {padded:?}, keeping full frame");
            return None;
        }

        tracing::debug!("Leaf bounding box {bbox:?}, cropping to {padded:?}");
        Some(padded)
    }
}

/// Shrink to fit inside `size` x `size` and paste centered on a white canvas.
#[must_use]
pub fn letterbox(image: &RgbImage, size: u32) -> RgbImage {
    let mut canvas = RgbImage::from_pixel(size, size, BACKGROUND);

    let (width, height) = image.dimensions();
    if width == 0 || height == 0 || size == 0 {
        return canvas;
    }

    let (fit_width, fit_height) = fit_within(width, height, size);
    let resized = if (fit_width, fit_height) == (width, height) {
        image.clone()
    } else {
        imageops::resize(image, fit_width, fit_height, FilterType::Lanczos3)
    };

    let x = (size - fit_width) / 2;
    let y = (size - fit_height) / 2;
    imageops::overlay(&mut canvas, &resized, i64::from(x), i64::from(y));

    canvas
}

/// Largest size with the same aspect ratio fitting in a square, never upscaled.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn fit_within(width: u32, height: u32, size: u32) -> (u32, u32) {
    if width <= size && height <= size {
        return (width, height);
    }

    let scale = (f64::from(size) / f64::from(width)).min(f64::from(size) / f64::from(height));
    // Safe: scaled dimensions are bounded by `size`
    let fit = |dim: u32| ((f64::from(dim) * scale).round() as u32).clamp(1, size);
    (fit(width), fit(height))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 800x600 gray-brown background with a green leaf block in the central 60%.
    fn leaf_scene() -> RgbImage {
        let leaf = BoundingBox {
            x: 160,
            y: 120,
            width: 480,
            height: 360,
        };
        RgbImage::from_fn(800, 600, |x, y| {
            if leaf.contains(x, y) {
                Rgb([50, 140, 40])
            } else {
                Rgb([120, 110, 100])
            }
        })
    }

    #[test]
    fn test_fit_within() {
        assert_eq!(fit_within(800, 600, 224), (224, 168));
        assert_eq!(fit_within(100, 50, 224), (100, 50));
        assert_eq!(fit_within(5000, 1, 224), (224, 1));
    }

    #[test]
    fn test_letterbox_centers_on_white() {
        let img = RgbImage::from_pixel(400, 200, Rgb([0, 0, 0]));
        let out = letterbox(&img, 224);

        assert_eq!(out.dimensions(), (224, 224));
        assert_eq!(out.get_pixel(112, 5), &BACKGROUND);
        assert_eq!(out.get_pixel(112, 112), &Rgb([0, 0, 0]));
        assert_eq!(out.get_pixel(112, 218), &BACKGROUND);
    }

    #[test]
    fn test_letterbox_does_not_upscale() {
        let img = RgbImage::from_pixel(10, 10, Rgb([0, 0, 0]));
        let out = letterbox(&img, 224);
        assert_eq!(out.get_pixel(107, 107), &Rgb([0, 0, 0]));
        assert_eq!(out.get_pixel(100, 100), &BACKGROUND);
    }

    #[test]
    fn test_leaf_scene_crops_around_leaf() {
        let normalizer = Normalizer::default();
        let result = normalizer.normalize_detailed(&leaf_scene());

        assert_eq!(result.image.dimensions(), (224, 224));
        let crop = result.crop.unwrap();
        assert_eq!(
            crop,
            BoundingBox {
                x: 140,
                y: 100,
                width: 520,
                height: 400
            }
        );
    }

    #[test]
    fn test_black_image_falls_back_to_full_frame() {
        let normalizer = Normalizer::default();
        let result = normalizer.normalize_detailed(&RgbImage::new(320, 240));

        assert!(result.crop.is_none());
        assert_eq!(result.image.dimensions(), (224, 224));
        // the full frame is letterboxed, so the top band stays white
        assert_eq!(result.image.get_pixel(0, 0), &BACKGROUND);
        assert_eq!(result.image.get_pixel(112, 112), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_output_size_for_odd_geometries() {
        let normalizer = Normalizer::default();
        for (w, h) in [(1, 1), (1, 900), (900, 1), (224, 224), (3000, 2000)] {
            let img = RgbImage::from_pixel(w, h, Rgb([60, 150, 50]));
            assert_eq!(normalizer.normalize(&img).dimensions(), (224, 224));
        }
        assert_eq!(normalizer.normalize(&RgbImage::new(0, 0)).dimensions(), (224, 224));
    }

    #[test]
    fn test_renormalizing_keeps_dimensions() {
        let normalizer = Normalizer::default();
        let once = normalizer.normalize(&leaf_scene());
        let twice = normalizer.normalize(&once);
        assert_eq!(twice.dimensions(), once.dimensions());
    }
}
