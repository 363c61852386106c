//! Image loading, conversion, enhancement and saving utilities.

mod enhance;
mod load;
mod save;

pub use enhance::{enhance, EnhancementSettings};
pub use load::{decode_image, image_to_tensor, load_image};
pub use save::save_image;

use image::{GrayImage, Luma, Rgb, RgbImage};
use ndarray::Array4;

/// Image tensor in NCHW format (batch, channels, height, width).
/// Values are ImageNet-normalized for the feature models.
pub type ImageTensor = Array4<f32>;

/// Side length of the square analysis canvas fed to the feature models.
pub const ANALYSIS_SIZE: u32 = 224;

/// Number of channels in RGB images.
pub const RGB_CHANNELS: usize = 3;

/// Per-channel ImageNet mean used by the pretrained backbones.
pub const IMAGENET_MEAN: [f32; RGB_CHANNELS] = [0.485, 0.456, 0.406];

/// Per-channel ImageNet standard deviation.
pub const IMAGENET_STD: [f32; RGB_CHANNELS] = [0.229, 0.224, 0.225];

/// ITU-R 601 luma of an RGB pixel, in [0, 255].
#[inline]
#[must_use]
pub fn luma(pixel: &Rgb<u8>) -> f32 {
    let [r, g, b] = pixel.0;
    0.299_f32.mul_add(f32::from(r), 0.587_f32.mul_add(f32::from(g), 0.114 * f32::from(b)))
}

/// Convert to an 8-bit grayscale image using ITU-R 601 weights.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
#[must_use]
pub fn to_gray(image: &RgbImage) -> GrayImage {
    // Safe: luma is bounded by [0, 255]
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        Luma([luma(image.get_pixel(x, y)).round().clamp(0.0, 255.0) as u8])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_luma_weights() {
        assert!((luma(&Rgb([255, 255, 255])) - 255.0).abs() < 1e-3);
        assert!(luma(&Rgb([0, 0, 0])).abs() < 1e-6);
        assert!((luma(&Rgb([0, 255, 0])) - 149.685).abs() < 1e-3);
    }

    #[test]
    fn test_to_gray_dimensions() {
        let gray = to_gray(&RgbImage::new(7, 3));
        assert_eq!(gray.dimensions(), (7, 3));
    }
}
