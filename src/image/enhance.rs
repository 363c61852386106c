//! Tonal enhancement: brightness, contrast, sharpness and saturation.
//!
//! Every step interpolates between a "degenerate" version of the image and the
//! image itself, with the enhancement factor as blend weight. A factor of 1.0
//! is the identity, values above 1.0 push away from the degenerate image.

use image::{Rgb, RgbImage};
use imageproc::filter::filter3x3;

use super::luma;

/// 3x3 smoothing kernel used as the degenerate image for sharpening.
const SMOOTH_KERNEL: [f32; 9] = [
    1.0 / 13.0,
    1.0 / 13.0,
    1.0 / 13.0,
    1.0 / 13.0,
    5.0 / 13.0,
    1.0 / 13.0,
    1.0 / 13.0,
    1.0 / 13.0,
    1.0 / 13.0,
];

/// Enhancement factors applied before segmentation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnhancementSettings {
    pub brightness: f32,
    pub contrast: f32,
    pub sharpness: f32,
    pub saturation: f32,
}

impl Default for EnhancementSettings {
    fn default() -> Self {
        Self {
            brightness: 1.2,
            contrast: 1.3,
            sharpness: 1.5,
            saturation: 1.1,
        }
    }
}

impl EnhancementSettings {
    /// Factors as `(name, value)` pairs, in application order.
    #[must_use]
    pub const fn factors(&self) -> [(&'static str, f32); 4] {
        [
            ("brightness", self.brightness),
            ("contrast", self.contrast),
            ("sharpness", self.sharpness),
            ("saturation", self.saturation),
        ]
    }
}

/// Apply brightness, contrast, sharpness and saturation, in that order.
///
/// Returns a new buffer; the input is left untouched.
#[must_use]
pub fn enhance(image: &RgbImage, settings: &EnhancementSettings) -> RgbImage {
    let enhanced = adjust_brightness(image, settings.brightness);
    let enhanced = adjust_contrast(&enhanced, settings.contrast);
    let enhanced = adjust_sharpness(&enhanced, settings.sharpness);
    adjust_saturation(&enhanced, settings.saturation)
}

fn adjust_brightness(image: &RgbImage, factor: f32) -> RgbImage {
    let black = RgbImage::new(image.width(), image.height());
    blend(&black, image, factor)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn adjust_contrast(image: &RgbImage, factor: f32) -> RgbImage {
    let mean = mean_luma(image).round().clamp(0.0, 255.0) as u8;
    let flat = RgbImage::from_pixel(image.width(), image.height(), Rgb([mean; 3]));
    blend(&flat, image, factor)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn adjust_sharpness(image: &RgbImage, factor: f32) -> RgbImage {
    let (width, height) = image.dimensions();
    if width < 3 || height < 3 {
        return image.clone();
    }

    let smoothed: image::ImageBuffer<Rgb<f32>, Vec<f32>> =
        filter3x3::<_, f32, f32>(image, &SMOOTH_KERNEL);

    // Border pixels keep their original values
    let degenerate = RgbImage::from_fn(width, height, |x, y| {
        if x == 0 || y == 0 || x == width - 1 || y == height - 1 {
            *image.get_pixel(x, y)
        } else {
            let Rgb(channels) = *smoothed.get_pixel(x, y);
            Rgb(channels.map(|v| v.round().clamp(0.0, 255.0) as u8))
        }
    });

    blend(&degenerate, image, factor)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn adjust_saturation(image: &RgbImage, factor: f32) -> RgbImage {
    let gray = RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let l = luma(image.get_pixel(x, y)).round().clamp(0.0, 255.0) as u8;
        Rgb([l; 3])
    });
    blend(&gray, image, factor)
}

/// `degenerate + factor * (image - degenerate)`, clamped to 8 bits.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn blend(degenerate: &RgbImage, image: &RgbImage, factor: f32) -> RgbImage {
    if (factor - 1.0).abs() < f32::EPSILON {
        return image.clone();
    }

    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let d = degenerate.get_pixel(x, y).0;
        let s = image.get_pixel(x, y).0;
        Rgb(std::array::from_fn(|c| {
            let (d, s) = (f32::from(d[c]), f32::from(s[c]));
            // Safe: clamped to [0, 255] before casting
            factor.mul_add(s - d, d).round().clamp(0.0, 255.0) as u8
        }))
    })
}

#[allow(clippy::cast_precision_loss)]
fn mean_luma(image: &RgbImage) -> f32 {
    let count = u64::from(image.width()) * u64::from(image.height());
    if count == 0 {
        return 0.0;
    }
    let total: f64 = image.pixels().map(|p| f64::from(luma(p).round())).sum();
    (total / count as f64) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_brightness_scales_channels() {
        let img = RgbImage::from_pixel(4, 4, Rgb([100, 50, 250]));
        let out = adjust_brightness(&img, 1.2);
        assert_eq!(out.get_pixel(1, 1), &Rgb([120, 60, 255]));
    }

    #[test]
    fn test_contrast_on_flat_image_is_identity() {
        let img = RgbImage::from_pixel(5, 5, Rgb([90, 90, 90]));
        assert_eq!(adjust_contrast(&img, 1.3), img);
    }

    #[test]
    fn test_contrast_spreads_values() {
        let mut img = RgbImage::from_pixel(2, 1, Rgb([100, 100, 100]));
        img.put_pixel(1, 0, Rgb([200, 200, 200]));
        let out = adjust_contrast(&img, 2.0);
        // mean luma is 150: 150 + 2 * (100 - 150) = 50 and 150 + 2 * 50 = 250
        assert_eq!(out.get_pixel(0, 0), &Rgb([50, 50, 50]));
        assert_eq!(out.get_pixel(1, 0), &Rgb([250, 250, 250]));
    }

    #[test]
    fn test_saturation_leaves_gray_alone() {
        let img = RgbImage::from_pixel(3, 3, Rgb([77, 77, 77]));
        assert_eq!(adjust_saturation(&img, 1.1), img);
    }

    #[test]
    fn test_sharpness_on_uniform_image_is_identity() {
        let img = RgbImage::from_pixel(6, 6, Rgb([30, 140, 60]));
        assert_eq!(adjust_sharpness(&img, 1.5), img);
    }

    #[test]
    fn test_sharpness_accentuates_isolated_pixel() {
        let mut img = RgbImage::from_pixel(5, 5, Rgb([100, 100, 100]));
        img.put_pixel(2, 2, Rgb([200, 200, 200]));
        let out = adjust_sharpness(&img, 2.0);
        assert!(out.get_pixel(2, 2)[0] > 200);
        assert!(out.get_pixel(1, 2)[0] < 100);
    }

    #[test]
    fn test_enhance_keeps_dimensions() {
        let img = RgbImage::from_pixel(17, 9, Rgb([10, 120, 40]));
        let out = enhance(&img, &EnhancementSettings::default());
        assert_eq!(out.dimensions(), (17, 9));
    }

    #[test]
    fn test_identity_settings() {
        let settings = EnhancementSettings {
            brightness: 1.0,
            contrast: 1.0,
            sharpness: 1.0,
            saturation: 1.0,
        };
        let mut img = RgbImage::from_pixel(6, 6, Rgb([10, 120, 40]));
        img.put_pixel(3, 3, Rgb([250, 3, 90]));
        assert_eq!(enhance(&img, &settings), img);
    }
}
