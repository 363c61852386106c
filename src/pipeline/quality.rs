//! Advisory image quality assessment.

use std::path::Path;

use image::RgbImage;
use imageproc::filter::laplacian_filter;
use serde::Serialize;

use crate::error::Result;
use crate::image::{load_image, to_gray};

const SHARPNESS_FULL: f64 = 100.0;
const BRIGHTNESS_TARGET: f64 = 128.0;
const CONTRAST_FULL: f64 = 50.0;
const RESOLUTION_FULL: f64 = 1_000_000.0;

const SHARPNESS_POINTS: f64 = 30.0;
const BRIGHTNESS_POINTS: f64 = 25.0;
const CONTRAST_POINTS: f64 = 25.0;
const RESOLUTION_POINTS: f64 = 20.0;

const BLURRY_BELOW: f64 = 50.0;
const DARK_BELOW: f64 = 80.0;
const BRIGHT_ABOVE: f64 = 180.0;
const LOW_CONTRAST_BELOW: f64 = 30.0;
const LOW_RESOLUTION_BELOW: u64 = 500_000;

pub const MSG_BLURRY: &str = "Image is blurry - try taking a clearer photo";
pub const MSG_TOO_DARK: &str = "Image is too dark - improve lighting";
pub const MSG_TOO_BRIGHT: &str = "Image is too bright - reduce lighting";
pub const MSG_LOW_CONTRAST: &str = "Low contrast - try different lighting conditions";
pub const MSG_LOW_RESOLUTION: &str = "Low resolution - use a higher quality camera";
pub const MSG_GOOD: &str = "Image quality is good for analysis";

/// Quality metrics, composite score and user-facing advice for one image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    /// Variance of the Laplacian of the grayscale image.
    pub sharpness: f64,
    /// Mean grayscale intensity in [0, 255].
    pub brightness: f64,
    /// Standard deviation of grayscale intensity.
    pub contrast: f64,
    pub pixel_count: u64,
    pub width: u32,
    pub height: u32,
    /// Composite score in [0, 100].
    pub quality_score: f64,
    /// Never empty. Ordered sharpness, brightness, contrast, resolution.
    pub recommendations: Vec<String>,
}

/// Load an image from disk and assess it.
///
/// # Errors
///
/// Returns an input error if the file cannot be read or decoded.
pub fn assess_path<P: AsRef<Path>>(path: P) -> Result<QualityReport> {
    let image = load_image(path)?;
    Ok(assess(&image))
}

/// Measure sharpness, brightness, contrast and resolution of an image.
#[must_use]
pub fn assess(image: &RgbImage) -> QualityReport {
    let (width, height) = image.dimensions();
    let pixel_count = u64::from(width) * u64::from(height);

    let gray = to_gray(image);
    let intensities: Vec<f64> = gray.pixels().map(|p| f64::from(p[0])).collect();
    let (brightness, variance) = mean_variance(&intensities);
    let contrast = variance.sqrt();

    let sharpness = if pixel_count == 0 {
        0.0
    } else {
        let laplacian = laplacian_filter(&gray);
        let responses: Vec<f64> = laplacian.pixels().map(|p| f64::from(p[0])).collect();
        mean_variance(&responses).1
    };

    let quality_score = quality_score(sharpness, brightness, contrast, pixel_count);
    let recommendations = recommendations(sharpness, brightness, contrast, pixel_count);

    tracing::debug!(
        "Quality: sharpness={sharpness:.2} brightness={brightness:.2} contrast={contrast:.2} score={quality_score}"
    );

    QualityReport {
        sharpness: round_to(sharpness, 2),
        brightness: round_to(brightness, 2),
        contrast: round_to(contrast, 2),
        pixel_count,
        width,
        height,
        quality_score,
        recommendations,
    }
}

/// Sum of four independently capped sub-scores, rounded to one decimal.
#[allow(clippy::cast_precision_loss)]
fn quality_score(sharpness: f64, brightness: f64, contrast: f64, pixel_count: u64) -> f64 {
    let sharpness_score = (sharpness / SHARPNESS_FULL).min(1.0) * SHARPNESS_POINTS;
    let brightness_score =
        (1.0 - (brightness - BRIGHTNESS_TARGET).abs() / BRIGHTNESS_TARGET).max(0.0) * BRIGHTNESS_POINTS;
    let contrast_score = (contrast / CONTRAST_FULL).min(1.0) * CONTRAST_POINTS;
    let resolution_score = (pixel_count as f64 / RESOLUTION_FULL).min(1.0) * RESOLUTION_POINTS;

    let total = sharpness_score + brightness_score + contrast_score + resolution_score;
    round_to(total.clamp(0.0, 100.0), 1)
}

fn recommendations(sharpness: f64, brightness: f64, contrast: f64, pixel_count: u64) -> Vec<String> {
    let mut advice = Vec::new();

    if sharpness < BLURRY_BELOW {
        advice.push(MSG_BLURRY);
    }

    if brightness < DARK_BELOW {
        advice.push(MSG_TOO_DARK);
    } else if brightness > BRIGHT_ABOVE {
        advice.push(MSG_TOO_BRIGHT);
    }

    if contrast < LOW_CONTRAST_BELOW {
        advice.push(MSG_LOW_CONTRAST);
    }

    if pixel_count < LOW_RESOLUTION_BELOW {
        advice.push(MSG_LOW_RESOLUTION);
    }

    if advice.is_empty() {
        advice.push(MSG_GOOD);
    }

    advice.into_iter().map(String::from).collect()
}

/// Population mean and variance; zero for an empty sequence.
#[allow(clippy::cast_precision_loss)]
fn mean_variance(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let count = values.len() as f64;
    let mean = values.iter().sum::<f64>() / count;
    let squares: f64 = values.iter().map(|v| (v - mean) * (v - mean)).sum();
    (mean, squares / count)
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}
