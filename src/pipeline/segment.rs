//! Color-based leaf segmentation for the auto-crop step.

use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::distance_transform::Norm;
use imageproc::morphology::{close, open};

/// Mask value for leaf pixels.
const FOREGROUND: u8 = 255;

/// HSV band considered to be foliage.
///
/// Hue uses the 8-bit half-degree convention (0-179), so the default band
/// 35-85 covers roughly 70-170 degrees: yellow-green through green.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafMaskSettings {
    pub hue_min: u8,
    pub hue_max: u8,
    pub min_saturation: u8,
    pub min_value: u8,
    /// Radius of the square structuring element (2 gives a 5x5 square).
    pub morph_radius: u8,
}

impl Default for LeafMaskSettings {
    fn default() -> Self {
        Self {
            hue_min: 35,
            hue_max: 85,
            min_saturation: 40,
            min_value: 40,
            morph_radius: 2,
        }
    }
}

/// Axis-aligned pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Grow the box by `padding` on every side, clamped to the image bounds.
    #[must_use]
    pub fn padded(&self, padding: u32, image_width: u32, image_height: u32) -> Self {
        let x0 = self.x.saturating_sub(padding);
        let y0 = self.y.saturating_sub(padding);
        let x1 = (self.x + self.width).saturating_add(padding).min(image_width);
        let y1 = (self.y + self.height).saturating_add(padding).min(image_height);

        Self {
            x: x0,
            y: y0,
            width: x1.saturating_sub(x0),
            height: y1.saturating_sub(y0),
        }
    }

    /// Whether the point lies inside the box.
    #[must_use]
    pub const fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && y >= self.y && x < self.x + self.width && y < self.y + self.height
    }
}

/// Convert an RGB pixel to 8-bit HSV (H in 0-179, S and V in 0-255).
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
#[must_use]
pub fn rgb_to_hsv(pixel: &Rgb<u8>) -> [u8; 3] {
    let [r, g, b] = pixel.0.map(f32::from);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let saturation = if max > 0.0 { delta * 255.0 / max } else { 0.0 };

    let hue_degrees = if delta <= 0.0 {
        0.0
    } else if (max - r).abs() < f32::EPSILON {
        60.0 * (g - b) / delta
    } else if (max - g).abs() < f32::EPSILON {
        60.0_f32.mul_add((b - r) / delta, 120.0)
    } else {
        60.0_f32.mul_add((r - g) / delta, 240.0)
    };
    let hue_degrees = if hue_degrees < 0.0 {
        hue_degrees + 360.0
    } else {
        hue_degrees
    };

    // Safe: hue / 2 is in [0, 180], saturation and value in [0, 255]
    let hue = ((hue_degrees / 2.0).round() as u8) % 180;
    [hue, saturation.round() as u8, max as u8]
}

/// Binary mask (0 or 255) of pixels falling inside the foliage band.
#[must_use]
pub fn leaf_mask(image: &RgbImage, settings: &LeafMaskSettings) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let [h, s, v] = rgb_to_hsv(image.get_pixel(x, y));
        let inside = (settings.hue_min..=settings.hue_max).contains(&h)
            && s >= settings.min_saturation
            && v >= settings.min_value;
        Luma([if inside { FOREGROUND } else { 0 }])
    })
}

/// Closing followed by opening: fills pinholes, then removes speckles.
#[must_use]
pub fn clean_mask(mask: &GrayImage, radius: u8) -> GrayImage {
    if radius == 0 {
        return mask.clone();
    }
    let closed = close(mask, Norm::LInf, radius);
    open(&closed, Norm::LInf, radius)
}

/// Bounding box of the largest external contour in the mask, if any.
///
/// Area is the enclosed polygon area of the traced border. Ties keep the
/// first contour found in raster order.
#[must_use]
pub fn largest_contour_bbox(mask: &GrayImage) -> Option<BoundingBox> {
    let contours: Vec<Contour<i32>> = find_contours(mask);

    let mut best: Option<(&Contour<i32>, f64)> = None;
    for contour in contours
        .iter()
        .filter(|c| matches!(c.border_type, BorderType::Outer) && c.parent.is_none())
    {
        let area = polygon_area(contour);
        if best.map_or(true, |(_, best_area)| area > best_area) {
            best = Some((contour, area));
        }
    }

    best.and_then(|(contour, _)| contour_bbox(contour))
}

/// Shoelace area of the contour polygon.
#[allow(clippy::cast_precision_loss)]
fn polygon_area(contour: &Contour<i32>) -> f64 {
    let points = &contour.points;
    if points.len() < 3 {
        return 0.0;
    }
    let twice_area: i64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| i64::from(a.x) * i64::from(b.y) - i64::from(b.x) * i64::from(a.y))
        .sum();
    twice_area.unsigned_abs() as f64 / 2.0
}

#[allow(clippy::cast_sign_loss)]
fn contour_bbox(contour: &Contour<i32>) -> Option<BoundingBox> {
    let min_x = contour.points.iter().map(|p| p.x).min()?;
    let max_x = contour.points.iter().map(|p| p.x).max()?;
    let min_y = contour.points.iter().map(|p| p.y).min()?;
    let max_y = contour.points.iter().map(|p| p.y).max()?;

    // Safe: contour points are pixel coordinates inside the mask
    Some(BoundingBox {
        x: min_x.max(0) as u32,
        y: min_y.max(0) as u32,
        width: (max_x - min_x + 1) as u32,
        height: (max_y - min_y + 1) as u32,
    })
}
