//! Image loading utilities.

use std::path::Path;

use image::RgbImage;
use ndarray::Array4;

use crate::error::{Error, Result};

use super::{ImageTensor, IMAGENET_MEAN, IMAGENET_STD, RGB_CHANNELS};

/// Load an image from disk as an 8-bit RGB buffer.
///
/// # Errors
///
/// Returns [`Error::ImageLoad`] if the file cannot be read or decoded.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<RgbImage> {
    let path = path.as_ref();

    let img = image::open(path).map_err(|source| Error::ImageLoad {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(img.to_rgb8())
}

/// Decode an in-memory encoded image (JPEG, PNG) as an 8-bit RGB buffer.
///
/// # Errors
///
/// Returns [`Error::ImageDecode`] if the bytes are not a supported image.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage> {
    image::load_from_memory(bytes)
        .map(|img| img.to_rgb8())
        .map_err(|source| Error::ImageDecode { source })
}

/// Convert an RGB image to an ImageNet-normalized NCHW tensor.
///
/// The image is:
/// 1. Scaled from [0, 255] to [0, 1]
/// 2. Shifted and scaled per channel by the ImageNet mean and std
/// 3. Returned as NCHW tensor (1, 3, height, width)
#[must_use]
pub fn image_to_tensor(img: &RgbImage) -> ImageTensor {
    let (width, height) = (img.width() as usize, img.height() as usize);

    let mut tensor = Array4::<f32>::zeros((1, RGB_CHANNELS, height, width));

    for (x, y, pixel) in img.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..RGB_CHANNELS {
            let value = f32::from(pixel[c]) / 255.0;
            tensor[[0, c, y, x]] = (value - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
        }
    }

    tensor
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_tensor_shape() {
        let img = RgbImage::new(100, 60);
        let tensor = image_to_tensor(&img);

        assert_eq!(tensor.shape(), &[1, 3, 60, 100]);
    }

    #[test]
    fn test_normalization_values() {
        let img = RgbImage::from_pixel(4, 4, Rgb([0, 0, 255]));
        let tensor = image_to_tensor(&img);

        let red = tensor[[0, 0, 2, 2]];
        let blue = tensor[[0, 2, 2, 2]];
        assert!((red - (-0.485 / 0.229)).abs() < 1e-5);
        assert!((blue - ((1.0 - 0.406) / 0.225)).abs() < 1e-5);
    }

    #[test]
    fn test_decode_garbage_is_input_error() {
        let err = decode_image(b"definitely not a png").unwrap_err();
        assert!(err.is_input_error());
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_image("/nonexistent/leaf.jpg").unwrap_err();
        assert!(matches!(err, Error::ImageLoad { .. }));
    }
}
