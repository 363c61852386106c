//! Image saving utilities.

use std::path::Path;

use image::RgbImage;

use crate::error::{Error, Result};

/// Save an RGB image, choosing the encoder from the file extension.
///
/// # Arguments
///
/// * `img` - Image to write
/// * `path` - Output file path
/// * `quality` - JPEG quality (1-100), ignored for other formats
///
/// # Errors
///
/// Returns an error if the image cannot be saved.
pub fn save_image<P: AsRef<Path>>(img: &RgbImage, path: P, quality: u8) -> Result<()> {
    let path = path.as_ref();

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("png")
        .to_lowercase();

    match extension.as_str() {
        "jpg" | "jpeg" => {
            let mut output = std::fs::File::create(path)?;
            let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut output, quality);
            img.write_with_encoder(encoder)
                .map_err(|source| Error::ImageSave {
                    path: path.to_path_buf(),
                    source,
                })?;
        }
        _ => {
            img.save(path).map_err(|source| Error::ImageSave {
                path: path.to_path_buf(),
                source,
            })?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_save_png_and_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let img = RgbImage::from_pixel(8, 6, Rgb([40, 160, 60]));

        let png = dir.path().join("leaf.png");
        let jpg = dir.path().join("leaf.JPG");
        save_image(&img, &png, 95).unwrap();
        save_image(&img, &jpg, 95).unwrap();

        assert_eq!(image::open(&png).unwrap().to_rgb8(), img);
        assert_eq!(image::open(&jpg).unwrap().to_rgb8().dimensions(), (8, 6));
    }
}
