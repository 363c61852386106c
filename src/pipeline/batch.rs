//! Batch operations over directories of photographs.
//!
//! A failure on one file never aborts the batch: it is logged, recorded in
//! the report and the batch moves on.

use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::image::{image_to_tensor, load_image, save_image};
use crate::model::{Embedding, FeatureExtractor, ReferenceTable};

use super::normalize::Normalizer;
use super::quality::{assess_path, QualityReport};

/// File extensions picked up when scanning a dataset.
const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// One successfully enhanced image.
#[derive(Debug, Clone, Serialize)]
pub struct EnhancedImage {
    pub original: PathBuf,
    pub enhanced: PathBuf,
    /// Assessment of the written output.
    pub quality: QualityReport,
}

/// A file the batch could not process.
#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Outcome of a batch run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport<T> {
    pub successful: Vec<T>,
    pub failed: Vec<BatchFailure>,
}

impl<T> Default for BatchReport<T> {
    fn default() -> Self {
        Self {
            successful: Vec::new(),
            failed: Vec::new(),
        }
    }
}

impl<T> BatchReport<T> {
    fn record(&mut self, path: &Path, outcome: Result<T>) {
        match outcome {
            Ok(item) => self.successful.push(item),
            Err(err) => {
                tracing::warn!("Skipping {}: {err}", path.display());
                self.failed.push(BatchFailure {
                    path: path.to_path_buf(),
                    error: err.to_string(),
                });
            }
        }
    }
}

fn progress_bar(len: usize, label: &str) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "{{spinner:.green}} {label} [{{bar:40.cyan/blue}}] {{pos}}/{{len}}"
            ))
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb
}

/// Normalize every image in `paths` and write `<stem>_enhanced.jpg` into
/// `output_dir`.
///
/// # Errors
///
/// Returns an error only if the output directory cannot be created; per-file
/// failures are reported in [`BatchReport::failed`].
pub fn enhance_batch(
    normalizer: &Normalizer,
    paths: &[PathBuf],
    output_dir: &Path,
    quality: u8,
) -> Result<BatchReport<EnhancedImage>> {
    std::fs::create_dir_all(output_dir)?;

    let mut report = BatchReport::default();
    let pb = progress_bar(paths.len(), "Enhancing");

    for path in paths {
        let outcome = enhance_one(normalizer, path, output_dir, quality);
        report.record(path, outcome);
        pb.inc(1);
    }
    pb.finish_and_clear();

    tracing::info!(
        "Enhanced {} images ({} failed)",
        report.successful.len(),
        report.failed.len()
    );
    Ok(report)
}

fn enhance_one(
    normalizer: &Normalizer,
    path: &Path,
    output_dir: &Path,
    quality: u8,
) -> Result<EnhancedImage> {
    let image = load_image(path)?;
    let normalized = normalizer.normalize(&image);

    let stem = path
        .file_stem()
        .map_or_else(|| "image".into(), |s| s.to_string_lossy());
    let enhanced = output_dir.join(format!("{stem}_enhanced.jpg"));
    save_image(&normalized, &enhanced, quality)?;
    let quality = assess_path(&enhanced)?;

    Ok(EnhancedImage {
        original: path.to_path_buf(),
        enhanced,
        quality,
    })
}

/// Labeled image files under `dataset_dir`, one subdirectory per label.
///
/// Both labels and files are returned in lexicographic order so that the
/// resulting table is reproducible.
///
/// # Errors
///
/// Returns an error if `dataset_dir` or one of its label directories cannot
/// be read.
pub fn scan_dataset(dataset_dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut label_dirs: Vec<PathBuf> = std::fs::read_dir(dataset_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_dir())
        .collect();
    label_dirs.sort();

    let mut samples = Vec::new();
    for dir in label_dirs {
        let Some(label) = dir.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };

        let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_image_file(path))
            .collect();
        files.sort();

        tracing::debug!("Found {} images for {label}", files.len());
        samples.extend(files.into_iter().map(|path| (label.clone(), path)));
    }

    Ok(samples)
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

/// Embed every image of a labeled dataset into a new reference table.
///
/// Images are normalized exactly as at diagnosis time. Unreadable files are
/// skipped and listed in the returned report.
///
/// # Errors
///
/// Returns an error if the dataset cannot be scanned or no image could be
/// embedded.
pub fn build_reference_table<E: FeatureExtractor + ?Sized>(
    dataset_dir: &Path,
    normalizer: &Normalizer,
    extractor: &mut E,
) -> Result<(ReferenceTable, BatchReport<PathBuf>)> {
    let samples = scan_dataset(dataset_dir)?;
    tracing::info!(
        "Building reference table from {} images in {}",
        samples.len(),
        dataset_dir.display()
    );

    let mut rows = Vec::with_capacity(samples.len());
    let mut labels = Vec::with_capacity(samples.len());
    let mut report = BatchReport::default();
    let pb = progress_bar(samples.len(), "Embedding");

    for (label, path) in samples {
        let expected_dim = rows.first().map(Vec::len);
        let outcome = load_image(&path)
            .and_then(|image| {
                let tensor = image_to_tensor(&normalizer.normalize(&image));
                extractor.extract(&tensor)
            })
            .and_then(|embedding| check_embedding(embedding, expected_dim));

        match outcome {
            Ok(embedding) => {
                rows.push(embedding.to_vec());
                labels.push(label);
                report.record(&path, Ok(path.clone()));
            }
            Err(err) => report.record(&path, Err(err)),
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    if rows.is_empty() {
        return Err(Error::ReferenceTable {
            reason: format!("no usable images under {}", dataset_dir.display()),
        });
    }

    let table = ReferenceTable::from_rows(rows, labels)?;
    tracing::info!(
        "Built reference table: {} rows of dimension {} ({} skipped)",
        table.len(),
        table.dim(),
        report.failed.len()
    );
    Ok((table, report))
}

/// Reject an embedding that could not become a row of the table being built.
fn check_embedding(embedding: Embedding, expected_dim: Option<usize>) -> Result<Embedding> {
    let invalid = |reason: String| Error::ReferenceTable { reason };

    if embedding.is_empty() {
        return Err(invalid("extractor returned an empty embedding".to_string()));
    }
    if embedding.iter().any(|v| !v.is_finite()) {
        return Err(invalid("embedding contains non-finite values".to_string()));
    }
    if let Some(dim) = expected_dim.filter(|&dim| dim != embedding.len()) {
        return Err(invalid(format!(
            "embedding has dimension {} but the table has {dim}",
            embedding.len()
        )));
    }
    Ok(embedding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ImageTensor;
    use image::{Rgb, RgbImage};
    use ndarray::array;

    fn write_image(path: &Path, color: [u8; 3]) {
        RgbImage::from_pixel(64, 48, Rgb(color)).save(path).unwrap();
    }

    fn mean_red(tensor: &ImageTensor) -> Result<Embedding> {
        Ok(array![tensor.index_axis(ndarray::Axis(1), 0).mean().unwrap_or(0.0)])
    }

    #[test]
    fn test_enhance_batch_isolates_failures() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("leaf.png");
        let bad = dir.path().join("broken.jpg");
        write_image(&good, [40, 160, 60]);
        std::fs::write(&bad, b"not an image").unwrap();

        let out = dir.path().join("out");
        let report =
            enhance_batch(&Normalizer::default(), &[good.clone(), bad.clone()], &out, 95).unwrap();

        assert_eq!(report.successful.len(), 1);
        assert_eq!(report.successful[0].original, good);
        assert_eq!(report.successful[0].enhanced, out.join("leaf_enhanced.jpg"));
        assert!(report.successful[0].enhanced.is_file());
        assert_eq!(report.successful[0].quality.width, 224);

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].path, bad);
    }

    #[test]
    fn test_scan_dataset_is_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for label in ["Tomato_healthy", "Potato___Early_blight"] {
            std::fs::create_dir(dir.path().join(label)).unwrap();
        }
        write_image(&dir.path().join("Tomato_healthy/b.png"), [0, 200, 0]);
        write_image(&dir.path().join("Tomato_healthy/a.PNG"), [0, 180, 0]);
        write_image(&dir.path().join("Potato___Early_blight/x.png"), [120, 90, 30]);
        std::fs::write(dir.path().join("Tomato_healthy/notes.txt"), "skip").unwrap();

        let samples = scan_dataset(dir.path()).unwrap();
        let names: Vec<(&str, String)> = samples
            .iter()
            .map(|(label, path)| {
                (
                    label.as_str(),
                    path.file_name().unwrap().to_string_lossy().into_owned(),
                )
            })
            .collect();

        assert_eq!(
            names,
            vec![
                ("Potato___Early_blight", "x.png".to_string()),
                ("Tomato_healthy", "a.PNG".to_string()),
                ("Tomato_healthy", "b.png".to_string()),
            ]
        );
    }

    #[test]
    fn test_build_reference_table_skips_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("blight")).unwrap();
        std::fs::create_dir(dir.path().join("healthy")).unwrap();
        write_image(&dir.path().join("blight/1.png"), [150, 80, 20]);
        write_image(&dir.path().join("healthy/1.png"), [30, 170, 40]);
        std::fs::write(dir.path().join("healthy/2.jpg"), b"corrupt").unwrap();

        let mut extractor = mean_red;
        let (table, report) =
            build_reference_table(dir.path(), &Normalizer::default(), &mut extractor).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.dim(), 1);
        assert_eq!(table.labels(), ["blight".to_string(), "healthy".to_string()]);
        assert_eq!(report.successful.len(), 2);
        assert_eq!(report.failed.len(), 1);
    }

    fn labeled_dataset(dir: &Path, count: usize) {
        std::fs::create_dir(dir.join("blight")).unwrap();
        for i in 0..count {
            write_image(&dir.join(format!("blight/{i}.png")), [150, 80, 20]);
        }
    }

    #[test]
    fn test_non_finite_embedding_skips_only_that_image() {
        let dir = tempfile::tempdir().unwrap();
        labeled_dataset(dir.path(), 3);

        let mut calls = 0;
        let mut extractor = |_: &ImageTensor| -> Result<Embedding> {
            calls += 1;
            Ok(if calls == 3 { array![f32::NAN] } else { array![0.5] })
        };
        let (table, report) =
            build_reference_table(dir.path(), &Normalizer::default(), &mut extractor).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(report.successful.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].path, dir.path().join("blight/2.png"));
        assert!(report.failed[0].error.contains("non-finite"));
    }

    #[test]
    fn test_mismatched_and_empty_embeddings_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        labeled_dataset(dir.path(), 4);

        let mut calls = 0;
        let mut extractor = |_: &ImageTensor| -> Result<Embedding> {
            calls += 1;
            Ok(match calls {
                2 => array![1.0, 2.0, 3.0],
                3 => Embedding::zeros(0),
                _ => array![1.0, 2.0],
            })
        };
        let (table, report) =
            build_reference_table(dir.path(), &Normalizer::default(), &mut extractor).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.dim(), 2);
        assert_eq!(report.failed.len(), 2);
        assert!(report.failed[0].error.contains("dimension 3"));
        assert!(report.failed[1].error.contains("empty"));
    }

    #[test]
    fn test_build_reference_table_without_images_fails() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("empty")).unwrap();

        let mut extractor = mean_red;
        let err = build_reference_table(dir.path(), &Normalizer::default(), &mut extractor)
            .unwrap_err();
        assert!(matches!(err, Error::ReferenceTable { .. }));
    }
}
