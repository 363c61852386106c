//! Leaf normalization, classification and explanation pipeline.

mod attribution;
mod batch;
mod classify;
mod diagnose;
mod normalize;
mod quality;
mod segment;
mod severity;

pub use attribution::{
    explain, grad_cam, jet, render_overlay, upsample_bilinear, AttributionMap, Explanation,
};
pub use batch::{
    build_reference_table, enhance_batch, scan_dataset, BatchFailure, BatchReport, EnhancedImage,
};
pub use classify::{ClassificationResult, Classifier, Neighbor, DEFAULT_K};
pub use diagnose::{Config, Diagnosis, DiagnosisSummary, OnnxPipeline, Pipeline};
pub use normalize::{letterbox, NormalizedImage, Normalizer};
pub use quality::{assess, assess_path, QualityReport};
pub use segment::{
    clean_mask, largest_contour_bbox, leaf_mask, rgb_to_hsv, BoundingBox, LeafMaskSettings,
};
pub use severity::{
    is_healthy, AttributionSeverity, SeverityEstimator, DEFAULT_ACTIVATION_THRESHOLD,
};
