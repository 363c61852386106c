//! Disease severity estimation.

use super::attribution::AttributionMap;
use super::classify::ClassificationResult;

/// Attribution level at which a pixel counts as affected.
pub const DEFAULT_ACTIVATION_THRESHOLD: f32 = 0.5;

/// Maps a classification and its attribution to a severity in [0, 100].
///
/// Implementations must be deterministic for identical inputs and must not
/// depend on image quality.
pub trait SeverityEstimator {
    fn estimate(&self, classification: &ClassificationResult, attribution: &AttributionMap) -> f32;
}

/// Share of the image carrying strong evidence for a disease class.
///
/// Healthy labels score zero. Otherwise the score is the percentage of map
/// cells at or above the activation threshold, rounded to one decimal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttributionSeverity {
    pub threshold: f32,
}

impl Default for AttributionSeverity {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_ACTIVATION_THRESHOLD,
        }
    }
}

impl SeverityEstimator for AttributionSeverity {
    #[allow(clippy::cast_precision_loss)]
    fn estimate(&self, classification: &ClassificationResult, attribution: &AttributionMap) -> f32 {
        if is_healthy(&classification.label) || attribution.is_empty() {
            return 0.0;
        }

        let affected = attribution.iter().filter(|&&v| v >= self.threshold).count();
        let percent = affected as f32 * 100.0 / attribution.len() as f32;
        ((percent * 10.0).round() / 10.0).clamp(0.0, 100.0)
    }
}

/// Whether a label names a disease-free plant (e.g. `Tomato_healthy`).
#[must_use]
pub fn is_healthy(label: &str) -> bool {
    label.to_ascii_lowercase().contains("healthy")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn result(label: &str) -> ClassificationResult {
        ClassificationResult {
            label: label.to_string(),
            confidence: 1.0,
            neighbors: Vec::new(),
        }
    }

    #[test]
    fn test_healthy_is_zero() {
        let map = Array2::from_elem((4, 4), 1.0);
        let severity = AttributionSeverity::default().estimate(&result("Pepper__bell___healthy"), &map);
        assert!(severity.abs() < f32::EPSILON);
    }

    #[test]
    fn test_quarter_of_map_affected() {
        let map = Array2::from_shape_fn((4, 4), |(i, _)| if i == 0 { 0.9 } else { 0.1 });
        let severity = AttributionSeverity::default().estimate(&result("Tomato_Late_blight"), &map);
        assert!((severity - 25.0).abs() < 1e-4);
    }

    #[test]
    fn test_bounds_and_determinism() {
        let estimator = AttributionSeverity { threshold: 0.0 };
        let map = Array2::from_elem((3, 3), 0.0);
        let first = estimator.estimate(&result("Tomato_Leaf_Mold"), &map);
        let second = estimator.estimate(&result("Tomato_Leaf_Mold"), &map);
        assert!((first - 100.0).abs() < f32::EPSILON);
        assert!((first - second).abs() < f32::EPSILON);

        let empty = Array2::<f32>::zeros((0, 0));
        assert!(estimator.estimate(&result("Tomato_Leaf_Mold"), &empty).abs() < f32::EPSILON);
    }
}
