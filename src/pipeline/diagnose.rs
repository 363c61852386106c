//! End-to-end leaf diagnosis pipeline.

use std::path::Path;

use image::RgbImage;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::image::{image_to_tensor, load_image, EnhancementSettings, ANALYSIS_SIZE};
use crate::model::{
    ActivationModel, Embedding, FeatureExtractor, ModelPaths, OnnxCamModel, OnnxFeatureExtractor,
    ReferenceTable,
};

use super::attribution::{explain, AttributionMap};
use super::classify::{Classifier, Neighbor, DEFAULT_K};
use super::normalize::Normalizer;
use super::quality::{assess, QualityReport};
use super::segment::{BoundingBox, LeafMaskSettings};
use super::severity::{AttributionSeverity, SeverityEstimator, DEFAULT_ACTIVATION_THRESHOLD};

/// Configuration for the diagnosis pipeline.
#[derive(Debug, Clone)]
pub struct Config {
    /// Side length of the square analysis image.
    pub target_size: u32,

    /// Pixels added around the detected leaf before cropping.
    pub crop_padding: u32,

    /// Tonal enhancement factors.
    pub enhancement: EnhancementSettings,

    /// HSV band and morphology used to find the leaf.
    pub leaf_mask: LeafMaskSettings,

    /// Neighbors consulted by the classifier.
    pub k_neighbors: usize,

    /// Output name of the layer explained by Grad-CAM.
    pub target_layer: String,

    /// Weight of the false-color map in the heatmap overlay (0.0-1.0).
    pub heatmap_alpha: f32,

    /// Attribution level counted as affected by the severity estimate (0.0-1.0).
    pub severity_threshold: f32,

    /// Output JPEG quality (1-100).
    pub output_quality: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target_size: ANALYSIS_SIZE,
            crop_padding: 20,
            enhancement: EnhancementSettings::default(),
            leaf_mask: LeafMaskSettings::default(),
            k_neighbors: DEFAULT_K,
            target_layer: "layer4".to_string(),
            heatmap_alpha: 0.5,
            severity_threshold: DEFAULT_ACTIVATION_THRESHOLD,
            output_quality: 95,
        }
    }
}

impl Config {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any parameter is out of valid range.
    pub fn validate(&self) -> Result<()> {
        if self.target_size == 0 {
            return Err(invalid("target_size", "must be greater than 0"));
        }

        for (name, factor) in self.enhancement.factors() {
            if !factor.is_finite() || factor < 0.0 {
                return Err(invalid(name, "must be a finite, non-negative factor"));
            }
        }

        if self.leaf_mask.hue_min > self.leaf_mask.hue_max || self.leaf_mask.hue_max > 179 {
            return Err(invalid("leaf_mask", "hue band must satisfy min <= max <= 179"));
        }

        if self.k_neighbors == 0 {
            return Err(invalid("k_neighbors", "must be greater than 0"));
        }

        if self.target_layer.is_empty() {
            return Err(invalid("target_layer", "must name a model output"));
        }

        if !(0.0..=1.0).contains(&self.heatmap_alpha) {
            return Err(invalid("heatmap_alpha", "must be between 0.0 and 1.0"));
        }

        if !(0.0..=1.0).contains(&self.severity_threshold) {
            return Err(invalid("severity_threshold", "must be between 0.0 and 1.0"));
        }

        if !(1..=100).contains(&self.output_quality) {
            return Err(invalid("output_quality", "must be between 1 and 100"));
        }

        Ok(())
    }
}

fn invalid(name: &str, reason: &str) -> Error {
    Error::InvalidParameter {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

/// Everything produced for one photograph.
#[derive(Debug, Clone)]
pub struct Diagnosis {
    pub label: String,
    /// Fraction of nearest neighbors agreeing with `label`.
    pub confidence: f32,
    /// Severity in [0, 100].
    pub severity: f32,
    pub neighbors: Vec<Neighbor>,
    /// Class explained by the heatmap.
    pub explained_class: usize,
    pub attribution: AttributionMap,
    /// Attribution overlay at the analysis resolution.
    pub heatmap: RgbImage,
    pub original: RgbImage,
    pub normalized: RgbImage,
    /// Leaf crop in the enhanced original, if one was found.
    pub crop: Option<BoundingBox>,
    /// Advisory only; never influences the other fields.
    pub quality: QualityReport,
}

/// Serializable subset of a [`Diagnosis`] for reports and persistence.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosisSummary {
    pub label: String,
    pub confidence: f32,
    pub severity: f32,
    pub quality: QualityReport,
}

impl Diagnosis {
    #[must_use]
    pub fn summary(&self) -> DiagnosisSummary {
        DiagnosisSummary {
            label: self.label.clone(),
            confidence: self.confidence,
            severity: self.severity,
            quality: self.quality.clone(),
        }
    }
}

/// Diagnosis pipeline: normalize, embed, classify, explain, estimate severity.
///
/// Constructed once at startup; construction validates the configuration and
/// takes ownership of the (already validated) reference table, so a pipeline
/// that exists is ready to serve.
pub struct Pipeline<E, M> {
    config: Config,
    normalizer: Normalizer,
    classifier: Classifier,
    extractor: E,
    attribution_model: M,
    severity: Box<dyn SeverityEstimator + Send + Sync>,
}

/// Pipeline backed by ONNX models.
pub type OnnxPipeline = Pipeline<OnnxFeatureExtractor, OnnxCamModel>;

impl OnnxPipeline {
    /// Load every model and the reference table from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if any artifact is missing or invalid. Callers should
    /// treat this as fatal at startup.
    pub fn load(config: Config, models: &ModelPaths, reference: &Path) -> Result<Self> {
        config.validate()?;

        let table = ReferenceTable::load(reference)?;
        let extractor = OnnxFeatureExtractor::load(&models.feature_extractor)?;
        let attribution_model = OnnxCamModel::load(
            &models.attribution_backbone,
            &models.attribution_head,
            &config.target_layer,
        )?;

        Self::new(config, table, extractor, attribution_model)
    }
}

impl<E: FeatureExtractor, M: ActivationModel> Pipeline<E, M> {
    /// Create a new pipeline from loaded collaborators.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(
        config: Config,
        table: ReferenceTable,
        extractor: E,
        attribution_model: M,
    ) -> Result<Self> {
        config.validate()?;

        tracing::info!("Initializing pipeline with config: {config:?}");

        let classifier = Classifier::new(table, config.k_neighbors)?;
        let normalizer = Normalizer::new(&config);
        let severity = Box::new(AttributionSeverity {
            threshold: config.severity_threshold,
        });

        tracing::info!(
            "Pipeline initialized with {} reference embeddings",
            classifier.table().len()
        );

        Ok(Self {
            config,
            normalizer,
            classifier,
            extractor,
            attribution_model,
            severity,
        })
    }

    /// Replace the default attribution-based severity estimate.
    #[must_use]
    pub fn with_severity_estimator(
        mut self,
        estimator: impl SeverityEstimator + Send + Sync + 'static,
    ) -> Self {
        self.severity = Box::new(estimator);
        self
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub const fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    #[must_use]
    pub const fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Normalize an image and compute its embedding.
    ///
    /// # Errors
    ///
    /// Returns an error if the feature model fails.
    pub fn embed(&mut self, image: &RgbImage) -> Result<Embedding> {
        let normalized = self.normalizer.normalize(image);
        self.extractor.extract(&image_to_tensor(&normalized))
    }

    /// Load a photograph from disk and diagnose it.
    ///
    /// # Errors
    ///
    /// Returns an input error if the image cannot be decoded, otherwise see
    /// [`Self::diagnose`].
    pub fn diagnose_path<P: AsRef<Path>>(&mut self, path: P) -> Result<Diagnosis> {
        let path = path.as_ref();
        tracing::info!("Processing image: {}", path.display());
        let image = load_image(path)?;
        self.diagnose(&image)
    }

    /// Diagnose a decoded photograph.
    ///
    /// # Errors
    ///
    /// Returns an error if a model fails or is misconfigured. Normalization
    /// and quality assessment never fail.
    pub fn diagnose(&mut self, image: &RgbImage) -> Result<Diagnosis> {
        let quality = assess(image);

        tracing::info!("Normalizing image...");
        let normalized = self.normalizer.normalize_detailed(image);

        tracing::info!("Extracting embedding...");
        let embedding = self.extractor.extract(&image_to_tensor(&normalized.image))?;

        let classification = self.classifier.classify(embedding.view())?;
        tracing::info!(
            "Predicted {} (confidence {:.2})",
            classification.label,
            classification.confidence
        );

        tracing::info!("Computing attribution heatmap...");
        let class_index = self.attribution_model.class_index(&classification.label);
        let explanation = explain(
            &mut self.attribution_model,
            &normalized.image,
            &self.config.target_layer,
            class_index,
            self.config.heatmap_alpha,
        )?;

        let severity = self.severity.estimate(&classification, &explanation.map);

        tracing::info!("Processing complete");
        Ok(Diagnosis {
            label: classification.label,
            confidence: classification.confidence,
            severity,
            neighbors: classification.neighbors,
            explained_class: explanation.class_index,
            attribution: explanation.map,
            heatmap: explanation.heatmap,
            original: image.clone(),
            normalized: normalized.image,
            crop: normalized.crop,
            quality,
        })
    }
}
