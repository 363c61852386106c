//! # leafguard
//!
//! Plant leaf disease diagnosis from a single photograph.
//!
//! A photo is enhanced, cropped to the dominant leaf and letterboxed onto a
//! fixed canvas. A pretrained feature model embeds the result, which is
//! labeled by majority vote of its nearest reference embeddings. A Grad-CAM
//! heatmap shows where the evidence lies and drives a severity estimate.
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use leafguard::model::ModelPaths;
//! use leafguard::{Config, OnnxPipeline};
//!
//! # fn main() -> leafguard::Result<()> {
//! let models = ModelPaths::in_dir(Path::new("models"));
//! let mut pipeline = OnnxPipeline::load(Config::default(), &models, Path::new("reference.json"))?;
//!
//! let diagnosis = pipeline.diagnose_path("leaf.jpg")?;
//! println!("{} ({:.0}% severity)", diagnosis.label, diagnosis.severity);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod image;
pub mod model;
pub mod pipeline;

pub use error::{Error, Result};
pub use pipeline::{Config, Diagnosis, OnnxPipeline, Pipeline};
