//! leafguard CLI - diagnose plant leaf diseases from photographs.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use leafguard::image::save_image;
use leafguard::model::{ModelPaths, OnnxFeatureExtractor};
use leafguard::pipeline::{assess_path, build_reference_table, enhance_batch, Normalizer};
use leafguard::{Config, OnnxPipeline};

/// Diagnose plant leaf diseases with nearest-neighbor classification and Grad-CAM.
#[derive(Parser, Debug)]
#[command(name = "leafguard")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Diagnose a leaf photograph.
    Diagnose {
        /// Input image path.
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Directory holding the ONNX models and head weights.
        #[arg(short, long, default_value = "models", value_name = "DIR")]
        models: PathBuf,

        /// Reference table built with `build-reference`.
        #[arg(short, long, default_value = "reference.json", value_name = "FILE")]
        reference: PathBuf,

        /// Where to write the Grad-CAM overlay.
        #[arg(long, value_name = "FILE")]
        heatmap: Option<PathBuf>,

        /// Where to write the normalized analysis image.
        #[arg(long, value_name = "FILE")]
        normalized: Option<PathBuf>,

        /// Output name of the layer to explain.
        #[arg(long, default_value = "layer4", value_name = "NAME")]
        layer: String,

        /// Nearest neighbors consulted per vote.
        #[arg(short, default_value = "3", value_name = "INT")]
        k: usize,

        #[command(flatten)]
        tuning: Tuning,
    },

    /// Report sharpness, brightness and contrast of images.
    Assess {
        /// Input image paths.
        #[arg(value_name = "INPUT", required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Normalize images and write `<name>_enhanced.jpg` copies.
    Enhance {
        /// Input image paths.
        #[arg(value_name = "INPUT", required = true)]
        inputs: Vec<PathBuf>,

        /// Output directory.
        #[arg(short, long, default_value = "enhanced", value_name = "DIR")]
        output_dir: PathBuf,

        #[command(flatten)]
        tuning: Tuning,
    },

    /// Embed a labeled dataset (`<dir>/<label>/*.jpg`) into a reference table.
    BuildReference {
        /// Dataset root with one subdirectory per label.
        #[arg(value_name = "DATASET")]
        dataset: PathBuf,

        /// ONNX feature extractor.
        #[arg(short, long, default_value = "models/feature_extractor.onnx", value_name = "FILE")]
        feature_model: PathBuf,

        /// Output table path.
        #[arg(short, long, default_value = "reference.json", value_name = "FILE")]
        output: PathBuf,

        #[command(flatten)]
        tuning: Tuning,
    },
}

/// Normalization options shared by the image-producing commands.
#[derive(ClapArgs, Debug)]
struct Tuning {
    /// Side length of the square analysis image.
    #[arg(long, default_value = "224", value_name = "PX")]
    size: u32,

    /// Padding around the detected leaf.
    #[arg(long, default_value = "20", value_name = "PX")]
    padding: u32,

    /// Output JPEG quality (1-100).
    #[arg(short, long, default_value = "95", value_name = "INT")]
    quality: u8,
}

impl Tuning {
    fn config(&self) -> Config {
        Config {
            target_size: self.size,
            crop_padding: self.padding,
            output_quality: self.quality,
            ..Config::default()
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("leafguard={log_level}").into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    if let Err(err) = run(args.command) {
        tracing::error!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Diagnose {
            input,
            models,
            reference,
            heatmap,
            normalized,
            layer,
            k,
            tuning,
        } => {
            let config = Config {
                target_layer: layer,
                k_neighbors: k,
                ..tuning.config()
            };
            diagnose(&input, &models, &reference, heatmap, normalized, config)
        }
        Command::Assess { inputs } => {
            let mut reports = Vec::with_capacity(inputs.len());
            for input in &inputs {
                let report = assess_path(input)
                    .with_context(|| format!("Failed to assess {}", input.display()))?;
                reports.push(report);
            }
            print_json(&reports)
        }
        Command::Enhance {
            inputs,
            output_dir,
            tuning,
        } => {
            let config = tuning.config();
            config.validate().context("Invalid configuration")?;

            let report = enhance_batch(
                &Normalizer::new(&config),
                &inputs,
                &output_dir,
                config.output_quality,
            )
            .context("Failed to enhance images")?;
            print_json(&report)
        }
        Command::BuildReference {
            dataset,
            feature_model,
            output,
            tuning,
        } => {
            let config = tuning.config();
            config.validate().context("Invalid configuration")?;

            let mut extractor = OnnxFeatureExtractor::load(&feature_model)
                .context("Failed to load feature extractor")?;
            let (table, report) =
                build_reference_table(&dataset, &Normalizer::new(&config), &mut extractor)
                    .context("Failed to build reference table")?;
            table
                .save(&output)
                .with_context(|| format!("Failed to write {}", output.display()))?;

            println!(
                "Wrote {} embeddings ({} skipped) -> {}",
                table.len(),
                report.failed.len(),
                output.display()
            );
            Ok(())
        }
    }
}

fn diagnose(
    input: &Path,
    models: &Path,
    reference: &Path,
    heatmap: Option<PathBuf>,
    normalized: Option<PathBuf>,
    config: Config,
) -> Result<()> {
    // Validate input file exists
    if !input.exists() {
        anyhow::bail!("Input file does not exist: {}", input.display());
    }

    let quality = config.output_quality;
    let mut pipeline = OnnxPipeline::load(config, &ModelPaths::in_dir(models), reference)
        .context("Failed to initialize pipeline")?;

    let diagnosis = pipeline
        .diagnose_path(input)
        .context("Failed to diagnose image")?;

    if let Some(path) = heatmap {
        save_image(&diagnosis.heatmap, &path, quality).context("Failed to save heatmap")?;
    }
    if let Some(path) = normalized {
        save_image(&diagnosis.normalized, &path, quality)
            .context("Failed to save normalized image")?;
    }

    print_json(&diagnosis.summary())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to serialize report")?;
    println!("{text}");
    Ok(())
}
