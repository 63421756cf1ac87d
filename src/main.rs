use clap::Parser;
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use leafsense::{AnalysisError, PipelineConfig};

#[derive(Parser)]
#[command(name = "leafsense")]
#[command(about = "Analyze a mango leaf photo: disease class, confidence and severity")]
struct Cli {
    /// Path to the leaf photo
    #[arg(value_name = "IMAGE")]
    image_path: PathBuf,

    /// TOML configuration file (model paths, thresholds)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Classifier model weights (overrides config)
    #[arg(long, value_name = "FILE")]
    model: Option<PathBuf>,

    /// Background-removal model weights (overrides config)
    #[arg(long, value_name = "FILE")]
    seg_model: Option<PathBuf>,

    /// Labels file, one class name per line (overrides config)
    #[arg(long, value_name = "FILE")]
    labels: Option<PathBuf>,

    /// Write the cropped leaf image here after analysis
    #[arg(long, value_name = "FILE")]
    crop_out: Option<PathBuf>,

    /// Emit compact JSON instead of pretty-printed
    #[arg(long)]
    compact: bool,
}

fn main() -> ExitCode {
    // stdout carries only the JSON result; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();
    match run(&args) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            // Errors are still valid JSON on stdout, with an explicit
            // marker so callers cannot mistake them for a diagnosis.
            let payload = json!({
                "error": err.to_string(),
                "stage": err.stage().as_str(),
                "class": "ERROR",
                "confidence": 0.0,
            });
            println!("{payload}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Cli) -> Result<String, AnalysisError> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_toml_file(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(model) = &args.model {
        config.classifier_model = Some(model.clone());
    }
    if let Some(seg_model) = &args.seg_model {
        config.segmentation_model = Some(seg_model.clone());
    }
    if let Some(labels) = &args.labels {
        config.labels = Some(labels.clone());
    }

    let pipeline = build_pipeline(config)?;
    let (result, crop) = pipeline.analyze_file_with_crop(&args.image_path)?;

    if let Some(crop_out) = &args.crop_out {
        if let Err(e) = crop.image.save(crop_out) {
            tracing::warn!(path = %crop_out.display(), error = %e, "could not save leaf crop");
        }
    }

    let json = if args.compact {
        serde_json::to_string(&result)
    } else {
        serde_json::to_string_pretty(&result)
    };
    json.map_err(|e| AnalysisError::Inference {
        stage: leafsense::Stage::Classification,
        cause: format!("result serialization failed: {e}"),
    })
}

#[cfg(feature = "onnx")]
fn build_pipeline(config: PipelineConfig) -> Result<leafsense::LeafPipeline, AnalysisError> {
    leafsense::LeafPipeline::from_config(config)
}

#[cfg(not(feature = "onnx"))]
fn build_pipeline(_config: PipelineConfig) -> Result<leafsense::LeafPipeline, AnalysisError> {
    Err(AnalysisError::ModelLoad {
        stage: leafsense::Stage::Classification,
        cause: "this build has no inference backend (compiled without the onnx feature)".into(),
    })
}
