use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Stage names used for error attribution and logging. `Config` and
/// `Worker` cover failures outside the image stages proper: before any
/// stage ran, or after the executing thread went away.
///
/// `CropExtraction` and `SeverityEstimation` have no inference backends, so
/// `ModelLoad`/`Inference` never carry them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Config,
    Decode,
    Segmentation,
    CropExtraction,
    Classification,
    SeverityEstimation,
    Worker,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Config => "config",
            Stage::Decode => "decode",
            Stage::Segmentation => "segmentation",
            Stage::CropExtraction => "crop-extraction",
            Stage::Classification => "classification",
            Stage::SeverityEstimation => "severity-estimation",
            Stage::Worker => "worker",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything that can go wrong while analyzing a leaf photo.
///
/// Variants are structured so callers can tell an expected outcome
/// (`NoLeafDetected`) from a broken setup (`ModelLoad`) or a per-image
/// failure (`Decode`, `Inference`).
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Configuration could not be read or parsed. Nothing ran.
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    /// The input file could not be read or decoded. Nothing ran.
    #[error("failed to decode input image {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// The segmentation model ran but produced no usable mask, or its
    /// session failed mid-inference.
    #[error("segmentation failed: {0}")]
    Segmentation(String),

    /// No contour survived masking. Expected for blank or over-exposed
    /// photos; the user should retake, not retry.
    #[error("no leaf detected in image")]
    NoLeafDetected,

    /// Model weights or labels missing, corrupt, or inconsistent with each
    /// other. Process-level: the caller should surface a setup error and
    /// stop offering scans until fixed.
    #[error("{stage} model could not be loaded: {cause}")]
    ModelLoad { stage: Stage, cause: String },

    /// Runtime failure during preprocessing or the forward pass.
    /// Per-image and retryable by the caller.
    #[error("{stage} inference failed: {cause}")]
    Inference { stage: Stage, cause: String },

    /// Severity scoring failed. The orchestrator downgrades this to an
    /// unknown/0% severity instead of failing the request.
    #[error("severity estimation failed: {0}")]
    Severity(String),

    /// The analysis worker thread went away without reporting a result.
    #[error("analysis worker terminated without reporting a result")]
    WorkerLost,
}

impl AnalysisError {
    /// The stage that produced this error.
    pub fn stage(&self) -> Stage {
        match self {
            AnalysisError::Config(_) => Stage::Config,
            AnalysisError::Decode { .. } => Stage::Decode,
            AnalysisError::Segmentation(_) => Stage::Segmentation,
            AnalysisError::NoLeafDetected => Stage::CropExtraction,
            AnalysisError::ModelLoad { stage, .. } => *stage,
            AnalysisError::Inference { stage, .. } => *stage,
            AnalysisError::Severity(_) => Stage::SeverityEstimation,
            AnalysisError::WorkerLost => Stage::Worker,
        }
    }

    /// Whether this error aborts the whole request. Severity failures are
    /// the only non-fatal case.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, AnalysisError::Severity(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_errors_are_non_fatal() {
        let err = AnalysisError::Severity("hsv conversion failed".into());
        assert!(!err.is_fatal());
        assert_eq!(err.stage(), Stage::SeverityEstimation);
    }

    #[test]
    fn model_load_reports_its_stage() {
        let err = AnalysisError::ModelLoad {
            stage: Stage::Classification,
            cause: "file not found".into(),
        };
        assert!(err.is_fatal());
        assert_eq!(err.stage(), Stage::Classification);
        assert!(err.to_string().contains("classification"));
    }

    #[test]
    fn no_leaf_is_attributed_to_crop_extraction() {
        assert_eq!(AnalysisError::NoLeafDetected.stage(), Stage::CropExtraction);
    }

    #[test]
    fn config_errors_are_attributed_before_any_stage() {
        let err = AnalysisError::from(crate::config::ConfigError::Parse {
            path: "leafsense.toml".into(),
            cause: "unexpected key".into(),
        });
        assert_eq!(err.stage(), Stage::Config);
        assert_eq!(err.stage().as_str(), "config");
    }

    #[test]
    fn lost_worker_has_its_own_stage() {
        let err = AnalysisError::WorkerLost;
        assert!(err.is_fatal());
        assert_eq!(err.stage(), Stage::Worker);
    }
}
