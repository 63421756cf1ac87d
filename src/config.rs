use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Severity bucket cutoffs, in percent of diseased leaf area.
/// `early` is where early-stage begins, `advanced` where advanced-stage
/// begins; everything below `early` (and every healthy classification)
/// reads as healthy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SeverityThresholds {
    pub early: f32,
    pub advanced: f32,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            early: 10.0,
            advanced: 30.0,
        }
    }
}

/// Confidence cutoffs driving the UI-level trust flag on a diagnosis.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConfidenceThresholds {
    /// Below this the result is flagged as low-trust.
    pub minimum: f32,
    /// At or above this the result is flagged as reliable.
    pub high: f32,
}

impl Default for ConfidenceThresholds {
    fn default() -> Self {
        Self {
            minimum: 0.6,
            high: 0.85,
        }
    }
}

/// Background separation parameters used by crop extraction.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackgroundParams {
    /// Grayscale intensity above which a pixel counts as (near-white)
    /// background.
    pub white_threshold: u8,
    /// L-inf radius of the structuring element for the close/open pass.
    /// Radius 3 corresponds to a 7x7 kernel.
    pub kernel_radius: u8,
    /// Connected regions smaller than this many pixels are ignored.
    pub min_region_area: u32,
}

impl Default for BackgroundParams {
    fn default() -> Self {
        Self {
            white_threshold: 250,
            kernel_radius: 3,
            min_region_area: 16,
        }
    }
}

/// Classifier input geometry and normalization constants. These are fixed
/// per trained model and must match what the weights were trained with.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierInput {
    /// Shorter side is scaled to this before cropping.
    pub resize_to: u32,
    /// Side length of the centered square crop fed to the model.
    pub crop_to: u32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Default for ClassifierInput {
    fn default() -> Self {
        Self {
            resize_to: 256,
            crop_to: 224,
            mean: [0.485, 0.456, 0.406],
            std: [0.229, 0.224, 0.225],
        }
    }
}

/// Lesion/leaf color ranges for the severity heuristic, in OpenCV-scale HSV
/// (hue 0-179, saturation and value 0-255).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LesionParams {
    pub leaf_hue: [u8; 2],
    pub leaf_sat_min: u8,
    pub leaf_val_min: u8,
    pub lesion_hue: [u8; 2],
    pub lesion_sat_min: u8,
    pub lesion_val_max: u8,
    /// Leaf masks below this pixel count yield severity 0 to avoid
    /// division noise on tiny crops.
    pub min_leaf_area: u32,
}

impl Default for LesionParams {
    fn default() -> Self {
        Self {
            leaf_hue: [20, 90],
            leaf_sat_min: 40,
            leaf_val_min: 40,
            lesion_hue: [5, 25],
            lesion_sat_min: 30,
            lesion_val_max: 160,
            min_leaf_area: 200,
        }
    }
}

/// Full pipeline configuration. Everything the stages consume is supplied
/// here; stage logic carries no hard-coded paths or thresholds.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    /// Background-removal model weights. When absent, segmentation falls
    /// back to intensity thresholding alone (studio photos on a white
    /// scanner bed).
    pub segmentation_model: Option<PathBuf>,
    /// Classifier model weights.
    pub classifier_model: Option<PathBuf>,
    /// Labels file: one class name per line, ordered to match the model
    /// output width.
    pub labels: Option<PathBuf>,
    /// Label treated as the healthy class for the severity override.
    pub healthy_label: Option<String>,
    pub severity: SeverityThresholds,
    pub confidence: ConfidenceThresholds,
    pub background: BackgroundParams,
    pub classifier_input: ClassifierInput,
    pub lesion: LesionParams,
}

pub const DEFAULT_HEALTHY_LABEL: &str = "Healthy";

impl PipelineConfig {
    /// Load configuration from a TOML file. Missing keys fall back to
    /// defaults.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            cause: e.to_string(),
        })?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            cause: e.to_string(),
        })
    }

    pub fn healthy_label(&self) -> &str {
        self.healthy_label.as_deref().unwrap_or(DEFAULT_HEALTHY_LABEL)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {cause}")]
    Read { path: PathBuf, cause: String },
    #[error("failed to parse config {path}: {cause}")]
    Parse { path: PathBuf, cause: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_reference_values() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.severity.early, 10.0);
        assert_eq!(cfg.severity.advanced, 30.0);
        assert_eq!(cfg.confidence.minimum, 0.6);
        assert_eq!(cfg.confidence.high, 0.85);
        assert_eq!(cfg.background.white_threshold, 250);
        assert_eq!(cfg.background.kernel_radius, 3);
        assert_eq!(cfg.classifier_input.resize_to, 256);
        assert_eq!(cfg.classifier_input.crop_to, 224);
        assert_eq!(cfg.healthy_label(), "Healthy");
    }

    #[test]
    fn partial_toml_overrides_only_named_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "classifier_model = \"models/mango.onnx\"\n\
             [severity]\n\
             early = 5.0"
        )
        .unwrap();

        let cfg = PipelineConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(
            cfg.classifier_model.as_deref(),
            Some(Path::new("models/mango.onnx"))
        );
        assert_eq!(cfg.severity.early, 5.0);
        // Unset keys keep their defaults.
        assert_eq!(cfg.severity.advanced, 30.0);
        assert_eq!(cfg.confidence.high, 0.85);
    }

    #[test]
    fn missing_config_file_is_a_read_error() {
        let err = PipelineConfig::from_toml_file(Path::new("/nonexistent/cfg.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
