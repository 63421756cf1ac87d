use image::RgbImage;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::path::PathBuf;

use crate::config::ConfidenceThresholds;
use crate::error::{AnalysisError, Stage};

/// Axis-aligned bounding box in image coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Whether this box lies entirely within an image of the given size.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.x + self.width <= width && self.y + self.height <= height
    }
}

/// A labeled connected region of a binary mask, tracked by its extents and
/// pixel count. The region with the largest pixel count is taken as the
/// leaf silhouette.
#[derive(Debug, Clone)]
pub struct Region {
    pub label: u32,
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
    pub pixel_count: u32,
}

impl Region {
    pub fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }

    /// Enclosed area measured in mask pixels, not bounding-box area.
    pub fn area(&self) -> u32 {
        self.pixel_count
    }

    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox {
            x: self.min_x,
            y: self.min_y,
            width: self.width(),
            height: self.height(),
        }
    }
}

/// The cropped leaf: an RGB bitmap holding only the bounding-box region of
/// the detected leaf, composited onto white, plus where that box sat in the
/// source image.
#[derive(Debug, Clone)]
pub struct LeafCrop {
    pub image: RgbImage,
    pub bbox: BoundingBox,
}

impl LeafCrop {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// The fixed, ordered list of disease labels a classifier model can output.
/// Bound to the model weights: substituting a differently sized or ordered
/// list is an explicit configuration change, validated against the model
/// output width before the first prediction is trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vocabulary {
    labels: Vec<String>,
}

impl Vocabulary {
    pub fn new(labels: Vec<String>) -> Result<Self, AnalysisError> {
        if labels.is_empty() {
            return Err(AnalysisError::ModelLoad {
                stage: Stage::Classification,
                cause: "label vocabulary is empty".into(),
            });
        }
        Ok(Self { labels })
    }

    /// Load labels from a text file, one per line. Blank lines and
    /// surrounding whitespace are ignored.
    pub fn from_file(path: &std::path::Path) -> Result<Self, AnalysisError> {
        let text = std::fs::read_to_string(path).map_err(|e| AnalysisError::ModelLoad {
            stage: Stage::Classification,
            cause: format!("cannot read labels file {}: {e}", path.display()),
        })?;
        let labels: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_owned)
            .collect();
        Self::new(labels)
    }

    /// The reference vocabulary the bundled mango model was trained with.
    pub fn mango_reference() -> Self {
        Self {
            labels: [
                "Anthracnose",
                "Bacterial Canker",
                "Cutting Weevil",
                "Die Back",
                "Gall Midge",
                "Healthy",
                "Powdery Mildew",
                "Sooty Mould",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn label(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

/// A probability distribution over the vocabulary, in vocabulary order.
/// Serializes as a `label -> probability` map.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassProbabilities {
    entries: Vec<(String, f32)>,
}

impl ClassProbabilities {
    /// Pair probabilities with vocabulary labels. Lengths must already have
    /// been validated against the model output width.
    pub fn new(vocabulary: &Vocabulary, probabilities: &[f32]) -> Self {
        debug_assert_eq!(vocabulary.len(), probabilities.len());
        Self {
            entries: vocabulary
                .labels()
                .iter()
                .zip(probabilities)
                .map(|(label, &p)| (label.clone(), p))
                .collect(),
        }
    }

    /// The most probable class and its probability.
    pub fn top(&self) -> (&str, f32) {
        let (label, p) = self
            .entries
            .iter()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .expect("vocabulary is never empty");
        (label.as_str(), *p)
    }

    pub fn probability_of(&self, label: &str) -> Option<f32> {
        self.entries
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, p)| *p)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.entries.iter().map(|(l, p)| (l.as_str(), *p))
    }

    pub fn sum(&self) -> f32 {
        self.entries.iter().map(|(_, p)| p).sum()
    }
}

impl Serialize for ClassProbabilities {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (label, p) in &self.entries {
            map.serialize_entry(label, p)?;
        }
        map.end()
    }
}

/// Discrete severity stage derived from the diseased-area percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeverityBucket {
    Healthy,
    EarlyStage,
    AdvancedStage,
    /// Severity estimation failed; the rest of the diagnosis stands.
    Unknown,
}

impl SeverityBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeverityBucket::Healthy => "Healthy",
            SeverityBucket::EarlyStage => "Early Stage",
            SeverityBucket::AdvancedStage => "Advanced Stage",
            SeverityBucket::Unknown => "Unknown",
        }
    }
}

impl Serialize for SeverityBucket {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Diseased-area percentage plus its bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Severity {
    pub percentage: f32,
    pub bucket: SeverityBucket,
}

impl Severity {
    pub fn unknown() -> Self {
        Self {
            percentage: 0.0,
            bucket: SeverityBucket::Unknown,
        }
    }
}

/// UI-level trust flag for the top-1 confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceFlag {
    Low,
    Moderate,
    High,
}

impl ConfidenceFlag {
    pub fn from_confidence(confidence: f32, thresholds: &ConfidenceThresholds) -> Self {
        if confidence >= thresholds.high {
            ConfidenceFlag::High
        } else if confidence >= thresholds.minimum {
            ConfidenceFlag::Moderate
        } else {
            ConfidenceFlag::Low
        }
    }
}

/// The terminal record of one analysis. Immutable once built; ownership
/// passes to the caller, who persists or displays it.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosisResult {
    pub disease: String,
    pub confidence: f32,
    pub probabilities: ClassProbabilities,
    pub severity_percentage: f32,
    pub severity_stage: SeverityBucket,
    pub confidence_flag: ConfidenceFlag,
    /// Path of the analyzed input, when the request came in as a file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_path: Option<PathBuf>,
}
