//! Pipeline orchestrator: decode, segment, crop, then classify and score
//! severity against the same crop, merging everything into one
//! `DiagnosisResult`.

use image::DynamicImage;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::error::AnalysisError;
use crate::models::{ConfidenceFlag, DiagnosisResult, LeafCrop, Severity, Vocabulary};
use crate::stages::classify::{Classifier, ClassifierBackend};
use crate::stages::segmentation::{SegmentationBackend, Segmenter};
use crate::stages::crop;
use crate::stages::severity::{HsvSeverity, SeverityEstimator};

/// Where a request currently stands. Progression is strictly forward;
/// failures carry their own stage via `AnalysisError::stage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Segmenting,
    Cropping,
    Classifying,
    EstimatingSeverity,
    Merged,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineState::Idle => "idle",
            PipelineState::Segmenting => "segmenting",
            PipelineState::Cropping => "cropping",
            PipelineState::Classifying => "classifying",
            PipelineState::EstimatingSeverity => "estimating-severity",
            PipelineState::Merged => "merged",
        };
        f.write_str(s)
    }
}

/// The leaf analysis pipeline. Construct once per process and share across
/// requests; the model sessions inside the backends are loaded lazily on
/// the first request and reused afterwards.
pub struct LeafPipeline {
    config: PipelineConfig,
    segmenter: Segmenter,
    classifier: Classifier,
    severity: Arc<dyn SeverityEstimator>,
}

impl LeafPipeline {
    /// Wire the pipeline from explicitly supplied backends. This is the
    /// seam tests and embedders use to swap inference implementations
    /// without touching the orchestration contract.
    pub fn with_backends(
        config: PipelineConfig,
        segmentation: Arc<dyn SegmentationBackend>,
        classification: Arc<dyn ClassifierBackend>,
        vocabulary: Vocabulary,
    ) -> Self {
        let classifier_input = config.classifier_input.clone();
        let severity = Arc::new(HsvSeverity::new(
            config.lesion.clone(),
            config.severity.clone(),
        ));
        Self {
            segmenter: Segmenter::new(segmentation),
            classifier: Classifier::new(classification, vocabulary, classifier_input),
            severity,
            config,
        }
    }

    /// Replace the severity estimator. The default is the HSV band
    /// heuristic configured from `PipelineConfig`.
    pub fn with_severity_estimator(mut self, estimator: Arc<dyn SeverityEstimator>) -> Self {
        self.severity = estimator;
        self
    }

    /// Build the pipeline from configuration using ONNX sessions for both
    /// models. Without a configured segmentation model, background removal
    /// degrades to intensity thresholding alone.
    #[cfg(feature = "onnx")]
    pub fn from_config(config: PipelineConfig) -> Result<Self, AnalysisError> {
        use crate::error::Stage;
        use crate::stages::classify::OnnxClassifier;
        use crate::stages::segmentation::{LumaBackend, OnnxSegmenter};

        let segmentation: Arc<dyn SegmentationBackend> = match &config.segmentation_model {
            Some(path) => Arc::new(OnnxSegmenter::new(path)),
            None => Arc::new(LumaBackend),
        };

        let classifier_model =
            config
                .classifier_model
                .as_deref()
                .ok_or_else(|| AnalysisError::ModelLoad {
                    stage: Stage::Classification,
                    cause: "no classifier model path configured".into(),
                })?;
        let classification: Arc<dyn ClassifierBackend> =
            Arc::new(OnnxClassifier::new(classifier_model));

        let vocabulary = match &config.labels {
            Some(path) => Vocabulary::from_file(path)?,
            None => Vocabulary::mango_reference(),
        };

        Ok(Self::with_backends(
            config,
            segmentation,
            classification,
            vocabulary,
        ))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Analyze an image file. The original file is only read, never
    /// modified.
    pub fn analyze_file(&self, path: &Path) -> Result<DiagnosisResult, AnalysisError> {
        Ok(self.analyze_file_with_crop(path)?.0)
    }

    /// Like `analyze_file`, additionally returning the leaf crop for
    /// callers that persist or display the processed image.
    pub fn analyze_file_with_crop(
        &self,
        path: &Path,
    ) -> Result<(DiagnosisResult, LeafCrop), AnalysisError> {
        let image = image::open(path).map_err(|source| AnalysisError::Decode {
            path: path.to_path_buf(),
            source,
        })?;
        self.analyze_with_crop(&image, Some(path))
    }

    /// Analyze an already-decoded image.
    pub fn analyze(
        &self,
        image: &DynamicImage,
        source: Option<&Path>,
    ) -> Result<DiagnosisResult, AnalysisError> {
        Ok(self.analyze_with_crop(image, source)?.0)
    }

    /// Core sequencing: Segmenting -> Cropping -> Classifying ->
    /// EstimatingSeverity -> Merged. Classification failures are fatal;
    /// severity failures downgrade to an explicit unknown/0%.
    pub fn analyze_with_crop(
        &self,
        image: &DynamicImage,
        source: Option<&Path>,
    ) -> Result<(DiagnosisResult, LeafCrop), AnalysisError> {
        let mut state = PipelineState::Segmenting;
        tracing::debug!(%state, width = image.width(), height = image.height(), "analysis started");
        let (mask, composited) = self.segmenter.segment(image)?;

        state = PipelineState::Cropping;
        tracing::debug!(%state, "mask ready");
        let leaf_crop = crop::extract_leaf(&composited, &mask, &self.config.background)?;
        // The mask is consumed by cropping and not kept beyond it.
        drop(mask);

        state = PipelineState::Classifying;
        tracing::debug!(%state, crop_w = leaf_crop.width(), crop_h = leaf_crop.height(), "crop ready");
        let probabilities = self.classifier.classify(&leaf_crop)?;
        let (disease, confidence) = {
            let (label, p) = probabilities.top();
            (label.to_owned(), p)
        };

        state = PipelineState::EstimatingSeverity;
        tracing::debug!(%state, disease = %disease, confidence, "class prediction ready");
        let is_healthy = disease == self.config.healthy_label();
        let severity = match self.severity.estimate(&leaf_crop.image, is_healthy) {
            Ok(sev) => sev,
            Err(err) => {
                // Best effort: a severity failure never blocks a valid
                // classification.
                tracing::warn!(error = %err, "severity estimation failed, reporting unknown");
                Severity::unknown()
            }
        };

        state = PipelineState::Merged;
        tracing::info!(
            %state,
            disease = %disease,
            confidence,
            severity = severity.percentage,
            bucket = severity.bucket.as_str(),
            "analysis complete"
        );

        let result = DiagnosisResult {
            disease,
            confidence,
            probabilities,
            severity_percentage: severity.percentage,
            severity_stage: severity.bucket,
            confidence_flag: ConfidenceFlag::from_confidence(confidence, &self.config.confidence),
            image_path: source.map(Path::to_path_buf),
        };
        Ok((result, leaf_crop))
    }
}
