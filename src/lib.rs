pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod stages;
pub mod worker;

pub use config::PipelineConfig;
pub use error::{AnalysisError, Stage};
pub use models::{
    BoundingBox, ClassProbabilities, ConfidenceFlag, DiagnosisResult, LeafCrop, Region, Severity,
    SeverityBucket, Vocabulary,
};
pub use pipeline::{LeafPipeline, PipelineState};
pub use stages::{
    Classifier, ClassifierBackend, HsvSeverity, SegmentationBackend, Segmenter, SeverityEstimator,
};
pub use worker::{spawn_analysis, AnalysisHandle};
