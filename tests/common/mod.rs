mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from leafsense for tests
pub use leafsense::{
    AnalysisError, ClassifierBackend, DiagnosisResult, LeafPipeline, PipelineConfig,
    SegmentationBackend, SeverityBucket, Vocabulary,
};
