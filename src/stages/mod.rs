pub mod classify;
pub mod crop;
pub mod segmentation;
pub mod severity;

pub use classify::{Classifier, ClassifierBackend};
pub use segmentation::{SegmentationBackend, Segmenter};
pub use severity::{HsvSeverity, SeverityEstimator};
