use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use ndarray::Array4;
use std::sync::Arc;
use tempfile::NamedTempFile;

use leafsense::{
    AnalysisError, ClassifierBackend, LeafPipeline, PipelineConfig, SegmentationBackend, Severity,
    SeverityEstimator, Vocabulary,
};

/// Leaf-green and lesion-brown reference colors used by the synthetic
/// scenes. Both fall inside the default HSV bands of the severity stage.
pub const LEAF_GREEN: Rgb<u8> = Rgb([40, 160, 60]);
pub const LESION_BROWN: Rgb<u8> = Rgb([120, 66, 30]);
pub const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

/// Index of "Anthracnose" and "Healthy" in the reference vocabulary.
pub const ANTHRACNOSE: usize = 0;
pub const HEALTHY: usize = 5;

/// Segmentation backend that marks every pixel as foreground, leaving
/// background separation to the white-intensity threshold.
pub struct FullForeground;

impl SegmentationBackend for FullForeground {
    fn alpha_mask(&self, rgb: &RgbImage) -> Result<GrayImage, AnalysisError> {
        Ok(GrayImage::from_pixel(
            rgb.width(),
            rgb.height(),
            Luma([255]),
        ))
    }
}

/// Classifier backend returning the same logits for every input.
pub struct FixedLogits(pub Vec<f32>);

impl ClassifierBackend for FixedLogits {
    fn infer(&self, _input: &Array4<f32>) -> Result<Vec<f32>, AnalysisError> {
        Ok(self.0.clone())
    }
}

/// Severity estimator that fails on every crop, for exercising the
/// orchestrator's downgrade path.
pub struct FailingSeverity;

impl SeverityEstimator for FailingSeverity {
    fn estimate(
        &self,
        _crop: &RgbImage,
        _predicted_is_healthy: bool,
    ) -> Result<Severity, AnalysisError> {
        Err(AnalysisError::Severity(
            "no leaf pixels in any hue band".into(),
        ))
    }
}

/// Pipeline wired with deterministic backends: the reference vocabulary
/// and a classifier that strongly favors `winning_class`.
pub fn test_pipeline(winning_class: usize) -> LeafPipeline {
    let vocab = Vocabulary::mango_reference();
    let mut logits = vec![0.0f32; vocab.len()];
    logits[winning_class] = 5.0;
    LeafPipeline::with_backends(
        PipelineConfig::default(),
        Arc::new(FullForeground),
        Arc::new(FixedLogits(logits)),
        vocab,
    )
}

/// A white frame with a healthy (all-green) leaf rectangle in the middle.
pub fn healthy_leaf_scene() -> DynamicImage {
    let mut img = RgbImage::from_pixel(400, 300, WHITE);
    for y in 75..225 {
        for x in 100..300 {
            img.put_pixel(x, y, LEAF_GREEN);
        }
    }
    DynamicImage::ImageRgb8(img)
}

/// A white frame with a diseased leaf: the green rectangle carries brown
/// stripes covering roughly 14% of its area.
pub fn diseased_leaf_scene() -> DynamicImage {
    let mut img = RgbImage::from_pixel(400, 300, WHITE);
    for y in 75..225 {
        for x in 100..300 {
            img.put_pixel(x, y, LEAF_GREEN);
        }
    }
    // Seven 3-row stripes across the 150-row leaf.
    for s in 1..=7u32 {
        let y0 = 75 + s * 18;
        for y in y0..y0 + 3 {
            for x in 100..300 {
                img.put_pixel(x, y, LESION_BROWN);
            }
        }
    }
    DynamicImage::ImageRgb8(img)
}

/// A completely white (blank/over-exposed) frame.
pub fn blank_scene() -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(256, 256, WHITE))
}

/// Save a scene to a temporary PNG file; keep the handle alive while the
/// path is in use.
pub fn save_scene(scene: &DynamicImage) -> NamedTempFile {
    let file = tempfile::Builder::new()
        .suffix(".png")
        .tempfile()
        .expect("failed to create temp image file");
    scene
        .save_with_format(file.path(), image::ImageFormat::Png)
        .expect("failed to save test image");
    file
}
