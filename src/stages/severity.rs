//! Severity estimation: score the diseased-area fraction of the cropped
//! leaf and map it onto a discrete stage.
//!
//! The heuristic works in OpenCV-scale HSV (hue 0-179): leaf pixels sit in
//! the green hue band, lesions in the brown/orange band inside the leaf.

use image::{GrayImage, Luma, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::morphology::{close, open};

use crate::config::{LesionParams, SeverityThresholds};
use crate::error::AnalysisError;
use crate::models::{Severity, SeverityBucket};

/// Structuring-element radii for mask cleanup. The leaf mask is closed so
/// lesion holes stay part of the leaf; the lesion mask is opened to drop
/// speckle.
const LEAF_CLOSE_RADIUS: u8 = 2;
const LESION_OPEN_RADIUS: u8 = 1;

/// RGB to OpenCV-scale HSV: hue in [0,179], saturation and value in
/// [0,255].
pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (rf, gf, bf) = (r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0);
    let max = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let delta = max - min;

    let hue_deg = if delta == 0.0 {
        0.0
    } else if max == rf {
        60.0 * (((gf - bf) / delta) % 6.0)
    } else if max == gf {
        60.0 * ((bf - rf) / delta + 2.0)
    } else {
        60.0 * ((rf - gf) / delta + 4.0)
    };
    let hue_deg = if hue_deg < 0.0 { hue_deg + 360.0 } else { hue_deg };

    let h = (hue_deg / 2.0).round().min(179.0) as u8;
    let s = if max == 0.0 {
        0
    } else {
        (delta / max * 255.0).round() as u8
    };
    let v = (max * 255.0).round() as u8;
    (h, s, v)
}

/// Build the leaf and lesion masks over the crop. The lesion mask is
/// restricted to pixels the (closed) leaf mask covers, so background can
/// never count as diseased area.
pub fn leaf_and_lesion_masks(crop: &RgbImage, p: &LesionParams) -> (GrayImage, GrayImage) {
    let (w, h) = crop.dimensions();
    let mut leaf = GrayImage::new(w, h);
    let mut lesion = GrayImage::new(w, h);

    for (x, y, px) in crop.enumerate_pixels() {
        let (hue, sat, val) = rgb_to_hsv(px[0], px[1], px[2]);
        let is_leaf = hue >= p.leaf_hue[0]
            && hue <= p.leaf_hue[1]
            && sat >= p.leaf_sat_min
            && val >= p.leaf_val_min;
        let is_lesion =
            hue >= p.lesion_hue[0] && hue <= p.lesion_hue[1] && sat >= p.lesion_sat_min && val <= p.lesion_val_max;
        leaf.put_pixel(x, y, Luma([if is_leaf { 255 } else { 0 }]));
        lesion.put_pixel(x, y, Luma([if is_lesion { 255 } else { 0 }]));
    }

    let leaf = close(&leaf, Norm::LInf, LEAF_CLOSE_RADIUS);

    let mut lesion_in_leaf = GrayImage::new(w, h);
    for (x, y, px) in lesion.enumerate_pixels() {
        let inside = px[0] > 0 && leaf.get_pixel(x, y)[0] > 0;
        lesion_in_leaf.put_pixel(x, y, Luma([if inside { 255 } else { 0 }]));
    }
    let lesion = open(&lesion_in_leaf, Norm::LInf, LESION_OPEN_RADIUS);

    (leaf, lesion)
}

/// Diseased-area percentage of the crop, always in [0, 100]. Returns 0 when
/// the leaf mask is too small to divide against meaningfully.
pub fn lesion_percentage(crop: &RgbImage, p: &LesionParams) -> f32 {
    let (leaf, lesion) = leaf_and_lesion_masks(crop, p);
    let leaf_area = leaf.pixels().filter(|px| px[0] > 0).count() as u32;
    if leaf_area < p.min_leaf_area {
        return 0.0;
    }
    let lesion_area = lesion.pixels().filter(|px| px[0] > 0).count() as f32;
    (lesion_area / leaf_area as f32 * 100.0).clamp(0.0, 100.0)
}

/// Map a percentage to its bucket using the configured cutoffs.
pub fn bucket_for(percentage: f32, thresholds: &SeverityThresholds) -> SeverityBucket {
    if percentage < thresholds.early {
        SeverityBucket::Healthy
    } else if percentage < thresholds.advanced {
        SeverityBucket::EarlyStage
    } else {
        SeverityBucket::AdvancedStage
    }
}

/// Run severity estimation over the leaf crop.
///
/// A healthy classification overrides the pixel heuristic: residual color
/// noise must never put a severity on a leaf the model called healthy.
pub fn estimate(
    crop: &RgbImage,
    predicted_is_healthy: bool,
    lesion: &LesionParams,
    thresholds: &SeverityThresholds,
) -> Result<Severity, AnalysisError> {
    if predicted_is_healthy {
        return Ok(Severity {
            percentage: 0.0,
            bucket: SeverityBucket::Healthy,
        });
    }
    if crop.width() == 0 || crop.height() == 0 {
        return Err(AnalysisError::Severity("empty leaf crop".into()));
    }

    let percentage = lesion_percentage(crop, lesion);
    Ok(Severity {
        percentage,
        bucket: bucket_for(percentage, thresholds),
    })
}

/// Seam between the orchestrator and the severity heuristic. Backends must
/// be safe for concurrent invocation.
pub trait SeverityEstimator: Send + Sync {
    fn estimate(
        &self,
        crop: &RgbImage,
        predicted_is_healthy: bool,
    ) -> Result<Severity, AnalysisError>;
}

/// Default estimator: the HSV band heuristic with its configured
/// parameters.
pub struct HsvSeverity {
    lesion: LesionParams,
    thresholds: SeverityThresholds,
}

impl HsvSeverity {
    pub fn new(lesion: LesionParams, thresholds: SeverityThresholds) -> Self {
        Self { lesion, thresholds }
    }
}

impl SeverityEstimator for HsvSeverity {
    fn estimate(
        &self,
        crop: &RgbImage,
        predicted_is_healthy: bool,
    ) -> Result<Severity, AnalysisError> {
        estimate(crop, predicted_is_healthy, &self.lesion, &self.thresholds)
    }
}
