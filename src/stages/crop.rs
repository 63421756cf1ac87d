//! Crop extraction: turn the white-composited image plus segmentation mask
//! into a tight axis-aligned crop of the leaf.

use image::{GrayImage, Luma, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::morphology::{close, open};
use imageproc::region_labelling::{connected_components, Connectivity};
use std::collections::HashMap;

use crate::config::BackgroundParams;
use crate::error::AnalysisError;
use crate::models::{LeafCrop, Region};

/// Binary foreground mask: non-white pixels that the segmentation mask also
/// marked as foreground. Near-white intensities (above the configured
/// threshold) are background.
pub fn foreground_mask(
    composited: &RgbImage,
    seg_mask: &GrayImage,
    white_threshold: u8,
) -> GrayImage {
    let gray = image::imageops::grayscale(composited);
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let intensity = gray.get_pixel(x, y)[0];
        let foreground = intensity <= white_threshold && seg_mask.get_pixel(x, y)[0] > 0;
        Luma([if foreground { 255 } else { 0 }])
    })
}

/// Morphological closing then opening with a fixed structuring element:
/// fills small gaps and removes speckle without moving the silhouette.
pub fn denoise_mask(mask: &GrayImage, kernel_radius: u8) -> GrayImage {
    let closed = close(mask, Norm::LInf, kernel_radius);
    open(&closed, Norm::LInf, kernel_radius)
}

/// Extract connected foreground regions with their extents and pixel
/// counts. Regions below `min_area` pixels are dropped.
pub fn find_regions(mask: &GrayImage, min_area: u32) -> Vec<Region> {
    let labeled = connected_components(mask, Connectivity::Eight, Luma([0u8]));

    let mut extents: HashMap<u32, (u32, u32, u32, u32, u32)> = HashMap::new();
    for (x, y, label) in labeled.enumerate_pixels() {
        let label_val = label[0];
        if label_val == 0 {
            continue;
        }
        extents
            .entry(label_val)
            .and_modify(|(min_x, min_y, max_x, max_y, count)| {
                *min_x = (*min_x).min(x);
                *min_y = (*min_y).min(y);
                *max_x = (*max_x).max(x);
                *max_y = (*max_y).max(y);
                *count += 1;
            })
            .or_insert((x, y, x, y, 1));
    }

    extents
        .into_iter()
        .map(|(label, (min_x, min_y, max_x, max_y, count))| Region {
            label,
            min_x,
            min_y,
            max_x,
            max_y,
            pixel_count: count,
        })
        .filter(|r| r.pixel_count >= min_area)
        .collect()
}

/// Full crop-extraction stage: threshold, denoise, pick the largest region,
/// crop its axis-aligned bounding box out of the composited image.
///
/// Zero surviving regions is the expected outcome for a blank or
/// over-exposed photo and maps to `NoLeafDetected`.
pub fn extract_leaf(
    composited: &RgbImage,
    seg_mask: &GrayImage,
    params: &BackgroundParams,
) -> Result<LeafCrop, AnalysisError> {
    let mask = foreground_mask(composited, seg_mask, params.white_threshold);
    let mask = denoise_mask(&mask, params.kernel_radius);

    let regions = find_regions(&mask, params.min_region_area);
    let leaf = regions
        .into_iter()
        .max_by_key(Region::area)
        .ok_or(AnalysisError::NoLeafDetected)?;

    let bbox = leaf.bounding_box();
    tracing::debug!(
        x = bbox.x,
        y = bbox.y,
        width = bbox.width,
        height = bbox.height,
        area = leaf.area(),
        "leaf region selected"
    );

    let image =
        image::imageops::crop_imm(composited, bbox.x, bbox.y, bbox.width, bbox.height).to_image();
    Ok(LeafCrop { image, bbox })
}
