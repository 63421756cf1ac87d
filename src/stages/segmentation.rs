//! Background removal: isolate the leaf silhouette and composite it onto a
//! white background so downstream geometry sees opaque RGB.

use image::{DynamicImage, GrayImage, Rgb, RgbImage};
use std::sync::Arc;

use crate::error::AnalysisError;

/// Alpha value at or above which a pixel counts as foreground in the
/// binarized segmentation mask.
const FOREGROUND_ALPHA: u8 = 128;

/// Produces a per-pixel foreground alpha map (0 = background, 255 = leaf)
/// with the same dimensions as the input.
///
/// Backends must be safe for concurrent invocation; ONNX-backed
/// implementations guard their session with an internal lock.
pub trait SegmentationBackend: Send + Sync {
    fn alpha_mask(&self, rgb: &RgbImage) -> Result<GrayImage, AnalysisError>;
}

/// Pass-through backend for images captured against a controlled white
/// scanner bed: everything is treated as foreground and the white-intensity
/// threshold in crop extraction does the separation.
pub struct LumaBackend;

impl SegmentationBackend for LumaBackend {
    fn alpha_mask(&self, rgb: &RgbImage) -> Result<GrayImage, AnalysisError> {
        Ok(GrayImage::from_pixel(
            rgb.width(),
            rgb.height(),
            image::Luma([255u8]),
        ))
    }
}

/// The segmentation stage. Owns a backend shared across requests; the
/// expensive model session inside an ONNX backend is loaded lazily and at
/// most once per process.
pub struct Segmenter {
    backend: Arc<dyn SegmentationBackend>,
}

impl Segmenter {
    pub fn new(backend: Arc<dyn SegmentationBackend>) -> Self {
        Self { backend }
    }

    /// Run segmentation: returns the binary foreground mask and the RGB
    /// image with every background pixel replaced by pure white.
    pub fn segment(
        &self,
        image: &DynamicImage,
    ) -> Result<(GrayImage, RgbImage), AnalysisError> {
        let rgb = flatten_to_rgb(image);
        let alpha = self.backend.alpha_mask(&rgb)?;

        if alpha.dimensions() != rgb.dimensions() {
            return Err(AnalysisError::Segmentation(format!(
                "mask dimensions {:?} do not match input {:?}",
                alpha.dimensions(),
                rgb.dimensions()
            )));
        }

        let mut mask = GrayImage::new(rgb.width(), rgb.height());
        let mut composited = RgbImage::new(rgb.width(), rgb.height());
        for (x, y, px) in rgb.enumerate_pixels() {
            let a = alpha.get_pixel(x, y)[0] as u16;
            let blend = |c: u8| -> u8 { ((c as u16 * a + 255 * (255 - a)) / 255) as u8 };
            composited.put_pixel(x, y, Rgb([blend(px[0]), blend(px[1]), blend(px[2])]));
            let fg = if a as u8 >= FOREGROUND_ALPHA { 255 } else { 0 };
            mask.put_pixel(x, y, image::Luma([fg]));
        }

        Ok((mask, composited))
    }
}

/// Normalize any decoded image mode to opaque RGB. Images carrying an alpha
/// channel are composited onto pure white rather than having the channel
/// dropped.
pub fn flatten_to_rgb(image: &DynamicImage) -> RgbImage {
    match image {
        DynamicImage::ImageRgb8(rgb) => rgb.clone(),
        DynamicImage::ImageRgba8(rgba) => {
            let mut out = RgbImage::new(rgba.width(), rgba.height());
            for (x, y, px) in rgba.enumerate_pixels() {
                let a = px[3] as u16;
                let blend = |c: u8| -> u8 { ((c as u16 * a + 255 * (255 - a)) / 255) as u8 };
                out.put_pixel(x, y, Rgb([blend(px[0]), blend(px[1]), blend(px[2])]));
            }
            out
        }
        other => {
            if other.color().has_alpha() {
                flatten_to_rgb(&DynamicImage::ImageRgba8(other.to_rgba8()))
            } else {
                other.to_rgb8()
            }
        }
    }
}

#[cfg(feature = "onnx")]
pub use onnx::OnnxSegmenter;

#[cfg(feature = "onnx")]
mod onnx {
    use super::*;
    use crate::error::Stage;
    use ort::session::Session;
    use ort::value::TensorRef;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    /// Side length the salient-object model expects.
    const MODEL_INPUT: u32 = 320;
    const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
    const STD: [f32; 3] = [0.229, 0.224, 0.225];

    /// Salient-object segmentation through an ONNX model (U2Net-style:
    /// NCHW input, single-channel saliency output).
    ///
    /// The session is created on the first request and reused for the rest
    /// of the process lifetime. `ort::Session::run` needs `&mut self`, so
    /// the session sits behind a `Mutex`; concurrent callers serialize on
    /// it rather than corrupting shared state.
    pub struct OnnxSegmenter {
        model_path: PathBuf,
        session: Mutex<Option<Session>>,
    }

    impl OnnxSegmenter {
        pub fn new(model_path: &Path) -> Self {
            Self {
                model_path: model_path.to_path_buf(),
                session: Mutex::new(None),
            }
        }

        fn load_session(&self) -> Result<Session, AnalysisError> {
            if !self.model_path.exists() {
                return Err(AnalysisError::ModelLoad {
                    stage: Stage::Segmentation,
                    cause: format!("model file not found: {}", self.model_path.display()),
                });
            }
            Session::builder()
                .and_then(|b| b.with_intra_threads(2))
                .and_then(|b| b.commit_from_file(&self.model_path))
                .map_err(|e| AnalysisError::ModelLoad {
                    stage: Stage::Segmentation,
                    cause: e.to_string(),
                })
        }
    }

    impl SegmentationBackend for OnnxSegmenter {
        fn alpha_mask(&self, rgb: &RgbImage) -> Result<GrayImage, AnalysisError> {
            let (orig_w, orig_h) = rgb.dimensions();
            let resized = image::imageops::resize(
                rgb,
                MODEL_INPUT,
                MODEL_INPUT,
                image::imageops::FilterType::Triangle,
            );

            let side = MODEL_INPUT as usize;
            let input = ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
                let v = resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0;
                (v - MEAN[c]) / STD[c]
            });

            let mut guard = self
                .session
                .lock()
                .map_err(|_| AnalysisError::Segmentation("session lock poisoned".into()))?;
            if guard.is_none() {
                tracing::info!(model = %self.model_path.display(), "loading segmentation model");
                *guard = Some(self.load_session()?);
            }
            let session = guard.as_mut().expect("session initialized above");

            let tensor = TensorRef::from_array_view(&input).map_err(|e| {
                AnalysisError::Inference {
                    stage: Stage::Segmentation,
                    cause: e.to_string(),
                }
            })?;
            let outputs = session
                .run(ort::inputs![tensor])
                .map_err(|e| AnalysisError::Inference {
                    stage: Stage::Segmentation,
                    cause: e.to_string(),
                })?;
            let (shape, data) =
                outputs[0]
                    .try_extract_tensor::<f32>()
                    .map_err(|e| AnalysisError::Inference {
                        stage: Stage::Segmentation,
                        cause: e.to_string(),
                    })?;

            if shape.len() < 2 {
                return Err(AnalysisError::Inference {
                    stage: Stage::Segmentation,
                    cause: format!("unexpected saliency output shape {shape:?}"),
                });
            }
            let out_h = shape[shape.len() - 2] as usize;
            let out_w = shape[shape.len() - 1] as usize;
            if data.len() < out_h * out_w {
                return Err(AnalysisError::Inference {
                    stage: Stage::Segmentation,
                    cause: "saliency output shorter than its declared shape".into(),
                });
            }
            let saliency = &data[..out_h * out_w];

            // Min-max normalize the saliency map before thresholding into
            // an alpha channel.
            let (mut lo, mut hi) = (f32::INFINITY, f32::NEG_INFINITY);
            for &v in saliency {
                lo = lo.min(v);
                hi = hi.max(v);
            }
            let range = (hi - lo).max(f32::EPSILON);

            let mut small = GrayImage::new(out_w as u32, out_h as u32);
            for (i, &v) in saliency.iter().enumerate() {
                let a = ((v - lo) / range * 255.0).round().clamp(0.0, 255.0) as u8;
                small.put_pixel((i % out_w) as u32, (i / out_w) as u32, image::Luma([a]));
            }

            Ok(image::imageops::resize(
                &small,
                orig_w,
                orig_h,
                image::imageops::FilterType::Triangle,
            ))
        }
    }
}
