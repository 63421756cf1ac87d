//! Disease classification: fixed-geometry numeric preprocessing, model
//! inference, and conversion of raw logits into a class distribution.

use image::RgbImage;
use ndarray::Array4;
use std::sync::Arc;

use crate::config::ClassifierInput;
use crate::error::{AnalysisError, Stage};
use crate::models::{ClassProbabilities, LeafCrop, Vocabulary};

/// Runs the forward pass over a preprocessed NCHW tensor and returns the
/// raw logits for the single batch row.
///
/// Backends must be safe for concurrent invocation.
pub trait ClassifierBackend: Send + Sync {
    fn infer(&self, input: &Array4<f32>) -> Result<Vec<f32>, AnalysisError>;
}

/// Resize the shorter side to `resize_to`, center-crop to `crop_to`, scale
/// to [0,1] and standardize per channel. These constants are agreed with
/// the trained model and must not drift.
pub fn preprocess(rgb: &RgbImage, cfg: &ClassifierInput) -> Array4<f32> {
    // A crop wider than the resize target would push the centering offsets
    // below zero; cap it at the resized shorter side.
    let crop_to = cfg.crop_to.min(cfg.resize_to);
    let (w, h) = rgb.dimensions();
    let (new_w, new_h) = if w <= h {
        (
            cfg.resize_to,
            ((h as f32 * cfg.resize_to as f32 / w as f32).round() as u32).max(cfg.resize_to),
        )
    } else {
        (
            ((w as f32 * cfg.resize_to as f32 / h as f32).round() as u32).max(cfg.resize_to),
            cfg.resize_to,
        )
    };
    let resized =
        image::imageops::resize(rgb, new_w, new_h, image::imageops::FilterType::CatmullRom);

    let crop_x = (new_w - crop_to) / 2;
    let crop_y = (new_h - crop_to) / 2;
    let cropped =
        image::imageops::crop_imm(&resized, crop_x, crop_y, crop_to, crop_to).to_image();

    let side = crop_to as usize;
    Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
        let v = cropped.get_pixel(x as u32, y as u32)[c] as f32 / 255.0;
        (v - cfg.mean[c]) / cfg.std[c]
    })
}

/// Numerically stable softmax: the maximum logit is subtracted before
/// exponentiating so very large logits cannot overflow.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.iter().map(|&e| e / sum).collect()
}

/// The classification stage: preprocessing geometry, a model backend, and
/// the vocabulary the model was trained against.
pub struct Classifier {
    backend: Arc<dyn ClassifierBackend>,
    vocabulary: Vocabulary,
    input: ClassifierInput,
}

impl Classifier {
    pub fn new(
        backend: Arc<dyn ClassifierBackend>,
        vocabulary: Vocabulary,
        input: ClassifierInput,
    ) -> Self {
        Self {
            backend,
            vocabulary,
            input,
        }
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    /// Classify a leaf crop into a probability distribution over the
    /// vocabulary. A logit width that disagrees with the vocabulary length
    /// is a model/labels packaging error, not a per-image failure.
    pub fn classify(&self, crop: &LeafCrop) -> Result<ClassProbabilities, AnalysisError> {
        let tensor = preprocess(&crop.image, &self.input);
        let logits = self.backend.infer(&tensor)?;

        if logits.len() != self.vocabulary.len() {
            return Err(AnalysisError::ModelLoad {
                stage: Stage::Classification,
                cause: format!(
                    "model output width {} does not match vocabulary length {}",
                    logits.len(),
                    self.vocabulary.len()
                ),
            });
        }

        let probs = softmax(&logits);
        Ok(ClassProbabilities::new(&self.vocabulary, &probs))
    }
}

#[cfg(feature = "onnx")]
pub use onnx::OnnxClassifier;

#[cfg(feature = "onnx")]
mod onnx {
    use super::*;
    use ort::session::Session;
    use ort::value::TensorRef;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    /// ONNX-backed classifier. The session is created lazily on the first
    /// request and shared, behind a lock, for the rest of the process
    /// lifetime.
    pub struct OnnxClassifier {
        model_path: PathBuf,
        session: Mutex<Option<Session>>,
    }

    impl OnnxClassifier {
        pub fn new(model_path: &Path) -> Self {
            Self {
                model_path: model_path.to_path_buf(),
                session: Mutex::new(None),
            }
        }

        fn load_session(&self) -> Result<Session, AnalysisError> {
            if !self.model_path.exists() {
                return Err(AnalysisError::ModelLoad {
                    stage: Stage::Classification,
                    cause: format!("model file not found: {}", self.model_path.display()),
                });
            }
            Session::builder()
                .and_then(|b| b.with_intra_threads(2))
                .and_then(|b| b.commit_from_file(&self.model_path))
                .map_err(|e| AnalysisError::ModelLoad {
                    stage: Stage::Classification,
                    cause: e.to_string(),
                })
        }
    }

    impl ClassifierBackend for OnnxClassifier {
        fn infer(&self, input: &Array4<f32>) -> Result<Vec<f32>, AnalysisError> {
            let mut guard = self.session.lock().map_err(|_| AnalysisError::Inference {
                stage: Stage::Classification,
                cause: "session lock poisoned".into(),
            })?;
            if guard.is_none() {
                tracing::info!(model = %self.model_path.display(), "loading classifier model");
                *guard = Some(self.load_session()?);
            }
            let session = guard.as_mut().expect("session initialized above");

            let tensor =
                TensorRef::from_array_view(input).map_err(|e| AnalysisError::Inference {
                    stage: Stage::Classification,
                    cause: e.to_string(),
                })?;
            let outputs = session
                .run(ort::inputs![tensor])
                .map_err(|e| AnalysisError::Inference {
                    stage: Stage::Classification,
                    cause: e.to_string(),
                })?;
            let (shape, data) =
                outputs[0]
                    .try_extract_tensor::<f32>()
                    .map_err(|e| AnalysisError::Inference {
                        stage: Stage::Classification,
                        cause: e.to_string(),
                    })?;

            let width = shape.last().copied().unwrap_or(0) as usize;
            if width == 0 || data.len() < width {
                return Err(AnalysisError::Inference {
                    stage: Stage::Classification,
                    cause: format!("unexpected logits shape {shape:?}"),
                });
            }
            Ok(data[..width].to_vec())
        }
    }
}
