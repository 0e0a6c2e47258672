//! FER+ facial expression classifier via ONNX Runtime.
//!
//! Takes a face crop, converts it to a 64×64 grayscale tensor of raw pixel
//! values and turns the eight FER+ logits into [`Expressions`].

use crate::types::{BoundingBox, Expressions};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: u32 = 64;
/// FER+ class order: neutral, happiness, surprise, sadness, anger, disgust, fear, contempt.
const NUM_CLASSES: usize = 8;

#[derive(Error, Debug)]
pub enum ExpressionError {
    #[error("model file not found: {0}; download emotion-ferplus-8.onnx from the ONNX model zoo")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// FER+ based expression classifier.
pub struct ExpressionClassifier {
    session: Session,
}

impl ExpressionClassifier {
    pub fn load(model_path: &Path) -> Result<Self, ExpressionError> {
        if !model_path.exists() {
            return Err(ExpressionError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(1)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            "loaded FER+ model"
        );

        Ok(Self { session })
    }

    /// Classify the expression of the face inside `bbox`.
    pub fn classify(
        &mut self,
        frame: &RgbImage,
        bbox: &BoundingBox,
    ) -> Result<Expressions, ExpressionError> {
        let Some(input) = face_tensor(frame, bbox) else {
            return Ok(Expressions::default());
        };

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, logits) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ExpressionError::InferenceFailed(format!("logits: {e}")))?;

        if logits.len() < NUM_CLASSES {
            return Err(ExpressionError::InferenceFailed(format!(
                "expected {NUM_CLASSES} logits, got {}",
                logits.len()
            )));
        }

        Ok(expressions_from_logits(&logits[..NUM_CLASSES]))
    }
}

/// Crop the (clamped) face box and build the 1×1×64×64 input.
/// Returns `None` when the box lies entirely outside the frame.
fn face_tensor(frame: &RgbImage, bbox: &BoundingBox) -> Option<Array4<f32>> {
    let (fw, fh) = frame.dimensions();
    let x0 = bbox.x.max(0.0).floor() as u32;
    let y0 = bbox.y.max(0.0).floor() as u32;
    let x1 = ((bbox.x + bbox.width).ceil().max(0.0) as u32).min(fw);
    let y1 = ((bbox.y + bbox.height).ceil().max(0.0) as u32).min(fh);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }

    let crop = imageops::crop_imm(frame, x0, y0, x1 - x0, y1 - y0).to_image();
    let gray = imageops::grayscale(&crop);
    let small = imageops::resize(&gray, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);

    let size = INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 1, size, size));
    for (x, y, p) in small.enumerate_pixels() {
        tensor[[0, 0, y as usize, x as usize]] = p[0] as f32;
    }
    Some(tensor)
}

/// Softmax the FER+ logits and fold them into face-api style expression names.
fn expressions_from_logits(logits: &[f32]) -> Expressions {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    let p = |i: usize| if sum > 0.0 { exps[i] / sum } else { 0.0 };

    Expressions {
        neutral: p(0),
        happy: p(1),
        surprised: p(2),
        sad: p(3),
        angry: p(4),
        disgusted: p(5) + p(7),
        fearful: p(6),
    }
}
