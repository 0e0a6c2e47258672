//! Face analysis capability: faces, landmarks and expressions for one frame.

use crate::detector::{DetectorError, FaceDetector};
use crate::expression::{ExpressionClassifier, ExpressionError};
use crate::types::FaceDetection;
use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
pub const EXPRESSION_MODEL_FILE: &str = "emotion-ferplus-8.onnx";

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("expression error: {0}")]
    Expression(#[from] ExpressionError),
}

/// Per-frame face analysis.
///
/// Implementations may keep state between frames, hence `&mut self`.
pub trait FaceAnalyzer {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<FaceDetection>, AnalyzerError>;
}

/// SCRFD detection followed by FER+ classification of every face.
pub struct OnnxAnalyzer {
    detector: FaceDetector,
    classifier: ExpressionClassifier,
}

impl OnnxAnalyzer {
    /// Load both models from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, AnalyzerError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))?;
        let classifier = ExpressionClassifier::load(&model_dir.join(EXPRESSION_MODEL_FILE))?;
        Ok(Self {
            detector,
            classifier,
        })
    }
}

impl FaceAnalyzer for OnnxAnalyzer {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<FaceDetection>, AnalyzerError> {
        let faces = self.detector.detect(frame)?;
        let mut detections = Vec::with_capacity(faces.len());
        for face in faces {
            let expressions = self.classifier.classify(frame, &face.bbox)?;
            detections.push(FaceDetection {
                bbox: face.bbox,
                landmarks: face.landmarks,
                expressions,
            });
        }
        Ok(detections)
    }
}

impl<A: FaceAnalyzer + ?Sized> FaceAnalyzer for Box<A> {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<FaceDetection>, AnalyzerError> {
        (**self).detect(frame)
    }
}

/// Default model directory: `$XDG_DATA_HOME/smilecam/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("smilecam/models")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_models_reports_detector_path() {
        let dir = Path::new("/nonexistent/smilecam-models");
        let err = OnnxAnalyzer::load(dir).err().expect("load should fail");
        let msg = err.to_string();
        assert!(msg.contains(DETECTOR_MODEL_FILE), "{msg}");
    }
}
