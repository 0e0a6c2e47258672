//! smilecam-core: smile detection and capture logic.
//!
//! Face detection (SCRFD) and expression classification (FER+) run via ONNX
//! Runtime behind the [`FaceAnalyzer`] trait. The [`CaptureController`] ties
//! camera, analyzer, overlay and gallery together.

pub mod analyzer;
pub mod controller;
pub mod detector;
pub mod expression;
pub mod gallery;
pub mod overlay;
pub mod platform;
pub mod policy;
pub mod types;

pub use analyzer::{default_model_dir, FaceAnalyzer, OnnxAnalyzer};
pub use controller::{CaptureController, ControllerError, ControllerOptions, CycleOutcome};
pub use gallery::{CapturedImage, Gallery, ImageId};
pub use overlay::{DisplayList, Surface};
pub use policy::Settings;
pub use types::{BoundingBox, DisplaySize, Expressions, FaceDetection, Point};
