//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes an RGB frame into the 640×640 SCRFD input, decodes the three
//! anchor-free stride heads and applies NMS. Each face carries the five
//! SCRFD keypoints (eyes, nose tip, mouth corners).

use crate::types::{BoundingBox, Point};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: u32 = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const SCORE_THRESHOLD: f32 = 0.5;
const NMS_IOU_THRESHOLD: f32 = 0.4;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;
const KEYPOINTS: usize = 5;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}; download det_10g.onnx from insightface into the model dir")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// A face found by SCRFD, in source-frame coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub landmarks: Vec<Point>,
}

/// How the source frame was placed inside the square model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> Self {
        let scale = (INPUT_SIZE as f32 / width as f32).min(INPUT_SIZE as f32 / height as f32);
        let (new_w, new_h) = scaled_dims(width, height, scale);
        Self {
            scale,
            pad_x: (INPUT_SIZE - new_w) as f32 / 2.0,
            pad_y: (INPUT_SIZE - new_h) as f32 / 2.0,
        }
    }

    /// Model-input coordinates back to source-frame coordinates.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

fn scaled_dims(width: u32, height: u32, scale: f32) -> (u32, u32) {
    let w = ((width as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
    let h = ((height as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
    (w, h)
}

/// Output tensor indices for one stride: (score, bbox, kps).
type HeadIndices = (usize, usize, usize);

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    heads: [HeadIndices; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();
        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD needs 9 outputs (score/bbox/kps for 3 strides), model has {}",
                output_names.len()
            )));
        }

        let heads = map_output_heads(&output_names);
        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            ?heads,
            "loaded SCRFD model"
        );

        Ok(Self { session, heads })
    }

    /// Detect faces in an RGB frame, highest confidence first.
    pub fn detect(&mut self, frame: &RgbImage) -> Result<Vec<DetectedFace>, DetectorError> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }

        let (input, letterbox) = preprocess(frame);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (pos, &stride) in STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.heads[pos];
            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };
            let head = HeadOutputs {
                scores: extract(score_idx, "scores")?,
                bboxes: extract(bbox_idx, "bboxes")?,
                kps: extract(kps_idx, "kps")?,
            };
            candidates.extend(decode_head(&head, stride, &letterbox));
        }

        Ok(non_max_suppression(candidates, NMS_IOU_THRESHOLD))
    }
}

/// Letterbox an RGB frame into an NCHW float tensor.
fn preprocess(frame: &RgbImage) -> (Array4<f32>, Letterbox) {
    let (width, height) = frame.dimensions();
    let letterbox = Letterbox::fit(width, height);
    let (new_w, new_h) = scaled_dims(width, height, letterbox.scale);
    let resized = imageops::resize(frame, new_w, new_h, FilterType::Triangle);

    let size = INPUT_SIZE as usize;
    // Padding normalizes to 0.0.
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    let x0 = letterbox.pad_x.floor() as u32;
    let y0 = letterbox.pad_y.floor() as u32;

    for (x, y, pixel) in resized.enumerate_pixels() {
        let tx = (x + x0) as usize;
        let ty = (y + y0) as usize;
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel[c] as f32 - PIXEL_MEAN) / PIXEL_STD;
        }
    }

    (tensor, letterbox)
}

/// Map output tensors to stride heads.
///
/// Exports either name the heads ("score_8", "bbox_16", "kps_32", ...) or use
/// opaque numeric names in the standard order
/// [scores 8/16/32, bboxes 8/16/32, kps 8/16/32].
fn map_output_heads(names: &[String]) -> [HeadIndices; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let named: Option<Vec<HeadIndices>> = STRIDES
        .iter()
        .map(|&s| Some((find("score", s)?, find("bbox", s)?, find("kps", s)?)))
        .collect();

    match named {
        Some(v) => [v[0], v[1], v[2]],
        None => [(0, 3, 6), (1, 4, 7), (2, 5, 8)],
    }
}

struct HeadOutputs<'a> {
    scores: &'a [f32],
    bboxes: &'a [f32],
    kps: &'a [f32],
}

/// Decode candidates above the score threshold for one stride.
fn decode_head(head: &HeadOutputs<'_>, stride: usize, letterbox: &Letterbox) -> Vec<DetectedFace> {
    let grid_w = INPUT_SIZE as usize / stride;
    let grid_h = INPUT_SIZE as usize / stride;
    let step = stride as f32;
    let mut faces = Vec::new();

    for idx in 0..grid_w * grid_h * ANCHORS_PER_CELL {
        let score = head.scores.get(idx).copied().unwrap_or(0.0);
        if score <= SCORE_THRESHOLD {
            continue;
        }

        let cell = idx / ANCHORS_PER_CELL;
        let ax = (cell % grid_w) as f32 * step;
        let ay = (cell / grid_w) as f32 * step;

        let Some(d) = head.bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };
        let (x1, y1) = letterbox.unmap(ax - d[0] * step, ay - d[1] * step);
        let (x2, y2) = letterbox.unmap(ax + d[2] * step, ay + d[3] * step);

        let landmarks = head
            .kps
            .get(idx * KEYPOINTS * 2..(idx + 1) * KEYPOINTS * 2)
            .map(|k| {
                k.chunks_exact(2)
                    .map(|p| {
                        let (x, y) = letterbox.unmap(ax + p[0] * step, ay + p[1] * step);
                        Point { x, y }
                    })
                    .collect()
            })
            .unwrap_or_default();

        faces.push(DetectedFace {
            bbox: BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
            },
            landmarks,
        });
    }

    faces
}

/// Greedy NMS; the result is sorted by descending confidence.
fn non_max_suppression(mut faces: Vec<DetectedFace>, iou_threshold: f32) -> Vec<DetectedFace> {
    faces.sort_by(|a, b| b.bbox.confidence.total_cmp(&a.bbox.confidence));

    let mut kept: Vec<DetectedFace> = Vec::new();
    for face in faces {
        if kept.iter().all(|k| iou(&k.bbox, &face.bbox) <= iou_threshold) {
            kept.push(face);
        }
    }
    kept
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let iw = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let ih = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = iw * ih;
    let union = a.area() + b.area() - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
