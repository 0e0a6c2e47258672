use serde::{Deserialize, Serialize};

/// A point in frame or overlay coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// Width × height of a frame or overlay surface, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplaySize {
    pub width: u32,
    pub height: u32,
}

impl DisplaySize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Axis-aligned face box with the detector's confidence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Per-face expression probabilities, each in [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Expressions {
    pub neutral: f32,
    pub happy: f32,
    pub sad: f32,
    pub angry: f32,
    pub fearful: f32,
    pub disgusted: f32,
    pub surprised: f32,
}

impl Expressions {
    /// Name and score of the most probable expression.
    pub fn dominant(&self) -> (&'static str, f32) {
        [
            ("neutral", self.neutral),
            ("happy", self.happy),
            ("sad", self.sad),
            ("angry", self.angry),
            ("fearful", self.fearful),
            ("disgusted", self.disgusted),
            ("surprised", self.surprised),
        ]
        .into_iter()
        .fold(("neutral", f32::NEG_INFINITY), |best, cur| {
            if cur.1 > best.1 {
                cur
            } else {
                best
            }
        })
    }
}

/// One detected face: box, landmarks and expression scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceDetection {
    pub bbox: BoundingBox,
    pub landmarks: Vec<Point>,
    pub expressions: Expressions,
}

impl FaceDetection {
    /// Map box and landmarks from `from` coordinates into `to` coordinates.
    ///
    /// An empty source size leaves the detection unchanged.
    pub fn rescaled(&self, from: DisplaySize, to: DisplaySize) -> FaceDetection {
        if from.is_empty() || from == to {
            return self.clone();
        }
        let sx = to.width as f32 / from.width as f32;
        let sy = to.height as f32 / from.height as f32;

        FaceDetection {
            bbox: BoundingBox {
                x: self.bbox.x * sx,
                y: self.bbox.y * sy,
                width: self.bbox.width * sx,
                height: self.bbox.height * sy,
                confidence: self.bbox.confidence,
            },
            landmarks: self
                .landmarks
                .iter()
                .map(|p| Point {
                    x: p.x * sx,
                    y: p.y * sy,
                })
                .collect(),
            expressions: self.expressions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face() -> FaceDetection {
        FaceDetection {
            bbox: BoundingBox { x: 10.0, y: 20.0, width: 100.0, height: 50.0, confidence: 0.9 },
            landmarks: vec![Point { x: 40.0, y: 30.0 }],
            expressions: Expressions { happy: 0.8, ..Default::default() },
        }
    }

    #[test]
    fn test_rescaled_doubles_coordinates() {
        let scaled = face().rescaled(DisplaySize::new(640, 360), DisplaySize::new(1280, 720));
        assert_eq!(scaled.bbox.x, 20.0);
        assert_eq!(scaled.bbox.y, 40.0);
        assert_eq!(scaled.bbox.width, 200.0);
        assert_eq!(scaled.bbox.height, 100.0);
        assert_eq!(scaled.landmarks[0], Point { x: 80.0, y: 60.0 });
        assert_eq!(scaled.bbox.confidence, 0.9);
        assert_eq!(scaled.expressions.happy, 0.8);
    }

    #[test]
    fn test_rescaled_same_size_is_identity() {
        let f = face();
        assert_eq!(f.rescaled(DisplaySize::new(640, 360), DisplaySize::new(640, 360)), f);
    }

    #[test]
    fn test_rescaled_empty_source_is_identity() {
        let f = face();
        assert_eq!(f.rescaled(DisplaySize::new(0, 0), DisplaySize::new(640, 360)), f);
    }

    #[test]
    fn test_dominant_expression() {
        let e = Expressions { happy: 0.7, neutral: 0.2, surprised: 0.1, ..Default::default() };
        assert_eq!(e.dominant(), ("happy", 0.7));
    }
}
