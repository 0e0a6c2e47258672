//! In-memory, session-scoped gallery of captured stills.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use uuid::Uuid;

pub type ImageId = Uuid;

/// One captured still: JPEG payload plus capture metadata.
#[derive(Debug, Clone)]
pub struct CapturedImage {
    pub id: ImageId,
    /// Capture counter value at the time of capture (1-based).
    pub sequence: u64,
    pub captured_at_ms: u64,
    pub width: u32,
    pub height: u32,
    pub jpeg: Arc<[u8]>,
}

impl CapturedImage {
    /// Default filename for a single download.
    pub fn filename(&self) -> String {
        format!("smile_{}_{}.jpg", self.sequence, self.captured_at_ms)
    }

    pub fn summary(&self) -> ImageSummary {
        ImageSummary {
            id: self.id.to_string(),
            sequence: self.sequence,
            captured_at_ms: self.captured_at_ms,
            width: self.width,
            height: self.height,
            bytes: self.jpeg.len(),
        }
    }
}

/// Payload-free view of a gallery entry, for listings.
#[derive(Debug, Clone, Serialize)]
pub struct ImageSummary {
    pub id: String,
    pub sequence: u64,
    pub captured_at_ms: u64,
    pub width: u32,
    pub height: u32,
    pub bytes: usize,
}

/// Filename for entry `index` (0-based, capture order) of a bulk download.
pub fn bulk_filename(index: usize, now_ms: u64) -> String {
    format!("smile_{}_{}.jpg", index + 1, now_ms)
}

/// Captured images, newest first.
#[derive(Debug, Default)]
pub struct Gallery {
    items: VecDeque<CapturedImage>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, image: CapturedImage) {
        self.items.push_front(image);
    }

    /// Remove one entry by id; the others keep their relative order.
    pub fn remove(&mut self, id: &ImageId) -> Option<CapturedImage> {
        let pos = self.items.iter().position(|i| i.id == *id)?;
        self.items.remove(pos)
    }

    pub fn get(&self, id: &ImageId) -> Option<&CapturedImage> {
        self.items.iter().find(|i| i.id == *id)
    }

    /// Newest first, as displayed.
    pub fn iter(&self) -> impl Iterator<Item = &CapturedImage> {
        self.items.iter()
    }

    /// Oldest first.
    pub fn in_capture_order(&self) -> impl Iterator<Item = &CapturedImage> {
        self.items.iter().rev()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
