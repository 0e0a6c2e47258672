//! Seams to the outside world: camera, file saving and time.

use crate::types::DisplaySize;
use image::RgbImage;
use std::path::PathBuf;
use thiserror::Error;

/// Which way the requested camera should face.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facing {
    User,
    Environment,
}

/// Stream acquisition hints. The platform may negotiate something else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRequest {
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub facing: Facing,
}

impl Default for StreamRequest {
    fn default() -> Self {
        Self {
            ideal_width: 1280,
            ideal_height: 720,
            facing: Facing::User,
        }
    }
}

#[derive(Error, Debug)]
pub enum CameraAccessError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),
}

#[derive(Error, Debug)]
#[error("frame grab failed: {0}")]
pub struct FrameError(pub String);

/// Something that can hand out a live camera stream.
pub trait VideoSource {
    type Stream: VideoStream;

    fn open(&mut self, request: &StreamRequest) -> Result<Self::Stream, CameraAccessError>;
}

/// A live camera stream. Dropping it without `stop` is allowed.
pub trait VideoStream {
    fn resolution(&self) -> DisplaySize;
    /// The most recent frame at native resolution.
    fn current_frame(&mut self) -> Result<RgbImage, FrameError>;
    /// Release the underlying device.
    fn stop(&mut self);
}

/// User-initiated file save.
pub trait ImageSink {
    fn save(&mut self, filename: &str, bytes: &[u8]) -> std::io::Result<PathBuf>;
}

/// Millisecond wall clock.
pub trait Clock {
    fn now_ms(&self) -> u64;
}
