//! Linux implementations of the controller's platform seams: a V4L2 camera,
//! a directory-backed download sink and the system clock.

use smilecam_core::platform::{
    CameraAccessError, Clock, Facing, FrameError, ImageSink, StreamRequest, VideoSource,
    VideoStream,
};
use smilecam_core::DisplaySize;
use smilecam_hw::{Camera, CameraError};
use std::path::PathBuf;

/// Opens the configured V4L2 device on every camera start.
pub struct V4lSource {
    device: String,
}

impl V4lSource {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
        }
    }
}

impl VideoSource for V4lSource {
    type Stream = V4lStream;

    fn open(&mut self, request: &StreamRequest) -> Result<V4lStream, CameraAccessError> {
        if request.facing != Facing::User {
            tracing::debug!(facing = ?request.facing, "V4L2 has no facing selection; using configured device");
        }
        let camera = Camera::open(&self.device, request.ideal_width, request.ideal_height)
            .map_err(access_error)?;
        Ok(V4lStream {
            resolution: DisplaySize::new(camera.width, camera.height),
            camera: Some(camera),
            last_sequence: None,
        })
    }
}

/// Frames the driver skipped between two grabs, if any.
fn dropped_frames(previous: Option<u32>, current: u32) -> Option<u32> {
    let gap = current.wrapping_sub(previous?).wrapping_sub(1);
    (gap > 0 && gap < u32::MAX / 2).then_some(gap)
}

fn access_error(err: CameraError) -> CameraAccessError {
    match err {
        CameraError::PermissionDenied(detail) => CameraAccessError::PermissionDenied(detail),
        other => CameraAccessError::DeviceUnavailable(other.to_string()),
    }
}

pub struct V4lStream {
    camera: Option<Camera>,
    resolution: DisplaySize,
    last_sequence: Option<u32>,
}

impl VideoStream for V4lStream {
    fn resolution(&self) -> DisplaySize {
        self.resolution
    }

    fn current_frame(&mut self) -> Result<image::RgbImage, FrameError> {
        let camera = self
            .camera
            .as_ref()
            .ok_or_else(|| FrameError("camera released".into()))?;
        let frame = camera
            .capture_frame()
            .map_err(|e| FrameError(e.to_string()))?;
        if let Some(skipped) = dropped_frames(self.last_sequence, frame.sequence) {
            tracing::trace!(sequence = frame.sequence, skipped, "driver dropped frames");
        }
        self.last_sequence = Some(frame.sequence);
        Ok(frame.image)
    }

    fn stop(&mut self) {
        if let Some(camera) = self.camera.take() {
            tracing::debug!(device = %camera.device_path, "releasing camera");
        }
    }
}

/// Writes downloads into a directory, creating it on first use.
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

impl ImageSink for DirectorySink {
    fn save(&mut self, filename: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(filename);
        std::fs::write(&path, bytes)?;
        Ok(path)
    }
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
    }
}
