//! Webcam access over V4L2.

use crate::frame::{self, Frame};
use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("no such camera: {0}")]
    DeviceNotFound(String),
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    #[error("camera in use by another process: {0}")]
    DeviceBusy(String),
    #[error("{0} is not a video capture device")]
    NotCaptureDevice(String),
    #[error("no usable pixel format: {0}")]
    FormatNegotiationFailed(String),
    #[error("frame grab failed: {0}")]
    CaptureFailed(String),
}

/// A video capture node found under /dev.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Pixel formats we know how to turn into RGB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed 4:2:2, two pixels per four bytes.
    Yuyv,
    /// One JPEG image per buffer.
    Mjpeg,
    Rgb24,
}

impl PixelFormat {
    /// Preference order when negotiating.
    const PREFERRED: [PixelFormat; 3] = [Self::Yuyv, Self::Mjpeg, Self::Rgb24];

    fn fourcc(self) -> FourCC {
        FourCC::new(match self {
            Self::Yuyv => b"YUYV",
            Self::Mjpeg => b"MJPG",
            Self::Rgb24 => b"RGB3",
        })
    }

    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        Self::PREFERRED.into_iter().find(|f| f.fourcc() == fourcc)
    }
}

/// An opened camera with a negotiated format.
///
/// Frames are pulled on demand; a short-lived mmap stream is set up per grab
/// so the device holds no queued buffers between detection cycles.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub pixel_format: PixelFormat,
}

impl Camera {
    /// Open `device_path` and ask for `width`×`height`. The driver may pick a
    /// different size; the negotiated one is what `width`/`height` report.
    pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device =
            Device::with_path(device_path).map_err(|e| classify_open_error(device_path, &e))?;
        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("{device_path}: querycap: {e}")))?;
        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(CameraError::NotCaptureDevice(device_path.to_string()));
        }

        let (pixel_format, actual_w, actual_h) = negotiate(&device, width, height)?;
        tracing::info!(
            device = device_path,
            card = %caps.card,
            ?pixel_format,
            width = actual_w,
            height = actual_h,
            requested = %format!("{width}x{height}"),
            "camera opened"
        );

        Ok(Self {
            device,
            width: actual_w,
            height: actual_h,
            device_path: device_path.to_string(),
            pixel_format,
        })
    }

    /// Grab one frame and convert it to RGB.
    pub fn capture_frame(&self) -> Result<Frame, CameraError> {
        let mut stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, 2)
            .map_err(|e| CameraError::CaptureFailed(format!("mmap setup: {e}")))?;
        let (data, meta) = stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("dequeue: {e}")))?;

        Ok(Frame {
            image: self.to_rgb(data)?,
            sequence: meta.sequence,
        })
    }

    fn to_rgb(&self, data: &[u8]) -> Result<RgbImage, CameraError> {
        let decoded = match self.pixel_format {
            PixelFormat::Yuyv => frame::yuyv_to_rgb(data, self.width, self.height),
            PixelFormat::Mjpeg => frame::mjpeg_to_rgb(data),
            PixelFormat::Rgb24 => frame::rgb24_to_rgb(data, self.width, self.height),
        };
        decoded.map_err(|e| CameraError::CaptureFailed(e.to_string()))
    }

    /// Every `/dev/video*` node that reports video capture capability,
    /// sorted by path. Nodes that cannot be opened are skipped.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let Ok(entries) = std::fs::read_dir("/dev") else {
            return Vec::new();
        };
        let mut nodes: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("video"))
            })
            .collect();
        nodes.sort();

        nodes
            .into_iter()
            .filter_map(|node| {
                let caps = Device::with_path(&node).ok()?.query_caps().ok()?;
                caps.capabilities
                    .contains(CapFlags::VIDEO_CAPTURE)
                    .then(|| DeviceInfo {
                        path: node.display().to_string(),
                        name: caps.card,
                        driver: caps.driver,
                        bus: caps.bus,
                    })
            })
            .collect()
    }
}

/// Try each known format in order until the driver accepts one as-is.
fn negotiate(device: &Device, width: u32, height: u32) -> Result<(PixelFormat, u32, u32), CameraError> {
    let mut fmt = device
        .format()
        .map_err(|e| CameraError::FormatNegotiationFailed(format!("G_FMT: {e}")))?;

    let mut offered = Vec::new();
    for wanted in PixelFormat::PREFERRED {
        fmt.fourcc = wanted.fourcc();
        fmt.width = width;
        fmt.height = height;
        let accepted = device
            .set_format(&fmt)
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("S_FMT: {e}")))?;
        if let Some(pf) = PixelFormat::from_fourcc(accepted.fourcc) {
            return Ok((pf, accepted.width, accepted.height));
        }
        offered.push(accepted.fourcc.to_string());
    }

    Err(CameraError::FormatNegotiationFailed(format!(
        "driver only offers {} (need YUYV, MJPG or RGB3)",
        offered.join(", ")
    )))
}

/// Map an open(2) failure onto the error the user needs to act on.
fn classify_open_error(device_path: &str, err: &std::io::Error) -> CameraError {
    let detail = format!("{device_path}: {err}");
    match err.raw_os_error() {
        Some(libc::EACCES) | Some(libc::EPERM) => CameraError::PermissionDenied(detail),
        Some(libc::EBUSY) => CameraError::DeviceBusy(detail),
        _ if err.kind() == std::io::ErrorKind::PermissionDenied => {
            CameraError::PermissionDenied(detail)
        }
        _ => CameraError::DeviceNotFound(detail),
    }
}
