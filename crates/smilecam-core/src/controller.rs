//! The capture controller: camera lifecycle, the per-frame detection cycle,
//! auto-capture and the gallery actions.
//!
//! The controller is driven from a single thread. Every operation runs to
//! completion before the next one starts, so the cooldown gate needs no
//! locking. Delayed UI effects (flash, status restore, staggered downloads)
//! are timers that the driver fires through [`CaptureController::poll_timers`].

use crate::analyzer::FaceAnalyzer;
use crate::gallery::{bulk_filename, CapturedImage, Gallery, ImageId};
use crate::overlay::{detection_status, draw_face, Surface};
use crate::platform::{
    CameraAccessError, Clock, FrameError, ImageSink, StreamRequest, VideoSource, VideoStream,
};
use crate::policy::{is_smiling, CooldownGate, Settings};
use crate::types::{DisplaySize, FaceDetection};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

pub const STATUS_LOADING: &str = "Loading AI models...";
pub const STATUS_READY: &str = "Models loaded! Ready to start";
pub const STATUS_LOAD_FAILED: &str = "Error loading models. Please restart smilecamd.";
pub const STATUS_ACTIVE: &str = "Camera active - Smile!";
pub const STATUS_STOPPED: &str = "Camera stopped";
pub const STATUS_DENIED: &str = "Camera access denied";
pub const STATUS_UNAVAILABLE: &str = "Camera unavailable";
pub const STATUS_MANUAL_SAVED: &str = "Manual capture saved!";
pub const DETECTION_IDLE: &str = "No face";
pub const DETECTION_NO_FACE: &str = "No face detected";
pub const GALLERY_EMPTY: &str = "No captures yet. Smile to start!";

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Please wait for models to load first")]
    ModelsNotReady,
    #[error("models failed to load ({0}); restart smilecamd")]
    ModelLoad(String),
    #[error("unable to access camera: {0}")]
    Camera(#[from] CameraAccessError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("image not found: {0}")]
    ImageNotFound(ImageId),
    #[error("jpeg encoding failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("save failed: {0}")]
    Save(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ModelState {
    Loading,
    Ready,
    Failed(String),
}

/// Enablement of the user-facing controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Controls {
    pub start: bool,
    pub stop: bool,
    pub capture: bool,
    pub download_all: bool,
    pub clear_gallery: bool,
}

/// Everything a front end needs to paint the controller's state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UiState {
    pub status: String,
    pub detection_status: String,
    pub controls: Controls,
    pub flash: bool,
    /// A face is smiling but the cooldown is holding back auto-capture.
    pub cooldown_active: bool,
    /// Shown in place of the gallery while it is empty.
    pub gallery_message: Option<String>,
}

/// Point-in-time view of the controller, serialized for clients.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub running: bool,
    pub models: ModelState,
    pub capture_count: u64,
    pub gallery_size: usize,
    pub last_auto_capture_ms: Option<u64>,
    pub settings: Settings,
    pub ui: UiState,
}

/// Fixed parameters of a controller instance.
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub stream: StreamRequest,
    /// Overlay size; `None` follows the stream resolution.
    pub overlay_size: Option<DisplaySize>,
    pub jpeg_quality: u8,
    pub flash_ms: u64,
    pub status_reset_ms: u64,
    pub download_stagger_ms: u64,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            stream: StreamRequest::default(),
            overlay_size: None,
            jpeg_quality: 90,
            flash_ms: 500,
            status_reset_ms: 2000,
            download_stagger_ms: 100,
        }
    }
}

/// What the driver should do after a detection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Schedule another cycle on the next frame tick.
    Continue,
    /// The camera is stopped; do not reschedule.
    Stopped,
}

#[derive(Debug)]
enum Timer {
    EndFlash,
    RestoreStatus,
    Download { filename: String, jpeg: Arc<[u8]> },
}

pub struct CaptureController<V: VideoSource, S: Surface, K: ImageSink, C: Clock> {
    settings: Settings,
    options: ControllerOptions,
    source: V,
    stream: Option<V::Stream>,
    analyzer: Option<Box<dyn FaceAnalyzer + Send>>,
    models: ModelState,
    surface: S,
    sink: K,
    clock: C,
    gallery: Gallery,
    gate: CooldownGate,
    capture_count: u64,
    flash_until_ms: u64,
    ui: UiState,
    /// Pending timers, ordered by due time (ties keep insertion order).
    timers: Vec<(u64, Timer)>,
}

impl<V, S, K, C> CaptureController<V, S, K, C>
where
    V: VideoSource,
    S: Surface,
    K: ImageSink,
    C: Clock,
{
    pub fn new(
        source: V,
        surface: S,
        sink: K,
        clock: C,
        settings: Settings,
        options: ControllerOptions,
    ) -> Self {
        Self {
            settings,
            options,
            source,
            stream: None,
            analyzer: None,
            models: ModelState::Loading,
            surface,
            sink,
            clock,
            gallery: Gallery::new(),
            gate: CooldownGate::default(),
            capture_count: 0,
            flash_until_ms: 0,
            ui: UiState {
                status: STATUS_LOADING.to_string(),
                detection_status: DETECTION_IDLE.to_string(),
                controls: Controls {
                    start: true,
                    stop: false,
                    capture: false,
                    download_all: false,
                    clear_gallery: false,
                },
                flash: false,
                cooldown_active: false,
                gallery_message: Some(GALLERY_EMPTY.to_string()),
            },
            timers: Vec::new(),
        }
    }

    /// Hand over the outcome of the (asynchronous) model load.
    pub fn models_loaded(&mut self, result: Result<Box<dyn FaceAnalyzer + Send>, String>) {
        match result {
            Ok(analyzer) => {
                self.analyzer = Some(analyzer);
                self.models = ModelState::Ready;
                self.ui.status = STATUS_READY.to_string();
                tracing::info!("face analysis models loaded");
            }
            Err(reason) => {
                tracing::error!(%reason, "failed to load face analysis models");
                self.models = ModelState::Failed(reason);
                self.ui.status = STATUS_LOAD_FAILED.to_string();
            }
        }
    }

    /// Acquire the camera and enter the running state.
    pub fn start_camera(&mut self) -> Result<(), ControllerError> {
        match &self.models {
            ModelState::Ready => {}
            ModelState::Loading => return Err(ControllerError::ModelsNotReady),
            ModelState::Failed(reason) => return Err(ControllerError::ModelLoad(reason.clone())),
        }
        if self.is_running() {
            tracing::debug!("start requested while running; ignoring");
            return Ok(());
        }

        let stream = match self.source.open(&self.options.stream) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "camera access failed");
                self.ui.status = match e {
                    CameraAccessError::PermissionDenied(_) => STATUS_DENIED,
                    CameraAccessError::DeviceUnavailable(_) => STATUS_UNAVAILABLE,
                }
                .to_string();
                return Err(e.into());
            }
        };

        let resolution = stream.resolution();
        self.surface
            .resize(self.options.overlay_size.unwrap_or(resolution));
        self.stream = Some(stream);

        self.ui.controls.start = false;
        self.ui.controls.stop = true;
        self.ui.controls.capture = true;
        self.ui.status = STATUS_ACTIVE.to_string();

        tracing::info!(
            width = resolution.width,
            height = resolution.height,
            overlay = ?self.surface.size(),
            "camera started"
        );
        Ok(())
    }

    /// Release the camera. Calling it while stopped only clears the overlay.
    pub fn stop_camera(&mut self) {
        self.surface.clear();
        let Some(mut stream) = self.stream.take() else {
            return;
        };
        stream.stop();

        self.ui.controls.start = true;
        self.ui.controls.stop = false;
        self.ui.controls.capture = false;
        self.ui.status = STATUS_STOPPED.to_string();
        self.ui.detection_status = DETECTION_IDLE.to_string();
        self.ui.cooldown_active = false;
        tracing::info!("camera stopped");
    }

    pub fn is_running(&self) -> bool {
        self.stream.is_some()
    }

    /// One detection cycle: grab, analyze, draw, maybe auto-capture.
    ///
    /// Frame and analyzer errors are logged and the cycle still asks to be
    /// rescheduled; only a stopped camera ends the loop.
    pub fn detect_faces(&mut self) -> CycleOutcome {
        let Some(stream) = self.stream.as_mut() else {
            return CycleOutcome::Stopped;
        };
        let Some(analyzer) = self.analyzer.as_mut() else {
            return CycleOutcome::Stopped;
        };

        let frame = match stream.current_frame() {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(error = %e, "detection cycle: frame grab failed");
                return CycleOutcome::Continue;
            }
        };

        let faces = match analyzer.detect(&frame) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(error = %e, "detection cycle failed");
                return CycleOutcome::Continue;
            }
        };

        self.render_detections(&frame, &faces);
        CycleOutcome::Continue
    }

    fn render_detections(&mut self, frame: &RgbImage, faces: &[FaceDetection]) {
        self.surface.clear();
        self.ui.cooldown_active = false;

        let Some(primary) = faces.first() else {
            self.ui.detection_status = DETECTION_NO_FACE.to_string();
            return;
        };

        let frame_size = DisplaySize::new(frame.width(), frame.height());
        let display_size = self.surface.size();
        let threshold = self.settings.smile_threshold;

        let mut any_smiling = false;
        for face in faces {
            let resized = face.rescaled(frame_size, display_size);
            any_smiling |= draw_face(&mut self.surface, &resized, threshold);
        }

        let happiness = primary.expressions.happy;
        self.ui.detection_status = detection_status(is_smiling(happiness, threshold), happiness);
        tracing::trace!(
            faces = faces.len(),
            any_smiling,
            happiness,
            dominant = primary.expressions.dominant().0,
            "detection cycle"
        );

        if !(any_smiling && self.settings.auto_capture) {
            return;
        }
        let now = self.clock.now_ms();
        if !self.gate.is_open(now, self.settings.cooldown_ms) {
            self.ui.cooldown_active = true;
            return;
        }
        match self.capture_frame(frame, now) {
            Ok(id) => {
                self.gate.record(now);
                tracing::info!(%id, "auto-capture");
            }
            Err(e) => tracing::warn!(error = %e, "auto-capture failed"),
        }
    }

    /// Encode `frame` and add it to the gallery.
    fn capture_frame(&mut self, frame: &RgbImage, now: u64) -> Result<ImageId, ControllerError> {
        let jpeg = encode_jpeg(frame, self.options.jpeg_quality)?;

        self.capture_count += 1;
        let image = CapturedImage {
            id: Uuid::new_v4(),
            sequence: self.capture_count,
            captured_at_ms: now,
            width: frame.width(),
            height: frame.height(),
            jpeg: Arc::from(jpeg),
        };
        let id = image.id;
        tracing::debug!(%id, sequence = image.sequence, bytes = image.jpeg.len(), "image captured");
        self.add_to_gallery(image);

        self.ui.flash = true;
        self.flash_until_ms = now.saturating_add(self.options.flash_ms);
        self.schedule(self.flash_until_ms, Timer::EndFlash);

        Ok(id)
    }

    /// Capture on user request. Returns `None` when the camera is stopped.
    pub fn manual_capture(&mut self) -> Result<Option<ImageId>, ControllerError> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(None);
        };
        let frame = stream.current_frame()?;
        let now = self.clock.now_ms();
        let id = self.capture_frame(&frame, now)?;

        self.ui.status = STATUS_MANUAL_SAVED.to_string();
        self.schedule(now.saturating_add(self.options.status_reset_ms), Timer::RestoreStatus);
        tracing::info!(%id, "manual capture");
        Ok(Some(id))
    }

    fn add_to_gallery(&mut self, image: CapturedImage) {
        self.gallery.add(image);
        self.ui.gallery_message = None;
        self.ui.controls.download_all = true;
        self.ui.controls.clear_gallery = true;
    }

    pub fn delete_image(&mut self, id: &ImageId) -> Result<(), ControllerError> {
        self.gallery
            .remove(id)
            .ok_or(ControllerError::ImageNotFound(*id))?;
        tracing::info!(%id, remaining = self.gallery.len(), "image deleted");
        if self.gallery.is_empty() {
            self.reset_gallery_ui();
        }
        Ok(())
    }

    /// Save one image under its default filename.
    pub fn download_image(&mut self, id: &ImageId) -> Result<PathBuf, ControllerError> {
        let image = self
            .gallery
            .get(id)
            .ok_or(ControllerError::ImageNotFound(*id))?;
        let path = self.sink.save(&image.filename(), &image.jpeg)?;
        tracing::info!(%id, path = %path.display(), "image downloaded");
        Ok(path)
    }

    /// Queue a save per image, oldest first, spaced by the stagger delay.
    /// Returns the number of saves queued.
    pub fn download_all(&mut self) -> usize {
        let now = self.clock.now_ms();
        let stagger = self.options.download_stagger_ms;
        let jobs: Vec<(u64, Timer)> = self
            .gallery
            .in_capture_order()
            .enumerate()
            .map(|(i, image)| {
                (
                    now.saturating_add((i as u64).saturating_mul(stagger)),
                    Timer::Download {
                        filename: bulk_filename(i, now),
                        jpeg: Arc::clone(&image.jpeg),
                    },
                )
            })
            .collect();

        let count = jobs.len();
        for (due, job) in jobs {
            self.schedule(due, job);
        }
        tracing::info!(count, stagger_ms = stagger, "download-all queued");
        count
    }

    /// Discard every image and reset the counter, but only if the user confirmed.
    pub fn clear_gallery(&mut self, confirmed: bool) -> bool {
        if !confirmed {
            tracing::debug!("clear gallery not confirmed");
            return false;
        }
        let dropped = self.gallery.len();
        self.gallery.clear();
        self.capture_count = 0;
        self.reset_gallery_ui();
        tracing::info!(dropped, "gallery cleared");
        true
    }

    fn reset_gallery_ui(&mut self) {
        self.ui.gallery_message = Some(GALLERY_EMPTY.to_string());
        self.ui.controls.download_all = false;
        self.ui.controls.clear_gallery = false;
    }

    fn schedule(&mut self, due_ms: u64, timer: Timer) {
        let pos = self.timers.partition_point(|(due, _)| *due <= due_ms);
        self.timers.insert(pos, (due_ms, timer));
    }

    /// Earliest pending timer deadline, if any.
    pub fn next_deadline_ms(&self) -> Option<u64> {
        self.timers.first().map(|(due, _)| *due)
    }

    /// Fire every timer that is due. Returns how many fired.
    pub fn poll_timers(&mut self) -> usize {
        let now = self.clock.now_ms();
        let due = self.timers.partition_point(|(d, _)| *d <= now);
        let fired: Vec<(u64, Timer)> = self.timers.drain(..due).collect();
        for (_, timer) in &fired {
            self.fire(timer, now);
        }
        fired.len()
    }

    /// Save every queued download now and drop the remaining timers.
    /// Returns how many downloads were written.
    pub fn flush_downloads(&mut self) -> usize {
        let now = self.clock.now_ms();
        let mut written = 0;
        for (_, timer) in std::mem::take(&mut self.timers) {
            if matches!(timer, Timer::Download { .. }) {
                self.fire(&timer, now);
                written += 1;
            }
        }
        written
    }

    fn fire(&mut self, timer: &Timer, now: u64) {
        match timer {
            Timer::EndFlash => {
                if now >= self.flash_until_ms {
                    self.ui.flash = false;
                }
            }
            Timer::RestoreStatus => {
                if self.is_running() {
                    self.ui.status = STATUS_ACTIVE.to_string();
                }
            }
            Timer::Download { filename, jpeg } => match self.sink.save(filename, jpeg) {
                Ok(path) => tracing::info!(path = %path.display(), "image downloaded"),
                Err(e) => tracing::warn!(error = %e, %filename, "download failed"),
            },
        }
    }

    /// Native-resolution frame with the current overlay untouched; `None` when stopped.
    pub fn snapshot_frame(&mut self) -> Result<Option<RgbImage>, ControllerError> {
        match self.stream.as_mut() {
            Some(stream) => Ok(Some(stream.current_frame()?)),
            None => Ok(None),
        }
    }

    pub fn settings(&self) -> Settings {
        self.settings
    }

    pub fn set_smile_threshold(&mut self, threshold: f32) {
        self.settings.set_smile_threshold(threshold);
        tracing::debug!(threshold = self.settings.smile_threshold, "smile threshold updated");
    }

    pub fn set_cooldown_ms(&mut self, cooldown_ms: u64) {
        self.settings.cooldown_ms = cooldown_ms;
        tracing::debug!(cooldown_ms, "cooldown updated");
    }

    pub fn set_auto_capture(&mut self, enabled: bool) {
        self.settings.auto_capture = enabled;
        tracing::debug!(enabled, "auto-capture toggled");
    }

    pub fn ui(&self) -> &UiState {
        &self.ui
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    /// Current time on the controller's clock, the base for timer deadlines.
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn capture_count(&self) -> u64 {
        self.capture_count
    }

    pub fn model_state(&self) -> &ModelState {
        &self.models
    }

    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            running: self.is_running(),
            models: self.models.clone(),
            capture_count: self.capture_count,
            gallery_size: self.gallery.len(),
            last_auto_capture_ms: self.gate.last_fire_ms(),
            settings: self.settings,
            ui: self.ui.clone(),
        }
    }
}

fn encode_jpeg(frame: &RgbImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100)).encode_image(frame)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::AnalyzerError;
    use crate::detector::DetectorError;
    use crate::overlay::{DisplayList, DrawCommand};
    use crate::types::{BoundingBox, Expressions, Point};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Mutex;

    type Script = Arc<Mutex<VecDeque<Result<Vec<FaceDetection>, String>>>>;

    struct ScriptedAnalyzer(Script);

    impl FaceAnalyzer for ScriptedAnalyzer {
        fn detect(&mut self, _frame: &RgbImage) -> Result<Vec<FaceDetection>, AnalyzerError> {
            match self.0.lock().unwrap().pop_front() {
                Some(Ok(faces)) => Ok(faces),
                Some(Err(msg)) => Err(DetectorError::InferenceFailed(msg).into()),
                None => Ok(Vec::new()),
            }
        }
    }

    /// Frames handed out before falling back to a 64x48 still.
    type FrameScript = Arc<Mutex<VecDeque<Result<RgbImage, String>>>>;

    #[derive(Default)]
    struct FakeSource {
        fail: Option<fn(String) -> CameraAccessError>,
        opened: u32,
        stopped: Arc<AtomicBool>,
        frames: FrameScript,
    }

    struct FakeStream {
        stopped: Arc<AtomicBool>,
        frames: FrameScript,
    }

    impl VideoSource for FakeSource {
        type Stream = FakeStream;

        fn open(&mut self, _request: &StreamRequest) -> Result<FakeStream, CameraAccessError> {
            if let Some(make) = self.fail {
                return Err(make("/dev/video0".into()));
            }
            self.opened += 1;
            Ok(FakeStream {
                stopped: Arc::clone(&self.stopped),
                frames: Arc::clone(&self.frames),
            })
        }
    }

    impl VideoStream for FakeStream {
        fn resolution(&self) -> DisplaySize {
            DisplaySize::new(64, 48)
        }

        fn current_frame(&mut self) -> Result<RgbImage, FrameError> {
            match self.frames.lock().unwrap().pop_front() {
                Some(scripted) => scripted.map_err(FrameError),
                None => Ok(RgbImage::from_pixel(64, 48, image::Rgb([120, 90, 60]))),
            }
        }

        fn stop(&mut self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Clone, Default)]
    struct RecordingSink {
        saves: Arc<Mutex<Vec<(String, u64)>>>,
        clock: TestClock,
    }

    impl ImageSink for RecordingSink {
        fn save(&mut self, filename: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
            assert!(bytes.starts_with(&[0xFF, 0xD8]), "payload should be a JPEG");
            self.saves.lock().unwrap().push((filename.to_string(), self.clock.now_ms()));
            Ok(PathBuf::from("/downloads").join(filename))
        }
    }

    #[derive(Clone, Default)]
    struct TestClock(Arc<AtomicU64>);

    impl TestClock {
        fn set(&self, ms: u64) {
            self.0.store(ms, Ordering::SeqCst);
        }
    }

    impl Clock for TestClock {
        fn now_ms(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    type TestController = CaptureController<FakeSource, DisplayList, RecordingSink, TestClock>;

    struct Harness {
        ctl: TestController,
        script: Script,
        clock: TestClock,
        saves: Arc<Mutex<Vec<(String, u64)>>>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_source(FakeSource::default())
        }

        fn with_source(source: FakeSource) -> Self {
            let clock = TestClock::default();
            let sink = RecordingSink { saves: Arc::default(), clock: clock.clone() };
            let saves = Arc::clone(&sink.saves);
            let ctl = CaptureController::new(
                source,
                DisplayList::default(),
                sink,
                clock.clone(),
                Settings { smile_threshold: 0.7, cooldown_ms: 3000, auto_capture: true },
                ControllerOptions::default(),
            );
            Self { ctl, script: Script::default(), clock, saves }
        }

        fn ready(mut self) -> Self {
            let analyzer = ScriptedAnalyzer(Arc::clone(&self.script));
            self.ctl.models_loaded(Ok(Box::new(analyzer)));
            self
        }

        fn running(mut self) -> Self {
            self = self.ready();
            self.ctl.start_camera().unwrap();
            self
        }

        fn push(&self, faces: Vec<FaceDetection>) {
            self.script.lock().unwrap().push_back(Ok(faces));
        }

        fn frame_at(&mut self, ms: u64, faces: Vec<FaceDetection>) -> CycleOutcome {
            self.clock.set(ms);
            self.push(faces);
            self.ctl.detect_faces()
        }
    }

    fn face(happy: f32) -> FaceDetection {
        FaceDetection {
            bbox: BoundingBox { x: 8.0, y: 12.0, width: 20.0, height: 20.0, confidence: 0.95 },
            landmarks: vec![Point { x: 14.0, y: 18.0 }, Point { x: 22.0, y: 18.0 }],
            expressions: Expressions { happy, ..Default::default() },
        }
    }

    #[test]
    fn test_start_blocked_until_models_load() {
        let mut h = Harness::new();
        assert!(matches!(h.ctl.start_camera(), Err(ControllerError::ModelsNotReady)));
        assert!(!h.ctl.is_running());
        assert_eq!(h.ctl.ui().status, STATUS_LOADING);
    }

    #[test]
    fn test_model_load_failure_blocks_start() {
        let mut h = Harness::new();
        h.ctl.models_loaded(Err("det_10g.onnx missing".into()));
        assert_eq!(h.ctl.ui().status, STATUS_LOAD_FAILED);
        assert!(matches!(h.ctl.start_camera(), Err(ControllerError::ModelLoad(_))));
        assert!(!h.ctl.is_running());
    }

    #[test]
    fn test_start_enables_controls_and_sizes_overlay() {
        let h = Harness::new().running();
        let ui = h.ctl.ui();
        assert!(h.ctl.is_running());
        assert_eq!(ui.status, STATUS_ACTIVE);
        assert!(!ui.controls.start && ui.controls.stop && ui.controls.capture);
        assert_eq!(h.ctl.surface().size(), DisplaySize::new(64, 48));
    }

    #[test]
    fn test_permission_denied_leaves_state_inactive() {
        let source = FakeSource {
            fail: Some(CameraAccessError::PermissionDenied),
            ..Default::default()
        };
        let mut h = Harness::with_source(source).ready();
        let err = h.ctl.start_camera().unwrap_err();
        assert!(matches!(err, ControllerError::Camera(CameraAccessError::PermissionDenied(_))));
        assert!(!h.ctl.is_running());
        assert_eq!(h.ctl.ui().status, STATUS_DENIED);
        assert!(h.ctl.ui().controls.start);
        assert_eq!(h.ctl.detect_faces(), CycleOutcome::Stopped);
    }

    #[test]
    fn test_missing_device_reports_unavailable() {
        let source = FakeSource {
            fail: Some(CameraAccessError::DeviceUnavailable),
            ..Default::default()
        };
        let mut h = Harness::with_source(source).ready();
        assert!(h.ctl.start_camera().is_err());
        assert_eq!(h.ctl.ui().status, STATUS_UNAVAILABLE);
    }

    #[test]
    fn test_stop_releases_stream_and_is_idempotent() {
        let mut h = Harness::new().running();
        let stopped = Arc::clone(&h.ctl.source.stopped);
        h.frame_at(0, vec![face(0.2)]);
        assert!(!h.ctl.surface().is_empty());

        h.ctl.stop_camera();
        assert!(stopped.load(Ordering::SeqCst));
        assert!(!h.ctl.is_running());
        assert!(h.ctl.surface().is_empty());
        assert_eq!(h.ctl.ui().status, STATUS_STOPPED);
        assert_eq!(h.ctl.ui().detection_status, DETECTION_IDLE);
        assert!(!h.ctl.ui().controls.capture);

        h.ctl.stop_camera();
        assert_eq!(h.ctl.ui().status, STATUS_STOPPED);
        assert_eq!(h.ctl.detect_faces(), CycleOutcome::Stopped);
    }

    #[test]
    fn test_start_twice_opens_once() {
        let mut h = Harness::new().running();
        h.ctl.start_camera().unwrap();
        assert_eq!(h.ctl.source.opened, 1);
    }

    #[test]
    fn test_cooldown_scenario() {
        let mut h = Harness::new().running();

        assert_eq!(h.frame_at(0, vec![face(0.8)]), CycleOutcome::Continue);
        assert_eq!(h.ctl.capture_count(), 1);
        assert_eq!(h.ctl.status().last_auto_capture_ms, Some(0));

        h.frame_at(1000, vec![face(0.9)]);
        assert_eq!(h.ctl.capture_count(), 1);

        h.frame_at(3500, vec![face(0.75)]);
        assert_eq!(h.ctl.capture_count(), 2);
        assert_eq!(h.ctl.gallery().len(), 2);
        assert_eq!(h.ctl.status().last_auto_capture_ms, Some(3500));
    }

    #[test]
    fn test_cooldown_boundary_is_strict() {
        let mut h = Harness::new().running();
        h.frame_at(100, vec![face(0.9)]);
        h.frame_at(3100, vec![face(0.9)]);
        assert_eq!(h.ctl.capture_count(), 1);
        h.frame_at(3101, vec![face(0.9)]);
        assert_eq!(h.ctl.capture_count(), 2);
    }

    #[test]
    fn test_auto_capture_disabled() {
        let mut h = Harness::new().running();
        h.ctl.set_auto_capture(false);
        h.frame_at(0, vec![face(0.99)]);
        assert_eq!(h.ctl.capture_count(), 0);
        assert_eq!(h.ctl.ui().detection_status, "Smiling! (99%)");
    }

    #[test]
    fn test_happiness_equal_to_threshold_does_not_capture() {
        let mut h = Harness::new().running();
        h.frame_at(0, vec![face(0.7)]);
        assert_eq!(h.ctl.capture_count(), 0);
        assert_eq!(h.ctl.ui().detection_status, "Face detected (70%)");
    }

    #[test]
    fn test_threshold_change_applies_next_cycle() {
        let mut h = Harness::new().running();
        h.frame_at(0, vec![face(0.6)]);
        assert_eq!(h.ctl.capture_count(), 0);
        h.ctl.set_smile_threshold(0.5);
        h.frame_at(10, vec![face(0.6)]);
        assert_eq!(h.ctl.capture_count(), 1);
    }

    #[test]
    fn test_zero_faces_clears_overlay() {
        let mut h = Harness::new().running();
        h.frame_at(0, vec![face(0.1)]);
        assert!(!h.ctl.surface().is_empty());

        assert_eq!(h.frame_at(50, Vec::new()), CycleOutcome::Continue);
        assert_eq!(h.ctl.ui().detection_status, DETECTION_NO_FACE);
        assert!(h.ctl.surface().is_empty());
        assert_eq!(h.ctl.capture_count(), 0);
    }

    #[test]
    fn test_status_follows_first_face_but_any_smile_captures() {
        let mut h = Harness::new().running();
        h.frame_at(0, vec![face(0.3), face(0.95)]);
        assert_eq!(h.ctl.ui().detection_status, "Face detected (30%)");
        assert_eq!(h.ctl.capture_count(), 1);

        let texts: Vec<&str> = h
            .ctl
            .surface()
            .commands()
            .iter()
            .filter_map(|c| match c {
                DrawCommand::FillText { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["Face (30%)", "Smiling! (95%)"]);
    }

    #[test]
    fn test_detector_error_keeps_running() {
        let mut h = Harness::new().running();
        h.clock.set(0);
        h.script.lock().unwrap().push_back(Err("tensor shape".into()));
        assert_eq!(h.ctl.detect_faces(), CycleOutcome::Continue);
        assert!(h.ctl.is_running());
        assert_eq!(h.ctl.capture_count(), 0);

        h.frame_at(10, vec![face(0.9)]);
        assert_eq!(h.ctl.capture_count(), 1);
    }

    #[test]
    fn test_frame_grab_error_keeps_running() {
        let mut h = Harness::new().running();
        h.frame_at(0, vec![face(0.2)]);
        let overlay_before = h.ctl.surface().commands().to_vec();
        let detection_before = h.ctl.ui().detection_status.clone();

        h.ctl.source.frames.lock().unwrap().push_back(Err("VIDIOC_DQBUF: EIO".into()));
        h.clock.set(40);
        assert_eq!(h.ctl.detect_faces(), CycleOutcome::Continue);
        assert!(h.ctl.is_running());
        assert_eq!(h.ctl.ui().status, STATUS_ACTIVE);
        assert_eq!(h.ctl.ui().detection_status, detection_before);
        assert_eq!(h.ctl.surface().commands(), overlay_before.as_slice());

        h.frame_at(80, vec![face(0.9)]);
        assert_eq!(h.ctl.capture_count(), 1);
    }

    #[test]
    fn test_manual_capture_frame_error_propagates() {
        let mut h = Harness::new().running();
        h.ctl.source.frames.lock().unwrap().push_back(Err("device unplugged".into()));
        assert!(matches!(h.ctl.manual_capture(), Err(ControllerError::Frame(_))));
        assert_eq!(h.ctl.capture_count(), 0);
        assert!(h.ctl.gallery().is_empty());
        assert_eq!(h.ctl.ui().status, STATUS_ACTIVE);
        assert!(h.ctl.is_running());
    }

    #[test]
    fn test_failed_auto_capture_leaves_cooldown_open() {
        let mut h = Harness::new().running();
        // An empty frame cannot be JPEG-encoded.
        h.ctl.source.frames.lock().unwrap().push_back(Ok(RgbImage::new(0, 0)));
        h.frame_at(5_000, vec![face(0.9)]);
        assert_eq!(h.ctl.capture_count(), 0);
        assert!(h.ctl.gallery().is_empty());
        assert_eq!(h.ctl.status().last_auto_capture_ms, None);
        assert!(!h.ctl.ui().cooldown_active);

        h.frame_at(5_033, vec![face(0.9)]);
        assert_eq!(h.ctl.capture_count(), 1);
        assert_eq!(h.ctl.status().last_auto_capture_ms, Some(5_033));
    }

    #[test]
    fn test_cooldown_indicator() {
        let mut h = Harness::new().running();
        h.frame_at(0, vec![face(0.8)]);
        assert!(!h.ctl.ui().cooldown_active);

        h.frame_at(1000, vec![face(0.9)]);
        assert!(h.ctl.ui().cooldown_active);
        assert_eq!(h.ctl.capture_count(), 1);

        h.frame_at(1500, vec![face(0.3)]);
        assert!(!h.ctl.ui().cooldown_active);

        h.frame_at(2000, vec![face(0.9)]);
        assert!(h.ctl.ui().cooldown_active);
        h.ctl.stop_camera();
        assert!(!h.ctl.ui().cooldown_active);
        h.ctl.start_camera().unwrap();

        h.frame_at(3500, vec![face(0.75)]);
        assert!(!h.ctl.ui().cooldown_active);
        assert_eq!(h.ctl.capture_count(), 2);
    }

    #[test]
    fn test_cooldown_indicator_off_without_auto_capture() {
        let mut h = Harness::new().running();
        h.frame_at(0, vec![face(0.9)]);
        h.ctl.set_auto_capture(false);
        h.frame_at(1000, vec![face(0.9)]);
        assert!(!h.ctl.ui().cooldown_active);
    }

    #[test]
    fn test_timer_deadlines_saturate() {
        let mut h = Harness::new().running();
        h.clock.set(u64::MAX - 10);
        h.ctl.manual_capture().unwrap();
        assert_eq!(h.ctl.next_deadline_ms(), Some(u64::MAX));
        assert_eq!(h.ctl.download_all(), 1);
        h.ctl.poll_timers();
        assert_eq!(h.saves.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_manual_capture_while_stopped_is_noop() {
        let mut h = Harness::new().ready();
        assert!(h.ctl.manual_capture().unwrap().is_none());
        assert_eq!(h.ctl.capture_count(), 0);
        assert!(h.ctl.gallery().is_empty());
        assert!(h.ctl.next_deadline_ms().is_none());
    }

    #[test]
    fn test_manual_capture_status_and_flash_timers() {
        let mut h = Harness::new().running();
        h.clock.set(1_000);
        let id = h.ctl.manual_capture().unwrap().unwrap();
        assert_eq!(h.ctl.gallery().get(&id).unwrap().sequence, 1);
        assert_eq!(h.ctl.ui().status, STATUS_MANUAL_SAVED);
        assert!(h.ctl.ui().flash);
        assert_eq!(h.ctl.next_deadline_ms(), Some(1_500));

        h.clock.set(1_500);
        h.ctl.poll_timers();
        assert!(!h.ctl.ui().flash);
        assert_eq!(h.ctl.ui().status, STATUS_MANUAL_SAVED);

        h.clock.set(3_000);
        h.ctl.poll_timers();
        assert_eq!(h.ctl.ui().status, STATUS_ACTIVE);
        assert!(h.ctl.next_deadline_ms().is_none());
    }

    #[test]
    fn test_manual_capture_does_not_touch_cooldown() {
        let mut h = Harness::new().running();
        h.clock.set(0);
        h.ctl.manual_capture().unwrap();
        h.frame_at(10, vec![face(0.9)]);
        assert_eq!(h.ctl.capture_count(), 2);
    }

    #[test]
    fn test_captured_image_is_native_jpeg() {
        let mut h = Harness::new().running();
        h.frame_at(7, vec![face(0.9)]);
        let img = h.ctl.gallery().iter().next().unwrap();
        assert_eq!((img.width, img.height), (64, 48));
        assert_eq!(img.captured_at_ms, 7);
        let decoded = image::load_from_memory(&img.jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
    }

    #[test]
    fn test_delete_preserves_order_and_resets_when_empty() {
        let mut h = Harness::new().running();
        for t in 0..3 {
            h.clock.set(t);
            h.ctl.manual_capture().unwrap();
        }
        let ids: Vec<ImageId> = h.ctl.gallery().iter().map(|i| i.id).collect();

        h.ctl.delete_image(&ids[1]).unwrap();
        let left: Vec<u64> = h.ctl.gallery().iter().map(|i| i.sequence).collect();
        assert_eq!(left, vec![3, 1]);
        assert!(h.ctl.ui().controls.download_all);

        h.ctl.delete_image(&ids[0]).unwrap();
        h.ctl.delete_image(&ids[2]).unwrap();
        assert!(h.ctl.gallery().is_empty());
        assert!(!h.ctl.ui().controls.download_all);
        assert!(!h.ctl.ui().controls.clear_gallery);
        assert_eq!(h.ctl.ui().gallery_message.as_deref(), Some(GALLERY_EMPTY));
        assert_eq!(h.ctl.capture_count(), 3);

        assert!(matches!(h.ctl.delete_image(&ids[0]), Err(ControllerError::ImageNotFound(_))));
    }

    #[test]
    fn test_clear_requires_confirmation() {
        let mut h = Harness::new().running();
        h.ctl.manual_capture().unwrap();
        assert!(!h.ctl.clear_gallery(false));
        assert_eq!(h.ctl.gallery().len(), 1);
        assert_eq!(h.ctl.capture_count(), 1);
    }

    #[test]
    fn test_clear_then_capture_reenables_bulk_actions() {
        let mut h = Harness::new().running();
        h.ctl.manual_capture().unwrap();
        h.ctl.manual_capture().unwrap();

        assert!(h.ctl.clear_gallery(true));
        assert_eq!(h.ctl.capture_count(), 0);
        assert!(h.ctl.gallery().is_empty());
        assert!(!h.ctl.ui().controls.download_all);
        assert!(!h.ctl.ui().controls.clear_gallery);

        h.ctl.manual_capture().unwrap();
        assert_eq!(h.ctl.capture_count(), 1);
        assert!(h.ctl.ui().controls.download_all);
        assert!(h.ctl.ui().controls.clear_gallery);
        assert!(h.ctl.ui().gallery_message.is_none());
    }

    #[test]
    fn test_download_image_uses_sequence_and_timestamp() {
        let mut h = Harness::new().running();
        h.clock.set(1_234);
        let id = h.ctl.manual_capture().unwrap().unwrap();
        let path = h.ctl.download_image(&id).unwrap();
        assert_eq!(path, PathBuf::from("/downloads/smile_1_1234.jpg"));
        assert_eq!(h.saves.lock().unwrap()[0].0, "smile_1_1234.jpg");
    }

    #[test]
    fn test_download_all_is_staggered() {
        let mut h = Harness::new().running();
        for t in 0..3 {
            h.clock.set(t);
            h.ctl.manual_capture().unwrap();
        }
        h.clock.set(10_000);
        h.ctl.poll_timers();
        h.saves.lock().unwrap().clear();

        assert_eq!(h.ctl.download_all(), 3);
        assert!(h.saves.lock().unwrap().is_empty());

        for t in [10_000, 10_050, 10_100, 10_150, 10_200] {
            h.clock.set(t);
            h.ctl.poll_timers();
        }

        let saves = h.saves.lock().unwrap().clone();
        assert_eq!(
            saves,
            vec![
                ("smile_1_10000.jpg".to_string(), 10_000),
                ("smile_2_10000.jpg".to_string(), 10_100),
                ("smile_3_10000.jpg".to_string(), 10_200),
            ]
        );
    }

    #[test]
    fn test_flush_downloads_writes_pending_saves() {
        let mut h = Harness::new().running();
        for t in 0..3 {
            h.clock.set(t);
            h.ctl.manual_capture().unwrap();
        }
        h.clock.set(10_000);
        h.ctl.poll_timers();
        h.ctl.manual_capture().unwrap();
        assert_eq!(h.ctl.download_all(), 4);
        h.ctl.poll_timers();
        assert_eq!(h.saves.lock().unwrap().len(), 1);

        assert_eq!(h.ctl.flush_downloads(), 3);
        let saves = h.saves.lock().unwrap().clone();
        assert_eq!(saves.len(), 4);
        assert!(saves.iter().all(|(_, at)| *at == 10_000));
        // Flash and status timers are dropped, not fired.
        assert!(h.ctl.next_deadline_ms().is_none());
        assert!(h.ctl.ui().flash);
    }

    #[test]
    fn test_download_all_empty_gallery() {
        let mut h = Harness::new().ready();
        assert_eq!(h.ctl.download_all(), 0);
        assert!(h.ctl.next_deadline_ms().is_none());
    }

    #[test]
    fn test_overlay_rescaled_to_configured_size() {
        let clock = TestClock::default();
        let sink = RecordingSink { saves: Arc::default(), clock: clock.clone() };
        let options = ControllerOptions {
            overlay_size: Some(DisplaySize::new(128, 96)),
            ..Default::default()
        };
        let script = Script::default();
        let mut ctl = CaptureController::new(
            FakeSource::default(),
            DisplayList::default(),
            sink,
            clock,
            Settings::default(),
            options,
        );
        ctl.models_loaded(Ok(Box::new(ScriptedAnalyzer(Arc::clone(&script)))));
        ctl.start_camera().unwrap();
        script.lock().unwrap().push_back(Ok(vec![face(0.1)]));
        ctl.detect_faces();

        match &ctl.surface().commands()[0] {
            DrawCommand::StrokeRect { rect, .. } => {
                assert_eq!((rect.x, rect.y, rect.width, rect.height), (16.0, 24.0, 40.0, 40.0));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_snapshot_frame_only_while_running() {
        let mut h = Harness::new().ready();
        assert!(h.ctl.snapshot_frame().unwrap().is_none());
        h.ctl.start_camera().unwrap();
        assert!(h.ctl.snapshot_frame().unwrap().is_some());
    }
}
