use crate::config::Config;
use crate::platform::{DirectorySink, SystemClock, V4lSource};
use smilecam_core::controller::StatusSnapshot;
use smilecam_core::gallery::ImageSummary;
use smilecam_core::platform::{Clock, ImageSink, VideoSource};
use smilecam_core::{
    CaptureController, ControllerError, CycleOutcome, DisplayList, FaceAnalyzer, ImageId,
    OnnxAnalyzer,
};
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Controller(#[from] ControllerError),
    #[error("invalid image id: {0}")]
    InvalidId(String),
    #[error("camera is not running")]
    NotRunning,
    #[error("failed to write preview: {0}")]
    Preview(#[from] image::ImageError),
    #[error("failed to serialize reply: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to spawn thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

/// Longest pause between detection cycles.
const MAX_FRAME_INTERVAL: Duration = Duration::from_secs(3600);

/// Messages sent to the controller thread.
enum EngineRequest {
    ModelsLoaded(Result<Box<dyn FaceAnalyzer + Send>, String>),
    StartCamera(Reply<()>),
    StopCamera(Reply<()>),
    Capture(Reply<Option<ImageId>>),
    SetSmileThreshold(f32, Reply<()>),
    SetCooldown(u64, Reply<()>),
    SetAutoCapture(bool, Reply<()>),
    Status(Reply<StatusSnapshot>),
    ListImages(Reply<Vec<ImageSummary>>),
    DownloadImage(ImageId, Reply<PathBuf>),
    DownloadAll(Reply<usize>),
    DeleteImage(ImageId, Reply<()>),
    ClearGallery(bool, Reply<bool>),
    Overlay(Reply<String>),
    SavePreview(PathBuf, Reply<PathBuf>),
    Shutdown,
}

/// Clone-safe handle to the controller thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Hand the result of a model load to the controller.
    pub fn models_loaded(&self, result: Result<Box<dyn FaceAnalyzer + Send>, String>) {
        if self.tx.send(EngineRequest::ModelsLoaded(result)).is_err() {
            tracing::warn!("models loaded after engine exit");
        }
    }

    pub async fn start_camera(&self) -> Result<(), EngineError> {
        self.request(EngineRequest::StartCamera).await
    }

    pub async fn stop_camera(&self) -> Result<(), EngineError> {
        self.request(EngineRequest::StopCamera).await
    }

    /// Manual capture. `None` when the camera is stopped.
    pub async fn capture(&self) -> Result<Option<ImageId>, EngineError> {
        self.request(EngineRequest::Capture).await
    }

    pub async fn set_smile_threshold(&self, threshold: f32) -> Result<(), EngineError> {
        self.request(|r| EngineRequest::SetSmileThreshold(threshold, r))
            .await
    }

    pub async fn set_cooldown(&self, cooldown_ms: u64) -> Result<(), EngineError> {
        self.request(|r| EngineRequest::SetCooldown(cooldown_ms, r))
            .await
    }

    pub async fn set_auto_capture(&self, enabled: bool) -> Result<(), EngineError> {
        self.request(|r| EngineRequest::SetAutoCapture(enabled, r))
            .await
    }

    pub async fn status(&self) -> Result<StatusSnapshot, EngineError> {
        self.request(EngineRequest::Status).await
    }

    /// Gallery entries, newest first.
    pub async fn list_images(&self) -> Result<Vec<ImageSummary>, EngineError> {
        self.request(EngineRequest::ListImages).await
    }

    pub async fn download_image(&self, id: &str) -> Result<PathBuf, EngineError> {
        let id = parse_id(id)?;
        self.request(|r| EngineRequest::DownloadImage(id, r)).await
    }

    /// Queue every image for saving. Returns how many were queued.
    pub async fn download_all(&self) -> Result<usize, EngineError> {
        self.request(EngineRequest::DownloadAll).await
    }

    pub async fn delete_image(&self, id: &str) -> Result<(), EngineError> {
        let id = parse_id(id)?;
        self.request(|r| EngineRequest::DeleteImage(id, r)).await
    }

    pub async fn clear_gallery(&self, confirmed: bool) -> Result<bool, EngineError> {
        self.request(|r| EngineRequest::ClearGallery(confirmed, r))
            .await
    }

    /// Current overlay as a JSON display list.
    pub async fn overlay(&self) -> Result<String, EngineError> {
        self.request(EngineRequest::Overlay).await
    }

    /// Save the live frame with the overlay painted on it.
    pub async fn save_preview(&self, path: PathBuf) -> Result<PathBuf, EngineError> {
        self.request(|r| EngineRequest::SavePreview(path, r)).await
    }

    /// Ask the controller thread to release the camera and exit.
    pub fn shutdown(&self) {
        let _ = self.tx.send(EngineRequest::Shutdown);
    }
}

/// Owner of the controller thread. Dropping it detaches the thread.
pub struct EngineThread {
    handle: JoinHandle<()>,
}

impl EngineThread {
    /// Block until the controller thread has exited. Send `shutdown` first.
    pub fn join(self) {
        if self.handle.join().is_err() {
            tracing::error!("controller thread panicked");
        }
    }
}

fn parse_id(id: &str) -> Result<ImageId, EngineError> {
    id.parse().map_err(|_| EngineError::InvalidId(id.to_string()))
}

/// Spawn the controller thread for the configured camera and start
/// loading the face models in the background.
pub fn spawn_engine(config: &Config) -> Result<(EngineHandle, EngineThread), EngineError> {
    let controller = CaptureController::new(
        V4lSource::new(config.camera_device.clone()),
        DisplayList::default(),
        DirectorySink::new(config.output_dir.clone()),
        SystemClock,
        config.settings(),
        config.controller_options(),
    );
    let frame_interval = Duration::from_millis(config.frame_interval_ms);
    let (handle, thread) = spawn_controller(controller, frame_interval)?;

    let loader = handle.clone();
    let model_dir = config.model_dir.clone();
    std::thread::Builder::new()
        .name("smilecam-model-loader".into())
        .spawn(move || {
            tracing::info!(dir = %model_dir.display(), "loading face analysis models");
            let result = OnnxAnalyzer::load(&model_dir)
                .map(|a| Box::new(a) as Box<dyn FaceAnalyzer + Send>)
                .map_err(|e| e.to_string());
            loader.models_loaded(result);
        })
        .map_err(EngineError::Spawn)?;

    Ok((handle, thread))
}

/// Run `controller` on a dedicated OS thread.
///
/// While the camera is running a detection cycle runs every
/// `frame_interval` after the previous one finishes. Requests and timers
/// are serviced between cycles, never during one. On shutdown the camera is
/// released and queued downloads are written before the thread exits.
pub fn spawn_controller<V, K, C>(
    controller: CaptureController<V, DisplayList, K, C>,
    frame_interval: Duration,
) -> Result<(EngineHandle, EngineThread), EngineError>
where
    V: VideoSource + Send + 'static,
    V::Stream: Send,
    K: ImageSink + Send + 'static,
    C: Clock + Send + 'static,
{
    if frame_interval > MAX_FRAME_INTERVAL {
        tracing::warn!(
            requested_ms = frame_interval.as_millis(),
            "frame interval capped at one hour"
        );
    }
    let frame_interval = frame_interval.min(MAX_FRAME_INTERVAL);
    let (tx, rx) = mpsc::channel();
    let handle = std::thread::Builder::new()
        .name("smilecam-controller".into())
        .spawn(move || {
            tracing::info!("controller thread started");
            run_loop(controller, rx, frame_interval);
            tracing::info!("controller thread exiting");
        })
        .map_err(EngineError::Spawn)?;
    Ok((EngineHandle { tx }, EngineThread { handle }))
}

fn run_loop<V, K, C>(
    mut ctl: CaptureController<V, DisplayList, K, C>,
    rx: Receiver<EngineRequest>,
    frame_interval: Duration,
) where
    V: VideoSource,
    K: ImageSink,
    C: Clock,
{
    let mut next_cycle: Option<Instant> = None;

    loop {
        if next_cycle.is_some_and(|at| Instant::now() >= at) {
            next_cycle = match ctl.detect_faces() {
                CycleOutcome::Continue => Some(after(frame_interval)),
                CycleOutcome::Stopped => None,
            };
        }
        ctl.poll_timers();

        let timer_wait = ctl
            .next_deadline_ms()
            .map(|due| Duration::from_millis(due.saturating_sub(ctl.now_ms())));
        let cycle_wait = next_cycle.map(|at| at.saturating_duration_since(Instant::now()));
        let wait = match (timer_wait, cycle_wait) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        let request = match wait {
            Some(timeout) => match rx.recv_timeout(timeout) {
                Ok(req) => Some(req),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match rx.recv() {
                Ok(req) => Some(req),
                Err(_) => break,
            },
        };

        if let Some(req) = request {
            if handle_request(&mut ctl, req).is_break() {
                break;
            }
        }

        match (ctl.is_running(), next_cycle) {
            (true, None) => next_cycle = Some(Instant::now()),
            (false, Some(_)) => next_cycle = None,
            _ => {}
        }
    }

    ctl.stop_camera();
    let flushed = ctl.flush_downloads();
    if flushed > 0 {
        tracing::info!(flushed, "queued downloads written before exit");
    }
}

fn after(interval: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(interval).unwrap_or(now)
}

fn handle_request<V, K, C>(
    ctl: &mut CaptureController<V, DisplayList, K, C>,
    req: EngineRequest,
) -> ControlFlow<()>
where
    V: VideoSource,
    K: ImageSink,
    C: Clock,
{
    match req {
        EngineRequest::ModelsLoaded(result) => ctl.models_loaded(result),
        EngineRequest::StartCamera(reply) => {
            let _ = reply.send(ctl.start_camera().map_err(EngineError::from));
        }
        EngineRequest::StopCamera(reply) => {
            ctl.stop_camera();
            let _ = reply.send(Ok(()));
        }
        EngineRequest::Capture(reply) => {
            let _ = reply.send(ctl.manual_capture().map_err(EngineError::from));
        }
        EngineRequest::SetSmileThreshold(threshold, reply) => {
            ctl.set_smile_threshold(threshold);
            let _ = reply.send(Ok(()));
        }
        EngineRequest::SetCooldown(cooldown_ms, reply) => {
            ctl.set_cooldown_ms(cooldown_ms);
            let _ = reply.send(Ok(()));
        }
        EngineRequest::SetAutoCapture(enabled, reply) => {
            ctl.set_auto_capture(enabled);
            let _ = reply.send(Ok(()));
        }
        EngineRequest::Status(reply) => {
            let _ = reply.send(Ok(ctl.status()));
        }
        EngineRequest::ListImages(reply) => {
            let _ = reply.send(Ok(ctl.gallery().iter().map(|i| i.summary()).collect()));
        }
        EngineRequest::DownloadImage(id, reply) => {
            let _ = reply.send(ctl.download_image(&id).map_err(EngineError::from));
        }
        EngineRequest::DownloadAll(reply) => {
            let _ = reply.send(Ok(ctl.download_all()));
        }
        EngineRequest::DeleteImage(id, reply) => {
            let _ = reply.send(ctl.delete_image(&id).map_err(EngineError::from));
        }
        EngineRequest::ClearGallery(confirmed, reply) => {
            let _ = reply.send(Ok(ctl.clear_gallery(confirmed)));
        }
        EngineRequest::Overlay(reply) => {
            let _ = reply.send(serde_json::to_string(ctl.surface()).map_err(EngineError::from));
        }
        EngineRequest::SavePreview(path, reply) => {
            let _ = reply.send(save_preview(ctl, path));
        }
        EngineRequest::Shutdown => return ControlFlow::Break(()),
    }
    ControlFlow::Continue(())
}

fn save_preview<V, K, C>(
    ctl: &mut CaptureController<V, DisplayList, K, C>,
    path: PathBuf,
) -> Result<PathBuf, EngineError>
where
    V: VideoSource,
    K: ImageSink,
    C: Clock,
{
    let mut frame = ctl.snapshot_frame()?.ok_or(EngineError::NotRunning)?;
    ctl.surface().rasterize(&mut frame);
    frame.save(&path)?;
    tracing::info!(path = %path.display(), "preview saved");
    Ok(path)
}
