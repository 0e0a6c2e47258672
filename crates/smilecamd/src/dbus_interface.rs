use crate::engine::{EngineError, EngineHandle};
use std::path::PathBuf;
use zbus::interface;

pub const BUS_NAME: &str = "org.freedesktop.SmileCam1";
pub const OBJECT_PATH: &str = "/org/freedesktop/SmileCam1";

/// D-Bus interface for the SmileCam daemon.
///
/// Bus name: org.freedesktop.SmileCam1
/// Object path: /org/freedesktop/SmileCam1
pub struct SmileCamService {
    engine: EngineHandle,
}

impl SmileCamService {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }
}

fn to_fdo(err: EngineError) -> zbus::fdo::Error {
    match err {
        EngineError::InvalidId(_) => zbus::fdo::Error::InvalidArgs(err.to_string()),
        _ => zbus::fdo::Error::Failed(err.to_string()),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

#[interface(name = "org.freedesktop.SmileCam1")]
impl SmileCamService {
    /// Acquire the camera and begin the detection loop.
    async fn start_camera(&self) -> zbus::fdo::Result<()> {
        tracing::info!("start_camera requested");
        self.engine.start_camera().await.map_err(to_fdo)
    }

    async fn stop_camera(&self) -> zbus::fdo::Result<()> {
        tracing::info!("stop_camera requested");
        self.engine.stop_camera().await.map_err(to_fdo)
    }

    /// Capture the current frame. Returns (captured, image id); nothing is
    /// captured while the camera is stopped.
    async fn capture(&self) -> zbus::fdo::Result<(bool, String)> {
        let id = self.engine.capture().await.map_err(to_fdo)?;
        Ok(match id {
            Some(id) => (true, id.to_string()),
            None => (false, String::new()),
        })
    }

    async fn set_smile_threshold(&self, threshold: f64) -> zbus::fdo::Result<()> {
        self.engine
            .set_smile_threshold(threshold as f32)
            .await
            .map_err(to_fdo)
    }

    async fn set_cooldown(&self, cooldown_ms: u64) -> zbus::fdo::Result<()> {
        self.engine.set_cooldown(cooldown_ms).await.map_err(to_fdo)
    }

    async fn set_auto_capture(&self, enabled: bool) -> zbus::fdo::Result<()> {
        self.engine.set_auto_capture(enabled).await.map_err(to_fdo)
    }

    /// Controller status as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.engine.status().await.map_err(to_fdo)?;
        to_json(&serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "controller": status,
        }))
    }

    /// Gallery entries as a JSON array, newest first.
    async fn list_images(&self) -> zbus::fdo::Result<String> {
        let images = self.engine.list_images().await.map_err(to_fdo)?;
        to_json(&images)
    }

    /// Save one image to the output directory. Returns the written path.
    async fn download_image(&self, id: &str) -> zbus::fdo::Result<String> {
        tracing::info!(id, "download_image requested");
        let path = self.engine.download_image(id).await.map_err(to_fdo)?;
        Ok(path.display().to_string())
    }

    /// Queue every image for saving. Returns the number queued.
    async fn download_all(&self) -> zbus::fdo::Result<u32> {
        let count = self.engine.download_all().await.map_err(to_fdo)?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn delete_image(&self, id: &str) -> zbus::fdo::Result<()> {
        tracing::info!(id, "delete_image requested");
        self.engine.delete_image(id).await.map_err(to_fdo)
    }

    /// Clear the gallery. Does nothing unless `confirmed` is true.
    async fn clear_gallery(&self, confirmed: bool) -> zbus::fdo::Result<bool> {
        tracing::info!(confirmed, "clear_gallery requested");
        self.engine.clear_gallery(confirmed).await.map_err(to_fdo)
    }

    /// The current overlay as a JSON display list.
    async fn overlay(&self) -> zbus::fdo::Result<String> {
        self.engine.overlay().await.map_err(to_fdo)
    }

    /// Write the live frame with the overlay painted on it to `path`.
    async fn save_preview(&self, path: &str) -> zbus::fdo::Result<String> {
        let path = PathBuf::from(path);
        if !path.is_absolute() {
            return Err(zbus::fdo::Error::InvalidArgs(format!(
                "preview path must be absolute: {}",
                path.display()
            )));
        }
        let saved = self.engine.save_preview(path).await.map_err(to_fdo)?;
        Ok(saved.display().to_string())
    }
}
