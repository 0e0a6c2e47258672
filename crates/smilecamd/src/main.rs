use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod platform;

use dbus_interface::SmileCamService;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("smilecamd starting");

    let config = config::Config::load()?;
    tracing::info!(
        device = %config.camera_device,
        model_dir = %config.model_dir.display(),
        output_dir = %config.output_dir.display(),
        threshold = config.smile_threshold,
        cooldown_ms = config.cooldown_ms,
        auto_capture = config.auto_capture,
        "configuration loaded"
    );

    let (engine, engine_thread) = engine::spawn_engine(&config)?;

    let _conn = zbus::connection::Builder::session()?
        .name(dbus_interface::BUS_NAME)?
        .serve_at(dbus_interface::OBJECT_PATH, SmileCamService::new(engine.clone()))?
        .build()
        .await?;

    tracing::info!(bus = dbus_interface::BUS_NAME, "smilecamd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("smilecamd shutting down");
    engine.shutdown();
    tokio::task::spawn_blocking(move || engine_thread.join()).await?;
    tracing::info!("smilecamd stopped");

    Ok(())
}
