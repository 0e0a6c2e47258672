use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

#[zbus::proxy(
    interface = "org.freedesktop.SmileCam1",
    default_service = "org.freedesktop.SmileCam1",
    default_path = "/org/freedesktop/SmileCam1"
)]
trait SmileCam {
    fn start_camera(&self) -> zbus::Result<()>;
    fn stop_camera(&self) -> zbus::Result<()>;
    fn capture(&self) -> zbus::Result<(bool, String)>;
    fn set_smile_threshold(&self, threshold: f64) -> zbus::Result<()>;
    fn set_cooldown(&self, cooldown_ms: u64) -> zbus::Result<()>;
    fn set_auto_capture(&self, enabled: bool) -> zbus::Result<()>;
    fn status(&self) -> zbus::Result<String>;
    fn list_images(&self) -> zbus::Result<String>;
    fn download_image(&self, id: &str) -> zbus::Result<String>;
    fn download_all(&self) -> zbus::Result<u32>;
    fn delete_image(&self, id: &str) -> zbus::Result<()>;
    fn clear_gallery(&self, confirmed: bool) -> zbus::Result<bool>;
    fn overlay(&self) -> zbus::Result<String>;
    fn save_preview(&self, path: &str) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "smilecam", about = "SmileCam smile-triggered capture CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

#[derive(Subcommand)]
enum Commands {
    /// List V4L2 capture devices (does not need the daemon)
    Devices,
    #[command(flatten)]
    Daemon(DaemonCommand),
}

/// Subcommands answered by smilecamd over the session bus.
#[derive(Subcommand)]
enum DaemonCommand {
    /// Start the camera and the detection loop
    Start,
    /// Stop the camera
    Stop,
    /// Capture the current frame now
    Capture,
    /// Show daemon status
    Status,
    /// Set the smile threshold (0.0 - 1.0)
    Threshold { value: f64 },
    /// Set the auto-capture cooldown in milliseconds
    Cooldown { ms: u64 },
    /// Turn auto-capture on or off
    AutoCapture {
        #[arg(value_enum)]
        state: Toggle,
    },
    /// List captured images, newest first
    List,
    /// Save one image to the output directory
    Download {
        /// Image ID
        id: String,
    },
    /// Save every image to the output directory
    DownloadAll,
    /// Delete one image from the gallery
    Delete {
        /// Image ID
        id: String,
    },
    /// Delete every captured image
    Clear {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Print the current overlay as JSON
    Overlay,
    /// Save the live frame with the overlay drawn on it
    Preview { path: PathBuf },
    /// Follow detection status until interrupted
    Watch {
        /// Poll interval in milliseconds
        #[arg(long, default_value_t = 500)]
        interval_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices => list_devices(),
        Commands::Daemon(command) => {
            let conn = zbus::Connection::session()
                .await
                .context("failed to connect to the session bus")?;
            let proxy = SmileCamProxy::new(&conn)
                .await
                .context("smilecamd is not reachable")?;
            tracing::debug!(unique_name = ?conn.unique_name(), "connected to session bus");
            run(&proxy, command).await?;
        }
    }

    Ok(())
}

async fn run(proxy: &SmileCamProxy<'_>, command: DaemonCommand) -> Result<()> {
    match command {
        DaemonCommand::Start => {
            proxy.start_camera().await?;
            println!("Camera started");
        }
        DaemonCommand::Stop => {
            proxy.stop_camera().await?;
            println!("Camera stopped");
        }
        DaemonCommand::Capture => match proxy.capture().await? {
            (true, id) => println!("Captured {id}"),
            (false, _) => println!("Camera is not running; nothing captured"),
        },
        DaemonCommand::Status => {
            let status: Value = serde_json::from_str(&proxy.status().await?)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        DaemonCommand::Threshold { value } => {
            if !(0.0..=1.0).contains(&value) {
                bail!("threshold must be between 0.0 and 1.0");
            }
            proxy.set_smile_threshold(value).await?;
            println!("Smile threshold set to {}%", (value * 100.0).round());
        }
        DaemonCommand::Cooldown { ms } => {
            proxy.set_cooldown(ms).await?;
            println!("Cooldown set to {ms} ms");
        }
        DaemonCommand::AutoCapture { state } => {
            let enabled = matches!(state, Toggle::On);
            proxy.set_auto_capture(enabled).await?;
            println!("Auto-capture {}", if enabled { "enabled" } else { "disabled" });
        }
        DaemonCommand::List => {
            let images: Vec<Value> = serde_json::from_str(&proxy.list_images().await?)?;
            if images.is_empty() {
                println!("No captures yet. Smile to start!");
            }
            for image in images {
                println!(
                    "{}  #{:<4} {}x{}  {} bytes",
                    image["id"].as_str().unwrap_or("?"),
                    image["sequence"],
                    image["width"],
                    image["height"],
                    image["bytes"],
                );
            }
        }
        DaemonCommand::Download { id } => {
            let path = proxy.download_image(&id).await?;
            println!("Saved {path}");
        }
        DaemonCommand::DownloadAll => {
            let count = proxy.download_all().await?;
            println!("Saving {count} image(s)");
        }
        DaemonCommand::Delete { id } => {
            proxy.delete_image(&id).await?;
            println!("Deleted {id}");
        }
        DaemonCommand::Clear { yes } => {
            let confirmed = yes || confirm("Are you sure you want to clear all captured images?")?;
            if proxy.clear_gallery(confirmed).await? {
                println!("Gallery cleared");
            } else {
                println!("Gallery unchanged");
            }
        }
        DaemonCommand::Overlay => {
            let overlay: Value = serde_json::from_str(&proxy.overlay().await?)?;
            println!("{}", serde_json::to_string_pretty(&overlay)?);
        }
        DaemonCommand::Preview { path } => {
            let path = if path.is_absolute() {
                path
            } else {
                std::env::current_dir()
                    .context("failed to resolve preview path")?
                    .join(path)
            };
            let saved = proxy.save_preview(&path.to_string_lossy()).await?;
            println!("Preview written to {saved}");
        }
        DaemonCommand::Watch { interval_ms } => watch(proxy, interval_ms).await?,
    }

    Ok(())
}

fn list_devices() {
    let devices = smilecam_hw::Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
    }
    for dev in devices {
        println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
    }
}

/// Print status and detection lines whenever they change.
async fn watch(proxy: &SmileCamProxy<'_>, interval_ms: u64) -> Result<()> {
    let mut last = String::new();
    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(50)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
        let status: Value = serde_json::from_str(&proxy.status().await?)?;
        let controller = &status["controller"];
        let ui = &controller["ui"];
        let line = format!(
            "{} | {}{} | captures: {}{}",
            ui["status"].as_str().unwrap_or(""),
            ui["detection_status"].as_str().unwrap_or(""),
            if ui["cooldown_active"].as_bool() == Some(true) { " (Cooldown...)" } else { "" },
            controller["capture_count"],
            if ui["flash"].as_bool() == Some(true) { " *" } else { "" },
        );
        if line != last {
            println!("{line}");
            last = line;
        }
    }
}

fn confirm(question: &str) -> Result<bool> {
    print!("{question} [y/N] ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(is_yes(&answer))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
