use serde::Deserialize;
use smilecam_core::controller::ControllerOptions;
use smilecam_core::platform::{Facing, StreamRequest};
use smilecam_core::{DisplaySize, Settings};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Daemon configuration.
///
/// Built-in defaults, overlaid by an optional TOML file, overlaid by
/// `SMILECAM_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path.
    pub camera_device: String,
    /// Requested capture resolution.
    pub width: u32,
    pub height: u32,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Where downloads are written.
    pub output_dir: PathBuf,
    pub smile_threshold: f32,
    pub cooldown_ms: u64,
    pub auto_capture: bool,
    /// Delay between the end of one detection cycle and the start of the next.
    pub frame_interval_ms: u64,
    pub jpeg_quality: u8,
    /// Overlay size; both must be set to override the stream resolution.
    pub overlay_width: Option<u32>,
    pub overlay_height: Option<u32>,
    pub flash_ms: u64,
    pub status_reset_ms: u64,
    pub download_stagger_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        let settings = Settings::default();
        let options = ControllerOptions::default();
        Self {
            camera_device: "/dev/video0".to_string(),
            width: options.stream.ideal_width,
            height: options.stream.ideal_height,
            model_dir: smilecam_core::default_model_dir(),
            output_dir: home_dir().join("Pictures/smilecam"),
            smile_threshold: settings.smile_threshold,
            cooldown_ms: settings.cooldown_ms,
            auto_capture: settings.auto_capture,
            frame_interval_ms: 33,
            jpeg_quality: options.jpeg_quality,
            overlay_width: None,
            overlay_height: None,
            flash_ms: options.flash_ms,
            status_reset_ms: options.status_reset_ms,
            download_stagger_ms: options.download_stagger_ms,
        }
    }
}

impl Config {
    /// Load from `$SMILECAM_CONFIG` or `$XDG_CONFIG_HOME/smilecam/config.toml`
    /// (if present), then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("SMILECAM_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_config_path());

        let mut config = if path.exists() {
            let cfg = Self::from_file(&path)?;
            tracing::info!(path = %path.display(), "loaded config file");
            cfg
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `SMILECAM_*` overrides. Unparseable values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("SMILECAM_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = lookup("SMILECAM_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("SMILECAM_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(v);
        }
        override_parsed(&lookup, "SMILECAM_WIDTH", &mut self.width);
        override_parsed(&lookup, "SMILECAM_HEIGHT", &mut self.height);
        override_parsed(&lookup, "SMILECAM_SMILE_THRESHOLD", &mut self.smile_threshold);
        override_parsed(&lookup, "SMILECAM_COOLDOWN_MS", &mut self.cooldown_ms);
        override_parsed(&lookup, "SMILECAM_FRAME_INTERVAL_MS", &mut self.frame_interval_ms);
        override_parsed(&lookup, "SMILECAM_JPEG_QUALITY", &mut self.jpeg_quality);
        if let Some(v) = lookup("SMILECAM_AUTO_CAPTURE") {
            self.auto_capture = v != "0" && !v.eq_ignore_ascii_case("false");
        }
    }

    pub fn settings(&self) -> Settings {
        let mut settings = Settings {
            smile_threshold: 0.0,
            cooldown_ms: self.cooldown_ms,
            auto_capture: self.auto_capture,
        };
        settings.set_smile_threshold(self.smile_threshold);
        settings
    }

    pub fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            stream: StreamRequest {
                ideal_width: self.width,
                ideal_height: self.height,
                facing: Facing::User,
            },
            overlay_size: match (self.overlay_width, self.overlay_height) {
                (Some(w), Some(h)) => Some(DisplaySize::new(w, h)),
                _ => None,
            },
            jpeg_quality: self.jpeg_quality,
            flash_ms: self.flash_ms,
            status_reset_ms: self.status_reset_ms,
            download_stagger_ms: self.download_stagger_ms,
        }
    }
}

fn override_parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    match lookup(key).map(|v| v.parse::<T>()) {
        Some(Ok(v)) => *slot = v,
        Some(Err(_)) => tracing::warn!(key, "ignoring unparseable environment override"),
        None => {}
    }
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

fn default_config_path() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("smilecam/config.toml")
}
