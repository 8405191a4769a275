//! Persisted device configuration.
//!
//! A single TOML file holds the server endpoint, capture parameters, the
//! stream tuning table and the "force recovery mode" flag. The file is
//! rewritten whole on every change.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use camlink_core::{
    CaptureParams, FrameSize, IndicatorOutput, RecoveryStore, StreamConfig, UplinkError,
};

/// Errors from reading, writing or validating the configuration file.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error(transparent)]
    Invalid(#[from] UplinkError),
}

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Where frames are streamed to.
    pub server: ServerConfig,
    /// Capture settings.
    pub camera: CameraConfig,
    /// Streaming pipeline tuning.
    pub stream: StreamConfig,
    /// Status LED.
    pub indicator: IndicatorConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Recovery workflow state.
    pub recovery: RecoveryConfig,
}

/// Stream server endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// IPv4 address of the stream server.
    pub ip: String,
    /// TCP port, 1..=65535.
    pub port: u32,
    /// Request path of the stream endpoint.
    pub path: String,
}

/// Which frame source feeds the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Synthesized frames, no sensor needed.
    #[default]
    Pattern,
    /// JPEG files replayed from `camera.directory`.
    Directory,
}

/// Capture settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Resolution preset: "96X96" .. "UXGA".
    pub frame_size: String,
    /// JPEG quality, 1 (best) ..= 31 (worst).
    pub jpeg_quality: u32,
    /// Frame buffers in the pool.
    pub buffer_count: usize,
    pub source: SourceKind,
    /// Directory of JPEG files for the `directory` source.
    pub directory: PathBuf,
}

/// Status LED settings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    /// LED brightness file. Empty disables the LED.
    pub led_path: String,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

/// Recovery workflow state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Set after repeated connect failures; the next boot enters the
    /// recovery workflow instead of streaming.
    pub force_recovery: bool,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            camera: CameraConfig::default(),
            stream: StreamConfig::default(),
            indicator: IndicatorConfig::default(),
            logging: LoggingConfig::default(),
            recovery: RecoveryConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ip: "192.168.0.2".into(),
            port: 8080,
            path: "/input".into(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        let params = CaptureParams::default();
        Self {
            frame_size: params.frame_size.name().into(),
            jpeg_quality: u32::from(params.jpeg_quality),
            buffer_count: params.buffer_count,
            source: SourceKind::Pattern,
            directory: PathBuf::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Validation ───────────────────────────────────────────────────

impl DeviceConfig {
    /// Check every persisted value the pipeline depends on.
    pub fn validate(&self) -> Result<(), UplinkError> {
        if self.server.ip.parse::<Ipv4Addr>().is_err() {
            return Err(UplinkError::Config(format!(
                "server ip {:?} is not an IPv4 address",
                self.server.ip
            )));
        }
        if !(1..=65535).contains(&self.server.port) {
            return Err(UplinkError::Config(format!(
                "server port {} outside 1..=65535",
                self.server.port
            )));
        }
        if !self.server.path.starts_with('/') {
            return Err(UplinkError::Config(format!(
                "server path {:?} must start with '/'",
                self.server.path
            )));
        }
        self.capture_params()?;
        if self.camera.source == SourceKind::Directory && self.camera.directory.as_os_str().is_empty() {
            return Err(UplinkError::Config(
                "camera.directory is required for the directory source".into(),
            ));
        }
        self.stream.validate()
    }

    /// `http://{ip}:{port}{path}`.
    pub fn stream_url(&self) -> String {
        format!(
            "http://{}:{}{}",
            self.server.ip, self.server.port, self.server.path
        )
    }

    pub fn capture_params(&self) -> Result<CaptureParams, UplinkError> {
        let frame_size: FrameSize = self.camera.frame_size.parse()?;
        let jpeg_quality = u8::try_from(self.camera.jpeg_quality).map_err(|_| {
            UplinkError::Config(format!(
                "jpeg quality {} outside 1..=31",
                self.camera.jpeg_quality
            ))
        })?;
        let params = CaptureParams {
            frame_size,
            jpeg_quality,
            buffer_count: self.camera.buffer_count,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn indicator_output(&self) -> IndicatorOutput {
        if self.indicator.led_path.is_empty() {
            IndicatorOutput::Disabled
        } else {
            IndicatorOutput::Sysfs(PathBuf::from(&self.indicator.led_path))
        }
    }
}

// ── ConfigStore ──────────────────────────────────────────────────

/// The configuration file and its current contents.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    config: DeviceConfig,
}

impl ConfigStore {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        let config = match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                DeviceConfig::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                DeviceConfig::default()
            }
        };
        Self::with_config(path, config)
    }

    pub fn with_config(path: &Path, config: DeviceConfig) -> Self {
        Self {
            path: path.to_path_buf(),
            config,
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> Result<(), StoreError> {
        Self::with_config(path, DeviceConfig::default()).save()
    }

    pub fn save(&self) -> Result<(), StoreError> {
        let text = toml::to_string_pretty(&self.config)?;
        std::fs::write(&self.path, text)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        Ok(self.config.validate()?)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn force_recovery(&self) -> bool {
        self.config.recovery.force_recovery
    }

    /// Persist the recovery flag.
    pub fn set_force_recovery(&mut self, force: bool) -> Result<(), StoreError> {
        self.config.recovery.force_recovery = force;
        self.save()
    }

    pub fn clear_recovery(&mut self) -> Result<(), StoreError> {
        self.set_force_recovery(false)
    }
}

impl RecoveryStore for ConfigStore {
    fn request_recovery(&mut self) -> Result<(), UplinkError> {
        tracing::warn!("setting force recovery flag in {}", self.path.display());
        self.set_force_recovery(true)
            .map_err(|e| UplinkError::Config(e.to_string()))
    }
}

// ── Tests ────────────────────────────────────────────────────────
