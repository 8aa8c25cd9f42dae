//! Capture configuration.
//!
//! Every camera runs at a constant frame rate and a fixed YUV 4:2:0
//! resolution. Detection only accepts an exact match for both, so the
//! values here must be ones the sensor actually advertises.

use crate::buffering::MIN_CAPACITY;
use crate::platform::{Facing, PixelFormat};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

/// Most cameras a single coordinator drives.
pub const MAX_CAMERAS: usize = 8;
/// Fewest cameras a coordinator drives.
pub const MIN_CAMERAS: usize = 2;

/// Configuration for one camera.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Name used in logs, metrics and published frames.
    pub name: String,
    /// Which way the camera must face.
    pub facing: Facing,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Constant frames per second.
    pub fps: u32,
    /// Pixel format requested from the sensor.
    #[serde(default = "default_pixel_format")]
    pub pixel_format: PixelFormat,
    /// Slots in the frame buffer pool, also the raw image ring size.
    #[serde(default = "default_buffer_count")]
    pub buffer_count: usize,
}

fn default_pixel_format() -> PixelFormat {
    PixelFormat::Yuv420
}

fn default_buffer_count() -> usize {
    4
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self::rear()
    }
}

impl CaptureConfig {
    /// Road-facing camera.
    pub fn rear() -> Self {
        Self {
            name: "rear".to_string(),
            facing: Facing::Back,
            width: 1440,
            height: 1080,
            fps: 20,
            pixel_format: default_pixel_format(),
            buffer_count: default_buffer_count(),
        }
    }

    /// Driver-facing camera.
    pub fn front() -> Self {
        Self {
            name: "front".to_string(),
            facing: Facing::Front,
            fps: 10,
            ..Self::rear()
        }
    }

    /// Creates a new configuration with the specified dimensions.
    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Sets the constant frame rate.
    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }

    /// Sets the name used in logs and frames.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Time between two frames at the configured rate.
    pub fn frame_period(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.fps.max(1)))
    }

    /// Bytes of one converted RGB frame.
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    /// Validates the configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if self.width == 0 || self.height == 0 || self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(ConfigError::InvalidDimensions {
                camera: self.name.clone(),
                width: self.width,
                height: self.height,
            });
        }
        if self.fps == 0 || self.fps > 120 {
            return Err(ConfigError::InvalidFrameRate {
                camera: self.name.clone(),
                fps: self.fps,
            });
        }
        if self.buffer_count < MIN_CAPACITY {
            return Err(ConfigError::TooFewBuffers {
                camera: self.name.clone(),
                requested: self.buffer_count,
            });
        }
        Ok(())
    }
}

/// Settings shared by all cameras.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Upper bound on a single consumer or producer wait.
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,
    /// Stop after this many frames per camera. Runs until cancelled if unset.
    #[serde(default)]
    pub frame_limit: Option<u64>,
    /// Metrics server port (0 to disable).
    #[serde(default)]
    pub metrics_port: u16,
}

fn default_wait_timeout_ms() -> u64 {
    100
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            wait_timeout_ms: default_wait_timeout_ms(),
            frame_limit: None,
            metrics_port: 0,
        }
    }
}

impl RuntimeConfig {
    /// Consumer wait bound as a `Duration`.
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
}

/// Content the demo's synthetic sensors render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    /// Flat gray frames.
    MidGray,
    /// Moving luma ramp.
    #[default]
    Gradient,
    /// Seeded noise.
    Noise,
}

/// Synthetic platform settings for the demo binary.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyntheticConfig {
    /// What every sensor renders.
    #[serde(default)]
    pub pattern: PatternKind,
    /// Noise seed for the first camera; later cameras add their index.
    #[serde(default)]
    pub seed: u64,
    /// Mounting angle per camera name, 0 when absent.
    #[serde(default)]
    pub mount_degrees: HashMap<String, i32>,
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A camera has an empty name.
    #[error("camera name must not be empty")]
    EmptyName,
    /// Width or height is zero or odd.
    #[error("camera {camera}: invalid frame dimensions {width}x{height} (must be non-zero and even)")]
    InvalidDimensions {
        /// Camera name.
        camera: String,
        /// Rejected width.
        width: u32,
        /// Rejected height.
        height: u32,
    },
    /// Frame rate outside 1..=120.
    #[error("camera {camera}: invalid frame rate {fps} (must be 1-120 fps)")]
    InvalidFrameRate {
        /// Camera name.
        camera: String,
        /// Rejected rate.
        fps: u32,
    },
    /// Fewer buffers than the pool needs.
    #[error("camera {camera}: {requested} frame buffers requested, at least {MIN_CAPACITY} required")]
    TooFewBuffers {
        /// Camera name.
        camera: String,
        /// Rejected buffer count.
        requested: usize,
    },
    /// Camera count outside the supported range.
    #[error("{0} cameras configured, expected {MIN_CAMERAS} to {MAX_CAMERAS}")]
    CameraCount(usize),
    /// Two cameras share a name.
    #[error("camera name {0} is used twice")]
    DuplicateCamera(String),
    /// Wait timeout is zero.
    #[error("wait timeout must be positive")]
    InvalidTimeout,
    /// The file could not be read.
    #[error("failed to read config file: {0}")]
    FileReadError(String),
    /// The TOML could not be parsed or written.
    #[error("failed to parse config file: {0}")]
    ParseError(String),
}

/// Full configuration file format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileConfig {
    /// Cameras to drive, 2 to 8.
    #[serde(default = "default_cameras")]
    pub cameras: Vec<CaptureConfig>,
    /// Waits, limits and the metrics port.
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Synthetic sensor settings for the demo binary.
    #[serde(default)]
    pub synthetic: SyntheticConfig,
}

fn default_cameras() -> Vec<CaptureConfig> {
    vec![CaptureConfig::rear(), CaptureConfig::front()]
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            cameras: default_cameras(),
            runtime: RuntimeConfig::default(),
            synthetic: SyntheticConfig::default(),
        }
    }
}

impl FileConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: FileConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes the configuration back to TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Checks every camera, name uniqueness, camera count and timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_CAMERAS..=MAX_CAMERAS).contains(&self.cameras.len()) {
            return Err(ConfigError::CameraCount(self.cameras.len()));
        }
        let mut names = HashSet::new();
        for camera in &self.cameras {
            camera.validate()?;
            if !names.insert(camera.name.as_str()) {
                return Err(ConfigError::DuplicateCamera(camera.name.clone()));
            }
        }
        if self.runtime.wait_timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout);
        }
        Ok(())
    }
}
