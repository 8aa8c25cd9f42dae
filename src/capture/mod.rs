//! Camera lifecycle and frame production.
//!
//! A camera is described by a [`CaptureConfig`], detected into a
//! [`CameraDescriptor`], driven through its states by a [`CameraDevice`],
//! and fed by a [`FrameReader`] that turns raw platform images into
//! upright RGB frames in the camera's frame buffer pool.

mod camera;
mod config;
mod descriptor;
mod frame;
mod reader;

pub use camera::{CameraDevice, CameraError, CameraState, CaptureSession};
pub use config::{
    CaptureConfig, ConfigError, FileConfig, PatternKind, RuntimeConfig, SyntheticConfig,
    MAX_CAMERAS, MIN_CAMERAS,
};
pub use descriptor::{detect, CameraDescriptor};
pub use frame::{Frame, RGB_CHANNELS};
pub use reader::{FrameError, FrameReader, ReaderStats};
