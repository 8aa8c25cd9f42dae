//! Camera detection.
//!
//! Detection picks exactly one camera for a configuration. Candidates are
//! filtered by hardware level and facing, then must advertise an output
//! stream with the exact pixel format and resolution requested. There is
//! no nearest-size fallback.

use super::{CameraError, CaptureConfig};
use crate::conversion::Orientation;
use crate::platform::{
    CameraCharacteristics, CameraPlatform, Facing, FpsRange, HardwareLevel, PixelFormat,
};

/// Everything the pipeline needs to know about a detected camera.
///
/// Immutable once detection succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraDescriptor {
    /// Platform camera id.
    pub id: String,
    /// Direction the lens points.
    pub facing: Facing,
    /// Hardware support tier, never `Legacy`.
    pub hardware_level: HardwareLevel,
    /// Clockwise mounting angle of the sensor.
    pub orientation: Orientation,
    /// Frame rate ranges exactly as advertised. Never empty.
    pub fps_ranges: Vec<FpsRange>,
    /// Format of the selected output stream.
    pub pixel_format: PixelFormat,
    /// Sensor width of the selected stream.
    pub width: u32,
    /// Sensor height of the selected stream.
    pub height: u32,
    /// Bytes per row of the converted RGB output.
    pub stride: usize,
}

impl CameraDescriptor {
    /// Bytes of one converted frame.
    pub fn frame_len(&self) -> usize {
        self.stride * self.height as usize
    }

    /// Dimensions of the upright output frame.
    pub fn output_size(&self) -> (u32, u32) {
        self.orientation.output_size(self.width, self.height)
    }

    /// True if a single advertised range covers `fps`.
    ///
    /// Rates between two disjoint ranges are not supported.
    pub fn supports_fps(&self, fps: u32) -> bool {
        self.fps_ranges.iter().any(|range| range.contains(fps))
    }
}

fn has_exact_output(chars: &CameraCharacteristics, config: &CaptureConfig) -> bool {
    chars.stream_configurations.iter().any(|stream| {
        !stream.is_input
            && stream.format == config.pixel_format
            && stream.width == config.width
            && stream.height == config.height
    })
}

/// Selects the single camera matching `config`.
pub fn detect(
    platform: &dyn CameraPlatform,
    config: &CaptureConfig,
) -> Result<CameraDescriptor, CameraError> {
    let ids = platform.camera_ids()?;
    if ids.is_empty() {
        return Err(CameraError::NoCameras);
    }

    let mut facing_matched = false;
    let mut matches = Vec::new();

    for id in &ids {
        let chars = match platform.characteristics(id) {
            Ok(chars) => chars,
            Err(e) => {
                tracing::warn!(camera = %id, "Skipping camera, characteristics unavailable: {}", e);
                continue;
            }
        };

        if chars.hardware_level == HardwareLevel::Legacy {
            tracing::debug!(camera = %id, "Skipping legacy camera");
            continue;
        }
        if chars.facing != config.facing {
            continue;
        }
        facing_matched = true;

        if !has_exact_output(&chars, config) {
            tracing::debug!(
                camera = %id,
                format = ?config.pixel_format,
                width = config.width,
                height = config.height,
                "Camera has no exact stream configuration"
            );
            continue;
        }
        matches.push(chars);
    }

    let chars = match matches.len() {
        0 if facing_matched => {
            return Err(CameraError::NoExactStreamConfiguration {
                facing: config.facing,
                format: config.pixel_format,
                width: config.width,
                height: config.height,
            })
        }
        0 => return Err(CameraError::NoMatchingCamera(config.facing)),
        1 => matches.remove(0),
        _ => {
            return Err(CameraError::AmbiguousCamera {
                facing: config.facing,
                ids: matches.into_iter().map(|c| c.id).collect(),
            })
        }
    };

    let orientation = Orientation::from_degrees(chars.sensor_orientation).ok_or_else(|| {
        CameraError::UnsupportedOrientation {
            id: chars.id.clone(),
            degrees: chars.sensor_orientation,
        }
    })?;

    if chars.fps_ranges.is_empty() {
        return Err(CameraError::NoFrameRates(chars.id));
    }

    let descriptor = CameraDescriptor {
        id: chars.id,
        facing: chars.facing,
        hardware_level: chars.hardware_level,
        orientation,
        fps_ranges: chars.fps_ranges,
        pixel_format: config.pixel_format,
        width: config.width,
        height: config.height,
        stride: config.width as usize * 3,
    };

    tracing::info!(
        camera = %config.name,
        id = %descriptor.id,
        facing = %descriptor.facing,
        orientation = %descriptor.orientation,
        fps_ranges = ?descriptor.fps_ranges,
        "Camera detected"
    );
    Ok(descriptor)
}
