//! Static camera characteristics as reported by the platform.

use serde::{Deserialize, Serialize};

/// Pixel formats a stream configuration can advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// Flexible YUV 4:2:0 with three planes and per-plane strides.
    Yuv420,
    /// Compressed still images.
    Jpeg,
}

/// Direction the lens points relative to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Facing {
    /// Away from the user.
    Back,
    /// Towards the user.
    Front,
}

impl std::fmt::Display for Facing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Facing::Back => "back",
            Facing::Front => "front",
        };
        f.write_str(name)
    }
}

/// Hardware support tier of a camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardwareLevel {
    /// Per-frame control on a subset of features.
    Limited,
    /// Per-frame control on every feature.
    Full,
    /// Older HAL emulation without per-frame control. Never used.
    Legacy,
}

/// Inclusive frame rate range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FpsRange {
    /// Lowest rate, inclusive.
    pub min: u32,
    /// Highest rate, inclusive.
    pub max: u32,
}

impl FpsRange {
    /// Range from `min` to `max`, both inclusive.
    pub fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    /// A range pinned to a single rate.
    pub fn constant(fps: u32) -> Self {
        Self { min: fps, max: fps }
    }

    /// True if `fps` lies inside the range.
    pub fn contains(&self, fps: u32) -> bool {
        self.min <= fps && fps <= self.max
    }

    /// True if the range pins a single rate.
    pub fn is_constant(&self) -> bool {
        self.min == self.max
    }
}

impl std::fmt::Display for FpsRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}-{}]", self.min, self.max)
    }
}

/// One entry of the scaler's stream configuration table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamConfiguration {
    /// Pixel format of the stream.
    pub format: PixelFormat,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Input (reprocessing) streams are never used for capture.
    pub is_input: bool,
}

impl StreamConfiguration {
    /// An output stream of the given format and size.
    pub fn output(format: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            format,
            width,
            height,
            is_input: false,
        }
    }
}

/// Everything the platform reports about one camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraCharacteristics {
    /// Platform camera id.
    pub id: String,
    /// Lens direction.
    pub facing: Facing,
    /// Support tier.
    pub hardware_level: HardwareLevel,
    /// Clockwise angle in degrees the sensor image must be rotated to be upright.
    pub sensor_orientation: i32,
    /// Advertised target frame rate ranges.
    pub fps_ranges: Vec<FpsRange>,
    /// Scaler stream configuration table.
    pub stream_configurations: Vec<StreamConfiguration>,
}
