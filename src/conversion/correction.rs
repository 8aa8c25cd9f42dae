//! Geometric correction for the camera's mounting angle.
//!
//! The correction is an inverse-mapped perspective warp: each output pixel
//! is projected through a 3x3 homogeneous matrix into the source image and
//! sampled with nearest-neighbor lookup. For the four supported mounting
//! angles the matrix entries are exact, so the warp is a lossless pixel
//! permutation.

use crate::capture::{Frame, RGB_CHANNELS};
use serde::{Deserialize, Serialize};

/// Clockwise mounting angle of a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Orientation {
    /// Upright.
    Deg0,
    /// Quarter turn.
    Deg90,
    /// Upside down.
    Deg180,
    /// Three quarter turn.
    Deg270,
}

impl Orientation {
    /// Maps a reported angle in degrees. Only right angles are supported.
    pub fn from_degrees(degrees: i32) -> Option<Self> {
        match degrees.rem_euclid(360) {
            0 => Some(Orientation::Deg0),
            90 => Some(Orientation::Deg90),
            180 => Some(Orientation::Deg180),
            270 => Some(Orientation::Deg270),
            _ => None,
        }
    }

    /// Angle in degrees.
    pub fn degrees(&self) -> i32 {
        match self {
            Orientation::Deg0 => 0,
            Orientation::Deg90 => 90,
            Orientation::Deg180 => 180,
            Orientation::Deg270 => 270,
        }
    }

    /// Exact (cos, sin) of the angle.
    fn cos_sin(&self) -> (f64, f64) {
        match self {
            Orientation::Deg0 => (1.0, 0.0),
            Orientation::Deg90 => (0.0, 1.0),
            Orientation::Deg180 => (-1.0, 0.0),
            Orientation::Deg270 => (0.0, -1.0),
        }
    }

    /// True if the upright image has width and height swapped.
    pub fn swaps_dimensions(&self) -> bool {
        matches!(self, Orientation::Deg90 | Orientation::Deg270)
    }

    /// Size of the upright image for a source of `width` x `height`.
    pub fn output_size(&self, width: u32, height: u32) -> (u32, u32) {
        if self.swaps_dimensions() {
            (height, width)
        } else {
            (width, height)
        }
    }
}

impl std::fmt::Display for Orientation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

/// Homogeneous matrix mapping output coordinates to source coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotationMatrix([[f64; 3]; 3]);

impl RotationMatrix {
    /// Maps every pixel to itself.
    pub fn identity() -> Self {
        Self([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]])
    }

    /// Inverse map that rotates a `width` x `height` source clockwise by
    /// the orientation about its center.
    pub fn for_orientation(orientation: Orientation, width: u32, height: u32) -> Self {
        let (cos, sin) = orientation.cos_sin();
        let (out_w, out_h) = orientation.output_size(width, height);

        let src_cx = (f64::from(width) - 1.0) / 2.0;
        let src_cy = (f64::from(height) - 1.0) / 2.0;
        let dst_cx = (f64::from(out_w) - 1.0) / 2.0;
        let dst_cy = (f64::from(out_h) - 1.0) / 2.0;

        // Image y points down, so a clockwise turn keeps the usual sign layout.
        let tx = src_cx - (cos * dst_cx + sin * dst_cy);
        let ty = src_cy - (-sin * dst_cx + cos * dst_cy);

        Self([[cos, sin, tx], [-sin, cos, ty], [0.0, 0.0, 1.0]])
    }

    /// Matrix rows.
    pub fn rows(&self) -> &[[f64; 3]; 3] {
        &self.0
    }

    /// Projects `(x, y)` through the matrix. `None` at infinity.
    pub fn apply(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let m = &self.0;
        let w = m[2][0] * x + m[2][1] * y + m[2][2];
        if w.abs() < f64::EPSILON {
            return None;
        }
        let sx = m[0][0] * x + m[0][1] * y + m[0][2];
        let sy = m[1][0] * x + m[1][1] * y + m[1][2];
        Some((sx / w, sy / w))
    }
}

/// Nearest-neighbor perspective warp with a black border.
pub fn warp_perspective(src: &Frame, matrix: &RotationMatrix, out_width: u32, out_height: u32) -> Frame {
    let mut pixels = vec![0u8; out_width as usize * out_height as usize * RGB_CHANNELS];
    let src_w = i64::from(src.width());
    let src_h = i64::from(src.height());
    let src_stride = src.stride();
    let src_pixels = src.pixels();

    for (y, row) in pixels
        .chunks_exact_mut(out_width as usize * RGB_CHANNELS)
        .enumerate()
    {
        for (x, px) in row.chunks_exact_mut(RGB_CHANNELS).enumerate() {
            let Some((sx, sy)) = matrix.apply(x as f64, y as f64) else {
                continue;
            };
            let (sx, sy) = (sx.round() as i64, sy.round() as i64);
            if sx < 0 || sy < 0 || sx >= src_w || sy >= src_h {
                continue;
            }
            let offset = sy as usize * src_stride + sx as usize * RGB_CHANNELS;
            if let Some(source) = src_pixels.get(offset..offset + RGB_CHANNELS) {
                px.copy_from_slice(source);
            }
        }
    }

    Frame::new(pixels, out_width, out_height)
}

/// Rotates a frame upright. The 0° case returns the input untouched.
pub fn correct(frame: Frame, orientation: Orientation) -> Frame {
    if orientation == Orientation::Deg0 {
        return frame;
    }
    let (out_w, out_h) = orientation.output_size(frame.width(), frame.height());
    let matrix = RotationMatrix::for_orientation(orientation, frame.width(), frame.height());
    warp_perspective(&frame, &matrix, out_w, out_h)
}
