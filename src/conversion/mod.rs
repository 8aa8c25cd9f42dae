//! Per-frame conversion pipeline.
//!
//! Pure functions, no shared state: stride-aware YUV packing, BT.601
//! color conversion, and the mounting-angle correction.

mod correction;
mod yuv;

pub use correction::{correct, warp_perspective, Orientation, RotationMatrix};
pub use yuv::{
    infer_layout, pack, to_rgb, validate, yuv_to_rgb, ChromaLayout, FormatError, PackedYuv,
};
