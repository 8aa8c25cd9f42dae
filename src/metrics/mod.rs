//! Prometheus metrics for the capture pipeline.
//!
//! Every metric carries a `camera` label.
//!
//! # Metrics Exposed
//!
//! - `multicam_frames_delivered_total` - Frames dispatched into the pool
//! - `multicam_frames_published_total` - Frames handed downstream
//! - `multicam_frames_skipped_total` - Ready frames replaced before consumption
//! - `multicam_frames_dropped_total` - Raw images dropped before dispatch
//! - `multicam_consumer_timeouts_total` - Consumer waits without a frame
//! - `multicam_camera_streaming` - 1 while the camera streams
//!
//! With the `metrics` feature, [`MetricsServer`] serves them over HTTP.
//!
//! # Example
//!
//! ```no_run
//! use multicam::metrics::{CameraSnapshot, CaptureMetrics};
//!
//! let metrics = CaptureMetrics::new().expect("Failed to create registry");
//! metrics.update(&CameraSnapshot {
//!     camera: "rear".to_string(),
//!     delivered: 120,
//!     published: 118,
//!     skipped: 2,
//!     dropped: 0,
//!     timeouts: 0,
//!     streaming: true,
//! });
//! ```

mod collector;
#[cfg(feature = "metrics")]
mod server;

pub use collector::{CameraSnapshot, CaptureMetrics, MetricsError};
#[cfg(feature = "metrics")]
pub use server::{MetricsServer, MetricsServerConfig, ServerError};
