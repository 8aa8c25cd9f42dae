//! Multi-camera frame acquisition.
//!
//! Drives two to eight cameras at once, each at a constant frame rate and
//! fixed YUV 4:2:0 resolution, and hands upright RGB frames downstream.
//!
//! # Architecture
//!
//! Frames move through one pipeline per camera:
//!
//! ```text
//! platform → image queue → FrameReader → FrameBufferPool → worker → publisher
//!                              ↓
//!                     yuv_to_rgb + correct
//! ```
//!
//! The reader runs on the platform's callback thread and is the pool's
//! only producer. Each camera's worker thread is its only consumer. The
//! [`CaptureCoordinator`] owns the pipelines, the workers and the
//! shutdown order.
//!
//! # Design Principles
//!
//! - **Latest frame wins**: a slow consumer sees skipped frames, never stale ones
//! - **Bounded waits**: every blocking call has a timeout and honours stop
//! - **Platform behind a trait**: [`platform::CameraPlatform`] is the only
//!   thing that talks to hardware
//! - **Ordered teardown**: platform objects are freed in reverse creation order
//!
//! # Example
//!
//! ```no_run
//! use multicam::{
//!     coordinator::{CaptureCoordinator, NullPublisher},
//!     platform::{Facing, HostAllocator, SyntheticCamera, SyntheticPlatform},
//!     FileConfig,
//! };
//! use std::sync::Arc;
//!
//! let platform = Arc::new(SyntheticPlatform::new(vec![
//!     SyntheticCamera::new("0", Facing::Back, 1440, 1080),
//!     SyntheticCamera::new("1", Facing::Front, 1440, 1080),
//! ]));
//! let mut config = FileConfig::default();
//! config.runtime.frame_limit = Some(10);
//!
//! let mut coordinator = CaptureCoordinator::from_config(
//!     &config,
//!     platform,
//!     Arc::new(HostAllocator::new()),
//!     Arc::new(NullPublisher),
//! )
//! .unwrap();
//! coordinator.init().unwrap();
//! coordinator.open().unwrap();
//! let report = coordinator.run().unwrap();
//! println!("{}", report.to_toml().unwrap());
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

/// Slot ring between the image callback and the camera worker.
pub mod buffering;
/// Camera configuration, detection, lifecycle and frame reading.
pub mod capture;
/// YUV to RGB conversion and orientation correction.
pub mod conversion;
/// Worker threads, cancellation and run reports for 2 to 8 cameras.
pub mod coordinator;
/// Prometheus metrics and the optional scrape server.
pub mod metrics;
/// The camera platform boundary and a synthetic implementation.
pub mod platform;

// Re-export commonly used types at crate root
pub use buffering::{FrameBufferPool, FrameMetadata, PoolError};
pub use capture::{CameraDevice, CameraState, CaptureConfig, FileConfig, Frame, FrameReader};
pub use conversion::{correct, yuv_to_rgb, Orientation};
pub use coordinator::{CancellationToken, CaptureCoordinator, CoordinatorError, RunReport};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
