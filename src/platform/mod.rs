//! Boundary to the camera platform.
//!
//! Everything the core needs from the outside world is expressed here as
//! traits: enumeration and characteristics, device and session objects,
//! the raw image ring, and slot memory. Device and session callbacks are
//! delivered as [`PlatformEvent`]s over a channel instead of mutating
//! shared state from the platform's threads.
//!
//! [`SyntheticPlatform`] implements the whole boundary in-process.

mod characteristics;
mod image;
mod memory;
mod status;
mod synthetic;

pub use characteristics::{
    CameraCharacteristics, Facing, FpsRange, HardwareLevel, PixelFormat, StreamConfiguration,
};
pub use image::{AcquiredImage, ImageListener, ImageQueue, Plane, RawImage};
pub use memory::{
    BufferAllocator, BufferError, HostAllocator, HostBuffers, MappedBuffers, ReleaseObserver,
};
pub use status::{CameraStatus, PlatformError};
pub use synthetic::{SyntheticCamera, SyntheticChroma, SyntheticPlatform, TestPattern};

use std::sync::Arc;

/// Asynchronous notifications from the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformEvent {
    /// The device went away. Terminal for the device.
    DeviceDisconnected,
    /// The device reported an error code. Terminal for the device.
    DeviceError(i32),
    /// The session is configured and idle.
    SessionReady,
    /// The session started processing requests.
    SessionActive,
    /// The session was closed.
    SessionClosed,
}

/// Sending half of a device's event stream.
pub type EventSender = crossbeam_channel::Sender<PlatformEvent>;
/// Receiving half of a device's event stream.
pub type EventReceiver = crossbeam_channel::Receiver<PlatformEvent>;

macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(
            /// Platform-issued identifier.
            pub u64,
        );
    };
}

handle_type!(
    /// An open camera device.
    DeviceHandle
);
handle_type!(
    /// A capture session on a device.
    SessionHandle
);
handle_type!(
    /// An output target bound to an image sink.
    OutputTargetHandle
);
handle_type!(
    /// A capture request.
    RequestHandle
);

/// Capture request templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestTemplate {
    /// Low-latency viewfinder output.
    Preview,
    /// Stable frame rate for recording.
    Record,
}

/// Camera enumeration and session provider.
///
/// Handles are only meaningful to the platform that issued them. Every
/// object created here must be freed through the matching call.
pub trait CameraPlatform: Send + Sync {
    /// Ids of every camera the platform knows about.
    fn camera_ids(&self) -> Result<Vec<String>, PlatformError>;

    /// Static characteristics of one camera.
    fn characteristics(&self, camera_id: &str) -> Result<CameraCharacteristics, PlatformError>;

    /// Opens a device. Disconnect and error callbacks go to `events`.
    fn open_device(&self, camera_id: &str, events: EventSender)
        -> Result<DeviceHandle, PlatformError>;

    /// Creates a capture session. Session state callbacks go to `events`.
    fn create_session(
        &self,
        device: DeviceHandle,
        events: EventSender,
    ) -> Result<SessionHandle, PlatformError>;

    /// Binds an output target of the session to an image sink.
    fn create_output_target(
        &self,
        session: SessionHandle,
        sink: Arc<ImageQueue>,
    ) -> Result<OutputTargetHandle, PlatformError>;

    /// Creates a capture request from a template.
    fn create_request(
        &self,
        device: DeviceHandle,
        template: RequestTemplate,
    ) -> Result<RequestHandle, PlatformError>;

    /// Sets the request's target frame rate range.
    fn set_target_fps_range(
        &self,
        request: RequestHandle,
        range: FpsRange,
    ) -> Result<(), PlatformError>;

    /// Adds an output target to the request.
    fn add_target(
        &self,
        request: RequestHandle,
        target: OutputTargetHandle,
    ) -> Result<(), PlatformError>;

    /// Starts continuous capture with a fixed request.
    fn set_repeating_request(
        &self,
        session: SessionHandle,
        request: RequestHandle,
    ) -> Result<(), PlatformError>;

    /// Stops the repeating request. The session stays open.
    fn stop_repeating(&self, session: SessionHandle) -> Result<(), PlatformError>;

    /// Frees an output target.
    fn free_output_target(&self, target: OutputTargetHandle);

    /// Frees a capture request.
    fn free_request(&self, request: RequestHandle);

    /// Closes a session, stopping anything still repeating.
    fn close_session(&self, session: SessionHandle);

    /// Closes a device.
    fn close_device(&self, device: DeviceHandle);

    /// Frees enumeration state held for `camera_ids` and `characteristics`.
    fn release_enumeration(&self) {}
}
