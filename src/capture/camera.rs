//! Per-camera lifecycle.
//!
//! A [`CameraDevice`] walks one physical camera through
//! detect → open → configure → stream → close. Platform objects are
//! acquired one at a time and rolled back in reverse order if a later
//! step fails, so a failed attempt never leaks a session or device.
//! Device and session callbacks arrive as [`PlatformEvent`]s and are
//! drained by the camera's consumer thread.

use super::{detect, CameraDescriptor, CaptureConfig};
use crate::buffering::FrameBufferPool;
use crate::platform::{
    CameraPlatform, DeviceHandle, EventReceiver, EventSender, Facing, FpsRange, ImageQueue,
    OutputTargetHandle, PixelFormat, PlatformError, PlatformEvent, RequestHandle,
    RequestTemplate, SessionHandle,
};
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during camera operations.
#[derive(Debug, Error)]
pub enum CameraError {
    /// The platform lists no cameras at all.
    #[error("no cameras reported by the platform")]
    NoCameras,
    /// No non-legacy camera faces the requested way.
    #[error("no usable {0} camera found")]
    NoMatchingCamera(Facing),
    /// A camera faces the right way but lacks the exact stream.
    #[error("no {facing} camera offers an exact {format:?} {width}x{height} output stream")]
    NoExactStreamConfiguration {
        /// Requested facing.
        facing: Facing,
        /// Requested pixel format.
        format: PixelFormat,
        /// Requested width.
        width: u32,
        /// Requested height.
        height: u32,
    },
    /// More than one camera matches.
    #[error("{} {facing} cameras match ({}), expected exactly one", ids.len(), ids.join(", "))]
    AmbiguousCamera {
        /// Requested facing.
        facing: Facing,
        /// Ids of every matching camera.
        ids: Vec<String>,
    },
    /// The mounting angle is not a right angle.
    #[error("camera {id} reports unsupported mounting angle {degrees}")]
    UnsupportedOrientation {
        /// Platform camera id.
        id: String,
        /// Reported angle.
        degrees: i32,
    },
    /// The camera advertises no frame rate ranges.
    #[error("camera {0} advertises no frame rate ranges")]
    NoFrameRates(String),
    /// No advertised range covers the configured rate.
    #[error(
        "{fps} fps is not covered by any supported range ({})",
        ranges.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
    )]
    FpsOutOfRange {
        /// Configured rate.
        fps: u32,
        /// Ranges the camera advertises.
        ranges: Vec<FpsRange>,
    },
    /// The operation is not valid in the current state.
    #[error("cannot {operation} while {state:?}")]
    InvalidState {
        /// What was attempted.
        operation: &'static str,
        /// State the camera was in.
        state: CameraState,
    },
    /// The device was unplugged or taken away.
    #[error("camera disconnected")]
    Disconnected,
    /// The device reported a fatal error code.
    #[error("camera device error {0}")]
    Device(i32),
    /// A platform call failed.
    #[error(transparent)]
    Platform(#[from] PlatformError),
}

/// Lifecycle states of a camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraState {
    /// No platform objects held.
    Closed,
    /// Querying characteristics.
    Detecting,
    /// Waiting for the device to open.
    Opening,
    /// Building the session and repeating request.
    Configuring,
    /// Repeating request running.
    Streaming,
    /// Tearing down.
    Closing,
    /// Terminal for the current attempt; see [`CameraDevice::reset`].
    Error,
}

/// Platform objects of an open camera.
///
/// Fields are filled in acquisition order; `None` means not yet acquired
/// or already freed.
#[derive(Debug)]
pub struct CaptureSession {
    /// Open device.
    device: DeviceHandle,
    /// Capture session on the device.
    session: Option<SessionHandle>,
    /// Output target bound to the image queue.
    target: Option<OutputTargetHandle>,
    /// Repeating capture request.
    request: Option<RequestHandle>,
    /// Set once the repeating request is running.
    repeating: bool,
    /// Constant rate the request targets.
    target_fps: u32,
}

impl CaptureSession {
    fn new(device: DeviceHandle, target_fps: u32) -> Self {
        Self {
            device,
            session: None,
            target: None,
            request: None,
            repeating: false,
            target_fps,
        }
    }

    /// Handle of the open device.
    pub fn device(&self) -> DeviceHandle {
        self.device
    }

    /// Constant frame rate requested from the sensor.
    pub fn target_fps(&self) -> u32 {
        self.target_fps
    }

    /// True while the repeating request runs.
    pub fn is_repeating(&self) -> bool {
        self.repeating
    }

    /// Frees everything in reverse acquisition order.
    fn rollback(mut self, platform: &dyn CameraPlatform) {
        if let Some(request) = self.request.take() {
            platform.free_request(request);
        }
        if let Some(target) = self.target.take() {
            platform.free_output_target(target);
        }
        if let Some(session) = self.session.take() {
            platform.close_session(session);
        }
        platform.close_device(self.device);
    }

    /// Frees everything in teardown order: target, request, session, device.
    fn teardown(mut self, platform: &dyn CameraPlatform, camera: &str) {
        if let (true, Some(session)) = (self.repeating, self.session) {
            if let Err(e) = platform.stop_repeating(session) {
                tracing::warn!(camera, "Failed to stop repeating request: {}", e);
            }
            self.repeating = false;
        }
        if let Some(target) = self.target.take() {
            platform.free_output_target(target);
        }
        if let Some(request) = self.request.take() {
            platform.free_request(request);
        }
        if let Some(session) = self.session.take() {
            platform.close_session(session);
        }
        platform.close_device(self.device);
    }
}

/// State machine for one physical camera.
pub struct CameraDevice {
    /// What to detect and how to stream it.
    config: CaptureConfig,
    /// Platform the camera lives on.
    platform: Arc<dyn CameraPlatform>,
    /// Current lifecycle state.
    state: CameraState,
    /// Set by a successful detection.
    descriptor: Option<CameraDescriptor>,
    /// Platform objects while open.
    session: Option<CaptureSession>,
    /// Stopped first on close.
    pool: Option<Arc<FrameBufferPool>>,
    /// Handed to the platform with the device and session.
    events_tx: EventSender,
    /// Drained by `drain_events`.
    events_rx: EventReceiver,
}

impl CameraDevice {
    /// A closed camera for `config`. Nothing touches the platform yet.
    pub fn new(config: CaptureConfig, platform: Arc<dyn CameraPlatform>) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        Self {
            config,
            platform,
            state: CameraState::Closed,
            descriptor: None,
            session: None,
            pool: None,
            events_tx,
            events_rx,
        }
    }

    /// Configured camera name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Configuration the camera was built with.
    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> CameraState {
        self.state
    }

    /// Descriptor from the last successful detection.
    pub fn descriptor(&self) -> Option<&CameraDescriptor> {
        self.descriptor.as_ref()
    }

    /// Platform objects of the open camera.
    pub fn session(&self) -> Option<&CaptureSession> {
        self.session.as_ref()
    }

    /// True while in `Streaming`.
    pub fn is_streaming(&self) -> bool {
        self.state == CameraState::Streaming
    }

    fn require(&self, operation: &'static str, state: CameraState) -> Result<(), CameraError> {
        if self.state != state {
            return Err(CameraError::InvalidState {
                operation,
                state: self.state,
            });
        }
        Ok(())
    }

    fn fail<T>(&mut self, error: CameraError) -> Result<T, CameraError> {
        tracing::error!(camera = %self.config.name, from = ?self.state, "Camera failed: {}", error);
        self.state = CameraState::Error;
        Err(error)
    }

    /// Finds the camera matching the configuration.
    pub fn detect(&mut self) -> Result<&CameraDescriptor, CameraError> {
        self.require("detect", CameraState::Closed)?;
        self.state = CameraState::Detecting;

        match detect(self.platform.as_ref(), &self.config) {
            Ok(descriptor) => {
                self.state = CameraState::Closed;
                Ok(self.descriptor.insert(descriptor))
            }
            Err(e) => self.fail(e),
        }
    }

    /// Opens the device and starts the constant-rate repeating request.
    ///
    /// Frames are delivered into `sink`. `pool` is stopped first on close.
    pub fn open(
        &mut self,
        sink: Arc<ImageQueue>,
        pool: Arc<FrameBufferPool>,
    ) -> Result<(), CameraError> {
        self.require("open", CameraState::Closed)?;
        let Some(descriptor) = self.descriptor.clone() else {
            return Err(CameraError::InvalidState {
                operation: "open before detect",
                state: self.state,
            });
        };

        self.state = CameraState::Opening;
        self.pool = Some(pool);
        let device = match self
            .platform
            .open_device(&descriptor.id, self.events_tx.clone())
        {
            Ok(device) => device,
            Err(e) => return self.fail(e.into()),
        };
        tracing::debug!(camera = %self.config.name, id = %descriptor.id, "Device opened");

        self.state = CameraState::Configuring;
        let mut session = CaptureSession::new(device, self.config.fps);
        match self.configure(&descriptor, &mut session, sink) {
            Ok(()) => {
                self.session = Some(session);
                self.state = CameraState::Streaming;
                tracing::info!(
                    camera = %self.config.name,
                    fps = self.config.fps,
                    "Camera streaming"
                );
                Ok(())
            }
            Err(e) => {
                session.rollback(self.platform.as_ref());
                self.fail(e)
            }
        }
    }

    fn configure(
        &self,
        descriptor: &CameraDescriptor,
        session: &mut CaptureSession,
        sink: Arc<ImageQueue>,
    ) -> Result<(), CameraError> {
        let fps = session.target_fps;
        if !descriptor.supports_fps(fps) {
            return Err(CameraError::FpsOutOfRange {
                fps,
                ranges: descriptor.fps_ranges.clone(),
            });
        }

        let platform = self.platform.as_ref();
        let capture = *session
            .session
            .insert(platform.create_session(session.device, self.events_tx.clone())?);
        let target = *session
            .target
            .insert(platform.create_output_target(capture, sink)?);
        let request = *session
            .request
            .insert(platform.create_request(session.device, RequestTemplate::Record)?);

        platform.set_target_fps_range(request, FpsRange::constant(fps))?;
        platform.add_target(request, target)?;
        platform.set_repeating_request(capture, request)?;
        session.repeating = true;
        Ok(())
    }

    /// Processes pending device and session events.
    ///
    /// A disconnect or device error moves the camera to `Error`.
    pub fn drain_events(&mut self) -> Result<(), CameraError> {
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                PlatformEvent::DeviceDisconnected => return self.fail(CameraError::Disconnected),
                PlatformEvent::DeviceError(code) => return self.fail(CameraError::Device(code)),
                other => {
                    tracing::debug!(camera = %self.config.name, event = ?other, "Session event");
                }
            }
        }
        Ok(())
    }

    /// Stops streaming and frees every platform object.
    ///
    /// From `Error` or `Closed` this only releases what is still held.
    pub fn close(&mut self) {
        let terminal = self.state;
        let held = self.session.is_some();
        if held && terminal != CameraState::Error {
            self.state = CameraState::Closing;
        }

        if let Some(pool) = self.pool.take() {
            pool.stop();
        }
        if let Some(session) = self.session.take() {
            session.teardown(self.platform.as_ref(), &self.config.name);
        }

        match terminal {
            CameraState::Error => {}
            _ => {
                self.descriptor = None;
                self.state = CameraState::Closed;
            }
        }
        if held {
            tracing::info!(camera = %self.config.name, "Camera closed");
        }
    }

    /// Returns an errored camera to `Closed` so detection can be retried.
    pub fn reset(&mut self) -> Result<(), CameraError> {
        self.require("reset", CameraState::Error)?;
        if let Some(session) = self.session.take() {
            session.teardown(self.platform.as_ref(), &self.config.name);
        }
        self.pool = None;
        self.descriptor = None;
        while self.events_rx.try_recv().is_ok() {}
        self.state = CameraState::Closed;
        Ok(())
    }
}

impl Drop for CameraDevice {
    fn drop(&mut self) {
        if self.session.is_some() {
            self.close();
        }
    }
}

impl std::fmt::Debug for CameraDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraDevice")
            .field("name", &self.config.name)
            .field("state", &self.state)
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{SyntheticCamera, SyntheticPlatform};
    use std::time::Duration;

    fn setup() -> (Arc<SyntheticPlatform>, CameraDevice) {
        let platform = Arc::new(SyntheticPlatform::new(vec![
            SyntheticCamera::new("0", Facing::Back, 32, 24),
            SyntheticCamera::new("1", Facing::Front, 32, 24),
        ]));
        let config = CaptureConfig::rear()
            .with_dimensions(32, 24)
            .with_fps(30)
            .with_name("rear");
        let device = CameraDevice::new(config, platform.clone());
        (platform, device)
    }

    fn sink_and_pool() -> (Arc<ImageQueue>, Arc<FrameBufferPool>) {
        let pool = FrameBufferPool::new("rear", 2, Duration::from_millis(10), Box::new(|_| {}))
            .unwrap();
        (Arc::new(ImageQueue::new(2)), Arc::new(pool))
    }

    #[test]
    fn test_full_lifecycle() {
        let (platform, mut device) = setup();
        assert_eq!(device.state(), CameraState::Closed);

        device.detect().unwrap();
        assert_eq!(device.descriptor().unwrap().id, "0");

        let (sink, pool) = sink_and_pool();
        device.open(sink, pool.clone()).unwrap();
        assert!(device.is_streaming());
        assert!(device.session().unwrap().is_repeating());

        device.close();
        assert_eq!(device.state(), CameraState::Closed);
        assert!(device.descriptor().is_none());
        assert!(pool.is_stopped());
        assert_eq!(platform.live_objects(), 0);

        assert_eq!(
            platform.calls_for("0"),
            vec![
                "characteristics",
                "open_device",
                "create_session",
                "create_output_target",
                "create_request",
                "set_target_fps_range",
                "add_target",
                "set_repeating_request",
                "stop_repeating",
                "free_output_target",
                "free_request",
                "close_session",
                "close_device",
            ]
        );
    }

    #[test]
    fn test_configure_failure_rolls_back_in_reverse() {
        let (platform, mut device) = setup();
        platform.fail_operation("add_target");

        device.detect().unwrap();
        let (sink, pool) = sink_and_pool();
        assert!(device.open(sink, pool).is_err());
        assert_eq!(device.state(), CameraState::Error);
        assert_eq!(platform.live_objects(), 0);

        let calls = platform.calls_for("0");
        let rollback: Vec<_> = calls[calls.len() - 4..].to_vec();
        assert_eq!(
            rollback,
            vec!["free_request", "free_output_target", "close_session", "close_device"]
        );
    }

    #[test]
    fn test_open_failure_enters_error() {
        let (platform, mut device) = setup();
        platform.fail_operation("open_device");

        device.detect().unwrap();
        let (sink, pool) = sink_and_pool();
        assert!(matches!(
            device.open(sink, pool),
            Err(CameraError::Platform(_))
        ));
        assert_eq!(device.state(), CameraState::Error);
        assert_eq!(platform.live_objects(), 0);
    }

    #[test]
    fn test_fps_outside_range_rejected_before_session() {
        let (platform, mut device) = setup();
        device.config.fps = 60;

        device.detect().unwrap();
        let (sink, pool) = sink_and_pool();
        assert!(matches!(
            device.open(sink, pool),
            Err(CameraError::FpsOutOfRange { fps: 60, .. })
        ));
        assert!(!platform.calls_for("0").contains(&"create_session".to_string()));
        assert_eq!(platform.live_objects(), 0);
    }

    #[test]
    fn test_fps_in_range_gap_rejected_before_session() {
        let platform = Arc::new(SyntheticPlatform::new(vec![SyntheticCamera::new(
            "0",
            Facing::Back,
            32,
            24,
        )
        .with_fps_ranges(vec![FpsRange::new(5, 15), FpsRange::constant(30)])]));
        let config = CaptureConfig::rear().with_dimensions(32, 24).with_fps(20);
        let mut device = CameraDevice::new(config, platform.clone());

        device.detect().unwrap();
        let (sink, pool) = sink_and_pool();
        match device.open(sink, pool) {
            Err(CameraError::FpsOutOfRange { fps, ranges }) => {
                assert_eq!(fps, 20);
                assert_eq!(ranges.len(), 2);
            }
            other => panic!("expected FpsOutOfRange, got {other:?}"),
        }
        assert_eq!(device.state(), CameraState::Error);
        assert_eq!(platform.calls_for("0"), vec!["characteristics", "open_device", "close_device"]);
        assert_eq!(platform.live_objects(), 0);
    }

    #[test]
    fn test_open_requires_detection() {
        let (_platform, mut device) = setup();
        let (sink, pool) = sink_and_pool();
        assert!(matches!(
            device.open(sink, pool),
            Err(CameraError::InvalidState { .. })
        ));
        assert_eq!(device.state(), CameraState::Closed);
    }

    #[test]
    fn test_reset_after_detection_failure() {
        let platform = Arc::new(SyntheticPlatform::new(vec![SyntheticCamera::new(
            "0",
            Facing::Front,
            32,
            24,
        )]));
        let config = CaptureConfig::rear().with_dimensions(32, 24);
        let mut device = CameraDevice::new(config, platform);

        assert!(device.detect().is_err());
        assert_eq!(device.state(), CameraState::Error);
        assert!(device.detect().is_err());

        device.reset().unwrap();
        assert_eq!(device.state(), CameraState::Closed);
    }

    #[test]
    fn test_disconnect_event_moves_to_error() {
        let (platform, mut device) = setup();
        device.detect().unwrap();
        let (sink, pool) = sink_and_pool();
        device.open(sink, pool).unwrap();

        assert!(device.drain_events().is_ok());
        platform.disconnect("0");
        assert!(matches!(
            device.drain_events(),
            Err(CameraError::Disconnected)
        ));
        assert_eq!(device.state(), CameraState::Error);

        device.close();
        assert_eq!(device.state(), CameraState::Error);
        assert_eq!(platform.live_objects(), 0);
    }

    #[test]
    fn test_close_when_closed_is_noop() {
        let (platform, mut device) = setup();
        device.close();
        assert_eq!(device.state(), CameraState::Closed);
        assert!(platform.calls().is_empty());
    }
}
