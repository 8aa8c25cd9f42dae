//! In-process camera platform.
//!
//! Each repeating request gets a sensor thread that renders YUV 4:2:0
//! images at the request's frame rate and pushes them into the bound
//! image queues, the same way a hardware platform delivers frames on its
//! own callback thread. Failures can be injected per operation and every
//! platform call is recorded, so lifecycle ordering can be checked.

use super::{
    CameraCharacteristics, CameraPlatform, CameraStatus, DeviceHandle, EventSender, Facing,
    FpsRange, HardwareLevel, ImageQueue, OutputTargetHandle, PixelFormat, Plane, PlatformError,
    PlatformEvent, RawImage, ReleaseObserver, RequestHandle, RequestTemplate, SessionHandle,
    StreamConfiguration,
};
use parking_lot::{Condvar, Mutex};
use rand_chacha::ChaCha8Rng;
use rand_core::{RngCore, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Frame rate used when a request never had its FPS range set.
const FALLBACK_FPS: u32 = 30;

/// Longest time a paced sensor waits for the consumer before pushing anyway.
const PACER_TIMEOUT: Duration = Duration::from_secs(1);

/// Pixel content rendered by a synthetic sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestPattern {
    /// Y = U = V = 128.
    MidGray,
    /// Diagonal luma ramp that shifts by one per frame, neutral chroma.
    Gradient,
    /// Seeded pseudo-random planes.
    Noise {
        /// ChaCha8 seed.
        seed: u64,
    },
}

/// Chroma plane layout reported by a synthetic sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntheticChroma {
    /// V/U interleaved, pixel stride 2.
    SemiPlanar,
    /// Separate U and V planes, pixel stride 1.
    Planar,
    /// Separate planes advertising an unusual pixel stride.
    Unsupported {
        /// Stride reported for both chroma planes.
        pixel_stride: usize,
    },
}

/// Description of one synthetic camera.
#[derive(Clone)]
pub struct SyntheticCamera {
    id: String,
    facing: Facing,
    hardware_level: HardwareLevel,
    /// Reported sensor orientation in degrees.
    orientation: i32,
    fps_ranges: Vec<FpsRange>,
    stream_configurations: Vec<StreamConfiguration>,
    /// Size of the rendered images.
    width: u32,
    height: u32,
    pattern: TestPattern,
    chroma: SyntheticChroma,
    /// Stop rendering after this many frames.
    frame_limit: Option<u64>,
    /// Holds frame `k` back until `k` frames were released downstream.
    pacer: Option<Arc<dyn ReleaseObserver>>,
}

impl SyntheticCamera {
    /// A full-level camera advertising exactly one YUV output size.
    pub fn new(id: impl Into<String>, facing: Facing, width: u32, height: u32) -> Self {
        Self {
            id: id.into(),
            facing,
            hardware_level: HardwareLevel::Full,
            orientation: 0,
            fps_ranges: vec![FpsRange::new(5, 30), FpsRange::constant(30)],
            stream_configurations: vec![
                StreamConfiguration::output(PixelFormat::Yuv420, width, height),
                StreamConfiguration::output(PixelFormat::Jpeg, width, height),
            ],
            width,
            height,
            pattern: TestPattern::MidGray,
            chroma: SyntheticChroma::SemiPlanar,
            frame_limit: None,
            pacer: None,
        }
    }

    /// Reports a clockwise mounting angle of `degrees`.
    pub fn with_orientation(mut self, degrees: i32) -> Self {
        self.orientation = degrees;
        self
    }

    /// Reports a different support tier.
    pub fn with_hardware_level(mut self, level: HardwareLevel) -> Self {
        self.hardware_level = level;
        self
    }

    /// Replaces the advertised frame rate ranges.
    pub fn with_fps_ranges(mut self, ranges: Vec<FpsRange>) -> Self {
        self.fps_ranges = ranges;
        self
    }

    /// Replaces the advertised stream table. Rendering keeps the camera's size.
    pub fn with_stream_configurations(mut self, configs: Vec<StreamConfiguration>) -> Self {
        self.stream_configurations = configs;
        self
    }

    /// Renders `pattern` instead of mid-gray.
    pub fn with_pattern(mut self, pattern: TestPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Reports chroma planes with the given layout.
    pub fn with_chroma(mut self, chroma: SyntheticChroma) -> Self {
        self.chroma = chroma;
        self
    }

    /// Stops the stream after `frames` images.
    pub fn with_frame_limit(mut self, frames: u64) -> Self {
        self.frame_limit = Some(frames);
        self
    }

    /// Waits for downstream releases before rendering each frame.
    pub fn paced_by(mut self, pacer: Arc<dyn ReleaseObserver>) -> Self {
        self.pacer = Some(pacer);
        self
    }

    fn characteristics(&self) -> CameraCharacteristics {
        CameraCharacteristics {
            id: self.id.clone(),
            facing: self.facing,
            hardware_level: self.hardware_level,
            sensor_orientation: self.orientation,
            fps_ranges: self.fps_ranges.clone(),
            stream_configurations: self.stream_configurations.clone(),
        }
    }

    /// Renders frame `index` of the stream.
    pub fn render(&self, index: u64, timestamp_ns: u64, rng: Option<&mut ChaCha8Rng>) -> RawImage {
        let w = self.width as usize;
        let h = self.height as usize;
        let cw = w.div_ceil(2);
        let ch = h.div_ceil(2);
        // Rows padded to 16 bytes like a real ISP would.
        let luma_stride = w.next_multiple_of(16);

        let mut luma = vec![0u8; luma_stride * h];
        let mut u = vec![128u8; cw * ch];
        let mut v = vec![128u8; cw * ch];

        match (self.pattern, rng) {
            (TestPattern::MidGray, _) => {
                for row in luma.chunks_mut(luma_stride) {
                    row[..w].fill(128);
                }
            }
            (TestPattern::Noise { .. }, Some(rng)) => {
                rng.fill_bytes(&mut luma);
                rng.fill_bytes(&mut u);
                rng.fill_bytes(&mut v);
            }
            (TestPattern::Gradient, _) | (TestPattern::Noise { .. }, None) => {
                for (y, row) in luma.chunks_mut(luma_stride).enumerate() {
                    for (x, px) in row[..w].iter_mut().enumerate() {
                        *px = ((x * 7 + y * 13) as u64 + index) as u8;
                    }
                }
            }
        }

        let (u_plane, v_plane) = match self.chroma {
            SyntheticChroma::SemiPlanar => {
                let stride = luma_stride;
                let mut vu = vec![0u8; stride * ch];
                for row in 0..ch {
                    for col in 0..cw {
                        vu[row * stride + col * 2] = v[row * cw + col];
                        vu[row * stride + col * 2 + 1] = u[row * cw + col];
                    }
                }
                // The U plane aliases the interleaved buffer one byte in.
                let u_view = vu[1..].to_vec();
                (
                    Plane {
                        data: u_view,
                        row_stride: stride,
                        pixel_stride: 2,
                    },
                    Plane {
                        data: vu,
                        row_stride: stride,
                        pixel_stride: 2,
                    },
                )
            }
            SyntheticChroma::Planar => (
                Plane {
                    data: u,
                    row_stride: cw,
                    pixel_stride: 1,
                },
                Plane {
                    data: v,
                    row_stride: cw,
                    pixel_stride: 1,
                },
            ),
            SyntheticChroma::Unsupported { pixel_stride } => (
                Plane {
                    data: u,
                    row_stride: cw,
                    pixel_stride,
                },
                Plane {
                    data: v,
                    row_stride: cw,
                    pixel_stride,
                },
            ),
        };

        RawImage {
            format: PixelFormat::Yuv420,
            width: self.width,
            height: self.height,
            planes: vec![
                Plane {
                    data: luma,
                    row_stride: luma_stride,
                    pixel_stride: 1,
                },
                u_plane,
                v_plane,
            ],
            timestamp_ns,
        }
    }
}

impl std::fmt::Debug for SyntheticCamera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyntheticCamera")
            .field("id", &self.id)
            .field("facing", &self.facing)
            .field("orientation", &self.orientation)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("pattern", &self.pattern)
            .field("chroma", &self.chroma)
            .field("frame_limit", &self.frame_limit)
            .field("paced", &self.pacer.is_some())
            .finish()
    }
}

#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    cv: Condvar,
}

impl StopSignal {
    fn stop(&self) {
        *self.stopped.lock() = true;
        self.cv.notify_all();
    }

    fn is_stopped(&self) -> bool {
        *self.stopped.lock()
    }

    /// Sleeps for `period` unless stopped first. Returns true if stopped.
    fn sleep(&self, period: Duration) -> bool {
        let deadline = Instant::now() + period;
        let mut stopped = self.stopped.lock();
        while !*stopped {
            if self.cv.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }
}

struct SensorStream {
    stop: Arc<StopSignal>,
    handle: JoinHandle<()>,
}

impl SensorStream {
    fn shutdown(self) {
        self.stop.stop();
        if self.handle.join().is_err() {
            tracing::error!("Synthetic sensor thread panicked");
        }
    }
}

struct Device {
    camera: usize,
    events: EventSender,
}

struct Session {
    camera: usize,
    events: EventSender,
    stream: Option<SensorStream>,
}

struct Target {
    camera: usize,
    sink: Arc<ImageQueue>,
}

struct Request {
    camera: usize,
    fps: Option<FpsRange>,
    targets: Vec<u64>,
}

#[derive(Default)]
struct PlatformState {
    next_handle: u64,
    devices: HashMap<u64, Device>,
    sessions: HashMap<u64, Session>,
    targets: HashMap<u64, Target>,
    requests: HashMap<u64, Request>,
}

impl PlatformState {
    fn allocate(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }
}

/// A camera platform that lives entirely in this process.
pub struct SyntheticPlatform {
    cameras: Vec<SyntheticCamera>,
    /// Zero point for sensor timestamps.
    epoch: Instant,
    state: Mutex<PlatformState>,
    /// Call log, `"<operation> <camera id>"`.
    calls: Mutex<Vec<String>>,
    /// Injected failures, optionally scoped to a camera id.
    failures: Mutex<Vec<(Option<String>, &'static str)>>,
}

impl SyntheticPlatform {
    /// A platform reporting `cameras` in the given order.
    pub fn new(cameras: Vec<SyntheticCamera>) -> Self {
        Self {
            cameras,
            epoch: Instant::now(),
            state: Mutex::new(PlatformState::default()),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
        }
    }

    /// Makes every future call of `operation` fail.
    pub fn fail_operation(&self, operation: &'static str) {
        self.failures.lock().push((None, operation));
    }

    /// Makes future calls of `operation` fail for one camera only.
    pub fn fail_operation_for(&self, camera_id: &str, operation: &'static str) {
        self.failures
            .lock()
            .push((Some(camera_id.to_string()), operation));
    }

    /// Simulates a camera being unplugged while open.
    pub fn disconnect(&self, camera_id: &str) {
        let Some(camera) = self.camera_index(camera_id) else {
            return;
        };

        let mut streams = Vec::new();
        {
            let mut state = self.state.lock();
            for device in state.devices.values().filter(|d| d.camera == camera) {
                device.events.send(PlatformEvent::DeviceDisconnected).ok();
            }
            for session in state.sessions.values_mut().filter(|s| s.camera == camera) {
                streams.extend(session.stream.take());
            }
        }
        for stream in streams {
            stream.shutdown();
        }
        tracing::info!(camera = camera_id, "Synthetic camera disconnected");
    }

    /// Every platform call made so far, as `"<operation> <camera id>"`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Calls made for one camera, operation names only.
    pub fn calls_for(&self, camera_id: &str) -> Vec<String> {
        let suffix = format!(" {camera_id}");
        self.calls
            .lock()
            .iter()
            .filter_map(|call| call.strip_suffix(&suffix).map(str::to_string))
            .collect()
    }

    /// Number of platform objects still alive.
    pub fn live_objects(&self) -> usize {
        let state = self.state.lock();
        state.devices.len() + state.sessions.len() + state.targets.len() + state.requests.len()
    }

    fn camera_index(&self, camera_id: &str) -> Option<usize> {
        self.cameras.iter().position(|c| c.id == camera_id)
    }

    fn record(&self, operation: &'static str, camera: usize) {
        self.calls
            .lock()
            .push(format!("{operation} {}", self.cameras[camera].id));
    }

    fn check(&self, operation: &'static str, camera: usize) -> Result<(), PlatformError> {
        self.record(operation, camera);
        let id = &self.cameras[camera].id;
        let injected = self
            .failures
            .lock()
            .iter()
            .any(|(target, op)| *op == operation && target.as_ref().map_or(true, |t| t == id));
        if injected {
            tracing::debug!(camera = %id, operation, "Injected platform failure");
            return Err(PlatformError::new(operation, CameraStatus::CameraDevice));
        }
        Ok(())
    }

    fn invalid(operation: &'static str) -> PlatformError {
        PlatformError::new(operation, CameraStatus::InvalidParameter)
    }

    fn spawn_sensor(
        &self,
        camera: usize,
        fps: u32,
        sinks: Vec<Arc<ImageQueue>>,
    ) -> Result<SensorStream, PlatformError> {
        let config = self.cameras[camera].clone();
        let stop = Arc::new(StopSignal::default());
        let thread_stop = Arc::clone(&stop);
        let start_ns = self.epoch.elapsed().as_nanos() as u64;

        let handle = thread::Builder::new()
            .name(format!("synthetic-{}", config.id))
            .spawn(move || run_sensor(config, fps, start_ns, sinks, &thread_stop))
            .map_err(|_| PlatformError::new("set_repeating_request", CameraStatus::CameraService))?;

        Ok(SensorStream { stop, handle })
    }
}

fn run_sensor(
    camera: SyntheticCamera,
    fps: u32,
    start_ns: u64,
    sinks: Vec<Arc<ImageQueue>>,
    stop: &StopSignal,
) {
    let period = Duration::from_nanos(1_000_000_000 / u64::from(fps.max(1)));
    let period_ns = period.as_nanos() as u64;
    let mut rng = match camera.pattern {
        TestPattern::Noise { seed } => Some(ChaCha8Rng::seed_from_u64(seed)),
        _ => None,
    };

    tracing::debug!(camera = %camera.id, fps, "Synthetic sensor started");

    let mut index = 0u64;
    'frames: while camera.frame_limit.map_or(true, |limit| index < limit) {
        if stop.sleep(period) {
            break;
        }

        if let (Some(pacer), true) = (&camera.pacer, index > 0) {
            let waited = Instant::now();
            while !pacer.wait_for_releases(index, Duration::from_millis(10)) {
                if stop.is_stopped() {
                    break 'frames;
                }
                if waited.elapsed() >= PACER_TIMEOUT {
                    tracing::debug!(camera = %camera.id, frame = index, "Pacer timed out");
                    break;
                }
            }
        }

        let image = camera.render(index, start_ns + index * period_ns, rng.as_mut());
        for sink in &sinks {
            if let Err(e) = sink.push(image.clone()) {
                tracing::warn!(camera = %camera.id, frame = index, "Image discarded: {}", e);
            }
        }
        index += 1;
    }

    tracing::debug!(camera = %camera.id, frames = index, "Synthetic sensor stopped");
}

impl CameraPlatform for SyntheticPlatform {
    fn camera_ids(&self) -> Result<Vec<String>, PlatformError> {
        Ok(self.cameras.iter().map(|c| c.id.clone()).collect())
    }

    fn characteristics(&self, camera_id: &str) -> Result<CameraCharacteristics, PlatformError> {
        let camera = self
            .camera_index(camera_id)
            .ok_or_else(|| PlatformError::new("characteristics", CameraStatus::MetadataNotFound))?;
        self.check("characteristics", camera)?;
        Ok(self.cameras[camera].characteristics())
    }

    fn open_device(
        &self,
        camera_id: &str,
        events: EventSender,
    ) -> Result<DeviceHandle, PlatformError> {
        let camera = self
            .camera_index(camera_id)
            .ok_or_else(|| Self::invalid("open_device"))?;
        self.check("open_device", camera)?;

        let mut state = self.state.lock();
        if state.devices.values().any(|d| d.camera == camera) {
            return Err(PlatformError::new("open_device", CameraStatus::CameraInUse));
        }
        let handle = state.allocate();
        state.devices.insert(handle, Device { camera, events });
        Ok(DeviceHandle(handle))
    }

    fn create_session(
        &self,
        device: DeviceHandle,
        events: EventSender,
    ) -> Result<SessionHandle, PlatformError> {
        let camera = {
            let state = self.state.lock();
            state
                .devices
                .get(&device.0)
                .map(|d| d.camera)
                .ok_or_else(|| Self::invalid("create_session"))?
        };
        self.check("create_session", camera)?;

        let mut state = self.state.lock();
        let handle = state.allocate();
        events.send(PlatformEvent::SessionReady).ok();
        state.sessions.insert(
            handle,
            Session {
                camera,
                events,
                stream: None,
            },
        );
        Ok(SessionHandle(handle))
    }

    fn create_output_target(
        &self,
        session: SessionHandle,
        sink: Arc<ImageQueue>,
    ) -> Result<OutputTargetHandle, PlatformError> {
        let camera = {
            let state = self.state.lock();
            state
                .sessions
                .get(&session.0)
                .map(|s| s.camera)
                .ok_or_else(|| Self::invalid("create_output_target"))?
        };
        self.check("create_output_target", camera)?;

        let mut state = self.state.lock();
        let handle = state.allocate();
        state.targets.insert(handle, Target { camera, sink });
        Ok(OutputTargetHandle(handle))
    }

    fn create_request(
        &self,
        device: DeviceHandle,
        template: RequestTemplate,
    ) -> Result<RequestHandle, PlatformError> {
        let camera = {
            let state = self.state.lock();
            state
                .devices
                .get(&device.0)
                .map(|d| d.camera)
                .ok_or_else(|| Self::invalid("create_request"))?
        };
        self.check("create_request", camera)?;
        tracing::trace!(camera = %self.cameras[camera].id, ?template, "Capture request created");

        let mut state = self.state.lock();
        let handle = state.allocate();
        state.requests.insert(
            handle,
            Request {
                camera,
                fps: None,
                targets: Vec::new(),
            },
        );
        Ok(RequestHandle(handle))
    }

    fn set_target_fps_range(
        &self,
        request: RequestHandle,
        range: FpsRange,
    ) -> Result<(), PlatformError> {
        let camera = {
            let state = self.state.lock();
            state
                .requests
                .get(&request.0)
                .map(|r| r.camera)
                .ok_or_else(|| Self::invalid("set_target_fps_range"))?
        };
        self.check("set_target_fps_range", camera)?;

        let supported = self.cameras[camera]
            .fps_ranges
            .iter()
            .any(|r| r.contains(range.min) && r.contains(range.max));
        if !supported {
            return Err(Self::invalid("set_target_fps_range"));
        }

        let mut state = self.state.lock();
        if let Some(entry) = state.requests.get_mut(&request.0) {
            entry.fps = Some(range);
        }
        Ok(())
    }

    fn add_target(
        &self,
        request: RequestHandle,
        target: OutputTargetHandle,
    ) -> Result<(), PlatformError> {
        let camera = {
            let state = self.state.lock();
            if !state.targets.contains_key(&target.0) {
                return Err(Self::invalid("add_target"));
            }
            state
                .requests
                .get(&request.0)
                .map(|r| r.camera)
                .ok_or_else(|| Self::invalid("add_target"))?
        };
        self.check("add_target", camera)?;

        let mut state = self.state.lock();
        if let Some(entry) = state.requests.get_mut(&request.0) {
            entry.targets.push(target.0);
        }
        Ok(())
    }

    fn set_repeating_request(
        &self,
        session: SessionHandle,
        request: RequestHandle,
    ) -> Result<(), PlatformError> {
        let (camera, fps, sinks) = {
            let state = self.state.lock();
            let session_entry = state
                .sessions
                .get(&session.0)
                .ok_or_else(|| Self::invalid("set_repeating_request"))?;
            if session_entry.stream.is_some() {
                return Err(PlatformError::new(
                    "set_repeating_request",
                    CameraStatus::InvalidOperation,
                ));
            }
            let request = state
                .requests
                .get(&request.0)
                .ok_or_else(|| Self::invalid("set_repeating_request"))?;
            let sinks: Vec<_> = request
                .targets
                .iter()
                .filter_map(|t| state.targets.get(t).map(|t| Arc::clone(&t.sink)))
                .collect();
            let fps = request.fps.map_or(FALLBACK_FPS, |r| r.max);
            (session_entry.camera, fps, sinks)
        };
        self.check("set_repeating_request", camera)?;

        if sinks.is_empty() {
            return Err(PlatformError::new(
                "set_repeating_request",
                CameraStatus::StreamConfigureFail,
            ));
        }

        let stream = self.spawn_sensor(camera, fps, sinks)?;
        let mut state = self.state.lock();
        match state.sessions.get_mut(&session.0) {
            Some(entry) => {
                entry.events.send(PlatformEvent::SessionActive).ok();
                entry.stream = Some(stream);
                Ok(())
            }
            None => {
                drop(state);
                stream.shutdown();
                Err(PlatformError::new(
                    "set_repeating_request",
                    CameraStatus::SessionClosed,
                ))
            }
        }
    }

    fn stop_repeating(&self, session: SessionHandle) -> Result<(), PlatformError> {
        let (camera, stream) = {
            let mut state = self.state.lock();
            let entry = state
                .sessions
                .get_mut(&session.0)
                .ok_or_else(|| Self::invalid("stop_repeating"))?;
            let stream = entry.stream.take();
            if stream.is_some() {
                entry.events.send(PlatformEvent::SessionReady).ok();
            }
            (entry.camera, stream)
        };
        self.record("stop_repeating", camera);

        if let Some(stream) = stream {
            stream.shutdown();
        }
        Ok(())
    }

    fn free_output_target(&self, target: OutputTargetHandle) {
        let removed = self.state.lock().targets.remove(&target.0);
        if let Some(entry) = removed {
            self.record("free_output_target", entry.camera);
        }
    }

    fn free_request(&self, request: RequestHandle) {
        let removed = self.state.lock().requests.remove(&request.0);
        if let Some(entry) = removed {
            self.record("free_request", entry.camera);
        }
    }

    fn close_session(&self, session: SessionHandle) {
        let removed = self.state.lock().sessions.remove(&session.0);
        if let Some(mut entry) = removed {
            self.record("close_session", entry.camera);
            if let Some(stream) = entry.stream.take() {
                stream.shutdown();
            }
            entry.events.send(PlatformEvent::SessionClosed).ok();
        }
    }

    fn close_device(&self, device: DeviceHandle) {
        let removed = self.state.lock().devices.remove(&device.0);
        if let Some(entry) = removed {
            self.record("close_device", entry.camera);
        }
    }

    fn release_enumeration(&self) {
        self.calls.lock().push("release_enumeration".to_string());
    }
}

impl Drop for SyntheticPlatform {
    fn drop(&mut self) {
        let streams: Vec<_> = self
            .state
            .get_mut()
            .sessions
            .values_mut()
            .filter_map(|s| s.stream.take())
            .collect();
        for stream in streams {
            stream.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn platform() -> SyntheticPlatform {
        SyntheticPlatform::new(vec![
            SyntheticCamera::new("cam0", Facing::Back, 8, 4),
            SyntheticCamera::new("cam1", Facing::Front, 8, 4),
        ])
    }

    #[test]
    fn test_semi_planar_render_layout() {
        let camera = SyntheticCamera::new("c", Facing::Back, 8, 4);
        let image = camera.render(0, 42, None);

        assert_eq!(image.planes.len(), 3);
        assert_eq!(image.timestamp_ns, 42);
        assert_eq!(image.planes[0].row_stride, 16);
        assert_eq!(image.planes[1].pixel_stride, 2);
        assert_eq!(image.planes[2].pixel_stride, 2);
        assert!(image.planes[0].data.chunks(16).all(|row| row[..8] == [128; 8]));
    }

    #[test]
    fn test_noise_pattern_is_seeded() {
        let camera =
            SyntheticCamera::new("c", Facing::Back, 8, 4).with_pattern(TestPattern::Noise { seed: 7 });
        let mut a = ChaCha8Rng::seed_from_u64(7);
        let mut b = ChaCha8Rng::seed_from_u64(7);
        assert_eq!(
            camera.render(0, 0, Some(&mut a)),
            camera.render(0, 0, Some(&mut b))
        );
    }

    #[test]
    fn test_open_twice_reports_in_use() {
        let platform = platform();
        let (tx, _rx) = crossbeam_channel::unbounded();
        platform.open_device("cam0", tx.clone()).unwrap();
        let err = platform.open_device("cam0", tx).unwrap_err();
        assert_eq!(err.status, CameraStatus::CameraInUse);
    }

    #[test]
    fn test_injected_failure_scoped_to_camera() {
        let platform = platform();
        platform.fail_operation_for("cam1", "open_device");
        let (tx, _rx) = crossbeam_channel::unbounded();

        assert!(platform.open_device("cam0", tx.clone()).is_ok());
        assert!(platform.open_device("cam1", tx).is_err());
    }

    #[test]
    fn test_repeating_request_streams_frames() {
        let platform = platform();
        let (tx, rx) = crossbeam_channel::unbounded();
        let queue = Arc::new(ImageQueue::new(4));

        let device = platform.open_device("cam0", tx.clone()).unwrap();
        let session = platform.create_session(device, tx).unwrap();
        let target = platform
            .create_output_target(session, Arc::clone(&queue))
            .unwrap();
        let request = platform
            .create_request(device, RequestTemplate::Record)
            .unwrap();
        platform
            .set_target_fps_range(request, FpsRange::constant(30))
            .unwrap();
        platform.add_target(request, target).unwrap();
        platform.set_repeating_request(session, request).unwrap();

        thread::sleep(Duration::from_millis(150));
        platform.stop_repeating(session).unwrap();
        assert!(queue.pending() > 0);

        platform.free_output_target(target);
        platform.free_request(request);
        platform.close_session(session);
        platform.close_device(device);
        assert_eq!(platform.live_objects(), 0);

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events.first(), Some(&PlatformEvent::SessionReady));
        assert!(events.contains(&PlatformEvent::SessionActive));
        assert_eq!(events.last(), Some(&PlatformEvent::SessionClosed));
    }

    #[test]
    fn test_unsupported_fps_range_rejected() {
        let platform = platform();
        let (tx, _rx) = crossbeam_channel::unbounded();
        let device = platform.open_device("cam0", tx).unwrap();
        let request = platform
            .create_request(device, RequestTemplate::Record)
            .unwrap();
        assert!(platform
            .set_target_fps_range(request, FpsRange::constant(240))
            .is_err());
    }
}
