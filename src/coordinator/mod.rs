//! Multi-camera capture coordination.
//!
//! The coordinator owns one unit per camera: the [`CameraDevice`], its
//! [`FrameBufferPool`], the [`FrameReader`] that fills the pool from the
//! platform's image queue, and the external slot buffers. `run` gives
//! every camera a named worker thread that drains the pool and publishes
//! frames until the shared [`CancellationToken`] is raised.
//!
//! Shutdown order is fixed: the token is raised, every pool is stopped so
//! blocked waits return at once, workers are joined, then devices are
//! closed in reverse open order.

mod cancel;
mod publish;
mod report;

pub use cancel::CancellationToken;
use cancel::CancelOnPanic;
pub use publish::{
    ChannelPublisher, FramePublisher, FrameRef, NullPublisher, PublishError, PublishedFrame,
};
pub use report::{CameraReport, RunReport};

use crate::buffering::{FrameBufferPool, PoolError};
use crate::capture::{
    CameraDevice, CameraError, CaptureConfig, ConfigError, FileConfig, FrameReader,
    RuntimeConfig, MAX_CAMERAS, MIN_CAMERAS,
};
use crate::metrics::{CameraSnapshot, CaptureMetrics};
use crate::platform::{BufferAllocator, BufferError, CameraPlatform, ImageQueue, MappedBuffers};
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors surfaced by the coordinator. Camera-specific errors name the camera.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Fewer or more cameras than supported.
    #[error("{0} cameras configured, expected {MIN_CAMERAS} to {MAX_CAMERAS}")]
    CameraCount(usize),
    /// Two cameras share a name.
    #[error("camera name {0} is used twice")]
    DuplicateCamera(String),
    /// A camera configuration failed validation.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// A camera lifecycle step failed.
    #[error("camera {camera}: {source}")]
    Camera {
        /// Camera name.
        camera: String,
        /// Underlying camera error.
        #[source]
        source: CameraError,
    },
    /// The camera's slot ring could not be built.
    #[error("camera {camera}: frame buffer pool: {source}")]
    Pool {
        /// Camera name.
        camera: String,
        /// Underlying pool error.
        #[source]
        source: PoolError,
    },
    /// Slot buffers could not be allocated.
    #[error("camera {camera}: slot buffers: {source}")]
    Buffers {
        /// Camera name.
        camera: String,
        /// Underlying allocation error.
        #[source]
        source: BufferError,
    },
    /// The worker thread could not be started.
    #[error("failed to spawn worker for camera {camera}: {source}")]
    Spawn {
        /// Camera name.
        camera: String,
        /// Error from the thread builder.
        #[source]
        source: std::io::Error,
    },
    /// A worker thread panicked. Holds the camera name.
    #[error("worker for camera {0} panicked")]
    WorkerPanicked(String),
    /// The operation is not allowed in the current phase.
    #[error("cannot {operation} while {phase:?}")]
    InvalidPhase {
        /// What was attempted.
        operation: &'static str,
        /// Phase at the time.
        phase: Phase,
    },
}

/// Coordinator lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Cameras can be added.
    Configuring,
    /// Cameras detected and pipelines built.
    Initialized,
    /// Every camera is streaming.
    Open,
    /// Cameras released. Terminal.
    Closed,
}

/// Per-camera objects built by `init`.
struct Pipeline {
    queue: Arc<ImageQueue>,
    pool: Arc<FrameBufferPool>,
    buffers: Arc<dyn MappedBuffers>,
    reader: Arc<FrameReader>,
    id: String,
    /// Upright output size.
    width: u32,
    height: u32,
    frame_len: usize,
}

/// One camera and everything that moves its frames.
struct CameraUnit {
    device: CameraDevice,
    pipeline: Option<Pipeline>,
}

impl CameraUnit {
    fn name(&self) -> &str {
        self.device.name()
    }
}

/// What a worker hands back when it leaves its loop.
#[derive(Debug, Default)]
struct WorkerOutcome {
    /// Frames acquired and released, published or not.
    consumed: u64,
    published: u64,
    timeouts: u64,
    stop_latency: Option<Duration>,
}

/// Owns and drives 2..=8 cameras.
pub struct CaptureCoordinator {
    platform: Arc<dyn CameraPlatform>,
    allocator: Arc<dyn BufferAllocator>,
    publisher: Arc<dyn FramePublisher>,
    runtime: RuntimeConfig,
    units: Vec<CameraUnit>,
    /// Unit indices in the order they were opened.
    opened: Vec<usize>,
    token: CancellationToken,
    metrics: Option<Arc<CaptureMetrics>>,
    phase: Phase,
    /// Set once detection has queried the platform.
    enumerated: bool,
}

impl CaptureCoordinator {
    /// A coordinator with no cameras, in `Configuring`.
    pub fn new(
        platform: Arc<dyn CameraPlatform>,
        allocator: Arc<dyn BufferAllocator>,
        publisher: Arc<dyn FramePublisher>,
        runtime: RuntimeConfig,
    ) -> Self {
        Self {
            platform,
            allocator,
            publisher,
            runtime,
            units: Vec::new(),
            opened: Vec::new(),
            token: CancellationToken::new(),
            metrics: None,
            phase: Phase::Configuring,
            enumerated: false,
        }
    }

    /// Builds a coordinator with every camera of a validated file config.
    pub fn from_config(
        config: &FileConfig,
        platform: Arc<dyn CameraPlatform>,
        allocator: Arc<dyn BufferAllocator>,
        publisher: Arc<dyn FramePublisher>,
    ) -> Result<Self, CoordinatorError> {
        config.validate()?;
        let mut coordinator = Self::new(platform, allocator, publisher, config.runtime.clone());
        for camera in &config.cameras {
            coordinator.add_camera(camera.clone())?;
        }
        Ok(coordinator)
    }

    /// Exports per-camera counters to `metrics` while running.
    pub fn with_metrics(mut self, metrics: Arc<CaptureMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn require(&self, operation: &'static str, phase: Phase) -> Result<(), CoordinatorError> {
        if self.phase != phase {
            return Err(CoordinatorError::InvalidPhase {
                operation,
                phase: self.phase,
            });
        }
        Ok(())
    }

    /// Adds one camera. Only allowed while `Configuring`.
    pub fn add_camera(&mut self, config: CaptureConfig) -> Result<(), CoordinatorError> {
        self.require("add a camera", Phase::Configuring)?;
        config.validate()?;
        if self.units.len() >= MAX_CAMERAS {
            return Err(CoordinatorError::CameraCount(self.units.len() + 1));
        }
        if self.units.iter().any(|u| u.name() == config.name) {
            return Err(CoordinatorError::DuplicateCamera(config.name));
        }

        self.units.push(CameraUnit {
            device: CameraDevice::new(config, Arc::clone(&self.platform)),
            pipeline: None,
        });
        Ok(())
    }

    /// Detects every camera and builds its pool, buffers and reader.
    pub fn init(&mut self) -> Result<(), CoordinatorError> {
        self.require("init", Phase::Configuring)?;
        if self.units.len() < MIN_CAMERAS {
            return Err(CoordinatorError::CameraCount(self.units.len()));
        }
        let wait_timeout = self.runtime.wait_timeout();
        self.enumerated = true;

        for unit in &mut self.units {
            let camera = unit.name().to_string();
            let config = unit.device.config().clone();
            let descriptor = unit
                .device
                .detect()
                .map_err(|source| CoordinatorError::Camera {
                    camera: camera.clone(),
                    source,
                })?
                .clone();

            let buffers = self
                .allocator
                .allocate(&descriptor, config.buffer_count, descriptor.frame_len())
                .map_err(|source| CoordinatorError::Buffers {
                    camera: camera.clone(),
                    source,
                })?;

            let release_to = Arc::clone(&buffers);
            let pool = FrameBufferPool::new(
                camera.clone(),
                config.buffer_count,
                wait_timeout,
                Box::new(move |slot| release_to.on_release(slot)),
            )
            .map_err(|source| CoordinatorError::Pool {
                camera: camera.clone(),
                source,
            })?;
            let pool = Arc::new(pool);

            let reader = Arc::new(FrameReader::new(
                camera.clone(),
                &descriptor,
                Arc::clone(&pool),
                Arc::clone(&buffers),
            ));
            let queue = Arc::new(ImageQueue::new(config.buffer_count));
            queue.set_listener(reader.listener());

            let (width, height) = descriptor.output_size();
            unit.pipeline = Some(Pipeline {
                queue,
                pool,
                buffers,
                reader,
                id: descriptor.id.clone(),
                width,
                height,
                frame_len: descriptor.frame_len(),
            });
        }

        self.phase = Phase::Initialized;
        tracing::info!(cameras = self.units.len(), "Capture pipelines initialized");
        Ok(())
    }

    /// Opens every camera in configuration order.
    ///
    /// If one fails, the cameras already open are closed in reverse order.
    pub fn open(&mut self) -> Result<(), CoordinatorError> {
        self.require("open", Phase::Initialized)?;

        for index in 0..self.units.len() {
            let unit = &mut self.units[index];
            let Some(pipeline) = unit.pipeline.as_ref() else {
                continue;
            };
            let result = unit
                .device
                .open(Arc::clone(&pipeline.queue), Arc::clone(&pipeline.pool));

            if let Err(source) = result {
                let camera = unit.name().to_string();
                for opened in self.opened.drain(..).rev() {
                    self.units[opened].device.close();
                }
                return Err(CoordinatorError::Camera { camera, source });
            }
            self.opened.push(index);
        }

        self.phase = Phase::Open;
        Ok(())
    }

    /// Runs one worker per camera until cancelled, then closes everything.
    ///
    /// A worker error cancels the others and is returned once all have
    /// stopped. With a frame limit, the run ends when every camera has
    /// consumed that many frames, whether or not the publisher kept them.
    pub fn run(&mut self) -> Result<RunReport, CoordinatorError> {
        self.require("run", Phase::Open)?;
        let started_at = Utc::now();
        tracing::info!(cameras = self.units.len(), "Capture started");

        let token = self.token.clone();
        let publisher = Arc::clone(&self.publisher);
        let metrics = self.metrics.clone();
        let frame_limit = self.runtime.frame_limit;
        let wait_timeout = self.runtime.wait_timeout();
        let remaining = AtomicUsize::new(self.units.len());
        let pools: Vec<_> = self
            .units
            .iter()
            .filter_map(|u| u.pipeline.as_ref().map(|p| Arc::clone(&p.pool)))
            .collect();

        let units = &mut self.units;
        let results: Vec<(String, Result<WorkerOutcome, CoordinatorError>)> =
            thread::scope(|scope| {
                let mut handles = Vec::new();
                let mut results = Vec::new();

                for unit in units.iter_mut() {
                    let camera = unit.name().to_string();
                    let Some(pipeline) = unit.pipeline.as_ref() else {
                        continue;
                    };
                    let period = unit.device.config().frame_period();
                    let worker = Worker {
                        camera: camera.clone(),
                        device: &mut unit.device,
                        pool: Arc::clone(&pipeline.pool),
                        buffers: Arc::clone(&pipeline.buffers),
                        reader: Arc::clone(&pipeline.reader),
                        publisher: Arc::clone(&publisher),
                        metrics: metrics.clone(),
                        token: token.clone(),
                        poll: wait_timeout.min(period),
                        width: pipeline.width,
                        height: pipeline.height,
                        frame_len: pipeline.frame_len,
                        frame_limit,
                        remaining: &remaining,
                    };

                    let spawned = thread::Builder::new()
                        .name(format!("capture-{camera}"))
                        .spawn_scoped(scope, move || {
                            let _guard = CancelOnPanic(worker.token.clone());
                            worker.run()
                        });
                    match spawned {
                        Ok(handle) => handles.push((camera, handle)),
                        Err(source) => {
                            token.cancel();
                            results.push((camera.clone(), Err(CoordinatorError::Spawn { camera, source })));
                            break;
                        }
                    }
                }

                token.wait();
                for pool in &pools {
                    pool.stop();
                }

                for (camera, handle) in handles {
                    let outcome = handle
                        .join()
                        .unwrap_or_else(|_| Err(CoordinatorError::WorkerPanicked(camera.clone())));
                    results.push((camera, outcome));
                }
                results
            });

        let stopped_at = Utc::now();
        let mut cameras = Vec::new();
        let mut first_error = None;
        for (camera, result) in results {
            let outcome = match result {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(camera = %camera, "Worker failed: {}", e);
                    first_error.get_or_insert(e);
                    WorkerOutcome::default()
                }
            };
            if let Some(report) = self.camera_report(&camera, &outcome) {
                cameras.push(report);
            }
        }

        self.close();

        if let Some(e) = first_error {
            return Err(e);
        }
        tracing::info!(
            duration_ms = (stopped_at - started_at).num_milliseconds(),
            "Capture stopped"
        );
        Ok(RunReport {
            started_at,
            stopped_at,
            cameras,
        })
    }

    fn camera_report(&self, camera: &str, outcome: &WorkerOutcome) -> Option<CameraReport> {
        let unit = self.units.iter().find(|u| u.name() == camera)?;
        let pipeline = unit.pipeline.as_ref()?;
        let reader = pipeline.reader.stats();
        let pool = pipeline.pool.stats();

        Some(CameraReport {
            camera: camera.to_string(),
            id: pipeline.id.clone(),
            delivered: reader.delivered,
            consumed: outcome.consumed,
            published: outcome.published,
            skipped: pool.skipped,
            format_drops: reader.format_drops,
            dropped: reader.format_drops + reader.exhausted + reader.write_failures,
            timeouts: outcome.timeouts,
            stop_latency_us: outcome.stop_latency.map(|d| d.as_micros() as u64),
        })
    }

    /// Stops all pools, closes devices in reverse open order, and frees
    /// enumeration state. Safe to call more than once.
    pub fn close(&mut self) {
        if self.phase == Phase::Closed {
            return;
        }
        for pipeline in self.units.iter().filter_map(|u| u.pipeline.as_ref()) {
            pipeline.pool.stop();
        }
        for index in self.opened.drain(..).rev() {
            self.units[index].device.close();
        }
        for unit in &mut self.units {
            unit.device.close();
            if let Some(pipeline) = unit.pipeline.as_ref() {
                pipeline.queue.clear_listener();
            }
        }
        if self.enumerated {
            self.platform.release_enumeration();
            self.enumerated = false;
        }

        self.phase = Phase::Closed;
        tracing::info!("Capture coordinator closed");
    }

    /// Token that stops `run` when cancelled. Clone it into signal handlers.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Names of the configured cameras, in configuration order.
    pub fn camera_names(&self) -> Vec<String> {
        self.units.iter().map(|u| u.name().to_string()).collect()
    }

    /// Lifecycle state machine of the named camera.
    pub fn device(&self, camera: &str) -> Option<&CameraDevice> {
        self.units
            .iter()
            .find(|u| u.name() == camera)
            .map(|u| &u.device)
    }

    /// Slot ring of the named camera, once initialized.
    pub fn pool(&self, camera: &str) -> Option<Arc<FrameBufferPool>> {
        self.pipeline(camera).map(|p| Arc::clone(&p.pool))
    }

    /// Frame reader of the named camera, once initialized.
    pub fn reader(&self, camera: &str) -> Option<Arc<FrameReader>> {
        self.pipeline(camera).map(|p| Arc::clone(&p.reader))
    }

    fn pipeline(&self, camera: &str) -> Option<&Pipeline> {
        self.units
            .iter()
            .find(|u| u.name() == camera)
            .and_then(|u| u.pipeline.as_ref())
    }
}

impl Drop for CaptureCoordinator {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for CaptureCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureCoordinator")
            .field("cameras", &self.camera_names())
            .field("phase", &self.phase)
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

/// Everything one worker thread borrows or shares.
struct Worker<'a> {
    camera: String,
    device: &'a mut CameraDevice,
    pool: Arc<FrameBufferPool>,
    buffers: Arc<dyn MappedBuffers>,
    reader: Arc<FrameReader>,
    publisher: Arc<dyn FramePublisher>,
    metrics: Option<Arc<CaptureMetrics>>,
    token: CancellationToken,
    /// Longest single wait on the pool.
    poll: Duration,
    width: u32,
    height: u32,
    frame_len: usize,
    frame_limit: Option<u64>,
    /// Workers that have not reached the frame limit yet.
    remaining: &'a AtomicUsize,
}

impl Worker<'_> {
    fn run(mut self) -> Result<WorkerOutcome, CoordinatorError> {
        let mut outcome = WorkerOutcome::default();
        tracing::debug!(camera = %self.camera, poll = ?self.poll, "Worker started");

        let result = self.consume(&mut outcome);
        if result.is_err() {
            self.token.cancel();
        }
        outcome.stop_latency = self
            .token
            .cancelled_at()
            .map(|at| Instant::now().saturating_duration_since(at));
        self.report(&outcome, false);

        tracing::debug!(
            camera = %self.camera,
            published = outcome.published,
            stop_latency = ?outcome.stop_latency,
            "Worker stopped"
        );
        result.map(|()| outcome)
    }

    fn consume(&mut self, outcome: &mut WorkerOutcome) -> Result<(), CoordinatorError> {
        while !self.token.is_cancelled() {
            if let Err(source) = self.device.drain_events() {
                return Err(CoordinatorError::Camera {
                    camera: self.camera.clone(),
                    source,
                });
            }

            let slot = match self.pool.acquire(self.poll) {
                Ok(slot) => slot,
                Err(PoolError::Timeout(waited)) => {
                    outcome.timeouts += 1;
                    tracing::warn!(camera = %self.camera, ?waited, "No frame within wait bound");
                    continue;
                }
                Err(PoolError::Stopped) => break,
                Err(source) => {
                    return Err(CoordinatorError::Pool {
                        camera: self.camera.clone(),
                        source,
                    })
                }
            };

            let mut published = Ok(());
            let read = self.buffers.read(slot.index, &mut |mapped: &[u8]| {
                published = self.publisher.publish(FrameRef {
                    camera: &self.camera,
                    metadata: slot.metadata,
                    width: self.width,
                    height: self.height,
                    pixels: mapped.get(..self.frame_len).unwrap_or(mapped),
                });
            });
            if let Err(source) = self.pool.release(slot.index) {
                return Err(CoordinatorError::Pool {
                    camera: self.camera.clone(),
                    source,
                });
            }
            outcome.consumed += 1;

            match (read, published) {
                (Err(e), _) => {
                    tracing::warn!(camera = %self.camera, slot = slot.index, "Slot read failed: {}", e);
                }
                (Ok(()), Err(e)) => {
                    tracing::warn!(
                        camera = %self.camera,
                        frame_id = slot.metadata.frame_id,
                        "Frame not published: {}",
                        e
                    );
                }
                (Ok(()), Ok(())) => {
                    outcome.published += 1;
                    tracing::trace!(
                        camera = %self.camera,
                        frame_id = slot.metadata.frame_id,
                        "Frame published"
                    );
                }
            }
            self.report(outcome, true);

            if self
                .frame_limit
                .is_some_and(|limit| outcome.consumed >= limit)
            {
                if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    tracing::info!("Every camera reached the frame limit");
                    self.token.cancel();
                }
                break;
            }
        }
        Ok(())
    }

    fn report(&self, outcome: &WorkerOutcome, streaming: bool) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        let reader = self.reader.stats();
        metrics.update(&CameraSnapshot {
            camera: self.camera.clone(),
            delivered: reader.delivered,
            published: outcome.published,
            skipped: self.pool.stats().skipped,
            dropped: reader.format_drops + reader.exhausted + reader.write_failures,
            timeouts: outcome.timeouts,
            streaming,
        });
    }
}
