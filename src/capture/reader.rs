//! Producer side of a camera's frame pipeline.
//!
//! [`FrameReader::on_image_available`] runs on the platform's delivery
//! thread whenever a raw image is pushed. It never waits on the consumer:
//! slots come from `try_select`, which reclaims an unconsumed frame rather
//! than waiting for the consumer to release one.

use super::{CameraDescriptor, Frame};
use crate::buffering::{FrameBufferPool, FrameMetadata, PoolError};
use crate::conversion::{self, FormatError, Orientation};
use crate::platform::{BufferError, ImageListener, ImageQueue, MappedBuffers};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Why a raw image did not become a delivered frame.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The raw image failed validation or layout inference.
    #[error("unsupported image: {0}")]
    Format(#[from] FormatError),
    /// No slot could be handed out.
    #[error("no frame slot: {0}")]
    Pool(#[from] PoolError),
    /// Copying into mapped slot memory failed.
    #[error("slot copy failed: {0}")]
    Buffer(#[from] BufferError),
}

/// Counters kept by a reader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderStats {
    /// Frames dispatched to the pool.
    pub delivered: u64,
    /// Images dropped for an unsupported format or layout.
    pub format_drops: u64,
    /// Images dropped because every slot was held.
    pub exhausted: u64,
    /// Images dropped because the slot copy failed.
    pub write_failures: u64,
    /// Callbacks that found no image to acquire.
    pub empty_wakeups: u64,
}

/// Converts raw images and hands them to the pool.
pub struct FrameReader {
    /// Camera name used in logs.
    camera: String,
    /// Expected sensor width.
    width: u32,
    /// Expected sensor height.
    height: u32,
    /// Mounting angle to undo.
    orientation: Orientation,
    /// Destination ring.
    pool: Arc<FrameBufferPool>,
    /// Memory backing each pool slot.
    buffers: Arc<dyn MappedBuffers>,
    /// Advanced only after a dispatch.
    next_frame_id: AtomicU64,
    delivered: AtomicU64,
    format_drops: AtomicU64,
    exhausted: AtomicU64,
    write_failures: AtomicU64,
    empty_wakeups: AtomicU64,
}

impl FrameReader {
    /// Creates a reader for the camera described by `descriptor`.
    ///
    /// `buffers` must hold one slot per pool slot.
    pub fn new(
        camera: impl Into<String>,
        descriptor: &CameraDescriptor,
        pool: Arc<FrameBufferPool>,
        buffers: Arc<dyn MappedBuffers>,
    ) -> Self {
        Self {
            camera: camera.into(),
            width: descriptor.width,
            height: descriptor.height,
            orientation: descriptor.orientation,
            pool,
            buffers,
            next_frame_id: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            format_drops: AtomicU64::new(0),
            exhausted: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
            empty_wakeups: AtomicU64::new(0),
        }
    }

    /// Listener to register on the camera's image queue.
    pub fn listener(self: &Arc<Self>) -> ImageListener {
        let reader = Arc::clone(self);
        Box::new(move |queue| reader.handle(queue))
    }

    /// Runs one delivery and logs the outcome instead of returning it.
    pub fn handle(&self, queue: &ImageQueue) {
        match self.on_image_available(queue) {
            Ok(_) => {}
            Err(FrameError::Format(e)) => {
                self.format_drops.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(camera = %self.camera, "Frame dropped: {}", e);
            }
            Err(FrameError::Pool(PoolError::Stopped)) => {
                tracing::debug!(camera = %self.camera, "Frame discarded, pool stopped");
            }
            Err(FrameError::Pool(PoolError::Exhausted)) => {
                self.exhausted.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(camera = %self.camera, "Frame dropped, no free slot");
            }
            Err(e) => {
                self.write_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(camera = %self.camera, "Frame dropped: {}", e);
            }
        }
    }

    /// Converts the newest raw image and dispatches it.
    ///
    /// Returns `Ok(None)` when the queue was already empty. The raw image
    /// is back with the platform before this returns, on every path.
    pub fn on_image_available(
        &self,
        queue: &ImageQueue,
    ) -> Result<Option<FrameMetadata>, FrameError> {
        let Some(image) = queue.acquire_latest() else {
            self.empty_wakeups.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(camera = %self.camera, "Image callback with nothing to acquire");
            return Ok(None);
        };

        conversion::validate(&image, self.width, self.height)?;
        let layout = conversion::infer_layout(&image)?;
        let packed = conversion::pack(&image, layout)?;
        let timestamp_ns = image.timestamp_ns;
        image.release();

        let frame = conversion::correct(conversion::to_rgb(&packed), self.orientation);
        let metadata = FrameMetadata {
            frame_id: self.next_frame_id.load(Ordering::Acquire),
            timestamp_ns,
        };

        let slot = self.pool.try_select()?;
        if let Err(e) = self.copy_into(slot, &frame) {
            self.pool.abandon(slot)?;
            return Err(e.into());
        }
        self.pool.dispatch(slot, metadata)?;

        self.next_frame_id.fetch_add(1, Ordering::AcqRel);
        self.delivered.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(
            camera = %self.camera,
            frame_id = metadata.frame_id,
            slot,
            "Frame dispatched"
        );
        Ok(Some(metadata))
    }

    fn copy_into(&self, slot: usize, frame: &Frame) -> Result<(), BufferError> {
        let pixels = frame.pixels();
        let capacity = self.buffers.slot_len();
        if pixels.len() > capacity {
            return Err(BufferError::TooLarge {
                len: pixels.len(),
                capacity,
            });
        }
        self.buffers
            .write(slot, &mut |mapped: &mut [u8]| mapped[..pixels.len()].copy_from_slice(pixels))
    }

    /// Id the next delivered frame will carry.
    pub fn next_frame_id(&self) -> u64 {
        self.next_frame_id.load(Ordering::Acquire)
    }

    /// Camera name used in logs.
    pub fn camera(&self) -> &str {
        &self.camera
    }

    /// Snapshot of the drop and delivery counters.
    pub fn stats(&self) -> ReaderStats {
        ReaderStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            format_drops: self.format_drops.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            empty_wakeups: self.empty_wakeups.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for FrameReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameReader")
            .field("camera", &self.camera)
            .field("orientation", &self.orientation)
            .field("stats", &self.stats())
            .finish()
    }
}
