//! Raw images and the platform's bounded image ring.
//!
//! The platform pushes images into an [`ImageQueue`]; the reader borrows
//! the newest one as an [`AcquiredImage`] and must hand it back. While
//! every buffer of the ring is held by the reader, the platform has
//! nowhere to write and new images are discarded.

use super::{CameraStatus, PixelFormat, PlatformError};
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;

/// One plane of a raw image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plane {
    /// Plane bytes, possibly padded at row ends.
    pub data: Vec<u8>,
    /// Bytes between the starts of consecutive rows.
    pub row_stride: usize,
    /// Bytes between consecutive samples within a row.
    pub pixel_stride: usize,
}

/// Image as delivered by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage {
    /// Pixel format of the image.
    pub format: PixelFormat,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Y, U and V for YUV 4:2:0.
    pub planes: Vec<Plane>,
    /// Hardware timestamp in nanoseconds.
    pub timestamp_ns: u64,
}

/// Invoked on the pushing thread after every successful push.
pub type ImageListener = Box<dyn Fn(&ImageQueue) + Send + Sync>;

#[derive(Default)]
struct QueueState {
    /// Pushed and not yet acquired, oldest first.
    pending: VecDeque<RawImage>,
    /// Images held by the reader.
    acquired: usize,
    /// Images dropped on push or superseded on acquire.
    discarded: u64,
}

/// Bounded ring of raw images shared by the platform and the reader.
pub struct ImageQueue {
    /// Ring capacity, pending plus acquired.
    max_images: usize,
    /// Ring contents.
    state: Mutex<QueueState>,
    /// Called after each push.
    listener: RwLock<Option<ImageListener>>,
}

impl ImageQueue {
    /// A ring holding at most `max_images` images, never less than one.
    pub fn new(max_images: usize) -> Self {
        Self {
            max_images: max_images.max(1),
            state: Mutex::new(QueueState::default()),
            listener: RwLock::new(None),
        }
    }

    /// Registers the image-available listener, replacing any previous one.
    pub fn set_listener(&self, listener: ImageListener) {
        *self.listener.write() = Some(listener);
    }

    /// Removes the listener. Waits for an in-flight callback to finish.
    pub fn clear_listener(&self) {
        *self.listener.write() = None;
    }

    /// Platform side: enqueues a new image and notifies the listener.
    ///
    /// The oldest pending image is discarded when the ring is full. If all
    /// buffers are acquired, the new image is refused.
    pub fn push(&self, image: RawImage) -> Result<(), PlatformError> {
        {
            let mut state = self.state.lock();
            if state.acquired >= self.max_images {
                state.discarded += 1;
                return Err(PlatformError::new(
                    "push_image",
                    CameraStatus::NoBufferAvailable,
                ));
            }
            if state.pending.len() + state.acquired >= self.max_images {
                state.pending.pop_front();
                state.discarded += 1;
            }
            state.pending.push_back(image);
        }

        if let Some(listener) = self.listener.read().as_ref() {
            listener(self);
        }
        Ok(())
    }

    /// Reader side: takes the newest pending image, discarding older ones.
    pub fn acquire_latest(&self) -> Option<AcquiredImage<'_>> {
        let mut state = self.state.lock();
        let image = state.pending.pop_back()?;
        let stale = state.pending.len() as u64;
        state.pending.clear();
        state.discarded += stale;
        state.acquired += 1;

        Some(AcquiredImage {
            queue: self,
            image,
            released: false,
        })
    }

    fn release_one(&self) {
        let mut state = self.state.lock();
        state.acquired = state.acquired.saturating_sub(1);
    }

    /// Images currently held by the reader.
    pub fn acquired(&self) -> usize {
        self.state.lock().acquired
    }

    /// Images waiting to be acquired.
    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Images dropped because the ring was full or a newer one arrived.
    pub fn discarded(&self) -> u64 {
        self.state.lock().discarded
    }

    /// Ring capacity.
    pub fn max_images(&self) -> usize {
        self.max_images
    }
}

impl std::fmt::Debug for ImageQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ImageQueue")
            .field("max_images", &self.max_images)
            .field("pending", &state.pending.len())
            .field("acquired", &state.acquired)
            .field("discarded", &state.discarded)
            .finish()
    }
}

/// A raw image borrowed from the ring.
///
/// Goes back to the platform on [`AcquiredImage::release`] or on drop.
pub struct AcquiredImage<'q> {
    queue: &'q ImageQueue,
    image: RawImage,
    released: bool,
}

impl AcquiredImage<'_> {
    /// Returns the image to the platform.
    pub fn release(mut self) {
        self.give_back();
    }

    fn give_back(&mut self) {
        if !self.released {
            self.released = true;
            self.queue.release_one();
        }
    }
}

impl std::ops::Deref for AcquiredImage<'_> {
    type Target = RawImage;

    fn deref(&self) -> &RawImage {
        &self.image
    }
}

impl Drop for AcquiredImage<'_> {
    fn drop(&mut self) {
        self.give_back();
    }
}
