//! External slot memory.
//!
//! Backing memory for pool slots comes from an allocator outside the
//! core (a GPU or ION heap on the target). The core never allocates or
//! frees it; it maps a slot, copies, and unmaps. [`HostAllocator`] is a
//! plain heap implementation for hosts and tests.

use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::capture::CameraDescriptor;

/// Errors reported by external slot memory.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    /// The allocator could not supply the buffers.
    #[error("allocation of {slots} x {slot_len} bytes failed: {reason}")]
    AllocationFailed {
        /// Slots requested.
        slots: usize,
        /// Bytes per slot requested.
        slot_len: usize,
        /// Allocator message.
        reason: String,
    },
    /// The slot index has no buffer.
    #[error("slot {0} has no backing buffer")]
    UnknownSlot(usize),
    /// The frame is larger than a slot.
    #[error("frame of {len} bytes does not fit a {capacity} byte slot")]
    TooLarge {
        /// Bytes to write.
        len: usize,
        /// Bytes in one slot.
        capacity: usize,
    },
    /// Mapping the slot failed.
    #[error("failed to map slot {slot}: {reason}")]
    MapFailed {
        /// Slot index.
        slot: usize,
        /// Allocator message.
        reason: String,
    },
}

/// Mapped access to a camera's slot buffers.
///
/// Each call maps the slot, runs the closure, and unmaps before returning.
pub trait MappedBuffers: Send + Sync {
    /// Size in bytes of every slot buffer.
    fn slot_len(&self) -> usize;

    /// Maps a slot for writing.
    fn write(&self, slot: usize, f: &mut dyn FnMut(&mut [u8])) -> Result<(), BufferError>;

    /// Maps a slot for reading.
    fn read(&self, slot: usize, f: &mut dyn FnMut(&[u8])) -> Result<(), BufferError>;

    /// Called by the pool once the consumer has released a slot.
    fn on_release(&self, slot: usize);
}

/// Supplies slot buffers for a negotiated camera format.
pub trait BufferAllocator: Send + Sync {
    /// Allocates `slots` buffers of `slot_len` bytes for `camera`.
    fn allocate(
        &self,
        camera: &CameraDescriptor,
        slots: usize,
        slot_len: usize,
    ) -> Result<Arc<dyn MappedBuffers>, BufferError>;
}

/// Something that can report how many frames the consumer has handed back.
pub trait ReleaseObserver: Send + Sync {
    /// Waits until at least `count` releases happened. Returns false on timeout.
    fn wait_for_releases(&self, count: u64, timeout: Duration) -> bool;
}

/// Heap-backed allocator.
///
/// Remembers what it handed out per camera id so callers can watch the
/// release traffic of a camera's buffers.
#[derive(Debug, Default)]
pub struct HostAllocator {
    /// Latest buffers per camera id.
    allocated: Mutex<HashMap<String, Arc<HostBuffers>>>,
}

impl HostAllocator {
    /// An allocator that has handed out nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers most recently allocated for a camera.
    pub fn buffers_for(&self, camera_id: &str) -> Option<Arc<HostBuffers>> {
        self.allocated.lock().get(camera_id).cloned()
    }

    /// Observer over the release count of a camera's buffers.
    ///
    /// Usable before the buffers exist; it resolves them on each wait.
    pub fn release_observer(self: &Arc<Self>, camera_id: &str) -> Arc<dyn ReleaseObserver> {
        Arc::new(AllocatorObserver {
            allocator: Arc::clone(self),
            camera_id: camera_id.to_string(),
        })
    }
}

impl BufferAllocator for HostAllocator {
    fn allocate(
        &self,
        camera: &CameraDescriptor,
        slots: usize,
        slot_len: usize,
    ) -> Result<Arc<dyn MappedBuffers>, BufferError> {
        let buffers = Arc::new(HostBuffers::new(slots, slot_len)?);
        self.allocated
            .lock()
            .insert(camera.id.clone(), Arc::clone(&buffers));

        tracing::debug!(
            camera = %camera.id,
            slots,
            slot_len,
            "Allocated host slot buffers"
        );
        Ok(buffers)
    }
}

struct AllocatorObserver {
    /// Resolves the buffers on each wait.
    allocator: Arc<HostAllocator>,
    /// Camera whose releases are counted.
    camera_id: String,
}

impl ReleaseObserver for AllocatorObserver {
    fn wait_for_releases(&self, count: u64, timeout: Duration) -> bool {
        match self.allocator.buffers_for(&self.camera_id) {
            Some(buffers) => buffers.wait_for_releases(count, timeout),
            None => false,
        }
    }
}

/// Slot buffers living on the heap.
pub struct HostBuffers {
    /// Bytes per slot.
    slot_len: usize,
    /// One buffer per slot.
    slots: Vec<Mutex<Vec<u8>>>,
    /// Releases so far.
    released: Mutex<u64>,
    /// Signalled on every release.
    released_cv: Condvar,
}

impl HostBuffers {
    /// `slots` zeroed buffers of `slot_len` bytes.
    pub fn new(slots: usize, slot_len: usize) -> Result<Self, BufferError> {
        if slots == 0 || slot_len == 0 {
            return Err(BufferError::AllocationFailed {
                slots,
                slot_len,
                reason: "empty allocation".to_string(),
            });
        }

        Ok(Self {
            slot_len,
            slots: (0..slots).map(|_| Mutex::new(vec![0u8; slot_len])).collect(),
            released: Mutex::new(0),
            released_cv: Condvar::new(),
        })
    }

    /// Total releases seen so far.
    pub fn released(&self) -> u64 {
        *self.released.lock()
    }

    fn slot(&self, slot: usize) -> Result<&Mutex<Vec<u8>>, BufferError> {
        self.slots.get(slot).ok_or(BufferError::UnknownSlot(slot))
    }
}

impl MappedBuffers for HostBuffers {
    fn slot_len(&self) -> usize {
        self.slot_len
    }

    fn write(&self, slot: usize, f: &mut dyn FnMut(&mut [u8])) -> Result<(), BufferError> {
        let mut mapped = self.slot(slot)?.lock();
        f(mapped.as_mut_slice());
        Ok(())
    }

    fn read(&self, slot: usize, f: &mut dyn FnMut(&[u8])) -> Result<(), BufferError> {
        let mapped = self.slot(slot)?.lock();
        f(mapped.as_slice());
        Ok(())
    }

    fn on_release(&self, _slot: usize) {
        *self.released.lock() += 1;
        self.released_cv.notify_all();
    }
}

impl ReleaseObserver for HostBuffers {
    fn wait_for_releases(&self, count: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut released = self.released.lock();
        while *released < count {
            if self.released_cv.wait_until(&mut released, deadline).timed_out() {
                return *released >= count;
            }
        }
        true
    }
}

impl std::fmt::Debug for HostBuffers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostBuffers")
            .field("slots", &self.slots.len())
            .field("slot_len", &self.slot_len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_write_then_read_slot() {
        let buffers = HostBuffers::new(2, 4).unwrap();
        buffers
            .write(1, &mut |mapped| mapped.copy_from_slice(&[1, 2, 3, 4]))
            .unwrap();

        let mut seen = Vec::new();
        buffers.read(1, &mut |mapped| seen.extend_from_slice(mapped)).unwrap();
        assert_eq!(seen, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_unknown_slot() {
        let buffers = HostBuffers::new(2, 4).unwrap();
        assert_eq!(
            buffers.write(5, &mut |_| {}),
            Err(BufferError::UnknownSlot(5))
        );
    }

    #[test]
    fn test_wait_for_releases() {
        let buffers = Arc::new(HostBuffers::new(2, 4).unwrap());
        assert!(!buffers.wait_for_releases(1, Duration::from_millis(5)));

        let releaser = Arc::clone(&buffers);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            releaser.on_release(0);
        });

        assert!(buffers.wait_for_releases(1, Duration::from_secs(2)));
        handle.join().unwrap();
        assert_eq!(buffers.released(), 1);
    }
}
