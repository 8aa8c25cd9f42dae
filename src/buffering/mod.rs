//! Frame buffering between the platform callback and the camera worker.
//!
//! A [`FrameBufferPool`] is the only synchronization point for frame data.
//! The producer selects, fills and dispatches slots; the consumer acquires
//! and releases them. Slot memory itself lives outside the pool.

mod pool;

pub use pool::{
    AcquiredSlot, FrameBufferPool, FrameMetadata, PoolError, PoolStats, ReleaseCallback,
    SlotState, MIN_CAPACITY,
};
