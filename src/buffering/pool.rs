//! Fixed-capacity ring of reusable frame slots.
//!
//! The pool arbitrates between exactly one producer (the platform's
//! image callback) and exactly one consumer (the camera's worker thread).
//! Slot state is the only thing that decides who may touch a slot's
//! backing memory: the producer owns a `Filling` slot, the consumer owns a
//! `Draining` slot, and nobody writes a `Ready` slot.
//!
//! The producer never waits on the consumer. If the consumer has not
//! picked up the previous frame by the time the next one is dispatched,
//! the older frame is skipped and its slot goes straight back to `Idle`.
//! When the consumer holds a slot and the only other one is `Ready`,
//! [`FrameBufferPool::try_select`] reclaims the stale `Ready` slot for the
//! new frame instead of waiting for a release.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Smallest capacity that leaves headroom for one filling, one ready
/// and one draining slot to rotate without the producer stalling.
pub const MIN_CAPACITY: usize = 2;

/// Callback invoked after a slot is released, so external backing memory
/// can be reused. Runs outside the pool lock.
pub type ReleaseCallback = Box<dyn Fn(usize) + Send + Sync>;

/// Errors that can occur during pool operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// Fewer than [`MIN_CAPACITY`] slots were requested.
    #[error("pool capacity {requested} is below the minimum of {MIN_CAPACITY}")]
    InsufficientCapacity {
        /// Capacity passed to [`FrameBufferPool::new`].
        requested: usize,
    },
    /// `stop` has been called.
    #[error("frame buffer pool is stopped")]
    Stopped,
    /// A bounded wait elapsed.
    #[error("timed out after {0:?} waiting for a frame slot")]
    Timeout(Duration),
    /// No slot is Idle and there is no Ready frame to reclaim.
    #[error("no frame slot is free or reclaimable")]
    Exhausted,
    /// Slot index past the end of the ring.
    #[error("slot {index} is out of range for capacity {capacity}")]
    InvalidSlot {
        /// Offending index.
        index: usize,
        /// Number of slots in the ring.
        capacity: usize,
    },
    /// The slot is not in the state the operation requires.
    #[error("slot {index} cannot go from {from:?} to {to:?}")]
    InvalidTransition {
        /// Slot index.
        index: usize,
        /// State the slot was actually in.
        from: SlotState,
        /// State the operation wanted to move it to.
        to: SlotState,
    },
}

/// Lifecycle of a single slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Free for the producer.
    Idle,
    /// Held by the producer while it writes a frame.
    Filling,
    /// Published and waiting for the consumer. Immutable.
    Ready,
    /// Held by the consumer while it reads a frame.
    Draining,
}

/// Per-frame metadata stamped on dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameMetadata {
    /// Monotonic per camera, advanced only for delivered frames.
    pub frame_id: u64,
    /// Hardware capture timestamp in nanoseconds.
    pub timestamp_ns: u64,
}

/// A slot handed to the consumer by [`FrameBufferPool::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredSlot {
    /// Slot index, to be passed back to `release`.
    pub index: usize,
    /// Metadata stamped when the slot was dispatched.
    pub metadata: FrameMetadata,
}

/// Counters describing pool traffic since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Frames published with `dispatch`.
    pub dispatched: u64,
    /// Ready frames replaced or reclaimed before the consumer acquired them.
    pub skipped: u64,
    /// Slots handed back by the consumer.
    pub released: u64,
}

struct Slot {
    /// Who may touch the slot's memory.
    state: SlotState,
    /// Stamped on dispatch.
    metadata: FrameMetadata,
}

struct PoolState {
    /// One entry per slot.
    slots: Vec<Slot>,
    /// Round-robin cursor for slot selection.
    cursor: usize,
    /// Index of the current Ready slot, if any.
    ready: Option<usize>,
    /// Set once by `stop`.
    stopped: bool,
    /// Traffic counters.
    stats: PoolStats,
}

impl PoolState {
    fn check_index(&self, index: usize) -> Result<(), PoolError> {
        if index >= self.slots.len() {
            return Err(PoolError::InvalidSlot {
                index,
                capacity: self.slots.len(),
            });
        }
        Ok(())
    }

    fn transition(&mut self, index: usize, from: SlotState, to: SlotState) -> Result<(), PoolError> {
        self.check_index(index)?;
        let slot = &mut self.slots[index];
        if slot.state != from {
            return Err(PoolError::InvalidTransition {
                index,
                from: slot.state,
                to,
            });
        }
        slot.state = to;
        Ok(())
    }

    /// Marks the next Idle slot Filling and advances the cursor past it.
    fn claim_idle(&mut self) -> Option<usize> {
        let capacity = self.slots.len();
        let index = (0..capacity)
            .map(|offset| (self.cursor + offset) % capacity)
            .find(|&i| self.slots[i].state == SlotState::Idle)?;
        self.slots[index].state = SlotState::Filling;
        self.cursor = (index + 1) % capacity;
        Some(index)
    }

    fn take_ready(&mut self) -> Option<AcquiredSlot> {
        let index = self.ready.take()?;
        let slot = &mut self.slots[index];
        slot.state = SlotState::Draining;
        Some(AcquiredSlot {
            index,
            metadata: slot.metadata,
        })
    }
}

/// Bounded single-producer/single-consumer frame ring.
pub struct FrameBufferPool {
    /// Used in logs.
    name: String,
    /// Slot states and counters.
    state: Mutex<PoolState>,
    /// Signalled on dispatch, release and stop.
    changed: Condvar,
    /// Bound for the waiting `select`.
    wait_timeout: Duration,
    /// Runs after every release.
    release: ReleaseCallback,
}

impl FrameBufferPool {
    /// Creates a pool with `capacity` Idle slots.
    ///
    /// `wait_timeout` bounds how long `select` waits for a free slot when
    /// the consumer is holding everything else. The release callback
    /// receives the slot index after the consumer hands a slot back.
    pub fn new(
        name: impl Into<String>,
        capacity: usize,
        wait_timeout: Duration,
        release: ReleaseCallback,
    ) -> Result<Self, PoolError> {
        if capacity < MIN_CAPACITY {
            return Err(PoolError::InsufficientCapacity {
                requested: capacity,
            });
        }

        let name = name.into();
        let slots = (0..capacity)
            .map(|_| Slot {
                state: SlotState::Idle,
                metadata: FrameMetadata::default(),
            })
            .collect();

        tracing::debug!(pool = %name, capacity, "Frame buffer pool initialized");

        Ok(Self {
            name,
            state: Mutex::new(PoolState {
                slots,
                cursor: 0,
                ready: None,
                stopped: false,
                stats: PoolStats::default(),
            }),
            changed: Condvar::new(),
            wait_timeout,
            release,
        })
    }

    /// Hands the next Idle slot to the producer and marks it Filling.
    ///
    /// Waits at most the pool's wait timeout when no slot is Idle. The
    /// producer is expected to drop its frame on `Timeout`. Producers that
    /// run on a delivery callback use [`try_select`](Self::try_select).
    pub fn select(&self) -> Result<usize, PoolError> {
        let deadline = Instant::now() + self.wait_timeout;
        let mut state = self.state.lock();

        loop {
            if state.stopped {
                return Err(PoolError::Stopped);
            }
            if let Some(index) = state.claim_idle() {
                tracing::trace!(pool = %self.name, slot = index, "Slot selected");
                return Ok(index);
            }
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                if state.stopped {
                    return Err(PoolError::Stopped);
                }
                return Err(PoolError::Timeout(self.wait_timeout));
            }
        }
    }

    /// Hands a slot to the producer without ever waiting.
    ///
    /// Takes the next Idle slot if there is one. Otherwise the unconsumed
    /// Ready slot is taken back and counted as a skip, so the consumer moves
    /// on to the frame about to be written. Fails with `Exhausted` only when
    /// every slot is Filling or Draining.
    pub fn try_select(&self) -> Result<usize, PoolError> {
        let mut state = self.state.lock();
        if state.stopped {
            return Err(PoolError::Stopped);
        }
        if let Some(index) = state.claim_idle() {
            tracing::trace!(pool = %self.name, slot = index, "Slot selected");
            return Ok(index);
        }

        let index = state.ready.take().ok_or(PoolError::Exhausted)?;
        state.slots[index].state = SlotState::Filling;
        state.stats.skipped += 1;
        tracing::debug!(
            pool = %self.name,
            slot = index,
            frame_id = state.slots[index].metadata.frame_id,
            "Ready frame reclaimed, consumer did not keep up"
        );
        Ok(index)
    }

    /// Publishes a Filling slot as the current Ready frame.
    ///
    /// A previous Ready slot that was never acquired is returned to Idle.
    pub fn dispatch(&self, index: usize, metadata: FrameMetadata) -> Result<(), PoolError> {
        let mut state = self.state.lock();
        if state.stopped {
            return Err(PoolError::Stopped);
        }
        state.transition(index, SlotState::Filling, SlotState::Ready)?;
        state.slots[index].metadata = metadata;

        if let Some(previous) = state.ready.replace(index) {
            state.slots[previous].state = SlotState::Idle;
            state.stats.skipped += 1;
            tracing::debug!(
                pool = %self.name,
                skipped_slot = previous,
                frame_id = state.slots[previous].metadata.frame_id,
                "Frame skipped, consumer did not keep up"
            );
        }
        state.stats.dispatched += 1;
        drop(state);

        self.changed.notify_all();
        Ok(())
    }

    /// Returns a Filling slot to Idle without publishing it.
    pub fn abandon(&self, index: usize) -> Result<(), PoolError> {
        let mut state = self.state.lock();
        state.transition(index, SlotState::Filling, SlotState::Idle)?;
        drop(state);

        self.changed.notify_all();
        Ok(())
    }

    /// Takes the current Ready slot without waiting.
    ///
    /// Returns `None` if nothing new became Ready since the last acquire.
    pub fn acquire_latest(&self) -> Result<Option<AcquiredSlot>, PoolError> {
        let mut state = self.state.lock();
        if state.stopped {
            return Err(PoolError::Stopped);
        }
        Ok(state.take_ready())
    }

    /// Waits up to `timeout` for a Ready slot and takes it.
    pub fn acquire(&self, timeout: Duration) -> Result<AcquiredSlot, PoolError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();

        loop {
            if state.stopped {
                return Err(PoolError::Stopped);
            }
            if let Some(acquired) = state.take_ready() {
                return Ok(acquired);
            }
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                if state.stopped {
                    return Err(PoolError::Stopped);
                }
                return Err(PoolError::Timeout(timeout));
            }
        }
    }

    /// Hands a Draining slot back and notifies the release callback.
    ///
    /// The slot is Idle before the callback runs. Accepted after `stop`
    /// so a consumer can return what it holds during shutdown.
    pub fn release(&self, index: usize) -> Result<(), PoolError> {
        let mut state = self.state.lock();
        state.transition(index, SlotState::Draining, SlotState::Idle)?;
        state.stats.released += 1;
        drop(state);

        self.changed.notify_all();
        (self.release)(index);
        Ok(())
    }

    /// Marks the pool terminal and wakes every waiter.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if !state.stopped {
            state.stopped = true;
            tracing::debug!(pool = %self.name, "Frame buffer pool stopped");
        }
        drop(state);

        self.changed.notify_all();
    }

    /// Returns true once `stop` has been called.
    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// Returns the state of a slot.
    pub fn slot_state(&self, index: usize) -> Result<SlotState, PoolError> {
        let state = self.state.lock();
        state.check_index(index)?;
        Ok(state.slots[index].state)
    }

    /// Number of slots in the ring.
    pub fn capacity(&self) -> usize {
        self.state.lock().slots.len()
    }

    /// Returns the pool name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns a copy of the traffic counters.
    pub fn stats(&self) -> PoolStats {
        self.state.lock().stats
    }
}

impl std::fmt::Debug for FrameBufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("FrameBufferPool")
            .field("name", &self.name)
            .field("capacity", &state.slots.len())
            .field("ready", &state.ready)
            .field("stopped", &state.stopped)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, OnceLock, Weak};
    use std::thread;

    fn pool(capacity: usize) -> FrameBufferPool {
        FrameBufferPool::new(
            "test",
            capacity,
            Duration::from_millis(20),
            Box::new(|_| {}),
        )
        .unwrap()
    }

    fn meta(frame_id: u64) -> FrameMetadata {
        FrameMetadata {
            frame_id,
            timestamp_ns: frame_id * 1000,
        }
    }

    #[test]
    fn test_capacity_below_two_rejected() {
        for capacity in [0, 1] {
            let result = FrameBufferPool::new("x", capacity, Duration::ZERO, Box::new(|_| {}));
            assert!(matches!(
                result,
                Err(PoolError::InsufficientCapacity { requested }) if requested == capacity
            ));
        }
    }

    #[test]
    fn test_select_is_round_robin() {
        let pool = pool(3);
        let first = pool.select().unwrap();
        pool.abandon(first).unwrap();
        let second = pool.select().unwrap();
        pool.abandon(second).unwrap();
        let third = pool.select().unwrap();

        assert_eq!((first, second, third), (0, 1, 2));
    }

    #[test]
    fn test_handoff_cycle() {
        let pool = pool(2);
        let slot = pool.select().unwrap();
        assert_eq!(pool.slot_state(slot).unwrap(), SlotState::Filling);

        pool.dispatch(slot, meta(7)).unwrap();
        assert_eq!(pool.slot_state(slot).unwrap(), SlotState::Ready);

        let acquired = pool.acquire_latest().unwrap().unwrap();
        assert_eq!(acquired.index, slot);
        assert_eq!(acquired.metadata, meta(7));
        assert_eq!(pool.slot_state(slot).unwrap(), SlotState::Draining);

        // Nothing new since the last acquire.
        assert!(pool.acquire_latest().unwrap().is_none());

        pool.release(slot).unwrap();
        assert_eq!(pool.slot_state(slot).unwrap(), SlotState::Idle);
    }

    #[test]
    fn test_double_dispatch_skips_older_frame() {
        let pool = pool(4);
        let a = pool.select().unwrap();
        pool.dispatch(a, meta(0)).unwrap();
        let b = pool.select().unwrap();
        pool.dispatch(b, meta(1)).unwrap();

        let ready: Vec<_> = (0..4)
            .filter(|&i| pool.slot_state(i).unwrap() == SlotState::Ready)
            .collect();
        assert_eq!(ready, vec![b]);
        assert_eq!(pool.slot_state(a).unwrap(), SlotState::Idle);
        assert_eq!(pool.stats().skipped, 1);

        let acquired = pool.acquire_latest().unwrap().unwrap();
        assert_eq!(acquired.index, b);
        assert_eq!(acquired.metadata.frame_id, 1);
    }

    #[test]
    fn test_released_slot_idle_before_callback_returns() {
        let handle: Arc<OnceLock<Weak<FrameBufferPool>>> = Arc::new(OnceLock::new());
        let observed = Arc::new(Mutex::new(Vec::new()));

        let callback_handle = Arc::clone(&handle);
        let callback_observed = Arc::clone(&observed);
        let pool = Arc::new(
            FrameBufferPool::new(
                "callback",
                2,
                Duration::from_millis(20),
                Box::new(move |index| {
                    let pool = callback_handle.get().and_then(Weak::upgrade).unwrap();
                    callback_observed
                        .lock()
                        .push((index, pool.slot_state(index).unwrap()));
                }),
            )
            .unwrap(),
        );
        handle.set(Arc::downgrade(&pool)).unwrap();

        // Occupy slot 1 so the released slot is the only selectable one.
        let first = pool.select().unwrap();
        pool.dispatch(first, meta(0)).unwrap();
        let acquired = pool.acquire_latest().unwrap().unwrap();
        let other = pool.select().unwrap();
        assert_ne!(other, acquired.index);

        pool.release(acquired.index).unwrap();
        assert_eq!(*observed.lock(), vec![(acquired.index, SlotState::Idle)]);

        pool.dispatch(other, meta(1)).unwrap();
        assert_eq!(pool.select().unwrap(), acquired.index);
    }

    #[test]
    fn test_release_callback_invoked_once_per_release() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let pool = FrameBufferPool::new(
            "count",
            2,
            Duration::from_millis(20),
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

        for id in 0..5 {
            let slot = pool.select().unwrap();
            pool.dispatch(slot, meta(id)).unwrap();
            let acquired = pool.acquire_latest().unwrap().unwrap();
            pool.release(acquired.index).unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(pool.stats().released, 5);
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let pool = pool(2);
        assert!(matches!(
            pool.dispatch(0, meta(0)),
            Err(PoolError::InvalidTransition { from: SlotState::Idle, .. })
        ));
        assert!(matches!(
            pool.release(1),
            Err(PoolError::InvalidTransition { from: SlotState::Idle, .. })
        ));
        assert!(matches!(
            pool.dispatch(9, meta(0)),
            Err(PoolError::InvalidSlot { index: 9, capacity: 2 })
        ));
    }

    #[test]
    fn test_select_times_out_when_consumer_holds_everything() {
        let pool = pool(2);
        let a = pool.select().unwrap();
        pool.dispatch(a, meta(0)).unwrap();
        pool.acquire_latest().unwrap().unwrap();
        let b = pool.select().unwrap();
        pool.dispatch(b, meta(1)).unwrap();

        // One slot Draining, one Ready: nothing Idle.
        assert!(matches!(pool.select(), Err(PoolError::Timeout(_))));
    }

    #[test]
    fn test_try_select_reclaims_stale_ready_slot() {
        let pool =
            FrameBufferPool::new("pair", 2, Duration::from_secs(5), Box::new(|_| {})).unwrap();
        let a = pool.try_select().unwrap();
        pool.dispatch(a, meta(0)).unwrap();
        let held = pool.acquire_latest().unwrap().unwrap();
        let b = pool.try_select().unwrap();
        pool.dispatch(b, meta(1)).unwrap();

        // One slot Draining, one Ready: the Ready one is taken back at once.
        let start = Instant::now();
        let c = pool.try_select().unwrap();
        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(c, b);
        assert_eq!(pool.slot_state(c).unwrap(), SlotState::Filling);
        assert_eq!(pool.slot_state(held.index).unwrap(), SlotState::Draining);
        assert!(pool.acquire_latest().unwrap().is_none());
        assert_eq!(pool.stats().skipped, 1);

        pool.dispatch(c, meta(2)).unwrap();
        pool.release(held.index).unwrap();
        assert_eq!(pool.acquire_latest().unwrap().unwrap().metadata.frame_id, 2);
        assert_eq!(pool.stats().skipped, 1);
    }

    #[test]
    fn test_try_select_exhausted_without_ready_slot() {
        let pool = pool(2);
        let a = pool.try_select().unwrap();
        pool.dispatch(a, meta(0)).unwrap();
        pool.acquire_latest().unwrap().unwrap();
        pool.try_select().unwrap();

        assert_eq!(pool.try_select(), Err(PoolError::Exhausted));
        pool.stop();
        assert_eq!(pool.try_select(), Err(PoolError::Stopped));
    }

    #[test]
    fn test_acquire_times_out_without_frames() {
        let pool = pool(2);
        let result = pool.acquire(Duration::from_millis(10));
        assert!(matches!(result, Err(PoolError::Timeout(_))));
    }

    #[test]
    fn test_stop_wakes_blocked_acquire() {
        let pool = Arc::new(pool(2));
        let waiter = Arc::clone(&pool);
        let handle = thread::spawn(move || {
            let start = Instant::now();
            let result = waiter.acquire(Duration::from_secs(5));
            (result, start.elapsed())
        });

        thread::sleep(Duration::from_millis(50));
        pool.stop();

        let (result, elapsed) = handle.join().unwrap();
        assert_eq!(result, Err(PoolError::Stopped));
        assert!(elapsed < Duration::from_secs(1), "woke after {elapsed:?}");
    }

    #[test]
    fn test_stop_wakes_blocked_select() {
        let pool = Arc::new(
            FrameBufferPool::new("slow", 2, Duration::from_secs(5), Box::new(|_| {})).unwrap(),
        );
        let a = pool.select().unwrap();
        pool.dispatch(a, meta(0)).unwrap();
        pool.acquire_latest().unwrap().unwrap();
        let b = pool.select().unwrap();
        pool.dispatch(b, meta(1)).unwrap();

        let producer = Arc::clone(&pool);
        let handle = thread::spawn(move || {
            let start = Instant::now();
            (producer.select(), start.elapsed())
        });

        thread::sleep(Duration::from_millis(50));
        pool.stop();

        let (result, elapsed) = handle.join().unwrap();
        assert_eq!(result, Err(PoolError::Stopped));
        assert!(elapsed < Duration::from_secs(1), "woke after {elapsed:?}");
    }

    #[test]
    fn test_operations_fail_after_stop() {
        let pool = pool(3);
        let slot = pool.select().unwrap();
        pool.stop();
        pool.stop();

        assert_eq!(pool.select(), Err(PoolError::Stopped));
        assert_eq!(pool.dispatch(slot, meta(0)), Err(PoolError::Stopped));
        assert_eq!(pool.acquire_latest(), Err(PoolError::Stopped));
        assert_eq!(pool.acquire(Duration::from_secs(5)), Err(PoolError::Stopped));
        assert!(pool.is_stopped());
    }

    #[test]
    fn test_release_allowed_after_stop() {
        let pool = pool(2);
        let slot = pool.select().unwrap();
        pool.dispatch(slot, meta(0)).unwrap();
        let acquired = pool.acquire_latest().unwrap().unwrap();
        pool.stop();

        pool.release(acquired.index).unwrap();
        assert_eq!(pool.slot_state(acquired.index).unwrap(), SlotState::Idle);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Produce,
        ProduceNow,
        Acquire,
        Release,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Produce),
            Just(Op::ProduceNow),
            Just(Op::Acquire),
            Just(Op::Release)
        ]
    }

    proptest! {
        #[test]
        fn prop_select_never_returns_ready_or_draining(
            capacity in 2usize..6,
            ops in proptest::collection::vec(op(), 1..200),
        ) {
            let pool = FrameBufferPool::new("prop", capacity, Duration::ZERO, Box::new(|_| {})).unwrap();
            let mut held: Option<usize> = None;
            let mut frame_id = 0;

            for op in ops {
                match op {
                    Op::Produce => {
                        let before: Vec<_> = (0..capacity)
                            .map(|i| pool.slot_state(i).unwrap())
                            .collect();
                        match pool.select() {
                            Ok(slot) => {
                                prop_assert_eq!(before[slot], SlotState::Idle);
                                pool.dispatch(slot, meta(frame_id)).unwrap();
                                frame_id += 1;
                            }
                            Err(PoolError::Timeout(_)) => {
                                prop_assert!(before.iter().all(|s| *s != SlotState::Idle));
                            }
                            Err(e) => prop_assert!(false, "unexpected error {e}"),
                        }
                    }
                    Op::ProduceNow => {
                        let before: Vec<_> = (0..capacity)
                            .map(|i| pool.slot_state(i).unwrap())
                            .collect();
                        let slot = pool.try_select().unwrap();
                        prop_assert_ne!(before[slot], SlotState::Draining);
                        if before[slot] == SlotState::Ready {
                            prop_assert!(before.iter().all(|s| *s != SlotState::Idle));
                        }
                        pool.dispatch(slot, meta(frame_id)).unwrap();
                        frame_id += 1;
                    }
                    Op::Acquire => {
                        if held.is_none() {
                            held = pool.acquire_latest().unwrap().map(|a| a.index);
                        }
                    }
                    Op::Release => {
                        if let Some(slot) = held.take() {
                            pool.release(slot).unwrap();
                        }
                    }
                }

                let ready = (0..capacity)
                    .filter(|&i| pool.slot_state(i).unwrap() == SlotState::Ready)
                    .count();
                prop_assert!(ready <= 1);
            }
        }
    }
}
