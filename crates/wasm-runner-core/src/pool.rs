//! Bounded pool of invocation slots.
//!
//! A [`SlotPool`] issues integer slot ids in `[0, capacity)`. Each issued id
//! is held by a [`SlotGuard`] and returns to the available set when the
//! guard is dropped, on every exit path. Capacity can grow up to
//! [`MAX_REPLICAS`] at runtime; shrinking is not supported.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use wasm_runner_common::{MAX_REPLICAS, RuntimeError, validate_replicas};

/// Concurrency controller for one function.
///
/// Cloning the pool is cheap; clones share the same slots.
#[derive(Clone)]
pub struct SlotPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    /// Capacity and free ids, always updated together.
    state: Mutex<PoolState>,

    /// One permit per id in `state.free`.
    permits: Arc<Semaphore>,
}

struct PoolState {
    capacity: u32,
    free: VecDeque<u16>,
}

impl SlotPool {
    /// Create a pool issuing ids `[0, capacity)`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Capacity`] if `capacity` is outside
    /// `[1, MAX_REPLICAS]`.
    pub fn new(capacity: u32) -> Result<Self, RuntimeError> {
        validate_replicas(capacity)?;

        let mut free = VecDeque::with_capacity(MAX_REPLICAS as usize);
        free.extend(slot_ids(0, capacity));

        Ok(Self {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState { capacity, free }),
                permits: Arc::new(Semaphore::new(capacity as usize)),
            }),
        })
    }

    /// Wait until a slot is available and take it.
    ///
    /// Waiters are served in FIFO order. Under saturation this waits
    /// indefinitely; backpressure is the caller's concern.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::PoolClosed`] if the pool is closed while waiting.
    pub async fn acquire(&self) -> Result<SlotGuard, RuntimeError> {
        loop {
            let permit = Arc::clone(&self.inner.permits)
                .acquire_owned()
                .await
                .map_err(|_| RuntimeError::PoolClosed)?;

            if let Some(guard) = self.take(permit) {
                return Ok(guard);
            }
        }
    }

    /// Take a slot if one is available right now.
    pub fn try_acquire(&self) -> Option<SlotGuard> {
        let permit = Arc::clone(&self.inner.permits).try_acquire_owned().ok()?;
        self.take(permit)
    }

    /// Pair `permit` with a free id. Without one the permit goes back.
    fn take(&self, permit: OwnedSemaphorePermit) -> Option<SlotGuard> {
        let Some(id) = self.inner.state.lock().free.pop_front() else {
            warn!("Slot permit issued without a free slot id");
            return None;
        };

        debug!(slot = id, "Slot acquired");
        Some(SlotGuard {
            id,
            pool: Arc::clone(&self.inner),
            _permit: permit,
        })
    }

    /// Current capacity.
    pub fn capacity(&self) -> u32 {
        self.inner.state.lock().capacity
    }

    /// Number of slots not currently issued.
    pub fn available(&self) -> usize {
        self.inner.state.lock().free.len()
    }

    /// Grow the pool to `capacity` slots.
    ///
    /// - `capacity` equal to the current capacity: no-op
    /// - larger, up to [`MAX_REPLICAS`]: ids `[current, capacity)` become available
    /// - larger than [`MAX_REPLICAS`]: [`RuntimeError::Capacity`], pool unchanged
    /// - smaller: no-op, in-flight slots are never retired
    pub fn grow_to(&self, capacity: u32) -> Result<(), RuntimeError> {
        let mut state = self.inner.state.lock();
        let current = state.capacity;

        if capacity <= current {
            if capacity < current {
                debug!(current, requested = capacity, "Shrinking slot pool is not supported");
            }
            return Ok(());
        }

        if capacity > MAX_REPLICAS {
            return Err(RuntimeError::Capacity {
                requested: capacity,
                max: MAX_REPLICAS,
            });
        }

        state.free.extend(slot_ids(current, capacity));
        state.capacity = capacity;
        // Permits are added while the lock is held so free ids and permits stay in step
        self.inner.permits.add_permits((capacity - current) as usize);

        info!(from = current, to = capacity, "Slot pool grown");
        Ok(())
    }

    /// Close the pool: pending and future [`acquire`](Self::acquire) calls fail.
    ///
    /// Slots already issued stay valid until their guards drop.
    pub fn close(&self) {
        self.inner.permits.close();
    }

    /// Check whether the pool has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.permits.is_closed()
    }
}

impl std::fmt::Debug for SlotPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("SlotPool")
            .field("capacity", &state.capacity)
            .field("available", &state.free.len())
            .finish()
    }
}

/// An issued slot id. Dropping the guard releases the slot.
pub struct SlotGuard {
    id: u16,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl SlotGuard {
    /// The issued slot id.
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Release the slot explicitly.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        // The id is back in the free list before the permit is returned
        self.pool.state.lock().free.push_back(self.id);
        debug!(slot = self.id, "Slot released");
    }
}

impl std::fmt::Debug for SlotGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotGuard").field("id", &self.id).finish()
    }
}

/// Ids in `[from, to)`; `to` never exceeds [`MAX_REPLICAS`], so every id fits `u16`.
fn slot_ids(from: u32, to: u32) -> impl Iterator<Item = u16> {
    (from..to).filter_map(|id| u16::try_from(id).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready_ok, task};

    #[test]
    fn test_new_rejects_invalid_capacity() {
        assert!(matches!(
            SlotPool::new(0),
            Err(RuntimeError::Capacity { requested: 0, .. })
        ));
        assert!(SlotPool::new(MAX_REPLICAS + 1).is_err());
        assert!(SlotPool::new(MAX_REPLICAS).is_ok());
    }

    #[test]
    fn test_capacity_acquires_never_block() {
        let pool = SlotPool::new(4).unwrap();

        let guards: Vec<_> = (0..4).map(|_| pool.try_acquire().unwrap()).collect();
        let mut ids: Vec<_> = guards.iter().map(SlotGuard::id).collect();
        ids.sort_unstable();

        assert_eq!(ids, vec![0, 1, 2, 3]);
        assert_eq!(pool.available(), 0);
        assert!(pool.try_acquire().is_none());
    }

    #[test]
    fn test_extra_acquire_waits_for_release() {
        let pool = SlotPool::new(2).unwrap();
        let first = pool.try_acquire().unwrap();
        let _second = pool.try_acquire().unwrap();

        let mut waiter = task::spawn(pool.acquire());
        assert_pending!(waiter.poll());

        first.release();
        assert!(waiter.is_woken());

        let guard = assert_ready_ok!(waiter.poll());
        assert_eq!(guard.id(), 0);
    }

    #[test]
    fn test_permit_without_free_id_is_returned() {
        let pool = SlotPool::new(1).unwrap();
        let lost = pool.inner.state.lock().free.pop_front();
        assert_eq!(lost, Some(0));

        assert!(pool.try_acquire().is_none());
        assert_eq!(pool.inner.permits.available_permits(), 1);

        pool.inner.state.lock().free.push_back(0);
        assert_eq!(pool.try_acquire().unwrap().id(), 0);
    }

    #[test]
    fn test_drop_returns_slot() {
        let pool = SlotPool::new(1).unwrap();
        {
            let guard = pool.try_acquire().unwrap();
            assert_eq!(guard.id(), 0);
            assert_eq!(pool.available(), 0);
        }

        assert_eq!(pool.available(), 1);
        assert!(pool.try_acquire().is_some());
    }

    #[test]
    fn test_grow_to_same_capacity_is_noop() {
        let pool = SlotPool::new(4).unwrap();
        pool.grow_to(4).unwrap();

        assert_eq!(pool.capacity(), 4);
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn test_grow_to_adds_new_ids() {
        let pool = SlotPool::new(2).unwrap();
        let _a = pool.try_acquire().unwrap();
        let _b = pool.try_acquire().unwrap();

        pool.grow_to(4).unwrap();

        assert_eq!(pool.capacity(), 4);
        let mut ids = vec![
            pool.try_acquire().unwrap().id(),
            pool.try_acquire().unwrap().id(),
        ];
        ids.sort_unstable();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn test_grow_wakes_waiter() {
        let pool = SlotPool::new(1).unwrap();
        let _held = pool.try_acquire().unwrap();

        let mut waiter = task::spawn(pool.acquire());
        assert_pending!(waiter.poll());

        pool.grow_to(2).unwrap();
        assert!(waiter.is_woken());
        assert_eq!(assert_ready_ok!(waiter.poll()).id(), 1);
    }

    #[test]
    fn test_grow_beyond_max_is_rejected() {
        let pool = SlotPool::new(4).unwrap();
        let result = pool.grow_to(MAX_REPLICAS + 1);

        assert!(matches!(result, Err(RuntimeError::Capacity { .. })));
        assert_eq!(pool.capacity(), 4);
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn test_shrink_is_ignored() {
        let pool = SlotPool::new(4).unwrap();
        pool.grow_to(2).unwrap();

        assert_eq!(pool.capacity(), 4);
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn test_grow_to_max() {
        let pool = SlotPool::new(1).unwrap();
        pool.grow_to(MAX_REPLICAS).unwrap();

        assert_eq!(pool.capacity(), MAX_REPLICAS);
        assert_eq!(pool.available(), MAX_REPLICAS as usize);
    }

    #[test]
    fn test_close_fails_waiters() {
        let pool = SlotPool::new(1).unwrap();
        let _held = pool.try_acquire().unwrap();

        let mut waiter = task::spawn(pool.acquire());
        assert_pending!(waiter.poll());

        pool.close();
        assert!(pool.is_closed());
        assert!(matches!(waiter.poll(), std::task::Poll::Ready(Err(RuntimeError::PoolClosed))));
    }
}
