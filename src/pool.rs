//! Bounded object pool, the backpressure engine.
//!
//! In a pipeline it is useful to stop the first component racing ahead of
//! the components downstream of it. A bounded pool of reusable frames does
//! this without explicit flow-control messages: a producer draws every
//! output frame from a pool of capacity N, so once N frames are in flight
//! it cannot produce another until some consumer releases one.
//!
//! Release is tied to object lifetime. A pooled frame is handed out as a
//! [`Pooled`] handle and shared downstream as `Arc<Pooled>`; when the last
//! holder drops it, the pool synchronously constructs exactly one
//! replacement and delivers it through the pool's callback. Acquire and
//! release paths are serialized under one mutex, with no reliance on
//! garbage-collector timing.

use crate::error::{PipelineError, PipelineResult};
use crate::frame::Frame;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

type Factory = Box<dyn FnMut() -> PipelineResult<Frame> + Send>;
type Callback = Box<dyn Fn(Pooled) + Send + Sync>;

struct PoolState {
    factory: Factory,
    /// Objects currently constructed and not yet released.
    live: usize,
    /// Total factory invocations, for bookkeeping and tests.
    created: u64,
    /// Latched factory failure. Once set, replenishment stops for good.
    failed: Option<String>,
}

struct PoolShared {
    state: Mutex<PoolState>,
    callback: Callback,
}

impl PoolShared {
    /// Called when the last holder of a pooled frame drops it.
    fn release(self: &Arc<Self>) {
        let replacement = {
            let mut state = self
                .state
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            state.live -= 1;
            if state.failed.is_some() {
                return;
            }
            match (state.factory)() {
                Ok(frame) => {
                    state.live += 1;
                    state.created += 1;
                    frame
                }
                Err(err) => {
                    tracing::error!("pool factory failed, replenishment stopped: {err}");
                    state.failed = Some(err.to_string());
                    return;
                }
            }
        };
        // Deliver outside the lock: the callback may drop the handle (e.g.
        // its channel is gone), which re-enters release().
        (self.callback)(Pooled {
            frame: replacement,
            pool: Arc::downgrade(self),
        });
    }
}

/// Scoped handle to a pool-managed frame.
///
/// Dereferences to [`Frame`]. A producer mutates the frame while it holds
/// the handle exclusively, then wraps it in an `Arc` to fan it out; the
/// pool replenishes when the last reference is dropped, on every exit path.
pub struct Pooled {
    frame: Frame,
    pool: Weak<PoolShared>,
}

impl Pooled {
    /// A handle with no backing pool. Dropping it replenishes nothing.
    /// Used by sources that produce frames outside any pool, and by tests.
    pub fn detached(frame: Frame) -> Self {
        Self {
            frame,
            pool: Weak::new(),
        }
    }

    /// Disconnect this handle from its pool so dropping it does not
    /// trigger replenishment.
    pub fn detach(&mut self) {
        self.pool = Weak::new();
    }

    /// Consume the handle, sharing the frame with downstream consumers.
    pub fn share(self) -> SharedFrame {
        Arc::new(self)
    }
}

impl Deref for Pooled {
    type Target = Frame;

    fn deref(&self) -> &Frame {
        &self.frame
    }
}

impl DerefMut for Pooled {
    fn deref_mut(&mut self) -> &mut Frame {
        &mut self.frame
    }
}

impl Drop for Pooled {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            pool.release();
        }
    }
}

impl std::fmt::Debug for Pooled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pooled").field("frame", &self.frame).finish()
    }
}

/// A frame reference shared between a producer and its bound consumers.
/// Logically immutable once shared.
pub type SharedFrame = Arc<Pooled>;

/// Bounded set of reusable frames.
///
/// Constructed with a factory, a capacity, and a callback invoked exactly
/// once per constructed frame: the N eagerly created at construction and
/// each replacement built on release.
pub struct ObjectPool {
    shared: Arc<PoolShared>,
}

impl ObjectPool {
    pub fn new(
        factory: impl FnMut() -> PipelineResult<Frame> + Send + 'static,
        size: usize,
        callback: impl Fn(Pooled) + Send + Sync + 'static,
    ) -> PipelineResult<Self> {
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                factory: Box::new(factory),
                live: 0,
                created: 0,
                failed: None,
            }),
            callback: Box::new(callback),
        });
        for _ in 0..size {
            let frame = {
                let mut state = shared
                    .state
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                let frame = (state.factory)()?;
                state.live += 1;
                state.created += 1;
                frame
            };
            (shared.callback)(Pooled {
                frame,
                pool: Arc::downgrade(&shared),
            });
        }
        Ok(Self { shared })
    }

    /// Number of constructed, not-yet-released frames. Never exceeds the
    /// pool's capacity.
    pub fn live_count(&self) -> usize {
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .live
    }

    /// Total factory invocations so far.
    pub fn created_count(&self) -> u64 {
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .created
    }

    /// The latched factory failure, if replenishment has stopped.
    pub fn failure(&self) -> Option<PipelineError> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .failed
            .as_ref()
            .map(|msg| PipelineError::PoolFailure(msg.clone()))
    }
}

/// An [`ObjectPool`] whose callback feeds a channel, giving producers a
/// blocking [`acquire`](Self::acquire), the natural suspension point of a
/// component waiting for downstream consumers to catch up.
pub struct FramePool {
    pool: ObjectPool,
    rx: Receiver<Pooled>,
}

impl FramePool {
    pub fn new(
        factory: impl FnMut() -> PipelineResult<Frame> + Send + 'static,
        size: usize,
    ) -> PipelineResult<Self> {
        let (tx, rx) = unbounded();
        let pool = ObjectPool::new(factory, size, move |mut slot| {
            if let Err(err) = tx.send(slot_take(&mut slot)) {
                // Receiver is gone. The live handle rides inside the send
                // error; recover and detach it so its drop does not
                // replenish into a dead channel.
                err.into_inner().detach();
            }
        })?;
        Ok(Self { pool, rx })
    }

    /// Pool of default-constructed frames.
    pub fn with_capacity(size: usize) -> PipelineResult<Self> {
        Self::new(|| Ok(Frame::new()), size)
    }

    /// Block until a frame slot is available.
    ///
    /// There is deliberately no timeout for a producer stalled on a full
    /// pool; callers needing a bounded wait must arrange it externally.
    /// Returns the pool's latched error if the factory has failed.
    pub fn acquire(&self) -> PipelineResult<Pooled> {
        loop {
            match self.rx.recv_timeout(Duration::from_millis(50)) {
                Ok(slot) => return Ok(slot),
                Err(RecvTimeoutError::Timeout) => {
                    if let Some(err) = self.pool.failure() {
                        return Err(err);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return Err(PipelineError::ChannelRecv),
            }
        }
    }

    /// Take a frame slot if one is immediately available.
    pub fn try_acquire(&self) -> Option<Pooled> {
        self.rx.try_recv().ok()
    }

    pub fn live_count(&self) -> usize {
        self.pool.live_count()
    }

    pub fn created_count(&self) -> u64 {
        self.pool.created_count()
    }
}

/// Move the frame out of `slot` into a fresh handle, leaving `slot` inert.
///
/// `Pooled` implements `Drop`, so its frame cannot be moved out directly;
/// this swap keeps the release accounting attached to exactly one handle.
fn slot_take(slot: &mut Pooled) -> Pooled {
    let mut replacement = Pooled {
        frame: Frame::new(),
        pool: Weak::new(),
    };
    std::mem::swap(&mut replacement.frame, &mut slot.frame);
    std::mem::swap(&mut replacement.pool, &mut slot.pool);
    replacement
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_eager_construction_invokes_callback_n_times() {
        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = delivered.clone();
        let pool = ObjectPool::new(
            || Ok(Frame::new()),
            3,
            move |mut slot| {
                counter.fetch_add(1, Ordering::SeqCst);
                slot.detach();
            },
        )
        .unwrap();
        assert_eq!(delivered.load(Ordering::SeqCst), 3);
        assert_eq!(pool.created_count(), 3);
    }

    #[test]
    fn test_release_replenishes_exactly_once_each() {
        let pool = FramePool::with_capacity(2).unwrap();
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert!(pool.try_acquire().is_none());
        assert_eq!(pool.created_count(), 2);

        drop(a);
        drop(b);
        assert_eq!(pool.created_count(), 4);
        assert_eq!(pool.live_count(), 2);
        assert!(pool.try_acquire().is_some());
        assert!(pool.try_acquire().is_some());
        assert!(pool.try_acquire().is_none());
    }

    #[test]
    fn test_shared_frame_releases_on_last_reference() {
        let pool = FramePool::with_capacity(1).unwrap();
        let slot = pool.acquire().unwrap();
        let shared = slot.share();
        let sibling = shared.clone();

        drop(shared);
        // One reference still alive, so no replenishment yet.
        assert!(pool.try_acquire().is_none());
        assert_eq!(pool.live_count(), 1);

        drop(sibling);
        assert!(pool.try_acquire().is_some());
    }

    #[test]
    fn test_factory_failure_is_latched_and_surfaced() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let pool = FramePool::new(
            move || {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Ok(Frame::new())
                } else {
                    Err(PipelineError::PoolFailure("disk full".into()))
                }
            },
            2,
        )
        .unwrap();

        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        drop(a); // replenishment fails here, latching the error
        drop(b); // no retry

        assert!(matches!(pool.acquire(), Err(PipelineError::PoolFailure(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_detached_handle_does_not_replenish() {
        let pool = FramePool::with_capacity(1).unwrap();
        let mut slot = pool.acquire().unwrap();
        slot.detach();
        drop(slot);
        assert!(pool.try_acquire().is_none());
        assert_eq!(pool.created_count(), 1);
    }

    #[test]
    fn test_pool_drop_during_inflight_release() {
        // A slow factory so the pool can be torn down while a release is
        // mid-replenishment, as happens on normal pipeline shutdown.
        let pool = FramePool::new(
            || {
                std::thread::sleep(Duration::from_millis(100));
                Ok(Frame::new())
            },
            1,
        )
        .unwrap();
        let slot = pool.acquire().unwrap();
        let releaser = std::thread::spawn(move || drop(slot));
        // Let the release enter the factory, then drop the pool's receiver
        // while the replacement is still being built. The replacement must
        // be discarded without triggering another replenishment.
        std::thread::sleep(Duration::from_millis(30));
        drop(pool);
        releaser.join().unwrap();
    }

    proptest! {
        /// For any capacity and any acquire/release interleaving, the number
        /// of live frames never exceeds the capacity.
        #[test]
        fn prop_live_never_exceeds_capacity(
            capacity in 1usize..8,
            ops in proptest::collection::vec(any::<bool>(), 0..64),
        ) {
            let pool = FramePool::with_capacity(capacity).unwrap();
            let mut held: Vec<Pooled> = Vec::new();
            for acquire in ops {
                if acquire {
                    if let Some(slot) = pool.try_acquire() {
                        held.push(slot);
                    }
                } else if !held.is_empty() {
                    held.remove(0);
                }
                prop_assert!(pool.live_count() <= capacity);
            }
        }

        /// Releasing k previously-live frames causes exactly k replacement
        /// constructions.
        #[test]
        fn prop_release_k_replenishes_k(capacity in 1usize..6, k in 0usize..6) {
            let k = k.min(capacity);
            let pool = FramePool::with_capacity(capacity).unwrap();
            let mut held = Vec::new();
            for _ in 0..capacity {
                held.push(pool.acquire().unwrap());
            }
            for _ in 0..k {
                held.pop();
            }
            prop_assert_eq!(pool.created_count(), (capacity + k) as u64);
            prop_assert_eq!(pool.live_count(), capacity);
        }
    }
}
