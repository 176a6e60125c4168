//! Double buffer with alternating producer/consumer roles.
//!
//! Two preallocated instances trade places on every publish: the producer
//! fills the *ping* instance while the consumer reads the *pang* instance it was
//! last handed. Publishing is a role flip, never a copy.
//!
//! The handoff discipline is carried by the types:
//! - [`Producer`] is the only handle that can reach the ping instance, and it is
//!   unique.
//! - [`Delivery`] is the only handle that can reach the pang instance. At most one
//!   exists at a time; dropping it (or calling [`Delivery::ack`]) is the
//!   acknowledgment.
//! - [`Producer::publish`] refuses to flip roles while a delivery is outstanding,
//!   so the instance a consumer holds can never become the producer's target.

use std::cell::UnsafeCell;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::utils::CachePadded;

/// Owner of both instances for the lifetime of the pipeline
pub struct PingPangBuffer<T> {
    slots: [UnsafeCell<T>; 2],
    /// Index of the producer's current target.
    ping: AtomicUsize,
    /// `true` once the last delivery was released; starts idle.
    acknowledged: CachePadded<AtomicBool>,
}

// SAFETY: a slot is only ever reached through the unique `Producer` (as `&mut T`)
// or through the single outstanding `Delivery` (as `&T`), and those two never
// point at the same slot. Moving `&mut T` across threads needs `T: Send`;
// sharing `&T` needs `T: Sync`.
unsafe impl<T: Send> Send for PingPangBuffer<T> {}
unsafe impl<T: Send + Sync> Sync for PingPangBuffer<T> {}

impl<T> PingPangBuffer<T> {
    /// Take ownership of both instances and hand back the producer side.
    /// `a` is the first ping.
    pub fn new(a: T, b: T) -> Producer<T> {
        let shared = Arc::new(Self {
            slots: [UnsafeCell::new(a), UnsafeCell::new(b)],
            ping: AtomicUsize::new(0),
            acknowledged: CachePadded::new(AtomicBool::new(true)),
        });
        Producer { shared }
    }

    /// Whether the consumer has released the last published instance.
    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged.load(Ordering::Acquire)
    }

    /// Slot index currently assigned to the producer.
    pub fn ping_index(&self) -> usize {
        self.ping.load(Ordering::Acquire)
    }
}

impl<T> fmt::Debug for PingPangBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PingPangBuffer")
            .field("ping", &self.ping_index())
            .field("acknowledged", &self.is_acknowledged())
            .finish_non_exhaustive()
    }
}

/// Producer side: exclusive access to the ping instance
pub struct Producer<T> {
    shared: Arc<PingPangBuffer<T>>,
}

impl<T> Producer<T> {
    /// The instance to fill this cycle. Stable until the next successful publish.
    pub fn target(&mut self) -> &mut T {
        let ping = self.shared.ping.load(Ordering::Relaxed);
        // SAFETY: only this (unique) producer writes `ping`, and any live
        // `Delivery` points at the other slot. The `&mut self` borrow keeps a
        // publish from flipping roles while this reference is alive.
        unsafe { &mut *self.shared.slots[ping].get() }
    }

    /// `false` while a published instance is still held by the consumer.
    pub fn acknowledged(&self) -> bool {
        self.shared.is_acknowledged()
    }

    /// Flip roles and return the consumer's view of the instance just filled.
    ///
    /// Returns `None` without touching anything while the previous delivery is
    /// outstanding. Call only once every part of [`target`](Self::target) has
    /// been written for this cycle.
    pub fn publish(&mut self) -> Option<Delivery<T>> {
        // Acquire pairs with the release in `Delivery::drop`: the consumer's
        // reads of the old pang finish before we may overwrite it.
        if !self.shared.acknowledged.load(Ordering::Acquire) {
            return None;
        }
        self.shared.acknowledged.store(false, Ordering::Relaxed);
        let published = self.shared.ping.load(Ordering::Relaxed);
        self.shared.ping.store(published ^ 1, Ordering::Release);
        Some(Delivery {
            shared: Arc::clone(&self.shared),
            slot: published,
        })
    }

    pub fn buffer(&self) -> &PingPangBuffer<T> {
        &self.shared
    }
}

/// Consumer's read-only view of the most recently published instance.
///
/// Releasing it acknowledges the handoff and lets the producer publish again.
pub struct Delivery<T> {
    shared: Arc<PingPangBuffer<T>>,
    slot: usize,
}

impl<T> Delivery<T> {
    /// Explicit acknowledgment; equivalent to dropping the delivery.
    pub fn ack(self) {}

    /// The buffer this delivery was published from.
    pub fn buffer(&self) -> &PingPangBuffer<T> {
        &self.shared
    }

    /// Slot index of the pang instance.
    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl<T> Deref for Delivery<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the producer cannot flip roles until this delivery is dropped,
        // so `slot` stays the pang instance and is never written meanwhile.
        unsafe { &*self.shared.slots[self.slot].get() }
    }
}

impl<T> Drop for Delivery<T> {
    fn drop(&mut self) {
        self.shared.acknowledged.store(true, Ordering::Release);
    }
}

impl<T: fmt::Debug> fmt::Debug for Delivery<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("slot", &self.slot)
            .field("package", &**self)
            .finish()
    }
}
