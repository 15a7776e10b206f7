// src/ring.rs
//! Lock-free single-producer / single-consumer frame ring between the CAN
//! RX interrupt (producer) and the telemetry worker (consumer).
//!
//! Head and tail are free-running counters masked by `capacity - 1`, so the
//! ring holds exactly `RX_RING_DEPTH` frames. The producer publishes a slot
//! with a release store of `head`; the consumer pairs it with an acquire
//! load before reading the slot, so slot contents are fully visible.
//!
//! Overflow policy is drop-oldest: telemetry freshness beats completeness
//! and the ISR must never block. Only the producer may advance `tail`, and
//! only on a full ring; the consumer tolerates `tail` moving between its
//! own reads. This matches a single-core part where the ISR preempts the
//! worker and is never itself preempted.

use crate::config::RX_RING_DEPTH;
use crate::frame::CanFrame;
use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicUsize, Ordering};

const _: () = assert!(RX_RING_DEPTH.is_power_of_two());
const MASK: usize = RX_RING_DEPTH - 1;

pub struct RxRing {
    slots: [UnsafeCell<CanFrame>; RX_RING_DEPTH],
    /// Producer-owned; next slot to write.
    head: AtomicUsize,
    /// Consumer-owned; next slot to read. The ISR advances it only on a
    /// full ring (drop-oldest).
    tail: AtomicUsize,
    dropped: AtomicUsize,
}

// Slots are only written by the producer before the release publish and
// only read by the consumer after the acquire observe.
unsafe impl Sync for RxRing {}

impl RxRing {
    pub fn new() -> Self {
        const EMPTY: UnsafeCell<CanFrame> = UnsafeCell::new(CanFrame::EMPTY);
        Self {
            slots: [EMPTY; RX_RING_DEPTH],
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            dropped: AtomicUsize::new(0),
        }
    }

    /// Push a frame from ISR context. Evicts the oldest frame when full.
    pub fn push(&self, frame: CanFrame) {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);

        if head.wrapping_sub(tail) == RX_RING_DEPTH {
            // Full: drop the oldest so the new frame always fits.
            self.tail.store(tail.wrapping_add(1), Ordering::Release);
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }

        unsafe {
            *self.slots[head & MASK].get() = frame;
        }
        // Publish the slot before moving head (release pairs with the
        // consumer's acquire load).
        self.head.store(head.wrapping_add(1), Ordering::Release);
    }

    /// Pop a frame in worker context. Returns `None` when empty.
    pub fn pop(&self) -> Option<CanFrame> {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);

        if head == tail {
            return None;
        }

        let frame = unsafe { *self.slots[tail & MASK].get() };
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        Some(frame)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.head
            .load(Ordering::Acquire)
            .wrapping_sub(self.tail.load(Ordering::Relaxed))
    }

    /// Frames evicted by overflow since construction.
    #[inline]
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for RxRing {
    fn default() -> Self {
        Self::new()
    }
}
