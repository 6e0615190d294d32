//! Lock-free single-producer/single-consumer sample ring.
//!
//! Exactly one thread calls `write` (the capture callback); exactly one other
//! thread calls `read` (the sink worker). Both are wait-free and
//! allocation-free. Capacity must be a power of two so `& mask` replaces `%`.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

pub struct Ring {
    buffer: Box<[UnsafeCell<f32>]>,
    mask: usize,
    write_pos: AtomicUsize,
    read_pos: AtomicUsize,
    /// Count of samples dropped because the ring was full at write time.
    /// Diagnostic only — not exposed through the public engine API (open
    /// question 1: the spec requires the drop, not the diagnostic).
    overrun_count: AtomicUsize,
}

// SAFETY: `buffer` is only ever indexed by the single producer (write) or the
// single consumer (read) at disjoint positions, established by the
// write_pos/read_pos happens-before relationship below.
unsafe impl Sync for Ring {}

impl Ring {
    /// `capacity_pow2` is rounded up to the next power of two if it isn't one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.next_power_of_two().max(1);
        let mut buffer = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            buffer.push(UnsafeCell::new(0.0));
        }
        Self {
            buffer: buffer.into_boxed_slice(),
            mask: capacity - 1,
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
            overrun_count: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Producer-side: how many samples can currently be written without
    /// overrunning. Only meaningful when called from the producer thread.
    pub fn available_to_write(&self) -> usize {
        let w = self.write_pos.load(Ordering::Relaxed);
        let r = self.read_pos.load(Ordering::Acquire);
        self.capacity() - w.wrapping_sub(r)
    }

    /// Consumer-side: how many samples are available to read.
    pub fn available_to_read(&self) -> usize {
        let w = self.write_pos.load(Ordering::Acquire);
        let r = self.read_pos.load(Ordering::Relaxed);
        w.wrapping_sub(r)
    }

    pub fn overrun_count(&self) -> usize {
        self.overrun_count.load(Ordering::Relaxed)
    }

    /// Writes up to `src.len()` samples, dropping the excess silently if the
    /// ring is full. Returns the count actually written. Producer-only.
    pub fn write(&self, src: &[f32]) -> usize {
        let w = self.write_pos.load(Ordering::Relaxed);
        let r = self.read_pos.load(Ordering::Acquire);
        let available = self.capacity() - w.wrapping_sub(r);
        let n = src.len().min(available);

        for (i, &sample) in src.iter().take(n).enumerate() {
            let idx = (w.wrapping_add(i)) & self.mask;
            // SAFETY: only the producer writes to indices in [w, w+n), and the
            // consumer never reads past `read_pos`, which is always <= w - (capacity - available) <= w.
            unsafe { *self.buffer[idx].get() = sample };
        }

        if n < src.len() {
            self.overrun_count
                .fetch_add(src.len() - n, Ordering::Relaxed);
        }

        self.write_pos.store(w.wrapping_add(n), Ordering::Release);
        n
    }

    /// Reads up to `dst.len()` samples, returning what was available
    /// (possibly 0 on underrun). Consumer-only.
    pub fn read(&self, dst: &mut [f32]) -> usize {
        let r = self.read_pos.load(Ordering::Relaxed);
        let w = self.write_pos.load(Ordering::Acquire);
        let available = w.wrapping_sub(r);
        let n = dst.len().min(available);

        for (i, slot) in dst.iter_mut().take(n).enumerate() {
            let idx = (r.wrapping_add(i)) & self.mask;
            // SAFETY: symmetric with `write` — the consumer only reads indices
            // already released by the producer's Release store of write_pos.
            *slot = unsafe { *self.buffer[idx].get() };
        }

        self.read_pos.store(r.wrapping_add(n), Ordering::Release);
        n
    }
}
