//! Lock-free sample ring between the render thread and a monitor
//!
//! Single producer, single consumer. Samples are stored as `f32` bit patterns
//! in atomics, so both halves can live on different threads without `unsafe`.
//!
//! Performance characteristics:
//! - Wait-free push and pop
//! - Cache-padded positions, no false sharing between the two sides
//! - No allocations after construction

use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

struct Shared {
    buffer: Box<[AtomicU32]>,

    /// Total samples ever written; only the producer stores
    write_pos: CachePadded<AtomicUsize>,

    /// Total samples ever read; only the consumer stores
    read_pos: CachePadded<AtomicUsize>,

    /// Capacity is a power of two, so `pos & mask` is the slot
    mask: usize,
}

impl Shared {
    fn capacity(&self) -> usize {
        self.buffer.len()
    }

    fn len(&self) -> usize {
        let write_pos = self.write_pos.load(Ordering::Acquire);
        let read_pos = self.read_pos.load(Ordering::Acquire);
        write_pos.wrapping_sub(read_pos)
    }
}

/// Writing half, owned by the render thread
pub struct RingProducer {
    shared: Arc<Shared>,
}

/// Reading half, owned by the monitor
pub struct RingConsumer {
    shared: Arc<Shared>,
}

/// Create a ring holding at least `capacity` samples
///
/// Capacity is rounded up to the next power of two.
pub fn sample_ring(capacity: usize) -> (RingProducer, RingConsumer) {
    let capacity = capacity.max(1).next_power_of_two();
    let buffer: Box<[AtomicU32]> = (0..capacity).map(|_| AtomicU32::new(0)).collect();

    let shared = Arc::new(Shared {
        buffer,
        write_pos: CachePadded::new(AtomicUsize::new(0)),
        read_pos: CachePadded::new(AtomicUsize::new(0)),
        mask: capacity - 1,
    });

    (
        RingProducer {
            shared: Arc::clone(&shared),
        },
        RingConsumer { shared },
    )
}

impl RingProducer {
    /// Write as many samples as fit; returns the number written
    pub fn push(&mut self, samples: &[f32]) -> usize {
        let shared = &*self.shared;
        let write_pos = shared.write_pos.load(Ordering::Relaxed);
        let read_pos = shared.read_pos.load(Ordering::Acquire);

        let free = shared.capacity() - write_pos.wrapping_sub(read_pos);
        let count = samples.len().min(free);

        for (i, sample) in samples[..count].iter().enumerate() {
            let slot = write_pos.wrapping_add(i) & shared.mask;
            shared.buffer[slot].store(sample.to_bits(), Ordering::Relaxed);
        }

        // Release publishes the slot stores above
        shared.write_pos.store(write_pos.wrapping_add(count), Ordering::Release);
        count
    }

    pub fn free(&self) -> usize {
        self.shared.capacity() - self.shared.len()
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }
}

impl RingConsumer {
    /// Read up to `out.len()` samples; returns the number read
    pub fn pop(&mut self, out: &mut [f32]) -> usize {
        let shared = &*self.shared;
        let read_pos = shared.read_pos.load(Ordering::Relaxed);
        let write_pos = shared.write_pos.load(Ordering::Acquire);

        let count = out.len().min(write_pos.wrapping_sub(read_pos));

        for (i, sample) in out[..count].iter_mut().enumerate() {
            let slot = read_pos.wrapping_add(i) & shared.mask;
            *sample = f32::from_bits(shared.buffer[slot].load(Ordering::Relaxed));
        }

        shared.read_pos.store(read_pos.wrapping_add(count), Ordering::Release);
        count
    }

    pub fn len(&self) -> usize {
        self.shared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }
}
