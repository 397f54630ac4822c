//! Chunk queue between the capture thread and the processing thread
//!
//! Single-producer / single-consumer queue of fixed-size audio chunks. The
//! backing store is a lock-free ring buffer (`ringbuf`) split into producer
//! and consumer halves at construction; each half sits behind its own
//! short-lived mutex because push/pop need `&mut`, while all coordination
//! state (occupancy, counters, watermark flag) is atomic.
//!
//! Overflow policy is fail-don't-overwrite: a full queue rejects the chunk
//! and bumps the overrun counter, and the producer decides whether to drop,
//! wait on [`ChunkQueue::wait_for_space`], or slow its source. Suspension
//! only ever happens inside the `wait_for_*` calls, never in
//! enqueue/dequeue.

use crate::audio::types::{AudioChunk, CHUNK_MAX};
use crate::error::ChunkQueueError;
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;
use tracing::trace;

/// Configuration for the chunk queue.
#[derive(Debug, Clone)]
pub struct ChunkQueueConfig {
    /// Slot count; must be a power of two, at least 2.
    pub capacity: usize,

    /// Whether `wait_for_*` calls are armed; when false they return
    /// immediately with the current state.
    pub enable_backpressure: bool,

    /// Default timeout for `wait_for_*` when the caller passes `None`.
    pub backpressure_timeout: Duration,

    /// Occupancy at which the producer-pause flag raises.
    pub high_water: usize,

    /// Occupancy at which the producer-pause flag clears.
    pub low_water: usize,
}

impl Default for ChunkQueueConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            enable_backpressure: true,
            backpressure_timeout: Duration::from_millis(100),
            high_water: 192,
            low_water: 64,
        }
    }
}

impl ChunkQueueConfig {
    fn validate(&self) -> Result<(), ChunkQueueError> {
        if self.capacity < 2 || !self.capacity.is_power_of_two() {
            return Err(ChunkQueueError::InvalidConfiguration(
                "capacity must be a power of two >= 2",
            ));
        }
        if self.high_water > self.capacity || self.low_water > self.high_water {
            return Err(ChunkQueueError::InvalidConfiguration(
                "watermarks must satisfy low <= high <= capacity",
            ));
        }
        Ok(())
    }
}

/// Queue statistics snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkQueueStats {
    /// Chunks accepted by `try_enqueue` since construction.
    pub total_enqueued: u64,

    /// Chunks handed out by `try_dequeue` since construction.
    pub total_dequeued: u64,

    /// Enqueue attempts rejected because the queue was full.
    pub overruns: u64,

    /// Dequeue attempts rejected because the queue was empty.
    pub underruns: u64,

    /// Worst observed enqueue-to-dequeue latency, in nanoseconds.
    pub peak_latency_ns: u64,
}

/// SPSC chunk queue with backpressure support.
pub struct ChunkQueue {
    prod: Mutex<HeapProd<AudioChunk>>,
    cons: Mutex<HeapCons<AudioChunk>>,

    capacity: usize,
    high_water: usize,
    low_water: usize,
    backpressure: bool,
    default_timeout: Duration,

    /// Current slot occupancy. With one producer and one consumer the
    /// counter is exact at each side's own operations and at worst one step
    /// stale at the other side, which the ring buffer itself tolerates.
    occupancy: AtomicUsize,

    /// Producer-pause flag driven by the watermarks.
    producer_should_pause: AtomicBool,

    /// Monotonic sequence number stamped onto chunks.
    next_frame_index: AtomicU64,

    total_enqueued: AtomicU64,
    total_dequeued: AtomicU64,
    overruns: AtomicU64,
    underruns: AtomicU64,
    peak_latency_ns: AtomicU64,

    wait_lock: Mutex<()>,
    space_cv: Condvar,
    data_cv: Condvar,
}

impl ChunkQueue {
    /// Create a queue from validated configuration.
    pub fn new(config: ChunkQueueConfig) -> Result<Self, ChunkQueueError> {
        config.validate()?;

        let rb = HeapRb::<AudioChunk>::new(config.capacity);
        let (prod, cons) = rb.split();

        Ok(Self {
            prod: Mutex::new(prod),
            cons: Mutex::new(cons),
            capacity: config.capacity,
            high_water: config.high_water,
            low_water: config.low_water,
            backpressure: config.enable_backpressure,
            default_timeout: config.backpressure_timeout,
            occupancy: AtomicUsize::new(0),
            producer_should_pause: AtomicBool::new(false),
            next_frame_index: AtomicU64::new(0),
            total_enqueued: AtomicU64::new(0),
            total_dequeued: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
            underruns: AtomicU64::new(0),
            peak_latency_ns: AtomicU64::new(0),
            wait_lock: Mutex::new(()),
            space_cv: Condvar::new(),
            data_cv: Condvar::new(),
        })
    }

    /// Copy up to `CHUNK_MAX` samples into the next free slot.
    ///
    /// The slot is stamped with a monotonic frame index, its enqueue
    /// timestamp, short-term RMS energy, and the coarse voiced flag.
    ///
    /// Fails with `InvalidSize` for oversized input and `BufferFull` (plus
    /// an overrun count) when every slot is occupied. Never blocks.
    pub fn try_enqueue(&self, samples: &[f32]) -> Result<(), ChunkQueueError> {
        if samples.len() > CHUNK_MAX {
            return Err(ChunkQueueError::InvalidSize {
                got: samples.len(),
                max: CHUNK_MAX,
            });
        }

        let frame_index = self.next_frame_index.load(Ordering::Relaxed);
        let chunk = AudioChunk::from_samples(samples, frame_index);

        let mut prod = self.prod.lock().unwrap();
        if prod.try_push(chunk).is_err() {
            drop(prod);
            self.overruns.fetch_add(1, Ordering::Relaxed);
            return Err(ChunkQueueError::BufferFull {
                capacity: self.capacity,
            });
        }
        drop(prod);

        self.next_frame_index.fetch_add(1, Ordering::Relaxed);
        self.total_enqueued.fetch_add(1, Ordering::Relaxed);
        let occupied = self.occupancy.fetch_add(1, Ordering::Release) + 1;

        if occupied >= self.high_water && !self.producer_should_pause.load(Ordering::Relaxed) {
            self.producer_should_pause.store(true, Ordering::Release);
            trace!(occupied, capacity = self.capacity, "chunk queue above high water");
        }

        if self.backpressure {
            self.data_cv.notify_one();
        }
        Ok(())
    }

    /// Move the oldest chunk out of the queue.
    ///
    /// Fails with `BufferEmpty` (plus an underrun count) when the queue has
    /// nothing buffered. Never blocks.
    pub fn try_dequeue(&self) -> Result<AudioChunk, ChunkQueueError> {
        let mut cons = self.cons.lock().unwrap();
        let chunk = match cons.try_pop() {
            Some(chunk) => chunk,
            None => {
                drop(cons);
                self.underruns.fetch_add(1, Ordering::Relaxed);
                return Err(ChunkQueueError::BufferEmpty);
            }
        };
        drop(cons);

        self.total_dequeued.fetch_add(1, Ordering::Relaxed);
        let occupied = self
            .occupancy
            .fetch_sub(1, Ordering::Release)
            .saturating_sub(1);

        let latency_ns = chunk.enqueued_at.elapsed().as_nanos() as u64;
        self.peak_latency_ns.fetch_max(latency_ns, Ordering::Relaxed);

        if occupied <= self.low_water && self.producer_should_pause.load(Ordering::Relaxed) {
            self.producer_should_pause.store(false, Ordering::Release);
            trace!(occupied, "chunk queue below low water");
        }

        if self.backpressure {
            self.space_cv.notify_one();
        }
        Ok(chunk)
    }

    /// Block until at least one slot is free, or the timeout expires.
    ///
    /// Returns true when space is available. With backpressure disabled the
    /// call returns the current state immediately.
    pub fn wait_for_space(&self, timeout: Option<Duration>) -> bool {
        if !self.backpressure {
            return !self.is_full();
        }

        let deadline = timeout.unwrap_or(self.default_timeout);
        let mut guard = self.wait_lock.lock().unwrap();
        let start = std::time::Instant::now();

        while self.is_full() {
            let remaining = match deadline.checked_sub(start.elapsed()) {
                Some(d) if !d.is_zero() => d,
                _ => return false,
            };
            let (g, wait) = self.space_cv.wait_timeout(guard, remaining).unwrap();
            guard = g;
            if wait.timed_out() && self.is_full() {
                return false;
            }
        }
        true
    }

    /// Block until at least one chunk is buffered, or the timeout expires.
    ///
    /// Returns true when data is available. With backpressure disabled the
    /// call returns the current state immediately.
    pub fn wait_for_data(&self, timeout: Option<Duration>) -> bool {
        if !self.backpressure {
            return !self.is_empty();
        }

        let deadline = timeout.unwrap_or(self.default_timeout);
        let mut guard = self.wait_lock.lock().unwrap();
        let start = std::time::Instant::now();

        while self.is_empty() {
            let remaining = match deadline.checked_sub(start.elapsed()) {
                Some(d) if !d.is_zero() => d,
                _ => return false,
            };
            let (g, wait) = self.data_cv.wait_timeout(guard, remaining).unwrap();
            guard = g;
            if wait.timed_out() && self.is_empty() {
                return false;
            }
        }
        true
    }

    /// Current occupancy in chunks.
    pub fn occupancy(&self) -> usize {
        self.occupancy.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.occupancy() == 0
    }

    pub fn is_full(&self) -> bool {
        self.occupancy() >= self.capacity
    }

    /// Watermark-driven pause hint for the producer.
    pub fn producer_should_pause(&self) -> bool {
        self.producer_should_pause.load(Ordering::Acquire)
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> ChunkQueueStats {
        ChunkQueueStats {
            total_enqueued: self.total_enqueued.load(Ordering::Relaxed),
            total_dequeued: self.total_dequeued.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            peak_latency_ns: self.peak_latency_ns.load(Ordering::Relaxed),
        }
    }

    /// Drain all buffered chunks, leaving counters intact.
    ///
    /// Used during session teardown; pending chunks are discarded.
    pub fn drain(&self) -> usize {
        let mut cons = self.cons.lock().unwrap();
        let mut drained = 0;
        while cons.try_pop().is_some() {
            drained += 1;
        }
        drop(cons);

        if drained > 0 {
            self.occupancy.fetch_sub(drained, Ordering::Release);
            self.producer_should_pause.store(false, Ordering::Release);
            if self.backpressure {
                self.space_cv.notify_all();
            }
        }
        drained
    }
}

impl std::fmt::Debug for ChunkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkQueue")
            .field("capacity", &self.capacity)
            .field("occupancy", &self.occupancy())
            .field("producer_should_pause", &self.producer_should_pause())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_queue(capacity: usize) -> ChunkQueue {
        ChunkQueue::new(ChunkQueueConfig {
            capacity,
            high_water: capacity * 3 / 4,
            low_water: capacity / 4,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn capacity_must_be_power_of_two() {
        let bad = ChunkQueue::new(ChunkQueueConfig {
            capacity: 100,
            high_water: 50,
            low_water: 10,
            ..Default::default()
        });
        assert!(matches!(
            bad,
            Err(ChunkQueueError::InvalidConfiguration(_))
        ));

        let too_small = ChunkQueue::new(ChunkQueueConfig {
            capacity: 1,
            high_water: 1,
            low_water: 0,
            ..Default::default()
        });
        assert!(too_small.is_err());
    }

    #[test]
    fn fifo_order_by_frame_index() {
        let queue = small_queue(8);

        for i in 0..5 {
            let samples = vec![i as f32 / 10.0; 64];
            queue.try_enqueue(&samples).unwrap();
        }

        for expected in 0..5u64 {
            let chunk = queue.try_dequeue().unwrap();
            assert_eq!(chunk.frame_index, expected);
        }
    }

    #[test]
    fn full_queue_rejects_and_counts_overrun() {
        let queue = small_queue(4);
        let samples = vec![0.1f32; 32];

        for _ in 0..4 {
            queue.try_enqueue(&samples).unwrap();
        }

        let err = queue.try_enqueue(&samples).unwrap_err();
        assert_eq!(err, ChunkQueueError::BufferFull { capacity: 4 });

        let stats = queue.stats();
        assert_eq!(stats.total_enqueued, 4);
        assert_eq!(stats.overruns, 1);
        assert_eq!(queue.occupancy(), 4);
    }

    #[test]
    fn empty_queue_rejects_and_counts_underrun() {
        let queue = small_queue(4);
        assert_eq!(queue.try_dequeue().unwrap_err(), ChunkQueueError::BufferEmpty);
        assert_eq!(queue.stats().underruns, 1);
    }

    #[test]
    fn oversized_chunk_is_rejected() {
        let queue = small_queue(4);
        let oversized = vec![0.0f32; CHUNK_MAX + 1];
        assert!(matches!(
            queue.try_enqueue(&oversized),
            Err(ChunkQueueError::InvalidSize { .. })
        ));
        // Rejection leaves the queue untouched.
        assert_eq!(queue.stats().total_enqueued, 0);
        assert_eq!(queue.occupancy(), 0);
    }

    #[test]
    fn occupancy_tracks_enqueued_minus_dequeued() {
        let queue = small_queue(16);
        let samples = vec![0.2f32; 16];

        for _ in 0..10 {
            queue.try_enqueue(&samples).unwrap();
        }
        for _ in 0..4 {
            queue.try_dequeue().unwrap();
        }

        let stats = queue.stats();
        assert_eq!(
            stats.total_enqueued - stats.total_dequeued,
            queue.occupancy() as u64
        );
        assert!(queue.occupancy() <= queue.capacity());
    }

    #[test]
    fn watermark_flag_raises_and_clears() {
        let queue = ChunkQueue::new(ChunkQueueConfig {
            capacity: 8,
            high_water: 6,
            low_water: 2,
            ..Default::default()
        })
        .unwrap();
        let samples = vec![0.1f32; 8];

        for _ in 0..5 {
            queue.try_enqueue(&samples).unwrap();
        }
        assert!(!queue.producer_should_pause());

        queue.try_enqueue(&samples).unwrap();
        assert!(queue.producer_should_pause());

        for _ in 0..4 {
            queue.try_dequeue().unwrap();
        }
        assert!(!queue.producer_should_pause());
    }

    #[test]
    fn wait_for_data_times_out_on_empty_queue() {
        let queue = small_queue(4);
        let start = std::time::Instant::now();
        assert!(!queue.wait_for_data(Some(Duration::from_millis(20))));
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn wait_for_space_returns_after_consumer_drains() {
        use std::sync::Arc;

        let queue = Arc::new(small_queue(2));
        let samples = vec![0.1f32; 8];
        queue.try_enqueue(&samples).unwrap();
        queue.try_enqueue(&samples).unwrap();
        assert!(queue.is_full());

        let consumer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(10));
                queue.try_dequeue().unwrap();
            })
        };

        assert!(queue.wait_for_space(Some(Duration::from_millis(500))));
        consumer.join().unwrap();
    }

    #[test]
    fn drain_discards_pending_chunks() {
        let queue = small_queue(8);
        let samples = vec![0.3f32; 8];
        for _ in 0..5 {
            queue.try_enqueue(&samples).unwrap();
        }

        assert_eq!(queue.drain(), 5);
        assert!(queue.is_empty());
        // Counters survive a drain.
        assert_eq!(queue.stats().total_enqueued, 5);
    }

    #[test]
    fn spsc_stress_preserves_order_and_counts() {
        use std::sync::Arc;

        let queue = Arc::new(small_queue(64));
        let total = 2000u64;

        let producer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || {
                let samples = vec![0.25f32; 128];
                let mut sent = 0u64;
                while sent < total {
                    match queue.try_enqueue(&samples) {
                        Ok(()) => sent += 1,
                        Err(ChunkQueueError::BufferFull { .. }) => {
                            queue.wait_for_space(Some(Duration::from_millis(50)));
                        }
                        Err(e) => panic!("unexpected enqueue error: {e}"),
                    }
                }
            })
        };

        let mut last_index = None;
        let mut received = 0u64;
        while received < total {
            match queue.try_dequeue() {
                Ok(chunk) => {
                    if let Some(prev) = last_index {
                        assert_eq!(chunk.frame_index, prev + 1, "gap in dequeue order");
                    }
                    last_index = Some(chunk.frame_index);
                    received += 1;
                }
                Err(ChunkQueueError::BufferEmpty) => {
                    queue.wait_for_data(Some(Duration::from_millis(50)));
                }
                Err(e) => panic!("unexpected dequeue error: {e}"),
            }
        }

        producer.join().unwrap();
        let stats = queue.stats();
        assert_eq!(stats.total_enqueued, total);
        assert_eq!(stats.total_dequeued, total);
        assert_eq!(queue.occupancy(), 0);
    }
}
