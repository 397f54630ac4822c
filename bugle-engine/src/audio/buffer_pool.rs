//! Fixed pool of aligned audio buffers
//!
//! A bounded set of cache-aligned f32 buffers allocated once at
//! construction. `acquire` hands out an owning handle; dropping the handle
//! moves the buffer back into the pool, so double-release is impossible by
//! construction. When every buffer is out, acquisition blocks on a condvar
//! for at most the configured timeout and then reports `PoolExhausted`.

use crate::error::BufferPoolError;
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use tracing::debug;

/// Configuration for the pool.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of buffers in the pool.
    pub pool_size: usize,

    /// Size of each buffer in bytes; rounded down to whole f32 samples.
    pub buffer_size_bytes: usize,

    /// Allocation alignment; power of two, at least one sample wide.
    pub alignment: usize,

    /// Default timeout for [`AudioBufferPool::acquire`].
    pub acquire_timeout: Duration,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 32,
            buffer_size_bytes: 4096,
            alignment: 64,
            acquire_timeout: Duration::from_millis(100),
        }
    }
}

impl BufferPoolConfig {
    fn validate(&self) -> Result<usize, BufferPoolError> {
        if self.pool_size == 0 {
            return Err(BufferPoolError::InvalidConfiguration("pool_size must be positive"));
        }
        let samples = self.buffer_size_bytes / std::mem::size_of::<f32>();
        if samples == 0 {
            return Err(BufferPoolError::InvalidConfiguration(
                "buffer_size_bytes must hold at least one sample",
            ));
        }
        if !self.alignment.is_power_of_two() || self.alignment < std::mem::size_of::<f32>() {
            return Err(BufferPoolError::InvalidAlignment(self.alignment));
        }
        Ok(samples)
    }
}

/// Pool statistics snapshot.
#[derive(Debug, Clone, Copy)]
pub struct BufferPoolStats {
    pub total_buffers: usize,
    pub available_buffers: usize,
    pub peak_usage: usize,
    pub total_acquisitions: u64,
    pub failed_acquisitions: u64,
}

/// One aligned, fixed-size f32 buffer. Owned either by the pool's free
/// list or by exactly one handle.
struct AlignedBuffer {
    ptr: NonNull<f32>,
    samples: usize,
    layout: Layout,
}

// Exclusive ownership moves between the pool and a single handle; the raw
// pointer is never shared.
unsafe impl Send for AlignedBuffer {}

impl AlignedBuffer {
    fn allocate(samples: usize, alignment: usize) -> Result<Self, BufferPoolError> {
        let bytes = samples * std::mem::size_of::<f32>();
        let layout = Layout::from_size_align(bytes, alignment)
            .map_err(|_| BufferPoolError::InvalidAlignment(alignment))?;

        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw as *mut f32).ok_or(BufferPoolError::AllocationFailed)?;

        Ok(Self { ptr, samples, layout })
    }

    fn as_slice(&self) -> &[f32] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.samples) }
    }

    fn as_mut_slice(&mut self) -> &mut [f32] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.samples) }
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr.as_ptr() as *mut u8, self.layout) };
    }
}

struct PoolShared {
    free: Mutex<Vec<AlignedBuffer>>,
    available_cv: Condvar,
    pool_size: usize,
    in_use: AtomicUsize,
    peak_usage: AtomicUsize,
    total_acquisitions: AtomicU64,
    failed_acquisitions: AtomicU64,
}

/// Fixed pool of aligned audio buffers.
pub struct AudioBufferPool {
    shared: Arc<PoolShared>,
    default_timeout: Duration,
    buffer_samples: usize,
}

impl AudioBufferPool {
    pub fn new(config: BufferPoolConfig) -> Result<Self, BufferPoolError> {
        let samples = config.validate()?;

        let mut free = Vec::with_capacity(config.pool_size);
        for _ in 0..config.pool_size {
            free.push(AlignedBuffer::allocate(samples, config.alignment)?);
        }

        debug!(
            pool_size = config.pool_size,
            samples_per_buffer = samples,
            alignment = config.alignment,
            "audio buffer pool allocated"
        );

        Ok(Self {
            shared: Arc::new(PoolShared {
                free: Mutex::new(free),
                available_cv: Condvar::new(),
                pool_size: config.pool_size,
                in_use: AtomicUsize::new(0),
                peak_usage: AtomicUsize::new(0),
                total_acquisitions: AtomicU64::new(0),
                failed_acquisitions: AtomicU64::new(0),
            }),
            default_timeout: config.acquire_timeout,
            buffer_samples: samples,
        })
    }

    /// Acquire a buffer, waiting up to the configured default timeout.
    pub fn acquire(&self) -> Result<PooledBuffer, BufferPoolError> {
        self.try_acquire_for(self.default_timeout)
    }

    /// Acquire a buffer, waiting up to `timeout`.
    pub fn try_acquire_for(&self, timeout: Duration) -> Result<PooledBuffer, BufferPoolError> {
        let mut free = self.shared.free.lock().unwrap();
        let deadline = std::time::Instant::now() + timeout;

        while free.is_empty() {
            let remaining = match deadline.checked_duration_since(std::time::Instant::now()) {
                Some(d) if !d.is_zero() => d,
                _ => {
                    self.shared.failed_acquisitions.fetch_add(1, Ordering::Relaxed);
                    return Err(BufferPoolError::PoolExhausted {
                        pool_size: self.shared.pool_size,
                    });
                }
            };
            let (guard, wait) = self
                .shared
                .available_cv
                .wait_timeout(free, remaining)
                .unwrap();
            free = guard;
            if wait.timed_out() && free.is_empty() {
                self.shared.failed_acquisitions.fetch_add(1, Ordering::Relaxed);
                return Err(BufferPoolError::PoolExhausted {
                    pool_size: self.shared.pool_size,
                });
            }
        }

        let buffer = free.pop().expect("checked non-empty under lock");
        drop(free);

        self.shared.total_acquisitions.fetch_add(1, Ordering::Relaxed);
        let in_use = self.shared.in_use.fetch_add(1, Ordering::Relaxed) + 1;
        self.shared.peak_usage.fetch_max(in_use, Ordering::Relaxed);

        Ok(PooledBuffer {
            buffer: Some(buffer),
            shared: Arc::clone(&self.shared),
        })
    }

    /// Samples per buffer.
    pub fn buffer_samples(&self) -> usize {
        self.buffer_samples
    }

    /// Currently available buffers.
    pub fn available(&self) -> usize {
        self.shared.free.lock().unwrap().len()
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> BufferPoolStats {
        BufferPoolStats {
            total_buffers: self.shared.pool_size,
            available_buffers: self.available(),
            peak_usage: self.shared.peak_usage.load(Ordering::Relaxed),
            total_acquisitions: self.shared.total_acquisitions.load(Ordering::Relaxed),
            failed_acquisitions: self.shared.failed_acquisitions.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for AudioBufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioBufferPool")
            .field("pool_size", &self.shared.pool_size)
            .field("buffer_samples", &self.buffer_samples)
            .field("available", &self.available())
            .finish()
    }
}

/// Owning handle to one pooled buffer. Returns the buffer to the pool on
/// drop.
pub struct PooledBuffer {
    buffer: Option<AlignedBuffer>,
    shared: Arc<PoolShared>,
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer").finish_non_exhaustive()
    }
}

impl PooledBuffer {
    /// Buffer length in samples.
    pub fn len(&self) -> usize {
        self.buffer.as_ref().map_or(0, |b| b.samples)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Deref for PooledBuffer {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        self.buffer
            .as_ref()
            .map(|b| b.as_slice())
            .unwrap_or(&[])
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [f32] {
        self.buffer
            .as_mut()
            .map(|b| b.as_mut_slice())
            .unwrap_or(&mut [])
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            let mut free = self.shared.free.lock().unwrap();
            free.push(buffer);
            drop(free);
            self.shared.in_use.fetch_sub(1, Ordering::Relaxed);
            self.shared.available_cv.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(pool_size: usize) -> AudioBufferPool {
        AudioBufferPool::new(BufferPoolConfig {
            pool_size,
            buffer_size_bytes: 1024,
            alignment: 64,
            acquire_timeout: Duration::from_millis(20),
        })
        .unwrap()
    }

    #[test]
    fn invalid_configs_are_rejected() {
        assert!(AudioBufferPool::new(BufferPoolConfig {
            pool_size: 0,
            ..Default::default()
        })
        .is_err());

        assert!(matches!(
            AudioBufferPool::new(BufferPoolConfig {
                alignment: 3,
                ..Default::default()
            }),
            Err(BufferPoolError::InvalidAlignment(3))
        ));

        assert!(AudioBufferPool::new(BufferPoolConfig {
            buffer_size_bytes: 2,
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn buffers_are_aligned_and_zeroed() {
        let p = pool(2);
        let buf = p.acquire().unwrap();
        assert_eq!(buf.as_ptr() as usize % 64, 0);
        assert_eq!(buf.len(), 256); // 1024 bytes / 4
        assert!(buf.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn handle_returns_buffer_on_drop() {
        let p = pool(1);
        {
            let mut buf = p.acquire().unwrap();
            buf[0] = 1.0;
            assert_eq!(p.available(), 0);
        }
        assert_eq!(p.available(), 1);

        // The same storage can be acquired again.
        let buf = p.acquire().unwrap();
        assert_eq!(buf.len(), 256);
    }

    #[test]
    fn exhausted_pool_times_out() {
        let p = pool(1);
        let _held = p.acquire().unwrap();

        let start = std::time::Instant::now();
        let err = p.try_acquire_for(Duration::from_millis(15)).unwrap_err();
        assert_eq!(err, BufferPoolError::PoolExhausted { pool_size: 1 });
        assert!(start.elapsed() >= Duration::from_millis(10));
        assert_eq!(p.stats().failed_acquisitions, 1);
    }

    #[test]
    fn waiting_acquire_succeeds_when_buffer_returns() {
        let p = Arc::new(pool(1));
        let held = p.acquire().unwrap();

        let waiter = {
            let p = Arc::clone(&p);
            std::thread::spawn(move || p.try_acquire_for(Duration::from_millis(500)))
        };

        std::thread::sleep(Duration::from_millis(10));
        drop(held);

        let acquired = waiter.join().unwrap();
        assert!(acquired.is_ok());
    }

    #[test]
    fn stats_track_usage() {
        let p = pool(4);
        let a = p.acquire().unwrap();
        let b = p.acquire().unwrap();
        let c = p.acquire().unwrap();
        drop(b);

        let stats = p.stats();
        assert_eq!(stats.total_buffers, 4);
        assert_eq!(stats.available_buffers, 2);
        assert_eq!(stats.peak_usage, 3);
        assert_eq!(stats.total_acquisitions, 3);
        assert_eq!(stats.failed_acquisitions, 0);

        drop(a);
        drop(c);
        assert_eq!(p.available(), 4);
    }

    #[test]
    fn concurrent_acquire_release_is_consistent() {
        let p = Arc::new(pool(4));
        let mut workers = Vec::new();

        for _ in 0..8 {
            let p = Arc::clone(&p);
            workers.push(std::thread::spawn(move || {
                for _ in 0..50 {
                    if let Ok(mut buf) = p.try_acquire_for(Duration::from_millis(100)) {
                        buf[0] += 1.0;
                    }
                }
            }));
        }
        for w in workers {
            w.join().unwrap();
        }

        assert_eq!(p.available(), 4);
        let stats = p.stats();
        assert!(stats.peak_usage <= 4);
    }
}
