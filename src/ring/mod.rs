//! Ring-buffered real-time mixing pipeline
//!
//! A background producer ("filler") thread pulls fixed-size chunks from a
//! [`ChunkSource`](crate::source::ChunkSource) and pre-fills a fixed pool
//! of buffers; the audio callback consumes buffers strictly in order
//! through [`RingScheduler::consume`], which never blocks. Position
//! changes are handled by a hold/invalidate handshake so no stale audio
//! from before a jump is ever played.
//!
//! For sinks that cannot afford a producer thread there is a single-buffer
//! direct mode in [`direct`].

pub mod direct;
mod pool;
mod scheduler;

pub use scheduler::RingScheduler;

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default number of buffers in the ring pool.
pub const DEFAULT_POOL_SIZE: usize = 16;

/// Default frames per ring buffer.
pub const DEFAULT_CHUNK_FRAMES: usize = 1024;

/// Default number of buffer-drain cycles position reports stay suppressed
/// after a jump. Purely a flicker-avoidance tunable.
pub const DEFAULT_REPORT_DEBOUNCE: u32 = 4;

/// Ring pipeline configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RingConfig {
    /// Buffers in the pool
    pub pool_size: usize,
    /// Frames per buffer
    pub chunk_frames: usize,
    /// Drain cycles to suppress position reports after a jump
    pub report_debounce: u32,
    /// Bound on the producer's wait for a buffer mutex; expiry is not an
    /// error, the producer just falls back to waiting for the consumer
    pub producer_lock_timeout: Duration,
}

impl Default for RingConfig {
    fn default() -> Self {
        RingConfig {
            pool_size: DEFAULT_POOL_SIZE,
            chunk_frames: DEFAULT_CHUNK_FRAMES,
            report_debounce: DEFAULT_REPORT_DEBOUNCE,
            producer_lock_timeout: Duration::from_secs(1),
        }
    }
}

impl RingConfig {
    /// Pipeline latency in milliseconds at the given sample rate, assuming
    /// a fully pre-filled pool.
    pub fn latency_ms(&self, sample_rate: u32) -> f32 {
        (self.pool_size * self.chunk_frames) as f32 * 1000.0 / sample_rate as f32
    }
}
