//! Buffer pool
//!
//! A fixed array of sample buffers, each behind its own mutex so the
//! producer and consumer can work on different slots concurrently. The
//! `filled` flag plus the mutex enforce the single-writer invariant: the
//! producer only writes a slot it holds unfilled, the consumer only reads
//! a slot it holds filled.

use parking_lot::Mutex;

use crate::source::SongPosition;
use crate::{Result, UniModError};

/// One ring buffer and its bookkeeping, guarded by the slot mutex.
#[derive(Debug)]
pub(crate) struct SlotBuf {
    /// Whether the slot holds unconsumed audio
    pub filled: bool,
    /// Logical song position of the slot's content
    pub position: SongPosition,
    /// Interleaved sample data (chunk frames x channels)
    pub data: Box<[f32]>,
}

/// The fixed pool of slots.
pub(crate) struct BufferPool {
    slots: Box<[Mutex<SlotBuf>]>,
}

impl BufferPool {
    /// Allocate `pool_size` buffers of `samples` interleaved samples each.
    ///
    /// Sizes come from caller configuration, but the total allocation can
    /// still be large; failure surfaces as an allocation error instead of
    /// aborting.
    pub fn allocate(pool_size: usize, samples: usize) -> Result<Self> {
        if pool_size == 0 || samples == 0 {
            return Err(UniModError::Config(format!(
                "ring pool needs at least one buffer of one sample ({pool_size} x {samples})"
            )));
        }
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(pool_size)
            .map_err(|_| UniModError::Allocation(format!("ring pool of {pool_size} slots")))?;
        for _ in 0..pool_size {
            let mut data = Vec::new();
            data.try_reserve_exact(samples).map_err(|_| {
                UniModError::Allocation(format!("ring buffer of {samples} samples"))
            })?;
            data.resize(samples, 0.0f32);
            slots.push(Mutex::new(SlotBuf {
                filled: false,
                position: SongPosition::default(),
                data: data.into_boxed_slice(),
            }));
        }
        Ok(BufferPool {
            slots: slots.into_boxed_slice(),
        })
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Access a slot's mutex.
    pub fn slot(&self, index: usize) -> &Mutex<SlotBuf> {
        &self.slots[index]
    }
}
