//! Audio output & streaming
//!
//! Couples the ring scheduler's consumer side to a system audio device.
//! The device pulls batches through [`RingScheduler::consume`]
//! (never blocking); underruns come out as silence and playback recovers
//! on the next batch.
//!
//! [`RingScheduler::consume`]: crate::ring::RingScheduler::consume

mod audio_device;

pub use audio_device::AudioDevice;

use serde::{Deserialize, Serialize};

/// Default output sample rate in Hz.
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Samples the device source reads from the scheduler per batch.
pub const DEVICE_BATCH_SAMPLES: usize = 4096;

/// Audio output configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Output sample rate in Hz
    pub sample_rate: u32,
    /// Output channels (1 mono, 2 stereo)
    pub channels: u16,
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: 2,
        }
    }
}

impl StreamConfig {
    /// Stereo output at the given rate.
    pub fn stereo(sample_rate: u32) -> Self {
        StreamConfig {
            sample_rate,
            channels: 2,
        }
    }

    /// Mono output at the given rate.
    pub fn mono(sample_rate: u32) -> Self {
        StreamConfig {
            sample_rate,
            channels: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_config_presets() {
        assert_eq!(StreamConfig::default().channels, 2);
        assert_eq!(StreamConfig::mono(48_000).channels, 1);
        assert_eq!(StreamConfig::stereo(48_000).sample_rate, 48_000);
    }
}
