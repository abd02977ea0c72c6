//! Audio device integration using rodio
//!
//! Plays the ring scheduler's output on the system audio device. The
//! rodio source pulls batches from the scheduler's consumer; because the
//! consumer never blocks, a stalled producer degrades to silence instead
//! of stalling the device thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rodio::{OutputStream, Sink, Source};

use super::{StreamConfig, DEVICE_BATCH_SAMPLES};
use crate::ring::RingScheduler;
use crate::{Result, UniModError};

/// Audio source that reads from the ring scheduler
struct SchedulerSource {
    scheduler: Arc<RingScheduler>,
    sample_rate: u32,
    channels: u16,
    finished: Arc<AtomicBool>,
    /// Internal buffer for batch reads (reduces per-sample overhead)
    buffer: Vec<f32>,
    buffer_pos: usize,
}

impl SchedulerSource {
    fn new(
        scheduler: Arc<RingScheduler>,
        sample_rate: u32,
        channels: u16,
        finished: Arc<AtomicBool>,
    ) -> Self {
        SchedulerSource {
            scheduler,
            sample_rate,
            channels,
            finished,
            buffer: vec![0.0f32; DEVICE_BATCH_SAMPLES],
            buffer_pos: DEVICE_BATCH_SAMPLES, // force a batch read first
        }
    }
}

impl Source for SchedulerSource {
    fn current_frame_len(&self) -> Option<usize> {
        Some(DEVICE_BATCH_SAMPLES)
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

impl Iterator for SchedulerSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.finished.load(Ordering::Relaxed) {
            return None;
        }

        if self.buffer_pos >= self.buffer.len() {
            // Batch read; an underrun leaves (part of) the batch silent
            // and the stream stays alive.
            self.scheduler.consume(&mut self.buffer);
            self.buffer_pos = 0;
        }

        let sample = self.buffer[self.buffer_pos];
        self.buffer_pos += 1;
        Some(sample)
    }
}

/// Audio playback device using rodio
pub struct AudioDevice {
    _stream: OutputStream,
    sink: Sink,
    finished: Arc<AtomicBool>,
}

impl AudioDevice {
    /// Create an audio device playing the scheduler's output.
    ///
    /// Fails with [`UniModError::AudioDevice`] when no output device can
    /// be initialised; playback never starts in that case.
    pub fn new(config: StreamConfig, scheduler: Arc<RingScheduler>) -> Result<Self> {
        let (stream, stream_handle) = OutputStream::try_default()
            .map_err(|e| UniModError::AudioDevice(format!("failed to create stream: {e}")))?;
        let sink = Sink::try_new(&stream_handle)
            .map_err(|e| UniModError::AudioDevice(format!("failed to create sink: {e}")))?;

        let finished = Arc::new(AtomicBool::new(false));
        let source = SchedulerSource::new(
            scheduler,
            config.sample_rate,
            config.channels,
            Arc::clone(&finished),
        );
        sink.append(source);

        Ok(AudioDevice {
            _stream: stream,
            sink,
            finished,
        })
    }

    /// Pause device playback.
    pub fn pause(&self) {
        self.sink.pause();
    }

    /// Resume device playback.
    pub fn play(&self) {
        self.sink.play();
    }

    /// Signal that no more audio follows, letting the stream terminate
    /// instead of playing silence forever.
    pub fn finish(&self) {
        self.finished.store(true, Ordering::Relaxed);
    }
}

impl Drop for AudioDevice {
    fn drop(&mut self) {
        self.pause();
        self.finished.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::RingConfig;
    use crate::source::{Chunk, ChunkSource, SongPosition};
    use parking_lot::Mutex;

    struct SilentSource;

    impl ChunkSource for SilentSource {
        fn render(&mut self, out: &mut [f32]) -> Chunk {
            out.fill(0.0);
            Chunk {
                position: SongPosition::default(),
                ended: None,
            }
        }

        fn seek(&mut self, _position: SongPosition) {}
    }

    fn try_device() -> Option<(AudioDevice, Arc<RingScheduler>)> {
        let source = Arc::new(Mutex::new(SilentSource));
        let (scheduler, _events) = RingScheduler::new(source, RingConfig::default()).unwrap();
        match AudioDevice::new(StreamConfig::default(), Arc::clone(&scheduler)) {
            Ok(device) => Some((device, scheduler)),
            Err(err) => {
                eprintln!("Skipping audio device test (backend unavailable): {err}");
                None
            }
        }
    }

    #[test]
    fn test_device_creation_and_finish() {
        let Some((device, _scheduler)) = try_device() else {
            return;
        };
        device.finish();
    }

    #[test]
    fn test_source_returns_none_after_finish() {
        let source = Arc::new(Mutex::new(SilentSource));
        let (scheduler, _events) = RingScheduler::new(source, RingConfig::default()).unwrap();
        let finished = Arc::new(AtomicBool::new(false));
        let mut device_source =
            SchedulerSource::new(scheduler, 44_100, 2, Arc::clone(&finished));

        assert_eq!(device_source.next(), Some(0.0), "underrun yields silence");
        finished.store(true, Ordering::Relaxed);
        assert_eq!(device_source.next(), None);
    }

    #[test]
    fn test_source_metadata() {
        let source = Arc::new(Mutex::new(SilentSource));
        let (scheduler, _events) = RingScheduler::new(source, RingConfig::default()).unwrap();
        let device_source = SchedulerSource::new(
            scheduler,
            48_000,
            2,
            Arc::new(AtomicBool::new(false)),
        );
        assert_eq!(device_source.sample_rate(), 48_000);
        assert_eq!(device_source.channels(), 2);
    }
}
