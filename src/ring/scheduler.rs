//! Producer/consumer scheduler over the buffer pool
//!
//! The producer thread renders chunks from the shared [`ChunkSource`] into
//! pool slots ahead of playback; the consumer side is called synchronously
//! from the audio callback and therefore never blocks: every lock it takes
//! is a try-lock, and contention or an unfilled slot degrades to silence
//! for that callback.
//!
//! A position change runs as a handshake: the control thread sets the hold
//! flag (the consumer goes silent immediately), files a jump request and
//! wakes the producer; the producer invalidates every slot, resets the
//! indices, seeks the source and clears the hold. The consumer can only
//! ever observe buffers rendered after the seek.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::pool::BufferPool;
use super::RingConfig;
use crate::mixer::MixerMode;
use crate::source::{ChunkSource, PlayerEvent, SongPosition};
use crate::Result;

/// Pending position change, filed by the control thread.
#[derive(Debug, Clone, Copy)]
struct JumpRequest {
    position: SongPosition,
    stale_from: usize,
}

/// Where the song ends inside the pool, stamped by the producer.
#[derive(Debug, Clone, Copy)]
struct EndMark {
    slot: usize,
    /// End offset in interleaved samples within the slot
    samples: usize,
    position: SongPosition,
}

/// The ring pipeline: one producer thread, one non-blocking consumer.
pub struct RingScheduler {
    source: Arc<Mutex<dyn ChunkSource>>,
    pool: BufferPool,
    config: RingConfig,
    /// Interleaved samples per frame of the source
    channels: usize,

    /// Producer wake-up signal (consumer drained a slot, jump, or exit)
    ready: Condvar,
    ready_flag: Mutex<bool>,

    exit: AtomicBool,
    hold: AtomicBool,
    running: AtomicBool,
    /// Producer latch: song ended, stop filling until a jump or shutdown
    finished: AtomicBool,
    /// Next slot the producer fills
    fill_index: AtomicUsize,
    /// Slot the consumer reads from
    play_index: AtomicUsize,
    /// Read offset in samples within the play slot
    play_offset: AtomicUsize,
    /// Drain cycles left before position reports resume
    report_holdoff: AtomicU32,

    jump: Mutex<Option<JumpRequest>>,
    end_mark: Mutex<Option<EndMark>>,
    last_reported: Mutex<Option<SongPosition>>,
    events: Mutex<Sender<PlayerEvent>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl RingScheduler {
    /// Allocate the pool and wire up the event channel.
    ///
    /// The returned receiver delivers [`PlayerEvent`]s in played order.
    pub fn new(
        source: Arc<Mutex<dyn ChunkSource>>,
        config: RingConfig,
    ) -> Result<(Arc<Self>, Receiver<PlayerEvent>)> {
        let channels = source.lock().channels() as usize;
        let pool = BufferPool::allocate(config.pool_size, config.chunk_frames * channels)?;
        let (tx, rx) = mpsc::channel();

        let scheduler = Arc::new(RingScheduler {
            source,
            pool,
            config,
            channels,
            ready: Condvar::new(),
            ready_flag: Mutex::new(false),
            exit: AtomicBool::new(false),
            hold: AtomicBool::new(false),
            running: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            fill_index: AtomicUsize::new(0),
            play_index: AtomicUsize::new(0),
            play_offset: AtomicUsize::new(0),
            report_holdoff: AtomicU32::new(0),
            jump: Mutex::new(None),
            end_mark: Mutex::new(None),
            last_reported: Mutex::new(None),
            events: Mutex::new(tx),
            thread: Mutex::new(None),
        });
        Ok((scheduler, rx))
    }

    /// Start the producer thread. Idempotent.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let this = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("unimod-filler".into())
            .spawn(move || this.producer_loop())?;
        *self.thread.lock() = Some(handle);
        Ok(())
    }

    /// Stop the producer thread and join it. Teardown is synchronous: once
    /// this returns, no thread touches the pool anymore.
    pub fn stop(&self) {
        self.exit.store(true, Ordering::SeqCst);
        self.notify_ready();
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                eprintln!("unimod: filler thread panicked during shutdown");
            }
        }
        self.running.store(false, Ordering::SeqCst);
    }

    /// Whether the producer thread is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Pipeline configuration.
    pub fn config(&self) -> &RingConfig {
        &self.config
    }

    /// Interleaved output channels.
    pub fn channels(&self) -> usize {
        self.channels
    }

    // ---- control surface -------------------------------------------------

    /// Jump playback to a new logical position without audible remnants of
    /// the old one.
    pub fn set_position(&self, position: SongPosition) {
        self.hold.store(true, Ordering::SeqCst);
        *self.jump.lock() = Some(JumpRequest {
            position,
            stale_from: self.fill_index.load(Ordering::SeqCst),
        });
        self.report_holdoff
            .store(self.config.report_debounce, Ordering::SeqCst);
        self.notify_ready();
    }

    /// Pause/unpause consumption; while held the consumer returns silence
    /// and leaves the pool untouched.
    pub fn hold_playing(&self, held: bool) {
        self.hold.store(held, Ordering::SeqCst);
    }

    /// Forward a stereo-separation change to the source under the player
    /// lock.
    pub fn set_stereo_separation(&self, percent: u8) {
        self.source.lock().set_stereo_separation(percent);
    }

    /// Forward mixer mode flag changes to the source.
    pub fn set_mixer_mode(&self, flags: MixerMode, enable: bool) {
        self.source.lock().set_mixer_mode(flags, enable);
    }

    /// Forward the Amiga low-pass filter toggle to the source.
    pub fn enable_amiga_filter(&self, enabled: bool) {
        self.source.lock().enable_amiga_filter(enabled);
    }

    /// Forward a channel enable/disable to the source.
    pub fn enable_channel(&self, channel: usize, enabled: bool) {
        self.source.lock().enable_channel(channel, enabled);
    }

    // ---- consumer (audio callback) --------------------------------------

    /// Pull up to `dest.len()` samples of rendered audio.
    ///
    /// Called synchronously from the audio callback; never blocks. Returns
    /// the number of samples actually copied; the remainder of `dest` is
    /// zeroed (underrun, hold, or song end).
    pub fn consume(&self, dest: &mut [f32]) -> usize {
        let mut written = 0usize;

        while written < dest.len() {
            if self.hold.load(Ordering::SeqCst) || self.exit.load(Ordering::SeqCst) {
                break;
            }
            let index = self.play_index.load(Ordering::SeqCst);
            let Some(mut slot) = self.pool.slot(index).try_lock() else {
                // Producer owns the slot right now; silence, next callback
                // will catch up.
                break;
            };
            if !slot.filled {
                break;
            }

            self.report_position(slot.position);

            let end = *self.end_mark.lock();
            let limit = match end {
                Some(mark) if mark.slot == index => mark.samples,
                _ => slot.data.len(),
            };
            let offset = self.play_offset.load(Ordering::SeqCst);
            let take = limit.saturating_sub(offset).min(dest.len() - written);
            dest[written..written + take].copy_from_slice(&slot.data[offset..offset + take]);
            written += take;

            if offset + take >= limit {
                // Slot fully drained.
                slot.filled = false;
                drop(slot);
                self.play_offset.store(0, Ordering::SeqCst);
                self.play_index
                    .store((index + 1) % self.pool.len(), Ordering::SeqCst);
                let holdoff = self.report_holdoff.load(Ordering::SeqCst);
                if holdoff > 0 {
                    self.report_holdoff.store(holdoff - 1, Ordering::SeqCst);
                }

                if let Some(mark) = end {
                    if mark.slot == index {
                        // Drained exactly to the end marker: final position,
                        // then the terminal event, exactly once.
                        self.send(PlayerEvent::SongEnded(mark.position));
                        self.send(PlayerEvent::ModuleEnded);
                        *self.end_mark.lock() = None;
                        break;
                    }
                }
                self.notify_ready();
            } else {
                self.play_offset.store(offset + take, Ordering::SeqCst);
            }
        }

        dest[written..].fill(0.0);
        written
    }

    // ---- producer thread -------------------------------------------------

    fn producer_loop(self: Arc<Self>) {
        while !self.exit.load(Ordering::SeqCst) {
            if let Some(request) = self.jump.lock().take() {
                self.apply_jump(request);
                continue;
            }
            if self.finished.load(Ordering::SeqCst) {
                // Song over: nothing to fill until a jump or shutdown.
                self.wait_ready();
                continue;
            }

            let index = self.fill_index.load(Ordering::SeqCst);
            let Some(mut slot) = self
                .pool
                .slot(index)
                .try_lock_for(self.config.producer_lock_timeout)
            else {
                // Bounded wait expired; treat like a full pool and wait for
                // the consumer to free something.
                self.wait_ready();
                continue;
            };
            if slot.filled {
                drop(slot);
                self.wait_ready();
                continue;
            }

            let chunk = {
                let mut source = self.source.lock();
                source.render(&mut slot.data)
            };
            slot.position = chunk.position;
            slot.filled = true;
            if let Some(end_frames) = chunk.ended {
                *self.end_mark.lock() = Some(EndMark {
                    slot: index,
                    samples: end_frames * self.channels,
                    position: chunk.position,
                });
                self.finished.store(true, Ordering::SeqCst);
            }
            drop(slot);
            self.fill_index
                .store((index + 1) % self.pool.len(), Ordering::SeqCst);
        }
    }

    /// Invalidate the pool after a position change and restart filling
    /// from slot 0 at the new position.
    fn apply_jump(&self, request: JumpRequest) {
        let len = self.pool.len();
        // Walk the slots in reverse order from the stale fill point; the
        // consumer is held, so these locks cannot be contended for long.
        for back in 0..len {
            let index = (request.stale_from + len - 1 - back) % len;
            let mut slot = self.pool.slot(index).lock();
            slot.filled = false;
        }
        self.play_index.store(0, Ordering::SeqCst);
        self.play_offset.store(0, Ordering::SeqCst);
        self.fill_index.store(0, Ordering::SeqCst);
        *self.end_mark.lock() = None;
        self.finished.store(false, Ordering::SeqCst);

        self.source.lock().seek(request.position);
        self.hold.store(false, Ordering::SeqCst);
    }

    fn wait_ready(&self) {
        let mut flag = self.ready_flag.lock();
        if !*flag {
            // Bounded wait so exit/jump requests are re-checked even if a
            // wake-up is missed.
            self.ready
                .wait_for(&mut flag, Duration::from_millis(200));
        }
        *flag = false;
    }

    fn notify_ready(&self) {
        *self.ready_flag.lock() = true;
        self.ready.notify_one();
    }

    /// Report a position change, debounced after jumps so rapid buffer
    /// crossings do not flicker.
    fn report_position(&self, position: SongPosition) {
        if self.report_holdoff.load(Ordering::SeqCst) > 0 {
            return;
        }
        let mut last = self.last_reported.lock();
        if *last != Some(position) {
            *last = Some(position);
            drop(last);
            self.send(PlayerEvent::Position(position));
        }
    }

    fn send(&self, event: PlayerEvent) {
        // The control layer may have dropped the receiver; that is fine.
        let _ = self.events.lock().send(event);
    }
}

impl Drop for RingScheduler {
    fn drop(&mut self) {
        self.exit.store(true, Ordering::SeqCst);
        self.notify_ready();
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Chunk;

    /// Scripted source: renders an increasing ramp and advances its row
    /// position once per chunk; ends after `end_after` chunks if set.
    struct ScriptedSource {
        counter: u32,
        end_after: Option<u32>,
        end_offset: usize,
    }

    impl ScriptedSource {
        fn endless() -> Self {
            ScriptedSource {
                counter: 0,
                end_after: None,
                end_offset: 0,
            }
        }

        fn ending(chunks: u32, end_offset: usize) -> Self {
            ScriptedSource {
                counter: 0,
                end_after: Some(chunks),
                end_offset,
            }
        }
    }

    impl ChunkSource for ScriptedSource {
        fn render(&mut self, out: &mut [f32]) -> Chunk {
            out.fill(self.counter as f32 + 1.0);
            let position = SongPosition {
                order: 0,
                row: self.counter as u16,
            };
            let ended = match self.end_after {
                Some(n) if self.counter + 1 >= n => {
                    out[self.end_offset..].fill(0.0);
                    Some(self.end_offset)
                }
                _ => None,
            };
            self.counter += 1;
            Chunk { position, ended }
        }

        fn seek(&mut self, position: SongPosition) {
            self.counter = position.row as u32;
        }

        fn channels(&self) -> u16 {
            1
        }
    }

    fn small_config() -> RingConfig {
        RingConfig {
            pool_size: 4,
            chunk_frames: 8,
            report_debounce: 0,
            ..RingConfig::default()
        }
    }

    fn wait_until<F: FnMut() -> bool>(what: &str, mut cond: F) {
        for _ in 0..500 {
            if cond() {
                return;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        panic!("timed out waiting for {what}");
    }

    #[test]
    fn test_producer_fills_and_consumer_drains_fifo() {
        let source = Arc::new(Mutex::new(ScriptedSource::endless()));
        let (scheduler, _events) = RingScheduler::new(source, small_config()).unwrap();
        scheduler.start().unwrap();

        // First chunk value is 1.0; drain four chunks and expect the ramp
        // in producer order.
        let mut seen = Vec::new();
        wait_until("four chunks", || {
            let mut buf = [0.0f32; 8];
            if scheduler.consume(&mut buf) == 8 {
                seen.push(buf[0]);
            }
            seen.len() >= 4
        });
        assert_eq!(&seen[..4], &[1.0, 2.0, 3.0, 4.0]);
        scheduler.stop();
    }

    #[test]
    fn test_consume_in_partial_reads_preserves_order() {
        let source = Arc::new(Mutex::new(ScriptedSource::endless()));
        let (scheduler, _events) = RingScheduler::new(source, small_config()).unwrap();
        scheduler.start().unwrap();

        // 3-sample reads do not align with the 8-sample buffers; the
        // stream must still be monotonically non-decreasing.
        let mut stream = Vec::new();
        wait_until("40 samples", || {
            let mut buf = [0.0f32; 3];
            let got = scheduler.consume(&mut buf);
            stream.extend_from_slice(&buf[..got]);
            stream.len() >= 40
        });
        assert!(
            stream.windows(2).all(|w| w[1] >= w[0]),
            "drained samples must follow fill order: {stream:?}"
        );
        scheduler.stop();
    }

    #[test]
    fn test_underrun_returns_silence_without_blocking() {
        let source = Arc::new(Mutex::new(ScriptedSource::endless()));
        let (scheduler, _events) = RingScheduler::new(source, small_config()).unwrap();
        // Producer never started: every consume is an underrun.
        let mut buf = [1.0f32; 16];
        let got = scheduler.consume(&mut buf);
        assert_eq!(got, 0);
        assert!(buf.iter().all(|&s| s == 0.0), "underrun must yield silence");
    }

    #[test]
    fn test_stop_joins_producer() {
        let source = Arc::new(Mutex::new(ScriptedSource::endless()));
        let (scheduler, _events) = RingScheduler::new(source, small_config()).unwrap();
        scheduler.start().unwrap();
        wait_until("pool filled", || {
            scheduler.pool.slot(0).lock().filled
        });
        scheduler.stop();
        assert!(!scheduler.is_running());
    }
}
