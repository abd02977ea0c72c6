//! Voice state and sample stepping
//!
//! A voice renders one sample at a given rate. The sample cursor is 48.16
//! fixed point; the fractional part drives linear interpolation. Loop
//! wrap-around (forward and ping-pong) happens here, as does one-shot
//! exhaustion, which deactivates the voice.

use std::sync::Arc;

use crate::module::{LoopMode, SampleData};

/// Fractional bits of the sample cursor.
pub const FRAC_BITS: u32 = 16;

/// Panning value meaning "hard left".
pub const PAN_LEFT: u8 = 0;
/// Panning value meaning "centre".
pub const PAN_CENTER: u8 = 128;
/// Panning value meaning "hard right".
pub const PAN_RIGHT: u8 = 255;

/// One mixer voice.
#[derive(Debug, Clone, Default)]
pub struct Voice {
    /// PCM data being rendered
    pub(super) sample: Option<Arc<SampleData>>,
    /// Sample cursor, 48.16 fixed point
    pub(super) pos: i64,
    /// Cursor advance per output frame, 48.16 fixed point
    pub(super) step: i64,
    /// Ping-pong voices run backwards between the reflection points
    pub(super) reversed: bool,
    /// Rendering happens only while active
    pub(super) active: bool,
    /// Module channel this voice belongs to (for channel muting)
    pub(super) channel: usize,
    /// Voice volume (0-64)
    pub(super) volume: u8,
    /// Panning (0 left .. 255 right)
    pub(super) panning: u8,
    /// Dolby-style surround panning (decorrelated left/right)
    pub(super) surround: bool,
}

impl Voice {
    /// Start playing `sample` from its beginning at the given step.
    pub fn play(&mut self, sample: Arc<SampleData>, step: i64) {
        self.sample = Some(sample);
        self.pos = 0;
        self.step = step.max(0);
        self.reversed = false;
        self.active = true;
    }

    /// Stop the voice immediately.
    pub fn stop(&mut self) {
        self.active = false;
        self.sample = None;
    }

    /// Change the playback rate without disturbing the cursor.
    pub fn set_step(&mut self, step: i64) {
        self.step = step.max(0);
    }

    /// Set the voice volume (clamped to 0-64).
    pub fn set_volume(&mut self, volume: u8) {
        self.volume = volume.min(64);
    }

    /// Set panning; clears surround mode.
    pub fn set_panning(&mut self, panning: u8) {
        self.panning = panning;
        self.surround = false;
    }

    /// Pan the voice into decorrelated surround.
    pub fn set_surround(&mut self) {
        self.surround = true;
    }

    /// Associate the voice with a module channel for muting purposes.
    pub fn set_channel(&mut self, channel: usize) {
        self.channel = channel;
    }

    /// Whether the voice still produces audio.
    pub fn is_active(&self) -> bool {
        self.active && self.sample.is_some()
    }

    /// Current volume.
    pub fn volume(&self) -> u8 {
        self.volume
    }

    /// Current integer cursor position in frames.
    pub fn position_frames(&self) -> usize {
        (self.pos >> FRAC_BITS).max(0) as usize
    }

    /// Fetch the sample value under the cursor, linearly interpolated when
    /// requested.
    #[inline]
    pub(super) fn fetch(&self, data: &SampleData, interpolate: bool) -> i32 {
        let idx = (self.pos >> FRAC_BITS) as usize;
        let s0 = data.frames[idx] as i32;
        if !interpolate {
            return s0;
        }
        // Clamp the neighbour inside the playable range; the error at the
        // very last frame is one interpolation step.
        let next = (idx + 1).min(data.frames.len() - 1);
        let s1 = data.frames[next] as i32;
        let frac = (self.pos & ((1 << FRAC_BITS) - 1)) as i32;
        s0 + (((s1 - s0) * frac) >> FRAC_BITS)
    }

    /// Advance the cursor one output frame, handling loop wrap-around.
    /// Returns `false` when a one-shot sample is exhausted (the voice is
    /// deactivated).
    #[inline]
    pub(super) fn advance(&mut self, data: &SampleData) -> bool {
        if self.reversed {
            self.pos -= self.step;
        } else {
            self.pos += self.step;
        }

        let loop_start = (data.loop_start as i64) << FRAC_BITS;
        let loop_end = (data.loop_end as i64) << FRAC_BITS;

        match data.loop_mode {
            LoopMode::None => {
                if self.pos >= (data.frames.len() as i64) << FRAC_BITS {
                    self.active = false;
                    return false;
                }
            }
            LoopMode::Forward => {
                let span = loop_end - loop_start;
                if span > 0 {
                    while self.pos >= loop_end {
                        self.pos -= span;
                    }
                } else if self.pos >= (data.frames.len() as i64) << FRAC_BITS {
                    self.active = false;
                    return false;
                }
            }
            LoopMode::PingPong => {
                let span = loop_end - loop_start;
                if span <= 0 {
                    if self.pos >= (data.frames.len() as i64) << FRAC_BITS {
                        self.active = false;
                        return false;
                    }
                    return true;
                }
                // Reflect at both loop points. The step never exceeds the
                // loop span in practice, but bounce in a loop to stay safe
                // for degenerate one-frame loops.
                loop {
                    if !self.reversed && self.pos >= loop_end {
                        self.pos = 2 * loop_end - self.pos - (1 << FRAC_BITS);
                        self.reversed = true;
                    } else if self.reversed && self.pos < loop_start {
                        self.pos = 2 * loop_start - self.pos;
                        self.reversed = false;
                    } else {
                        break;
                    }
                }
            }
        }
        true
    }
}
