//! Per-voice software mixer
//!
//! Renders N voices into a shared 32-bit accumulation buffer, then folds
//! the accumulator down to clamped `f32` frames. The 32-bit intermediate
//! keeps headroom for many simultaneous voices: a full-scale 16-bit sample
//! at maximum gain contributes at most 22 bits, so even 64 voices stay
//! clear of overflow before the final clamp.
//!
//! The mixer knows nothing about ticks or patterns; the player configures
//! voices and asks for a fixed number of frames per call.

mod filter;
mod voice;

pub use filter::AmigaFilter;
pub use voice::{Voice, FRAC_BITS, PAN_CENTER, PAN_LEFT, PAN_RIGHT};

use serde::{Deserialize, Serialize};

bitflags::bitflags! {
    /// Global mixer mode flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MixerMode: u8 {
        /// Interleaved stereo output (mono otherwise)
        const STEREO = 1 << 0;
        /// Linear interpolation between sample points
        const INTERPOLATE = 1 << 1;
        /// Honour surround-panned voices (decorrelated left/right)
        const SURROUND = 1 << 2;
        /// Extra output gain for low-channel-count sources
        const BOOST = 1 << 3;
    }
}

impl Default for MixerMode {
    fn default() -> Self {
        MixerMode::STEREO | MixerMode::INTERPOLATE
    }
}

/// Tunable mixer parameters, adjustable during playback.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MixerSettings {
    /// Mode flags
    #[serde(skip)]
    pub mode: MixerMode,
    /// Stereo separation, 0 (fully centred) to 100 (fully separated)
    pub separation: u8,
    /// Amiga low-pass filter emulation
    pub amiga_filter: bool,
    /// Extra gain shift applied when [`MixerMode::BOOST`] is set
    pub boost_shift: u8,
}

impl Default for MixerSettings {
    fn default() -> Self {
        MixerSettings {
            mode: MixerMode::default(),
            separation: 100,
            amiga_filter: false,
            boost_shift: 1,
        }
    }
}

/// Gain normalization: volume (6 bits) x pan side (8 bits) over a 16-bit
/// sample, folded back to f32 full scale in [`Mixer::mix`].
const GAIN_SHIFT: u32 = 8;
const OUTPUT_SCALE: f32 = 1.0 / (32768.0 * 64.0);

/// The voice mixer.
pub struct Mixer {
    /// Voice pool; the player maps module channels onto voices
    voices: Vec<Voice>,
    /// Per-module-channel enable flags
    channel_enabled: Vec<bool>,
    /// Tunable parameters
    pub settings: MixerSettings,
    /// 32-bit accumulation scratch
    accum: Vec<i32>,
    /// Post-sum low-pass emulation
    filter: AmigaFilter,
}

impl Mixer {
    /// Create a mixer with a fixed voice pool mapped over `channels`
    /// module channels.
    pub fn new(voices: usize, channels: usize) -> Self {
        let mut pool = vec![Voice::default(); voices];
        for (i, voice) in pool.iter_mut().enumerate() {
            voice.set_channel(i % channels.max(1));
        }
        Mixer {
            voices: pool,
            channel_enabled: vec![true; channels],
            settings: MixerSettings::default(),
            accum: Vec::new(),
            filter: AmigaFilter::new(),
        }
    }

    /// Mutable access to a voice.
    pub fn voice_mut(&mut self, index: usize) -> &mut Voice {
        &mut self.voices[index]
    }

    /// Shared access to a voice.
    pub fn voice(&self, index: usize) -> &Voice {
        &self.voices[index]
    }

    /// Number of voices in the pool.
    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    /// Enable or disable a module channel. Disabled channels are skipped
    /// entirely during mixing; their voice state freezes until re-enabled.
    pub fn enable_channel(&mut self, channel: usize, enabled: bool) {
        if let Some(slot) = self.channel_enabled.get_mut(channel) {
            *slot = enabled;
        }
    }

    /// Whether a module channel is enabled.
    pub fn channel_enabled(&self, channel: usize) -> bool {
        self.channel_enabled.get(channel).copied().unwrap_or(true)
    }

    /// Set or clear mode flags.
    pub fn set_mode(&mut self, flags: MixerMode, enable: bool) {
        if enable {
            self.settings.mode |= flags;
        } else {
            self.settings.mode -= flags;
        }
    }

    /// Stereo separation percentage (0 centred .. 100 separated).
    pub fn set_separation(&mut self, percent: u8) {
        self.settings.separation = percent.min(100);
    }

    /// Toggle the Amiga low-pass filter emulation.
    pub fn enable_amiga_filter(&mut self, enabled: bool) {
        self.settings.amiga_filter = enabled;
        if !enabled {
            self.filter.reset();
        }
    }

    /// Silence all voices and clear filter history (used on position jumps).
    pub fn reset_voices(&mut self) {
        for voice in &mut self.voices {
            voice.stop();
        }
        self.filter.reset();
    }

    /// Interleaved output channels per frame under the current mode.
    pub fn output_channels(&self) -> usize {
        if self.settings.mode.contains(MixerMode::STEREO) {
            2
        } else {
            1
        }
    }

    /// Render `out.len() / output_channels()` frames of all active voices
    /// into `out`, overwriting it.
    pub fn mix(&mut self, out: &mut [f32]) {
        let channels = self.output_channels();
        let frames = out.len() / channels;
        let stereo = channels == 2;
        let interpolate = self.settings.mode.contains(MixerMode::INTERPOLATE);
        let surround_on = self.settings.mode.contains(MixerMode::SURROUND);
        let separation = self.settings.separation as i32;

        self.accum.clear();
        self.accum.resize(frames * channels, 0);

        for voice in &mut self.voices {
            if !voice.is_active() {
                continue;
            }
            if !self
                .channel_enabled
                .get(voice.channel)
                .copied()
                .unwrap_or(true)
            {
                continue;
            }
            let Some(data) = voice.sample.clone() else {
                continue;
            };
            if data.frames.is_empty() || data.loop_end > data.frames.len() {
                // Corrupt loop points; drop the voice instead of reading
                // out of bounds.
                voice.stop();
                continue;
            }

            let volume = voice.volume as i32;
            let (lvol, rvol) = if !stereo {
                (volume << GAIN_SHIFT as i32, 0)
            } else if voice.surround && surround_on {
                // Decorrelated surround: equal power, inverted phase right.
                let half = (volume << GAIN_SHIFT) / 2;
                (half, -half)
            } else {
                // Blend the voice pan towards centre by the separation
                // percentage. Surround voices fall back to centre when
                // surround mixing is off.
                let base = if voice.surround {
                    PAN_CENTER as i32
                } else {
                    voice.panning as i32
                };
                let pan = PAN_CENTER as i32 + ((base - PAN_CENTER as i32) * separation) / 100;
                (volume * (255 - pan), volume * pan)
            };

            for frame in 0..frames {
                if !voice.is_active() {
                    break;
                }
                let value = voice.fetch(&data, interpolate);
                if stereo {
                    self.accum[frame * 2] += (value * lvol) >> GAIN_SHIFT;
                    self.accum[frame * 2 + 1] += (value * rvol) >> GAIN_SHIFT;
                } else {
                    self.accum[frame] += (value * lvol) >> GAIN_SHIFT;
                }
                if !voice.advance(&data) {
                    break;
                }
            }
        }

        if self.settings.amiga_filter {
            if stereo {
                for frame in 0..frames {
                    let (l, r) =
                        self.filter.process(self.accum[frame * 2], self.accum[frame * 2 + 1]);
                    self.accum[frame * 2] = l;
                    self.accum[frame * 2 + 1] = r;
                }
            } else {
                for sample in self.accum.iter_mut() {
                    *sample = self.filter.process_mono(*sample);
                }
            }
        }

        let boost = if self.settings.mode.contains(MixerMode::BOOST) {
            self.settings.boost_shift as u32
        } else {
            0
        };
        for (dst, &acc) in out.iter_mut().zip(self.accum.iter()) {
            *dst = ((acc << boost) as f32 * OUTPUT_SCALE).clamp(-1.0, 1.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::SampleData;
    use approx::assert_relative_eq;
    use std::sync::Arc;

    fn constant_sample(value: i16, frames: usize) -> Arc<SampleData> {
        Arc::new(SampleData {
            frames: vec![value; frames],
            loop_mode: crate::module::LoopMode::Forward,
            loop_start: 0,
            loop_end: frames,
            base_rate: 8363,
        })
    }

    fn start_voice(mixer: &mut Mixer, index: usize, value: i16, volume: u8, pan: u8) {
        let data = constant_sample(value, 64);
        let voice = mixer.voice_mut(index);
        voice.play(data, 1 << FRAC_BITS);
        voice.set_volume(volume);
        voice.set_panning(pan);
    }

    #[test]
    fn test_center_pan_splits_evenly() {
        let mut mixer = Mixer::new(1, 1);
        start_voice(&mut mixer, 0, 16384, 64, PAN_CENTER);

        let mut out = vec![0.0f32; 8];
        mixer.mix(&mut out);
        assert_relative_eq!(out[0], out[1], epsilon = 0.01);
        assert!(out[0] > 0.0);
    }

    #[test]
    fn test_hard_left_pan_is_silent_right() {
        let mut mixer = Mixer::new(1, 1);
        start_voice(&mut mixer, 0, 16384, 64, PAN_LEFT);

        let mut out = vec![0.0f32; 8];
        mixer.mix(&mut out);
        assert!(out[0] > 0.2, "left should carry the signal, got {}", out[0]);
        assert_relative_eq!(out[1], 0.0, epsilon = 0.001);
    }

    #[test]
    fn test_zero_separation_centres_everything() {
        let mut mixer = Mixer::new(1, 1);
        mixer.set_separation(0);
        start_voice(&mut mixer, 0, 16384, 64, PAN_LEFT);

        let mut out = vec![0.0f32; 8];
        mixer.mix(&mut out);
        assert_relative_eq!(out[0], out[1], epsilon = 0.01);
    }

    #[test]
    fn test_disabled_channel_is_silent() {
        let mut mixer = Mixer::new(2, 2);
        start_voice(&mut mixer, 0, 16384, 64, PAN_CENTER);
        mixer.enable_channel(0, false);

        let mut out = vec![1.0f32; 8];
        mixer.mix(&mut out);
        assert!(out.iter().all(|&s| s == 0.0), "muted channel must render silence");

        mixer.enable_channel(0, true);
        mixer.mix(&mut out);
        assert!(out.iter().any(|&s| s != 0.0));
    }

    #[test]
    fn test_mono_mode_uses_one_slot_per_frame() {
        let mut mixer = Mixer::new(1, 1);
        mixer.set_mode(MixerMode::STEREO, false);
        start_voice(&mut mixer, 0, 16384, 64, PAN_CENTER);

        assert_eq!(mixer.output_channels(), 1);
        let mut out = vec![0.0f32; 4];
        mixer.mix(&mut out);
        assert!(out.iter().all(|&s| s > 0.0));
    }

    #[test]
    fn test_boost_doubles_output() {
        let mut mixer = Mixer::new(1, 1);
        start_voice(&mut mixer, 0, 4096, 64, PAN_CENTER);
        let mut plain = vec![0.0f32; 8];
        mixer.mix(&mut plain);

        let mut boosted_mixer = Mixer::new(1, 1);
        boosted_mixer.set_mode(MixerMode::BOOST, true);
        start_voice(&mut boosted_mixer, 0, 4096, 64, PAN_CENTER);
        let mut boosted = vec![0.0f32; 8];
        boosted_mixer.mix(&mut boosted);

        assert_relative_eq!(boosted[0], plain[0] * 2.0, epsilon = 0.001);
    }

    #[test]
    fn test_surround_voice_is_phase_inverted() {
        let mut mixer = Mixer::new(1, 1);
        mixer.set_mode(MixerMode::SURROUND, true);
        let data = constant_sample(16384, 64);
        let voice = mixer.voice_mut(0);
        voice.play(data, 1 << FRAC_BITS);
        voice.set_volume(64);
        voice.set_surround();

        let mut out = vec![0.0f32; 8];
        mixer.mix(&mut out);
        assert!(out[0] > 0.0);
        assert_relative_eq!(out[0], -out[1], epsilon = 0.001);
    }

    #[test]
    fn test_one_shot_voice_goes_inactive_mid_chunk() {
        let mut mixer = Mixer::new(1, 1);
        let data = SampleData::one_shot(vec![8192; 4], 8363);
        mixer.voice_mut(0).play(data, 1 << FRAC_BITS);
        mixer.voice_mut(0).set_volume(64);
        mixer.voice_mut(0).set_panning(PAN_CENTER);

        let mut out = vec![0.0f32; 16];
        mixer.mix(&mut out);
        assert!(!mixer.voice(0).is_active());
        assert!(out[0] != 0.0, "first frames carry the sample");
        assert_eq!(out[15], 0.0, "frames past exhaustion are silence");
    }
}
