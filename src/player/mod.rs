//! Reference pattern player
//!
//! Interprets the compiled opcode streams row by row and drives the voice
//! mixer. The player implements [`ChunkSource`], so it plugs straight into
//! the ring scheduler or the direct renderer.
//!
//! This is the structural playback skeleton: note and instrument triggers,
//! the volume column, speed/tempo, position jumps, pattern breaks, volume
//! slides and key-off. The remaining effect families are consumed via the
//! opcode table (so corrupt streams are still detected) but left
//! uninterpreted.

mod periods;

pub use periods::{amiga_period, linear_period, BASE_RATE};

use std::sync::Arc;

use crate::mixer::{Mixer, MixerMode, PAN_CENTER};
use crate::module::{ModuleFlags, UniMod, POS_END};
use crate::opcode::{op, vol};
use crate::source::{Chunk, ChunkSource, SongPosition};
use crate::track::TrackReader;
use crate::{Result, UniModError};

/// Per-channel playback state.
#[derive(Debug, Clone, Default)]
struct ChannelState {
    /// Selected sample slot (1-based as emitted; 0 = none)
    instrument: u8,
    /// Last triggered note
    note: u8,
    /// Channel volume (0-64)
    volume: u8,
    /// Channel panning (0-255)
    panning: u8,
    /// Volume-slide parameter memory
    slide_param: u8,
    /// Note pending trigger at this row's tick 0
    pending_note: Option<u8>,
    /// Volume column override for this row
    pending_volume: Option<u8>,
}

/// UniTrk-driven module player.
pub struct ModPlayer {
    module: Arc<UniMod>,
    mixer: Mixer,
    rate: u32,

    speed: u8,
    tempo: u8,
    tick: u8,
    row: u16,
    order: u16,
    /// Pending position jump / pattern break, applied at row advance
    jump: Option<SongPosition>,
    /// Frames left until the next tick boundary
    frames_until_tick: usize,
    ended: bool,
    channels: Vec<ChannelState>,
}

impl ModPlayer {
    /// Create a player over an assembled module at the given mix rate.
    pub fn new(module: Arc<UniMod>, rate: u32) -> Result<Self> {
        if rate < 4000 {
            return Err(UniModError::Config(format!(
                "mix rate {rate} Hz is below the supported minimum"
            )));
        }
        let channel_count = module.channels as usize;
        let mut channels = vec![ChannelState::default(); channel_count];
        for (c, state) in channels.iter_mut().enumerate() {
            state.volume = 64;
            state.panning = module.panning.get(c).copied().unwrap_or(PAN_CENTER);
        }
        let mut player = ModPlayer {
            mixer: Mixer::new(channel_count.max(1), channel_count.max(1)),
            rate,
            speed: module.initial_speed,
            tempo: module.initial_tempo,
            tick: 0,
            row: 0,
            order: 0,
            jump: None,
            frames_until_tick: 0,
            ended: module.song_length() == 0,
            channels,
            module,
        };
        if player.module.channels <= 8 {
            // Few-channel sources come out quiet; give them the boost gain.
            player.mixer.set_mode(MixerMode::BOOST, true);
        }
        Ok(player)
    }

    /// The module being played.
    pub fn module(&self) -> &UniMod {
        &self.module
    }

    /// Direct access to the mixer for control-layer adjustments.
    pub fn mixer_mut(&mut self) -> &mut Mixer {
        &mut self.mixer
    }

    /// Current logical position.
    pub fn position(&self) -> SongPosition {
        SongPosition {
            order: self.order,
            row: self.row,
        }
    }

    /// Whether the position list has been exhausted.
    pub fn ended(&self) -> bool {
        self.ended
    }

    /// Current ticks-per-row.
    pub fn speed(&self) -> u8 {
        self.speed
    }

    /// Current tempo in BPM.
    pub fn tempo(&self) -> u8 {
        self.tempo
    }

    fn frames_per_tick(&self) -> usize {
        // Classic tempo convention: one tick is 2.5 / BPM seconds.
        ((self.rate as usize * 5) / (self.tempo.max(32) as usize * 2)).max(1)
    }

    /// Interpret one tick: row opcodes on tick 0, continuous effects on
    /// the later ticks, then advance the row counter when the tick wraps.
    fn process_tick(&mut self) {
        if self.ended {
            return;
        }
        if self.tick == 0 {
            self.read_row();
            self.trigger_row();
        } else {
            self.continuous_effects();
        }
        self.tick += 1;
        if self.tick >= self.speed.max(1) {
            self.tick = 0;
            self.advance_row();
        }
    }

    /// Decode the current row of every channel.
    fn read_row(&mut self) {
        let pattern = self.module.pattern_at(self.order as usize);
        if pattern == POS_END {
            self.ended = true;
            return;
        }
        let module = Arc::clone(&self.module);
        for channel in 0..self.channels.len() {
            let Some(track) = module.track_for(pattern as usize, channel) else {
                continue;
            };
            let Some(mut reader) = TrackReader::for_row(track, self.row) else {
                continue;
            };
            self.decode_channel_row(channel, &mut reader);
        }
    }

    /// Interpret one channel's opcodes for the current row.
    fn decode_channel_row(&mut self, channel: usize, reader: &mut TrackReader<'_>) {
        loop {
            let opcode = reader.next_byte();
            if opcode == 0 {
                break;
            }
            match opcode {
                op::NOTE => {
                    let note = reader.next_byte();
                    self.channels[channel].pending_note = Some(note);
                }
                op::INSTRUMENT => {
                    self.channels[channel].instrument = reader.next_byte();
                }
                op::VOL_EFFECT => {
                    let sub = reader.next_byte();
                    let value = reader.next_byte();
                    match sub {
                        vol::VOLUME => {
                            self.channels[channel].pending_volume = Some(value.min(64));
                        }
                        vol::PANNING => self.channels[channel].panning = value,
                        _ => {}
                    }
                }
                op::KEY_OFF => self.key_off(channel),
                op::KEY_FADE => {
                    let _delay = reader.next_byte();
                    self.key_off(channel);
                }
                _ if (op::PT_EFFECT_0..=op::PT_EFFECT_F).contains(&opcode) => {
                    let effect = opcode - op::PT_EFFECT_0;
                    let data = reader.next_byte();
                    self.generic_effect(channel, effect, data);
                }
                _ => {
                    // Effect families this player does not interpret; the
                    // table still tells us how far to skip. An unknown
                    // opcode means the row is corrupt: abandon it.
                    if !reader.skip_opcode(opcode) {
                        break;
                    }
                }
            }
        }
    }

    /// Handle a Protracker effect-column entry.
    fn generic_effect(&mut self, channel: usize, effect: u8, data: u8) {
        match effect {
            0x8 => self.channels[channel].panning = data,
            0xA => {
                if data != 0 {
                    self.channels[channel].slide_param = data;
                }
            }
            0xB => {
                self.jump = Some(SongPosition::at_order(data as u16));
            }
            0xC => self.channels[channel].pending_volume = Some(data.min(64)),
            0xD => {
                // Break to the given row of the next position.
                self.jump = Some(SongPosition {
                    order: self.order + 1,
                    row: data as u16,
                });
            }
            0xF => match data {
                // Below 32 sets ticks-per-row, otherwise BPM; 0 is ignored.
                0 => {}
                1..=31 => self.speed = data,
                _ => self.tempo = data,
            },
            _ => {}
        }
    }

    /// Apply the decoded row: trigger notes, volumes, panning.
    fn trigger_row(&mut self) {
        for channel in 0..self.channels.len() {
            let (note, volume, instrument, panning) = {
                let state = &mut self.channels[channel];
                (
                    state.pending_note.take(),
                    state.pending_volume.take(),
                    state.instrument,
                    state.panning,
                )
            };

            if let Some(note) = note {
                self.trigger_note(channel, note, instrument);
            }
            if let Some(volume) = volume {
                self.channels[channel].volume = volume;
            }
            let volume = self.channels[channel].volume;
            let voice = self.mixer.voice_mut(channel);
            voice.set_volume(volume);
            voice.set_panning(panning);
        }
    }

    fn trigger_note(&mut self, channel: usize, note: u8, instrument: u8) {
        let Some((data, sample_volume)) = instrument
            .checked_sub(1)
            .and_then(|i| self.module.samples.get(i as usize))
            .and_then(|sample| Some((sample.data.clone()?, sample.volume)))
        else {
            return;
        };

        let linear = self.module.flags.contains(ModuleFlags::LINEAR_PERIODS);
        let frequency = if linear {
            periods::linear_frequency(periods::linear_period(note))
        } else {
            periods::amiga_frequency(periods::amiga_period(note))
        };
        let step = periods::step_for_frequency(frequency, data.base_rate, self.rate);

        let state = &mut self.channels[channel];
        state.note = note;
        state.volume = sample_volume.min(64);

        let voice = self.mixer.voice_mut(channel);
        voice.set_channel(channel);
        voice.play(data, step);
    }

    fn key_off(&mut self, channel: usize) {
        self.mixer.voice_mut(channel).stop();
    }

    /// Per-tick continuous effects (volume slide).
    fn continuous_effects(&mut self) {
        for channel in 0..self.channels.len() {
            let param = self.channels[channel].slide_param;
            if param == 0 {
                continue;
            }
            let up = param >> 4;
            let down = param & 0xF;
            let state = &mut self.channels[channel];
            let volume = (state.volume as i16 + up as i16 - down as i16).clamp(0, 64) as u8;
            state.volume = volume;
            self.mixer.voice_mut(channel).set_volume(volume);
        }
    }

    /// Advance to the next row, honouring pending jumps and the position
    /// sentinel.
    fn advance_row(&mut self) {
        // Slide memory is per-row in this player: a new row without the
        // effect stops the slide.
        for state in &mut self.channels {
            state.slide_param = 0;
        }

        if let Some(target) = self.jump.take() {
            self.order = target.order;
            self.row = target.row;
        } else {
            self.row += 1;
            let pattern = self.module.pattern_at(self.order as usize);
            if pattern == POS_END || self.row >= self.module.pattern_rows(pattern as usize) {
                self.row = 0;
                self.order += 1;
            }
        }

        if self.order as usize >= self.module.song_length()
            || self.module.pattern_at(self.order as usize) == POS_END
        {
            self.ended = true;
        }
    }
}

impl ChunkSource for ModPlayer {
    fn render(&mut self, out: &mut [f32]) -> Chunk {
        let position = self.position();
        let channels = self.mixer.output_channels();
        let frames = out.len() / channels;

        if self.ended {
            out.fill(0.0);
            return Chunk {
                position,
                ended: Some(0),
            };
        }

        let mut done = 0usize;
        while done < frames {
            if self.ended {
                break;
            }
            if self.frames_until_tick == 0 {
                self.process_tick();
                self.frames_until_tick = self.frames_per_tick();
                continue;
            }
            let run = self.frames_until_tick.min(frames - done);
            let span = &mut out[done * channels..(done + run) * channels];
            self.mixer.mix(span);
            self.frames_until_tick -= run;
            done += run;
        }

        let ended = if self.ended {
            out[done * channels..].fill(0.0);
            Some(done)
        } else {
            None
        };
        Chunk { position, ended }
    }

    fn seek(&mut self, position: SongPosition) {
        self.mixer.reset_voices();
        self.order = position.order;
        self.row = position.row;
        self.tick = 0;
        self.jump = None;
        self.frames_until_tick = 0;
        self.ended = self.order as usize >= self.module.song_length();
    }

    fn channels(&self) -> u16 {
        self.mixer.output_channels() as u16
    }

    fn sample_rate(&self) -> u32 {
        self.rate
    }

    fn set_stereo_separation(&mut self, percent: u8) {
        self.mixer.set_separation(percent);
    }

    fn set_mixer_mode(&mut self, flags: MixerMode, enable: bool) {
        self.mixer.set_mode(flags, enable);
    }

    fn enable_amiga_filter(&mut self, enabled: bool) {
        self.mixer.enable_amiga_filter(enabled);
    }

    fn enable_channel(&mut self, channel: usize, enabled: bool) {
        self.mixer.enable_channel(channel, enabled);
    }
}
