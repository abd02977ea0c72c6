//! Unified module representation and assembly
//!
//! Every supported source format converges to the same in-memory song:
//! an ordered position list, patterns referencing per-channel tracks,
//! the track table itself, samples and (for instrument-based formats)
//! instruments. Format decoders discover the table sizes while parsing
//! their headers, allocate the module through [`UniMod::allocate`], then
//! fill the tables in.
//!
//! The module is built once during load, consumed read-only during
//! playback, and torn down when dropped.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::track::Track;
use crate::{Result, UniModError};

/// Position-list sentinel meaning "end of song".
pub const POS_END: u16 = 0xFFFF;

bitflags::bitflags! {
    /// Module-wide behaviour flags set by the format decoder.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ModuleFlags: u16 {
        /// Use linear periods (FastTracker) instead of Amiga periods
        const LINEAR_PERIODS = 1 << 0;
        /// The module carries real instruments, not bare samples
        const INSTRUMENTS = 1 << 1;
        /// New-note actions are honoured (Impulse Tracker)
        const NNA = 1 << 2;
        /// Old-style (tick-0) period slides
        const OLD_SLIDES = 1 << 3;
        /// Arpeggio memory: a bare effect-0 cell re-triggers the last arpeggio
        const ARP_MEM = 1 << 4;
        /// Amiga period range is not enforced
        const EXTENDED_RANGE = 1 << 5;
        /// Stereo panning information is meaningful
        const PANNING = 1 << 6;
    }
}

/// Sample loop behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopMode {
    /// Play once and stop
    #[default]
    None,
    /// Jump back to the loop start when the loop end is reached
    Forward,
    /// Reverse direction at both loop points
    PingPong,
}

/// Immutable PCM data shared between the module and active voices.
///
/// Voices hold an `Arc` to this so a module teardown cannot invalidate a
/// sample a voice is still rendering.
#[derive(Debug)]
pub struct SampleData {
    /// Signed 16-bit mono frames
    pub frames: Vec<i16>,
    /// Loop behaviour
    pub loop_mode: LoopMode,
    /// Loop start in frames
    pub loop_start: usize,
    /// Loop end in frames (exclusive)
    pub loop_end: usize,
    /// Sampling rate that plays the sample at its reference pitch
    pub base_rate: u32,
}

impl SampleData {
    /// Wrap raw frames as a non-looping sample.
    pub fn one_shot(frames: Vec<i16>, base_rate: u32) -> Arc<Self> {
        Arc::new(SampleData {
            loop_end: frames.len(),
            frames,
            loop_mode: LoopMode::None,
            loop_start: 0,
            base_rate,
        })
    }
}

/// One sample slot of the module.
#[derive(Debug, Clone, Default)]
pub struct Sample {
    /// Display name
    pub name: String,
    /// Default volume (0-64)
    pub volume: u8,
    /// Default panning (0 = left, 128 = centre, 255 = right)
    pub panning: u8,
    /// PCM data, absent for empty slots
    pub data: Option<Arc<SampleData>>,
}

/// What happens to the playing voice when a new note arrives on its channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NewNoteAction {
    /// Cut the old voice immediately
    #[default]
    Cut,
    /// Keep the old voice running
    Continue,
    /// Release the old voice (key-off)
    Off,
    /// Fade the old voice out
    Fade,
}

/// One instrument slot (only present for instrument-based formats).
#[derive(Debug, Clone, Default)]
pub struct Instrument {
    /// Display name
    pub name: String,
    /// Sample slot per note (index into the sample table)
    pub sample_map: Vec<u8>,
    /// Fade-out speed applied after key-fade
    pub fadeout: u16,
    /// Default new-note action
    pub nna: NewNoteAction,
}

/// One pattern: a row count plus one track-table index per channel.
#[derive(Debug, Clone, Default)]
pub struct Pattern {
    /// Rows in this pattern
    pub rows: u16,
    /// Track-table index per channel
    pub tracks: Vec<u16>,
}

/// Table sizes a format decoder discovered while parsing its header.
///
/// `tracks` defaults to `patterns * channels`; decoders that share tracks
/// between patterns or append an end-of-song filler track may request
/// headroom beyond that.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleSpec {
    /// Song title
    pub name: String,
    /// Channel count
    pub channels: u16,
    /// Entries in the position list
    pub positions: usize,
    /// Patterns in the pattern table
    pub patterns: usize,
    /// Track table size; 0 means `patterns * channels`
    pub tracks: usize,
    /// Sample slots
    pub samples: usize,
    /// Instrument slots (0 for sample-based formats)
    pub instruments: usize,
    /// Module behaviour flags
    #[serde(skip)]
    pub flags: ModuleFlags,
    /// Initial ticks per row
    pub initial_speed: u8,
    /// Initial tempo in BPM
    pub initial_tempo: u8,
    /// Initial global volume (0-128)
    pub initial_volume: u8,
}

impl Default for ModuleSpec {
    fn default() -> Self {
        ModuleSpec {
            name: String::new(),
            channels: 4,
            positions: 1,
            patterns: 1,
            tracks: 0,
            samples: 0,
            instruments: 0,
            flags: ModuleFlags::empty(),
            initial_speed: 6,
            initial_tempo: 125,
            initial_volume: 128,
        }
    }
}

/// The assembled song all format decoders converge to.
#[derive(Debug)]
pub struct UniMod {
    /// Song title
    pub name: String,
    /// Behaviour flags
    pub flags: ModuleFlags,
    /// Channel count
    pub channels: u16,
    /// Ordered pattern indices; [`POS_END`] terminates the song early
    pub positions: Vec<u16>,
    /// Pattern table
    pub patterns: Vec<Pattern>,
    /// Track table; slots are filled by the decoder as tracks are built
    pub tracks: Vec<Option<Track>>,
    /// Sample table
    pub samples: Vec<Sample>,
    /// Instrument table, empty for sample-based formats
    pub instruments: Vec<Instrument>,
    /// Default panning per channel
    pub panning: Vec<u8>,
    /// Initial ticks per row
    pub initial_speed: u8,
    /// Initial tempo in BPM
    pub initial_tempo: u8,
    /// Initial global volume (0-128)
    pub initial_volume: u8,
}

/// Fallibly allocate a default-filled table.
///
/// Table sizes come straight from untrusted file headers, so a huge count
/// must surface as a load error instead of aborting the process.
fn alloc_table<T: Clone + Default>(len: usize, what: &str) -> Result<Vec<T>> {
    let mut table = Vec::new();
    table
        .try_reserve_exact(len)
        .map_err(|_| UniModError::Allocation(format!("{what} table of {len} entries")))?;
    table.resize(len, T::default());
    Ok(table)
}

impl UniMod {
    /// Allocate the position/pattern/track/sample/instrument tables for the
    /// counts in `spec`. Tables start empty (unfilled track slots, default
    /// patterns) and are populated by the decoder.
    pub fn allocate(spec: &ModuleSpec) -> Result<Self> {
        let track_count = if spec.tracks == 0 {
            spec.patterns * spec.channels as usize
        } else {
            spec.tracks
        };
        if track_count < spec.patterns * spec.channels as usize {
            return Err(UniModError::MalformedModule(format!(
                "track table of {track_count} cannot cover {} patterns x {} channels",
                spec.patterns, spec.channels
            )));
        }

        let mut patterns: Vec<Pattern> = alloc_table(spec.patterns, "pattern")?;
        for pattern in &mut patterns {
            pattern.rows = 64;
            pattern.tracks = alloc_table(spec.channels as usize, "pattern track map")?;
        }

        // Default layout: pattern p, channel c -> track p*channels + c.
        for (p, pattern) in patterns.iter_mut().enumerate() {
            for (c, slot) in pattern.tracks.iter_mut().enumerate() {
                *slot = (p * spec.channels as usize + c) as u16;
            }
        }

        let mut panning = alloc_table(spec.channels as usize, "panning")?;
        for (c, pan) in panning.iter_mut().enumerate() {
            // Classic L-R-R-L default
            *pan = match c & 3 {
                0 | 3 => 0x40,
                _ => 0xC0,
            };
        }

        Ok(UniMod {
            name: spec.name.clone(),
            flags: spec.flags,
            channels: spec.channels,
            positions: alloc_table(spec.positions, "position")?,
            patterns,
            tracks: alloc_table(track_count, "track")?,
            samples: alloc_table(spec.samples, "sample")?,
            instruments: alloc_table(spec.instruments, "instrument")?,
            panning,
            initial_speed: spec.initial_speed.max(1),
            initial_tempo: spec.initial_tempo.max(32),
            initial_volume: spec.initial_volume.min(128),
        })
    }

    /// Store a finished track in a track-table slot.
    pub fn set_track(&mut self, slot: usize, track: Track) -> Result<()> {
        let track_count = self.tracks.len();
        let entry = self.tracks.get_mut(slot).ok_or_else(|| {
            UniModError::MalformedModule(format!(
                "track slot {slot} out of range ({track_count})"
            ))
        })?;
        *entry = Some(track);
        Ok(())
    }

    /// The track played by `channel` in `pattern`, if that slot was filled.
    pub fn track_for(&self, pattern: usize, channel: usize) -> Option<&Track> {
        let index = *self.patterns.get(pattern)?.tracks.get(channel)? as usize;
        self.tracks.get(index)?.as_ref()
    }

    /// Pattern index at a position-list entry; `POS_END` past the end.
    pub fn pattern_at(&self, position: usize) -> u16 {
        self.positions.get(position).copied().unwrap_or(POS_END)
    }

    /// Rows of a pattern, defaulting to 64 for out-of-range indices.
    pub fn pattern_rows(&self, pattern: usize) -> u16 {
        self.patterns.get(pattern).map_or(64, |p| p.rows)
    }

    /// Number of playable entries before the first `POS_END` sentinel.
    pub fn song_length(&self) -> usize {
        self.positions
            .iter()
            .position(|&p| p == POS_END)
            .unwrap_or(self.positions.len())
    }
}
