//! Chunk source seam and playback events
//!
//! The ring scheduler does not know anything about patterns or effects; it
//! drives a [`ChunkSource`] that renders fixed-size chunks of interleaved
//! `f32` frames and stamps each chunk with the logical song position it
//! represents. The reference player implements this trait; embedding
//! applications may supply their own source.

use serde::{Deserialize, Serialize};

use crate::mixer::MixerMode;

/// A logical song-progress marker stamped onto every rendered chunk.
///
/// The scheduler treats it as an opaque stamp; only equality matters for
/// the reporting protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SongPosition {
    /// Index into the module's position list
    pub order: u16,
    /// Row within the playing pattern
    pub row: u16,
}

impl SongPosition {
    /// Position at the start of a position-list entry.
    pub fn at_order(order: u16) -> Self {
        SongPosition { order, row: 0 }
    }
}

/// Result of rendering one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Song position the chunk's first frame belongs to
    pub position: SongPosition,
    /// Frame offset at which the song ended inside this chunk, if it did.
    /// Frames past the offset are silence.
    pub ended: Option<usize>,
}

/// Renders audio chunks on demand for the ring scheduler.
///
/// Implementations run under the shared player lock: the producer thread
/// calls [`render`](ChunkSource::render) while the control thread may call
/// [`seek`](ChunkSource::seek) or query state, never concurrently.
pub trait ChunkSource: Send {
    /// Fill `out` completely with interleaved frames and report the chunk's
    /// position. When the song ends mid-chunk, the remainder is zeroed and
    /// the end offset (in frames) is reported.
    fn render(&mut self, out: &mut [f32]) -> Chunk;

    /// Jump to a new logical position. The next `render` starts there.
    fn seek(&mut self, position: SongPosition);

    /// Interleaved output channels per frame.
    fn channels(&self) -> u16 {
        2
    }

    /// Output sample rate in Hz.
    fn sample_rate(&self) -> u32 {
        44_100
    }

    /// Stereo separation change from the control layer (0 centred .. 100
    /// separated). Default does nothing; override when the source owns a
    /// mixer.
    fn set_stereo_separation(&mut self, _percent: u8) {}

    /// Mixer mode flag change from the control layer.
    fn set_mixer_mode(&mut self, _flags: MixerMode, _enable: bool) {}

    /// Amiga low-pass filter toggle from the control layer.
    fn enable_amiga_filter(&mut self, _enabled: bool) {}

    /// Channel enable/disable from the control layer.
    fn enable_channel(&mut self, _channel: usize, _enabled: bool) {}
}

/// Asynchronous notifications delivered to the control layer.
///
/// Events are emitted in the order the corresponding audio was actually
/// played, not the order it was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerEvent {
    /// Playback crossed into a chunk stamped with a new position
    Position(SongPosition),
    /// The last audible frame of the song was just played at this position
    SongEnded(SongPosition),
    /// Playback of the module is over; no further audio follows
    ModuleEnded,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_stamp_equality() {
        let a = SongPosition { order: 2, row: 16 };
        assert_eq!(a, SongPosition { order: 2, row: 16 });
        assert_ne!(a, SongPosition::at_order(2));
    }

    #[test]
    fn test_position_serializes() {
        let pos = SongPosition { order: 1, row: 32 };
        let json = serde_json::to_string(&pos).unwrap();
        let back: SongPosition = serde_json::from_str(&json).unwrap();
        assert_eq!(pos, back);
    }
}
