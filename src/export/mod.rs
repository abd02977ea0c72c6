//! Audio export
//!
//! Offline rendering of a chunk source to an audio file. Rendering runs
//! the same code path as real-time playback, just without the ring
//! pipeline: chunks are pulled until the source reports the song end or a
//! safety duration cap is hit.

mod wav;

pub use wav::export_to_wav;

use serde::{Deserialize, Serialize};

/// Export parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Frames pulled from the source per chunk
    pub chunk_frames: usize,
    /// Hard cap on the rendered length, in seconds, for sources that
    /// never report an end (jump-looped songs)
    pub max_seconds: u32,
}

impl Default for ExportConfig {
    fn default() -> Self {
        ExportConfig {
            chunk_frames: 1024,
            max_seconds: 600,
        }
    }
}
