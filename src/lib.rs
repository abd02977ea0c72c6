//! Tracker module playback engine
//!
//! A playback core for classic tracker music. Legacy module formats
//! (MOD-family, S3M-family, XM-family, IT-family and friends) are converted
//! by external decoders into a single unified representation ("UniMod"):
//! every pattern cell becomes a compact opcode stream ("track"), and the
//! player interprets those opcodes in real time while a ring-buffered mixer
//! renders the audio ahead of the output callback.
//!
//! # Features
//! - Compact per-channel opcode encoding with run-length row compression
//! - Unified module model: positions, patterns, tracks, samples, instruments
//! - Per-voice software mixer: resampling, panning, loops, stereo separation,
//!   Amiga low-pass filter emulation
//! - Ring-buffered producer/consumer pipeline that never blocks the audio
//!   callback, with glitch-free position changes
//!
//! # Crate feature flags
//! - `player` (default): reference pattern player implementing [`ChunkSource`]
//! - `streaming` (opt-in): real-time audio output (enables optional `rodio` dep)
//! - `export-wav` (opt-in): WAV rendering of a chunk source (enables `hound`)
//!
//! # Quick start
//! ## Build a track and read it back
//! ```
//! use unimod::opcode;
//! use unimod::track::{TrackBuilder, TrackReader};
//!
//! let mut builder = TrackBuilder::new();
//! builder.put_note(48);
//! builder.put_instrument(1);
//! builder.close_row().unwrap();
//! let track = builder.finish().unwrap();
//!
//! let mut reader = TrackReader::for_row(&track, 0).unwrap();
//! assert_eq!(reader.next_byte(), opcode::op::NOTE);
//! assert_eq!(reader.next_byte(), 48);
//! ```
//!
//! ## Real-time playback
//! ```no_run
//! # #[cfg(all(feature = "player", feature = "streaming"))]
//! # fn main() -> unimod::Result<()> {
//! use parking_lot::Mutex;
//! use std::sync::Arc;
//! use unimod::player::ModPlayer;
//! use unimod::ring::{RingConfig, RingScheduler};
//! use unimod::streaming::{AudioDevice, StreamConfig};
//! # let module = unimod::UniMod::allocate(&unimod::ModuleSpec::default())?;
//!
//! let player = ModPlayer::new(Arc::new(module), 44_100)?;
//! let source = Arc::new(Mutex::new(player));
//! let (scheduler, events) = RingScheduler::new(source, RingConfig::default())?;
//! scheduler.start()?;
//! let _dev = AudioDevice::new(StreamConfig::default(), Arc::clone(&scheduler))?;
//! for event in events.iter() {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! # #[cfg(not(all(feature = "player", feature = "streaming")))]
//! # fn main() {}
//! ```

#![warn(missing_docs)]

pub mod loader; // Format decoder seam
pub mod mixer; // Per-voice channel mixer
pub mod module; // UniMod data model & assembly
pub mod opcode; // Opcode numbers & operand widths
#[cfg(feature = "player")]
pub mod player; // Reference pattern player
pub mod ring; // Ring-buffered scheduler
pub mod source; // Chunk source seam & events
#[cfg(feature = "streaming")]
pub mod streaming; // Audio output
pub mod track; // Track encoder/decoder

#[cfg(feature = "export-wav")]
pub mod export; // WAV rendering

/// Error types for module loading and playback operations
#[derive(thiserror::Error, Debug)]
pub enum UniModError {
    /// Buffer or table allocation failed during load/init
    #[error("Allocation error: {0}")]
    Allocation(String),

    /// A track's byte stream is corrupt (bad header or opcode)
    #[error("Malformed track data: {0}")]
    MalformedTrack(String),

    /// Module data outside the track streams is inconsistent
    #[error("Malformed module: {0}")]
    MalformedModule(String),

    /// IO error from filesystem or device
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Audio device error
    #[error("Audio device error: {0}")]
    AudioDevice(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for UniModError {
    /// Converts a String into `UniModError::Other`.
    ///
    /// Convenience for generic string errors; prefer the specific variant
    /// constructors where the failure class is known.
    fn from(msg: String) -> Self {
        UniModError::Other(msg)
    }
}

impl From<&str> for UniModError {
    /// Converts a string slice into `UniModError::Other`.
    fn from(msg: &str) -> Self {
        UniModError::Other(msg.to_string())
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, UniModError>;

// Public API exports
pub use loader::{load_module, ModuleFormat};
pub use mixer::{MixerMode, MixerSettings};
pub use module::{ModuleFlags, ModuleSpec, UniMod, POS_END};
#[cfg(feature = "player")]
pub use player::ModPlayer;
pub use ring::{RingConfig, RingScheduler};
pub use source::{Chunk, ChunkSource, PlayerEvent, SongPosition};
pub use track::{Track, TrackBuilder, TrackReader};

#[cfg(feature = "export-wav")]
pub use export::{export_to_wav, ExportConfig};
#[cfg(feature = "streaming")]
pub use streaming::{AudioDevice, StreamConfig};
