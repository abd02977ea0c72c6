//! WAV file export

use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};

use super::ExportConfig;
use crate::source::ChunkSource;
use crate::{Result, UniModError};

fn wav_err(e: hound::Error) -> UniModError {
    UniModError::Other(format!("WAV write error: {e}"))
}

/// Render a chunk source to a 16-bit PCM WAV file.
///
/// Pulls chunks until the source reports the end of the song (rendering
/// stops exactly at the reported end offset) or the configured duration
/// cap is reached.
pub fn export_to_wav<P: AsRef<Path>>(
    source: &mut dyn ChunkSource,
    output_path: P,
    config: ExportConfig,
) -> Result<()> {
    let channels = source.channels();
    let sample_rate = source.sample_rate();
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(output_path, spec).map_err(wav_err)?;

    let mut chunk = vec![0.0f32; config.chunk_frames * channels as usize];
    let max_frames = config.max_seconds as u64 * sample_rate as u64;
    let mut rendered: u64 = 0;

    while rendered < max_frames {
        let info = source.render(&mut chunk);
        let frames = match info.ended {
            Some(end) => end,
            None => config.chunk_frames,
        };
        for &sample in &chunk[..frames * channels as usize] {
            let value = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
            writer.write_sample(value).map_err(wav_err)?;
        }
        rendered += frames as u64;
        if info.ended.is_some() {
            break;
        }
    }

    writer.finalize().map_err(wav_err)?;
    Ok(())
}
