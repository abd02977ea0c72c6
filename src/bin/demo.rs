//! Demo renderer: builds a small synthetic module through the encoder API
//! and renders it to a WAV file.
//!
//! Usage: unimod-demo [output.wav]

use std::sync::Arc;

use unimod::export::{export_to_wav, ExportConfig};
use unimod::module::{ModuleSpec, Sample, SampleData};
use unimod::player::{ModPlayer, BASE_RATE};
use unimod::track::TrackBuilder;
use unimod::{ModuleFlags, UniMod};

/// A short square-wave beep sample.
fn beep_sample() -> Arc<SampleData> {
    let mut frames = Vec::with_capacity(2048);
    for i in 0..2048 {
        frames.push(if (i / 32) % 2 == 0 { 9000i16 } else { -9000i16 });
    }
    Arc::new(SampleData {
        frames,
        loop_mode: unimod::module::LoopMode::Forward,
        loop_start: 0,
        loop_end: 2048,
        base_rate: BASE_RATE,
    })
}

/// Assemble a two-channel, one-pattern module with a simple arpeggio line.
fn build_demo_module() -> unimod::Result<UniMod> {
    let mut module = UniMod::allocate(&ModuleSpec {
        name: "demo".into(),
        channels: 2,
        positions: 2,
        patterns: 1,
        samples: 1,
        ..ModuleSpec::default()
    })?;
    module.positions = vec![0, unimod::POS_END];
    module.patterns[0].rows = 16;
    module.samples[0] = Sample {
        name: "square".into(),
        volume: 48,
        panning: 128,
        data: Some(beep_sample()),
    };

    let melody = [25u8, 29, 32, 37, 32, 29, 25, 29, 32, 37, 41, 37, 32, 29, 25, 20];

    // Channel 0: the melody line.
    let mut builder = TrackBuilder::new();
    for &note in &melody {
        builder.put_note(note);
        builder.put_instrument(1);
        builder.close_row()?;
    }
    module.set_track(0, builder.finish()?)?;

    // Channel 1: a bass note every fourth row.
    for row in 0..16u16 {
        if row % 4 == 0 {
            builder.put_note(13);
            builder.put_instrument(1);
            builder.put_effect(0xC, 32, ModuleFlags::empty());
        }
        builder.close_row()?;
    }
    module.set_track(1, builder.finish()?)?;

    Ok(module)
}

fn main() -> unimod::Result<()> {
    let output = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "demo.wav".to_string());

    let module = build_demo_module()?;
    println!(
        "Rendering '{}': {} channels, {} pattern(s), {} position(s)",
        module.name,
        module.channels,
        module.patterns.len(),
        module.song_length()
    );

    let mut player = ModPlayer::new(Arc::new(module), 44_100)?;
    export_to_wav(&mut player, &output, ExportConfig::default())?;
    println!("Wrote {output}");
    Ok(())
}
