//! Single-buffer direct mode
//!
//! Some sinks cannot afford a filler thread; in direct mode the audio
//! callback renders straight from the source. The source lock is taken
//! with a try-lock so the callback still never blocks: if the control
//! thread holds the player, the callback gets silence.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::source::{ChunkSource, PlayerEvent, SongPosition};

/// Synchronous renderer for callback-driven sinks.
pub struct DirectRenderer {
    source: Arc<Mutex<dyn ChunkSource>>,
    last_position: Option<SongPosition>,
    ended: bool,
}

impl DirectRenderer {
    /// Wrap a shared source.
    pub fn new(source: Arc<Mutex<dyn ChunkSource>>) -> Self {
        DirectRenderer {
            source,
            last_position: None,
            ended: false,
        }
    }

    /// Render `dest` synchronously, returning any events the chunk caused.
    ///
    /// Never blocks: source contention yields silence and no events.
    pub fn render(&mut self, dest: &mut [f32]) -> Vec<PlayerEvent> {
        let mut events = Vec::new();
        if self.ended {
            dest.fill(0.0);
            return events;
        }
        let Some(mut source) = self.source.try_lock() else {
            dest.fill(0.0);
            return events;
        };
        let chunk = source.render(dest);
        drop(source);

        if self.last_position != Some(chunk.position) {
            self.last_position = Some(chunk.position);
            events.push(PlayerEvent::Position(chunk.position));
        }
        if chunk.ended.is_some() {
            // Anything past the end offset is already silence in the chunk.
            self.ended = true;
            events.push(PlayerEvent::SongEnded(chunk.position));
            events.push(PlayerEvent::ModuleEnded);
        }
        events
    }

    /// Jump to a new position and resume rendering.
    pub fn seek(&mut self, position: SongPosition) {
        self.source.lock().seek(position);
        self.last_position = None;
        self.ended = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Chunk;

    struct OneChunkSource {
        rendered: bool,
    }

    impl ChunkSource for OneChunkSource {
        fn render(&mut self, out: &mut [f32]) -> Chunk {
            out.fill(0.5);
            let ended = if self.rendered { Some(0) } else { None };
            self.rendered = true;
            Chunk {
                position: SongPosition::default(),
                ended,
            }
        }

        fn seek(&mut self, _position: SongPosition) {
            self.rendered = false;
        }

        fn channels(&self) -> u16 {
            1
        }
    }

    #[test]
    fn test_direct_render_reports_position_once() {
        let source = Arc::new(Mutex::new(OneChunkSource { rendered: false }));
        let mut direct = DirectRenderer::new(source);

        let mut buf = [0.0f32; 4];
        let first = direct.render(&mut buf);
        assert_eq!(first, vec![PlayerEvent::Position(SongPosition::default())]);
        assert!(buf.iter().all(|&s| s == 0.5));
    }

    #[test]
    fn test_direct_render_silences_after_end() {
        let source = Arc::new(Mutex::new(OneChunkSource { rendered: false }));
        let mut direct = DirectRenderer::new(source);

        let mut buf = [0.0f32; 4];
        direct.render(&mut buf);
        let second = direct.render(&mut buf);
        assert!(second.contains(&PlayerEvent::ModuleEnded));

        let third = direct.render(&mut buf);
        assert!(third.is_empty());
        assert!(buf.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_contended_source_yields_silence() {
        let source: Arc<Mutex<dyn ChunkSource>> =
            Arc::new(Mutex::new(OneChunkSource { rendered: false }));
        let mut direct = DirectRenderer::new(Arc::clone(&source));

        let _held = source.lock();
        let mut buf = [1.0f32; 4];
        let events = direct.render(&mut buf);
        assert!(events.is_empty());
        assert!(buf.iter().all(|&s| s == 0.0), "contention must yield silence");
    }
}
