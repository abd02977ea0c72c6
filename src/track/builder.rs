//! Track encoder
//!
//! Builds one voice's per-pattern opcode stream row by row. Rows are
//! buffered until [`TrackBuilder::close_row`], which either appends the row
//! or, when it is byte-identical to the previous row, bumps the previous
//! header's repeat count instead.

use super::{Track, MAX_ROW_BYTES, MAX_ROW_REPEAT};
use crate::module::ModuleFlags;
use crate::opcode::{op, operand_width};
use crate::{Result, UniModError};

/// Scratch buffer growth step in bytes.
const BUF_INCREMENT: usize = 128;

/// Row-oriented opcode stream writer with run-length row compression.
///
/// Format decoders drive this once per channel per pattern: emit the cell's
/// opcodes, `close_row`, repeat for every row, then `finish` to take the
/// compacted track.
#[derive(Debug, Default)]
pub struct TrackBuilder {
    /// Committed rows (headers plus opcode bytes)
    buf: Vec<u8>,
    /// Pending opcode bytes of the row being written
    row: Vec<u8>,
    /// Offset of the previous row's header byte in `buf`
    prev_row: Option<usize>,
    /// First emission error; sticky until `finish` or `reset`
    error: Option<UniModError>,
}

impl TrackBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a new track, clearing the write cursor and the previous-row
    /// marker. Already-allocated scratch capacity is kept.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.row.clear();
        self.prev_row = None;
        self.error = None;
    }

    /// Append an opcode and its operand bytes to the current row.
    ///
    /// Opcode 0 is silently ignored. Operand bits beyond the opcode's
    /// declared width are masked off; a 2-byte operand is written high byte
    /// first.
    pub fn put_opcode(&mut self, opcode: u8, data: u16) {
        if opcode == 0 {
            return;
        }
        let Some(width) = operand_width(opcode) else {
            self.fail(UniModError::MalformedTrack(format!(
                "emitted unknown opcode {opcode}"
            )));
            return;
        };
        self.push_row(opcode);
        match width {
            0 => {}
            1 => self.push_row(data as u8),
            _ => {
                self.push_row((data >> 8) as u8);
                self.push_row(data as u8);
            }
        }
    }

    /// Append a note-on opcode.
    pub fn put_note(&mut self, note: u8) {
        self.put_opcode(op::NOTE, note as u16);
    }

    /// Append an instrument-select opcode.
    pub fn put_instrument(&mut self, index: u8) {
        self.put_opcode(op::INSTRUMENT, index as u16);
    }

    /// Append a Protracker-style effect from the generic effect column.
    ///
    /// Effect 0 with zero data is an empty cell and is skipped entirely,
    /// unless the module relies on arpeggio memory (`ARP_MEM`), where a
    /// bare effect 0 still re-triggers the remembered arpeggio.
    pub fn put_effect(&mut self, effect: u8, data: u8, flags: ModuleFlags) {
        debug_assert!(effect <= 0xF, "generic effect column is one nibble");
        if effect == 0 && data == 0 && !flags.contains(ModuleFlags::ARP_MEM) {
            return;
        }
        self.put_opcode(op::PT_EFFECT_0 + (effect & 0xF), data as u16);
    }

    /// Append a volume-column compound opcode, skipped when both the
    /// sub-effect and its value are zero.
    pub fn put_volume_effect(&mut self, sub: u8, data: u8) {
        if sub == 0 && data == 0 {
            return;
        }
        self.put_opcode(op::VOL_EFFECT, ((sub as u16) << 8) | data as u16);
    }

    /// Finalize the current row.
    ///
    /// A row byte-identical to the previous one whose repeat count has not
    /// yet saturated is folded into that header; otherwise the row is
    /// appended with a fresh header. Returns an error if the row exceeded
    /// [`MAX_ROW_BYTES`] of opcodes (the offending row is dropped).
    pub fn close_row(&mut self) -> Result<()> {
        if self.row.len() > MAX_ROW_BYTES {
            let msg = format!(
                "row of {} opcode bytes exceeds the {MAX_ROW_BYTES}-byte row limit",
                self.row.len()
            );
            self.row.clear();
            self.fail(UniModError::MalformedTrack(msg.clone()));
            return Err(UniModError::MalformedTrack(msg));
        }

        if let Some(prev) = self.prev_row {
            let header = self.buf[prev];
            let prev_len = (header & 0x1F) as usize - 1;
            let repeat = (header >> 5) + 1;
            if repeat < MAX_ROW_REPEAT && self.buf[prev + 1..prev + 1 + prev_len] == self.row[..] {
                // Identical to the previous row: bump its repeat count and
                // rewind instead of writing anything.
                self.buf[prev] = header + (1 << 5);
                self.row.clear();
                return Ok(());
            }
        }

        let header_off = self.buf.len();
        self.push_buf((self.row.len() + 1) as u8);
        self.flush_row_to_buf();
        self.prev_row = Some(header_off);
        Ok(())
    }

    /// Write the terminating header and return the track as an exact-size
    /// owned buffer, resetting the builder for the next track.
    ///
    /// Surfaces any emission error recorded since the last reset
    /// (allocation failure, row overflow, unknown opcode).
    pub fn finish(&mut self) -> Result<Track> {
        self.push_buf(0);
        if let Some(err) = self.error.take() {
            self.reset();
            return Err(err);
        }
        let track = Track::from_bytes(self.buf.as_slice().into());
        self.reset();
        Ok(track)
    }

    /// Bytes committed so far, pending row and terminator excluded.
    pub fn encoded_len(&self) -> usize {
        self.buf.len()
    }

    fn fail(&mut self, err: UniModError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    fn push_row(&mut self, byte: u8) {
        if Self::grow(&mut self.row, 1, &mut self.error) {
            self.row.push(byte);
        }
    }

    fn push_buf(&mut self, byte: u8) {
        if Self::grow(&mut self.buf, 1, &mut self.error) {
            self.buf.push(byte);
        }
    }

    fn flush_row_to_buf(&mut self) {
        if Self::grow(&mut self.buf, self.row.len(), &mut self.error) {
            self.buf.extend_from_slice(&self.row);
        }
        self.row.clear();
    }

    /// Grow a scratch buffer in fixed increments; allocation failure is
    /// recorded as a fatal error for this track. Returns whether the write
    /// may proceed.
    fn grow(target: &mut Vec<u8>, extra: usize, error: &mut Option<UniModError>) -> bool {
        if error.is_some() {
            return false;
        }
        let needed = target.len() + extra;
        if needed > target.capacity() {
            let rounded = needed.div_ceil(BUF_INCREMENT) * BUF_INCREMENT;
            if target.try_reserve_exact(rounded - target.len()).is_err() {
                *error = Some(UniModError::Allocation(format!(
                    "track buffer growth to {rounded} bytes failed"
                )));
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::{locate_row, row_count, TrackReader};

    #[test]
    fn test_single_row_layout() {
        let mut builder = TrackBuilder::new();
        builder.put_note(48);
        builder.put_instrument(2);
        builder.close_row().unwrap();
        let track = builder.finish().unwrap();

        // header(5 bytes incl itself) + NOTE,48 + INSTRUMENT,2 + terminator
        assert_eq!(track.as_bytes(), &[5, op::NOTE, 48, op::INSTRUMENT, 2, 0]);
    }

    #[test]
    fn test_identical_rows_fold_into_repeat() {
        let mut builder = TrackBuilder::new();
        for _ in 0..3 {
            builder.put_note(36);
            builder.close_row().unwrap();
        }
        builder.put_note(38);
        builder.close_row().unwrap();
        let track = builder.finish().unwrap();

        // Two headers: note 36 x3, note 38 x1.
        assert_eq!(
            track.as_bytes(),
            &[(2 << 5) | 3, op::NOTE, 36, 3, op::NOTE, 38, 0]
        );
        assert_eq!(track.rows(), 4);
        assert_eq!(locate_row(&track, 2), Some(0));
        assert_eq!(locate_row(&track, 3), Some(3));
    }

    #[test]
    fn test_dedup_is_smaller_than_verbatim() {
        let mut deduped = TrackBuilder::new();
        let mut verbatim_len = 0usize;
        for _ in 0..5 {
            deduped.put_note(40);
            deduped.put_instrument(1);
            deduped.close_row().unwrap();
            verbatim_len += 1 + 4; // header + two opcodes with operands
        }
        let track = deduped.finish().unwrap();
        assert!(
            track.len() < verbatim_len + 1,
            "5 identical rows must encode smaller than verbatim ({} vs {})",
            track.len(),
            verbatim_len + 1
        );
    }

    #[test]
    fn test_repeat_count_saturates_at_eight() {
        let mut builder = TrackBuilder::new();
        for _ in 0..9 {
            builder.put_note(50);
            builder.close_row().unwrap();
        }
        let track = builder.finish().unwrap();

        // 9 repeats overflow one 3-bit header: expect 8x + 1x.
        assert_eq!(
            track.as_bytes(),
            &[(7 << 5) | 3, op::NOTE, 50, 3, op::NOTE, 50, 0]
        );
        assert_eq!(track.rows(), 9);
        for row in 0..9 {
            let mut reader = TrackReader::for_row(&track, row).unwrap();
            assert_eq!(reader.next_byte(), op::NOTE);
            assert_eq!(reader.next_byte(), 50);
        }
    }

    #[test]
    fn test_empty_rows_compress() {
        let mut builder = TrackBuilder::new();
        for _ in 0..4 {
            builder.close_row().unwrap();
        }
        let track = builder.finish().unwrap();
        assert_eq!(track.as_bytes(), &[(3 << 5) | 1, 0]);
        assert_eq!(row_count(&track), 4);
    }

    #[test]
    fn test_opcode_zero_is_ignored() {
        let mut builder = TrackBuilder::new();
        builder.put_opcode(0, 0x1234);
        builder.close_row().unwrap();
        let track = builder.finish().unwrap();
        assert_eq!(track.as_bytes(), &[1, 0]);
    }

    #[test]
    fn test_empty_effect_is_suppressed() {
        let mut builder = TrackBuilder::new();
        builder.put_note(30);
        builder.put_effect(0, 0, ModuleFlags::empty());
        builder.close_row().unwrap();
        let track = builder.finish().unwrap();
        assert_eq!(track.as_bytes(), &[3, op::NOTE, 30, 0]);
    }

    #[test]
    fn test_arpeggio_memory_keeps_empty_effect() {
        let mut builder = TrackBuilder::new();
        builder.put_effect(0, 0, ModuleFlags::ARP_MEM);
        builder.close_row().unwrap();
        let track = builder.finish().unwrap();
        assert_eq!(track.as_bytes(), &[3, op::PT_EFFECT_0, 0, 0]);
    }

    #[test]
    fn test_volume_effect_suppression_and_operands() {
        let mut builder = TrackBuilder::new();
        builder.put_volume_effect(0, 0);
        builder.put_volume_effect(1, 32);
        builder.close_row().unwrap();
        let track = builder.finish().unwrap();
        assert_eq!(track.as_bytes(), &[4, op::VOL_EFFECT, 1, 32, 0]);
    }

    #[test]
    fn test_word_operand_round_trip() {
        let mut builder = TrackBuilder::new();
        builder.put_opcode(op::ULT_EFFECT_9, 0xABCD);
        builder.close_row().unwrap();
        let track = builder.finish().unwrap();

        let mut reader = TrackReader::for_row(&track, 0).unwrap();
        assert_eq!(reader.next_byte(), op::ULT_EFFECT_9);
        assert_eq!(reader.next_word(), 0xABCD);
    }

    #[test]
    fn test_row_overflow_is_an_error() {
        let mut builder = TrackBuilder::new();
        for _ in 0..16 {
            builder.put_note(1); // 2 bytes each, 32 total
        }
        assert!(builder.close_row().is_err());
        assert!(builder.finish().is_err());
    }

    #[test]
    fn test_reset_discards_sticky_error() {
        let mut builder = TrackBuilder::new();
        builder.put_opcode(0xEE, 0); // unknown opcode
        builder.reset();
        builder.put_note(20);
        builder.close_row().unwrap();
        assert!(builder.finish().is_ok());
    }

    #[test]
    fn test_builder_is_reusable_after_finish() {
        let mut builder = TrackBuilder::new();
        builder.put_note(10);
        builder.close_row().unwrap();
        let first = builder.finish().unwrap();

        builder.put_note(20);
        builder.close_row().unwrap();
        let second = builder.finish().unwrap();

        assert_eq!(first.as_bytes(), &[3, op::NOTE, 10, 0]);
        assert_eq!(second.as_bytes(), &[3, op::NOTE, 20, 0]);
    }
}
