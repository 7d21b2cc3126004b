//! Buffer for paired records whose mate has not been seen yet.
//!
//! Keyed by read name, with a vector per key so that several alignments of
//! the same template (multi-mappers, name collisions) can wait at once. A
//! candidate only matches when file, template role, and both mate-position
//! cross-references line up.

use rust_htslib::bam::record::Record;
use rustc_hash::FxHashMap;

pub struct PendingMate {
    pub record: Record,
    pub file: usize,
}

#[derive(Default)]
pub struct MateBuffer {
    pending: FxHashMap<Vec<u8>, Vec<PendingMate>>,
    len: usize,
}

impl MateBuffer {
    pub fn new() -> MateBuffer {
        MateBuffer::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push(&mut self, record: Record, file: usize) {
        self.pending
            .entry(record.qname().to_vec())
            .or_default()
            .push(PendingMate { record, file });
        self.len += 1;
    }

    /// Remove and return the buffered mate of `record`, if present.
    pub fn take_mate(&mut self, record: &Record, file: usize) -> Option<PendingMate> {
        let entries = self.pending.get_mut(record.qname())?;
        let index = entries.iter().position(|p| {
            p.file == file
                && p.record.is_first_in_template() != record.is_first_in_template()
                && p.record.pos() == record.mpos()
                && p.record.mpos() == record.pos()
        })?;
        let found = entries.swap_remove(index);
        if entries.is_empty() {
            self.pending.remove(record.qname());
        }
        self.len -= 1;
        Some(found)
    }

    /// Smallest alignment start among all buffered records.
    pub fn min_position(&self) -> Option<i64> {
        self.pending
            .values()
            .flat_map(|v| v.iter().map(|p| p.record.pos()))
            .min()
    }

    pub fn drain(&mut self) -> Vec<PendingMate> {
        self.len = 0;
        let mut out: Vec<PendingMate> = self
            .pending
            .drain()
            .flat_map(|(_, v)| v.into_iter())
            .collect();
        out.sort_by_key(|p| p.record.pos());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_htslib::bam::record::{Cigar, CigarString};

    fn paired(name: &[u8], pos: i64, mpos: i64, first: bool) -> Record {
        let mut rec = Record::new();
        rec.set(name, Some(&CigarString(vec![Cigar::Match(5)])), b"AAAAA", &[30; 5]);
        rec.set_pos(pos);
        rec.set_mpos(mpos);
        rec.set_tid(0);
        rec.set_mtid(0);
        rec.set_flags(1 | if first { 64 } else { 128 });
        rec
    }

    #[test]
    fn mates_match_on_cross_referenced_positions() {
        let mut buffer = MateBuffer::new();
        buffer.push(paired(b"a", 100, 200, true), 0);
        assert_eq!(buffer.len(), 1);

        // wrong position cross-reference: no match
        let stranger = paired(b"a", 250, 100, false);
        assert!(buffer.take_mate(&stranger, 0).is_none());

        let mate = paired(b"a", 200, 100, false);
        let taken = buffer.take_mate(&mate, 0).unwrap();
        assert_eq!(taken.record.pos(), 100);
        assert!(buffer.is_empty());
    }

    #[test]
    fn name_collisions_resolve_by_position() {
        // two alignments of the same template buffered at once
        let mut buffer = MateBuffer::new();
        buffer.push(paired(b"a", 100, 200, true), 0);
        buffer.push(paired(b"a", 500, 600, true), 0);
        assert_eq!(buffer.len(), 2);

        let mate = paired(b"a", 600, 500, false);
        let taken = buffer.take_mate(&mate, 0).unwrap();
        assert_eq!(taken.record.pos(), 500);
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.min_position(), Some(100));
    }

    #[test]
    fn files_do_not_cross_pair() {
        let mut buffer = MateBuffer::new();
        buffer.push(paired(b"a", 100, 200, true), 0);
        let mate = paired(b"a", 200, 100, false);
        assert!(buffer.take_mate(&mate, 1).is_none());
        assert!(buffer.take_mate(&mate, 0).is_some());
    }

    #[test]
    fn drain_is_position_sorted() {
        let mut buffer = MateBuffer::new();
        buffer.push(paired(b"b", 300, 400, true), 0);
        buffer.push(paired(b"a", 100, 200, true), 0);
        let drained = buffer.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].record.pos(), 100);
        assert!(buffer.is_empty());
    }
}
