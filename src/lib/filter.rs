//! Read filtering primitives used by the scan engine.
//!
//! This module exposes the [`ReadFilter`] trait along with the default
//! mapping-quality based implementation. Semantic filters (strandedness,
//! primary-alignment, barcode) live in the engine itself; a `ReadFilter`
//! decides pure per-record quality.

use rust_htslib::bam::record::Record;

/// A trait for filtering reads based on various criteria.
///
/// Implementations return `true` if the read passes the filter.
pub trait ReadFilter {
    fn filter_read(&self, read: &Record) -> bool;
}

/// A straightforward read filter: minimum mapping quality plus rejection of
/// duplicates and QC-failed reads.
pub struct DefaultReadFilter {
    min_mapq: u8,
}

impl DefaultReadFilter {
    pub fn new(min_mapq: u8) -> Self {
        Self { min_mapq }
    }
}

impl ReadFilter for DefaultReadFilter {
    #[inline(always)]
    fn filter_read(&self, read: &Record) -> bool {
        read.mapq() >= self.min_mapq && !read.is_duplicate() && !read.is_quality_check_failed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with_mapq(mapq: u8) -> Record {
        let mut record = Record::new();
        record.set(b"r", None, b"A", &[30]);
        record.set_mapq(mapq);
        record.set_flags(0);
        record
    }

    #[test]
    fn rejects_low_quality_reads() {
        let filter = DefaultReadFilter::new(30);
        assert!(!filter.filter_read(&record_with_mapq(10)));
    }

    #[test]
    fn accepts_high_quality_reads() {
        let filter = DefaultReadFilter::new(20);
        assert!(filter.filter_read(&record_with_mapq(25)));
    }

    #[test]
    fn rejects_duplicates() {
        let mut record = record_with_mapq(60);
        record.set_flags(1024);
        assert!(!DefaultReadFilter::new(0).filter_read(&record));
    }
}
