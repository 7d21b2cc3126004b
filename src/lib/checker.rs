//! Optional instrumentation that re-derives variation content from the raw
//! records and compares it against what an aggregation produced.
//!
//! Side-channel only: disagreements go to the diagnostic log and a failure
//! counter, never into the returned data. Only single-distinct-sequence
//! aggregations can be checked, since the re-derivation has no dedup key to
//! select a distinct sequence by.

use log::error;
use rust_htslib::bam::record::Record;

use crate::model::{ReadRegion, RegionReadData, Variation};
use crate::reconstruct::{self, ReferenceBases};

#[derive(Debug, Default)]
pub struct ConsistencyChecker {
    checked: u64,
    failures: u64,
}

impl ConsistencyChecker {
    pub fn checked(&self) -> u64 {
        self.checked
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Re-derive a single record's variations and compare. Returns `true`
    /// when the aggregation agrees.
    pub fn verify_single(
        &mut self,
        record: &Record,
        region: &ReadRegion,
        data: &RegionReadData,
        variant_tag: &[u8; 2],
    ) -> bool {
        let expected = match reconstruct::extract_variations(record, region, false, variant_tag) {
            Ok(v) => v,
            Err(e) => {
                self.record_failure(record, &format!("re-derivation failed: {}", e));
                return false;
            }
        };
        self.compare(record, data, expected)
    }

    /// Re-derive a mate pair's variations and compare.
    pub fn verify_pair(
        &mut self,
        first: &Record,
        second: &Record,
        region: &ReadRegion,
        data: &RegionReadData,
        variant_tag: &[u8; 2],
    ) -> bool {
        let derived = reconstruct::extract_variations(first, region, false, variant_tag)
            .and_then(|mut v| {
                v.extend(reconstruct::extract_variations(
                    second,
                    region,
                    true,
                    variant_tag,
                )?);
                Ok(v)
            });
        let expected = match derived {
            Ok(v) => v,
            Err(e) => {
                self.record_failure(first, &format!("re-derivation failed: {}", e));
                return false;
            }
        };
        self.compare(first, data, expected)
    }

    /// Verify against an explicit genomic sequence instead of tag evidence.
    pub fn verify_against_genome(
        &mut self,
        record: &Record,
        region: &ReadRegion,
        data: &RegionReadData,
        genome: &[u8],
        genome_offset: i64,
    ) -> bool {
        let reference = ReferenceBases::Genome {
            seq: genome,
            offset: genome_offset,
        };
        let expected =
            match reconstruct::extract_with_reference(record, region, false, &reference) {
                Ok(v) => v,
                Err(e) => {
                    self.record_failure(record, &format!("re-derivation failed: {}", e));
                    return false;
                }
            };
        self.compare(record, data, expected)
    }

    fn compare(
        &mut self,
        record: &Record,
        data: &RegionReadData,
        expected: Vec<Variation>,
    ) -> bool {
        self.checked += 1;
        let distinct = match (data.len(), data.get(0)) {
            (1, Some(d)) => d,
            _ => {
                self.record_failure(record, "aggregation is not single-distinct");
                return false;
            }
        };
        if distinct.variations != expected {
            self.record_failure(
                record,
                &format!(
                    "stored variations {:?} disagree with re-derived {:?}",
                    distinct.variations, expected
                ),
            );
            return false;
        }
        true
    }

    fn record_failure(&mut self, record: &Record, detail: &str) {
        self.failures += 1;
        error!(
            "consistency check failed for read {}: {}",
            String::from_utf8_lossy(record.qname()),
            detail
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::region::ReadRegion;
    use rust_htslib::bam::record::{Aux, Cigar, CigarString, Record};

    fn record(seq: &[u8], md: &str) -> Record {
        let mut rec = Record::new();
        let quals = vec![30u8; seq.len()];
        rec.set(
            b"1",
            Some(&CigarString(vec![Cigar::Match(seq.len() as u32)])),
            seq,
            &quals,
        );
        rec.set_pos(100);
        rec.set_tid(0);
        rec.set_flags(0);
        rec.push_aux(b"MD", Aux::String(md)).unwrap();
        rec
    }

    fn aggregate(rec: &Record) -> (ReadRegion, RegionReadData) {
        use crate::config::{ConditionLayout, SourceOptions};
        use crate::factory::ReadDataFactory;
        use crate::model::GapPolicy;
        use std::sync::Arc;

        let sources = vec![SourceOptions::default()];
        let mut factory = ReadDataFactory::new(
            ConditionLayout::from_sources(&sources),
            Arc::new(sources),
            GapPolicy::MissingIntron,
            false,
        );
        let region = ReadRegion::from_record(rec).unwrap();
        factory.start(region.clone());
        factory.add_single(rec, 0).unwrap();
        (region, factory.create().unwrap())
    }

    #[test]
    fn consistent_aggregation_passes() {
        let rec = record(b"ACGTT", "4A0");
        let (region, data) = aggregate(&rec);
        let mut checker = ConsistencyChecker::default();
        assert!(checker.verify_single(&rec, &region, &data, b"XV"));
        assert_eq!(checker.failures(), 0);
        assert_eq!(checker.checked(), 1);
    }

    #[test]
    fn genome_verification_catches_divergence() {
        let rec = record(b"ACGTT", "4A0");
        let (region, data) = aggregate(&rec);
        let mut checker = ConsistencyChecker::default();
        // genome slice agreeing with the MD tag: ACGTA at 100
        assert!(checker.verify_against_genome(&rec, &region, &data, b"ACGTA", 100));
        // a genome that contradicts the stored mismatch
        assert!(!checker.verify_against_genome(&rec, &region, &data, b"ACGTT", 100));
        assert_eq!(checker.failures(), 1);
    }
}
