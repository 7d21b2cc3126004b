//! The read-data aggregation factory.
//!
//! One factory aggregates all records (and mate pairs) that induce the same
//! [`ReadRegion`] into a [`RegionReadData`]: records deduplicate by CIGAR
//! plus variant evidence into distinct sequences, each carrying
//! per-condition counts sliced out of the global condition vector by the
//! [`ConditionLayout`].
//!
//! Call order: [`start`](ReadDataFactory::start) once per target region,
//! [`add_single`](ReadDataFactory::add_single) /
//! [`add_pair`](ReadDataFactory::add_pair) per piece of evidence, then
//! [`create`](ReadDataFactory::create) to finalize. All errors raised here
//! are the fatal tier: they indicate caller misuse or corrupt input, and
//! aggregation must not continue past them.

use std::sync::Arc;

use rust_htslib::bam::record::{Aux, Record};
use rustc_hash::FxHashMap;

use crate::config::{ConditionLayout, SourceOptions};
use crate::core::error::{RegataError, Result};
use crate::model::region::{union_pair, GapPolicy};
use crate::model::{DistinctSequence, PairGeometry, ReadRegion, RegionReadData};
use crate::reconstruct;

pub struct ReadDataFactory {
    layout: ConditionLayout,
    sources: Arc<Vec<SourceOptions>>,
    gap: GapPolicy,
    keep_read_ids: bool,
    target: Option<ReadRegion>,
    keys: FxHashMap<String, usize>,
    distinct: Vec<DistinctSequence>,
    tracked_ids: Vec<Vec<u64>>,
}

impl ReadDataFactory {
    pub fn new(
        layout: ConditionLayout,
        sources: Arc<Vec<SourceOptions>>,
        gap: GapPolicy,
        keep_read_ids: bool,
    ) -> ReadDataFactory {
        ReadDataFactory {
            layout,
            sources,
            gap,
            keep_read_ids,
            target: None,
            keys: FxHashMap::default(),
            distinct: Vec::new(),
            tracked_ids: Vec::new(),
        }
    }

    /// Reset dedup state for a new target region. Must be called before any
    /// evidence is added.
    pub fn start(&mut self, region: ReadRegion) {
        self.target = Some(region);
        self.keys.clear();
        self.distinct.clear();
        self.tracked_ids.clear();
    }

    /// Aggregate one single-end record.
    pub fn add_single(&mut self, record: &Record, file: usize) -> Result<()> {
        let target = self.target()?.clone();
        let covered = reconstruct::covered_length(record.cigar().iter());
        if covered != target.total_len() {
            return Err(RegataError::CoveredLengthMismatch {
                name: name_of(record),
                record: covered,
                region: target.total_len(),
            });
        }
        let variant_tag = self.sources[file].variant_tag;
        let key = reconstruct::dedup_key(record, &variant_tag);
        let index = match self.keys.get(&key) {
            Some(&i) => i,
            None => {
                let variations =
                    reconstruct::extract_variations(record, &target, false, &variant_tag)?;
                self.new_distinct(key, multiplicity_of(record), None, variations)
            }
        };
        self.bump_counts(index, record, file)?;
        self.track_id(index, record)?;
        Ok(())
    }

    /// Aggregate one consistent mate pair. `first` and `second` are template
    /// roles, not positions.
    pub fn add_pair(&mut self, first: &Record, second: &Record, file: usize) -> Result<()> {
        let target = self.target()?.clone();
        let fp1 = ReadRegion::from_record(first)?;
        let fp2 = ReadRegion::from_record(second)?;
        if union_pair(&fp1, &fp2, self.gap) != target {
            return Err(RegataError::PairRegionMismatch {
                name: name_of(first),
            });
        }
        let variant_tag = self.sources[file].variant_tag;
        let key = reconstruct::pair_dedup_key(first, second, &variant_tag);
        let index = match self.keys.get(&key) {
            Some(&i) => i,
            None => {
                let mut variations =
                    reconstruct::extract_variations(first, &target, false, &variant_tag)?;
                variations.extend(reconstruct::extract_variations(
                    second,
                    &target,
                    true,
                    &variant_tag,
                )?);
                let geometry = if self.gap == GapPolicy::Join && target.missing_gap().is_none() {
                    Some(pair_geometry(&fp1, &fp2))
                } else {
                    None
                };
                self.new_distinct(key, multiplicity_of(first), geometry, variations)
            }
        };
        self.bump_counts(index, first, file)?;
        self.track_id(index, first)?;
        Ok(())
    }

    /// Finalize: assign representative read ids and return the immutable
    /// aggregation. The factory is empty afterwards.
    pub fn create(&mut self) -> Result<RegionReadData> {
        self.target()?;
        let mut distinct = std::mem::take(&mut self.distinct);
        if self.keep_read_ids {
            for (d, ids) in distinct.iter_mut().zip(self.tracked_ids.iter()) {
                d.read_id = ids.iter().min().copied();
            }
        }
        self.keys.clear();
        self.tracked_ids.clear();
        self.target = None;
        Ok(RegionReadData::new(distinct))
    }

    fn target(&self) -> Result<&ReadRegion> {
        self.target
            .as_ref()
            .ok_or_else(|| RegataError::Config("factory used before start()".to_string()))
    }

    fn new_distinct(
        &mut self,
        key: String,
        multiplicity: u32,
        geometry: Option<PairGeometry>,
        variations: Vec<crate::model::Variation>,
    ) -> usize {
        let index = self.distinct.len();
        self.distinct.push(DistinctSequence {
            multiplicity,
            geometry,
            variations,
            read_id: None,
            counts: vec![0; self.layout.total()],
        });
        self.tracked_ids.push(Vec::new());
        self.keys.insert(key, index);
        index
    }

    fn bump_counts(&mut self, index: usize, record: &Record, file: usize) -> Result<()> {
        let slice = self.layout.slice(file);
        let counts = &mut self.distinct[index].counts;
        let count_tag = self.sources[file].count_tag;
        match condition_counts(record, &count_tag) {
            Some(fields) => {
                if fields.len() != slice.len() {
                    return Err(RegataError::ConditionCardinality {
                        name: name_of(record),
                        file,
                        found: fields.len(),
                        expected: slice.len(),
                    });
                }
                for (slot, value) in counts[slice].iter_mut().zip(fields) {
                    *slot += value;
                }
            }
            None => {
                if slice.len() != 1 {
                    return Err(RegataError::MissingCountTag {
                        name: name_of(record),
                        file,
                        expected: slice.len(),
                    });
                }
                counts[slice.start] += 1;
            }
        }
        Ok(())
    }

    fn track_id(&mut self, index: usize, record: &Record) -> Result<()> {
        if !self.keep_read_ids {
            return Ok(());
        }
        let name = name_of(record);
        let id: u64 = name
            .parse()
            .map_err(|_| RegataError::NonNumericReadId(name))?;
        self.tracked_ids[index].push(id);
        Ok(())
    }
}

fn name_of(record: &Record) -> String {
    String::from_utf8_lossy(record.qname()).into_owned()
}

/// Mapper-reported alternative-alignment count (`NH` tag); 0 when absent.
fn multiplicity_of(record: &Record) -> u32 {
    match record.aux(b"NH") {
        Ok(Aux::U8(v)) => v as u32,
        Ok(Aux::U16(v)) => v as u32,
        Ok(Aux::U32(v)) => v,
        Ok(Aux::I8(v)) => v.max(0) as u32,
        Ok(Aux::I16(v)) => v.max(0) as u32,
        Ok(Aux::I32(v)) => v.max(0) as u32,
        _ => 0,
    }
}

/// The multi-condition count tag, exploded per comma-separated field.
/// Integer-typed tags count as a single field.
fn condition_counts(record: &Record, tag: &[u8; 2]) -> Option<Vec<u32>> {
    match record.aux(tag) {
        Ok(Aux::String(s)) => s
            .split(',')
            .map(|f| f.trim().parse::<u32>().ok())
            .collect::<Option<Vec<u32>>>(),
        Ok(Aux::U8(v)) => Some(vec![v as u32]),
        Ok(Aux::U16(v)) => Some(vec![v as u32]),
        Ok(Aux::U32(v)) => Some(vec![v]),
        Ok(Aux::I8(v)) => Some(vec![v.max(0) as u32]),
        Ok(Aux::I16(v)) => Some(vec![v.max(0) as u32]),
        Ok(Aux::I32(v)) => Some(vec![v.max(0) as u32]),
        _ => None,
    }
}

/// Base counts unique to each mate and shared between them, from the raw
/// footprints.
fn pair_geometry(fp1: &ReadRegion, fp2: &ReadRegion) -> PairGeometry {
    let mut shared = 0u32;
    for a in fp1.parts() {
        for b in fp2.parts() {
            let start = a.start.max(b.start);
            let end = a.end.min(b.end);
            if end > start {
                shared += (end - start) as u32;
            }
        }
    }
    PairGeometry {
        first_only: fp1.total_len() - shared,
        shared,
        second_only: fp2.total_len() - shared,
    }
}
