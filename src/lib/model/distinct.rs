//! Aggregated read data for one region.
//!
//! A [`DistinctSequence`] is one equivalence class of reads: every record (or
//! mate pair) whose CIGAR plus variant evidence encode identically collapses
//! into the same entry, carrying per-condition counts. [`RegionReadData`]
//! owns the ordered list of distinct sequences produced by one aggregation;
//! it is immutable once the factory finalizes it.

use serde::Serialize;

use super::variant::Variation;

/// Base counts of a non-overlapping mate pair: unique to the first mate,
/// shared by both, unique to the second mate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PairGeometry {
    pub first_only: u32,
    pub shared: u32,
    pub second_only: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct DistinctSequence {
    /// Mapper-reported alternative-alignment count; 0 when unknown.
    pub multiplicity: u32,
    /// Set only for pairs aggregated under the join policy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geometry: Option<PairGeometry>,
    /// Variations against the region, in extraction order.
    pub variations: Vec<Variation>,
    /// Smallest observed numeric read id, when retention is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_id: Option<u64>,
    /// Per-condition read counts; length is the global condition count.
    pub counts: Vec<u32>,
}

impl DistinctSequence {
    pub fn total_count(&self) -> u64 {
        self.counts.iter().map(|&c| c as u64).sum()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RegionReadData {
    distinct: Vec<DistinctSequence>,
}

impl RegionReadData {
    pub(crate) fn new(distinct: Vec<DistinctSequence>) -> RegionReadData {
        RegionReadData { distinct }
    }

    pub fn len(&self) -> usize {
        self.distinct.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distinct.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&DistinctSequence> {
        self.distinct.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DistinctSequence> {
        self.distinct.iter()
    }

    /// Sum of all distinct sequences' condition vectors. Reconstructs the
    /// total observed read count per condition.
    pub fn condition_totals(&self, conditions: usize) -> Vec<u64> {
        let mut totals = vec![0u64; conditions];
        for d in &self.distinct {
            for (t, &c) in totals.iter_mut().zip(d.counts.iter()) {
                *t += c as u64;
            }
        }
        totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_sum_over_distinct_sequences() {
        let data = RegionReadData::new(vec![
            DistinctSequence {
                multiplicity: 0,
                geometry: None,
                variations: vec![],
                read_id: None,
                counts: vec![1, 0, 2],
            },
            DistinctSequence {
                multiplicity: 3,
                geometry: None,
                variations: vec![],
                read_id: Some(7),
                counts: vec![0, 4, 5],
            },
        ]);
        assert_eq!(data.condition_totals(3), vec![1, 4, 7]);
        assert_eq!(data.get(1).unwrap().total_count(), 9);
    }
}
