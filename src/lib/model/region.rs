//! Genomic footprint of one alignment or one consistent mate pair.
//!
//! A [`ReadRegion`] is an ordered, disjoint, non-adjacent set of half-open
//! intervals on one reference sequence, together with two pieces of
//! paired-end bookkeeping: at most one internal gap may be marked as the
//! *missing-information intron* (the unsequenced span between non-overlapping
//! mates), and one end may be marked as truncated because a mate was never
//! discovered.
//!
//! Equality and ordering deliberately include the missing-intron marker and
//! exclude the truncation marker: geometrically identical regions arising
//! from single-end versus paired-end evidence are distinct aggregation keys,
//! while a truncated orphan still merges with untruncated evidence of the
//! same geometry.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use rust_htslib::bam::record::{Cigar, Record};
use serde::Serialize;

use crate::core::error::{RegataError, Result};

/// Half-open genomic interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Span {
    pub start: i64,
    pub end: i64,
}

impl Span {
    pub fn new(start: i64, end: i64) -> Span {
        Span { start, end }
    }

    #[inline]
    pub fn len(&self) -> u32 {
        (self.end - self.start) as u32
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    #[inline]
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    #[inline]
    pub fn contains(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Which end of a region is foreshortened by an undiscovered mate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TruncatedEnd {
    Left,
    Right,
}

/// How to represent the gap between two non-overlapping mates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapPolicy {
    /// Keep the gap and mark it as the missing-information intron.
    MissingIntron,
    /// Fill the gap as covered sequence carrying no variation evidence.
    Join,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadRegion {
    parts: Vec<Span>,
    /// Index `i` marks the gap between `parts[i]` and `parts[i + 1]`.
    missing_gap: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    truncated: Option<TruncatedEnd>,
}

impl PartialEq for ReadRegion {
    fn eq(&self, other: &Self) -> bool {
        self.parts == other.parts && self.missing_gap == other.missing_gap
    }
}

impl Eq for ReadRegion {}

impl Hash for ReadRegion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.parts.hash(state);
        self.missing_gap.hash(state);
    }
}

impl Ord for ReadRegion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.start()
            .cmp(&other.start())
            .then_with(|| self.end().cmp(&other.end()))
            .then_with(|| self.parts.cmp(&other.parts))
            .then_with(|| self.missing_gap.cmp(&other.missing_gap))
    }
}

impl PartialOrd for ReadRegion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl ReadRegion {
    /// Build a region from raw spans, merging overlapping or adjacent ones.
    pub fn new(spans: Vec<Span>) -> ReadRegion {
        ReadRegion {
            parts: normalize(spans),
            missing_gap: None,
            truncated: None,
        }
    }

    /// Footprint of one alignment: M/=/X and D consume covered sequence,
    /// N splits parts, I/S/H/P leave the reference untouched.
    pub fn from_cigar<'a, I>(start: i64, ops: I, name: &[u8]) -> Result<ReadRegion>
    where
        I: IntoIterator<Item = &'a Cigar>,
    {
        let mut parts = Vec::with_capacity(2);
        let mut part_start = start;
        let mut ref_pos = start;
        let mut covered = false;
        for op in ops {
            match *op {
                Cigar::Match(l) | Cigar::Equal(l) | Cigar::Diff(l) | Cigar::Del(l) => {
                    ref_pos += l as i64;
                    covered = true;
                }
                Cigar::RefSkip(l) => {
                    if covered {
                        parts.push(Span::new(part_start, ref_pos));
                    }
                    ref_pos += l as i64;
                    part_start = ref_pos;
                    covered = false;
                }
                Cigar::Ins(_) | Cigar::SoftClip(_) | Cigar::HardClip(_) | Cigar::Pad(_) => {}
            }
        }
        if covered {
            parts.push(Span::new(part_start, ref_pos));
        }
        if parts.is_empty() {
            return Err(RegataError::EmptyFootprint {
                name: String::from_utf8_lossy(name).into_owned(),
            });
        }
        Ok(ReadRegion {
            parts,
            missing_gap: None,
            truncated: None,
        })
    }

    /// Footprint of one BAM record.
    pub fn from_record(record: &Record) -> Result<ReadRegion> {
        let cigar = record.cigar();
        Self::from_cigar(record.pos(), cigar.iter(), record.qname())
    }

    /// Mark one end as foreshortened by an undiscovered mate.
    pub fn with_truncated(mut self, end: TruncatedEnd) -> ReadRegion {
        self.truncated = Some(end);
        self
    }

    #[inline]
    pub fn start(&self) -> i64 {
        self.parts[0].start
    }

    #[inline]
    pub fn end(&self) -> i64 {
        self.parts[self.parts.len() - 1].end
    }

    #[inline]
    pub fn parts(&self) -> &[Span] {
        &self.parts
    }

    #[inline]
    pub fn missing_gap(&self) -> Option<usize> {
        self.missing_gap
    }

    #[inline]
    pub fn truncated(&self) -> Option<TruncatedEnd> {
        self.truncated
    }

    /// Total covered length across all parts.
    pub fn total_len(&self) -> u32 {
        self.parts.iter().map(Span::len).sum()
    }

    /// The missing-information intron as a genomic span, if marked.
    pub fn missing_span(&self) -> Option<Span> {
        self.missing_gap
            .map(|i| Span::new(self.parts[i].end, self.parts[i + 1].start))
    }

    /// The gaps between consecutive parts.
    pub fn introns(&self) -> impl Iterator<Item = Span> + '_ {
        self.parts
            .windows(2)
            .map(|w| Span::new(w[0].end, w[1].start))
    }

    /// Map a genomic coordinate of a covered base into the induced
    /// coordinate space (covered bases counted left to right).
    pub fn induced_offset(&self, genomic: i64) -> Option<u32> {
        let mut acc = 0u32;
        for part in &self.parts {
            if genomic < part.start {
                return None;
            }
            if genomic < part.end {
                return Some(acc + (genomic - part.start) as u32);
            }
            acc += part.len();
        }
        None
    }

    /// Like [`induced_offset`](Self::induced_offset) but also accepts the
    /// position one past a part's end, mapping it to the following boundary.
    /// Used for insertions, which sit between covered bases.
    pub fn induced_boundary(&self, genomic: i64) -> Option<u32> {
        let mut acc = 0u32;
        for part in &self.parts {
            if genomic < part.start {
                return None;
            }
            if genomic <= part.end {
                return Some(acc + (genomic - part.start) as u32);
            }
            acc += part.len();
        }
        None
    }

    /// Every part of `other` lies within a part of `self`.
    pub fn contains_region(&self, other: &ReadRegion) -> bool {
        other
            .parts
            .iter()
            .all(|o| self.parts.iter().any(|p| p.contains(o)))
    }
}

impl fmt::Display for ReadRegion {
    /// `100-120|150-170`, with `~` in place of `|` across the
    /// missing-information intron.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                let sep = if self.missing_gap == Some(i - 1) {
                    '~'
                } else {
                    '|'
                };
                write!(f, "{}", sep)?;
            }
            write!(f, "{}-{}", part.start, part.end)?;
        }
        Ok(())
    }
}

fn normalize(mut spans: Vec<Span>) -> Vec<Span> {
    spans.retain(|s| !s.is_empty());
    spans.sort();
    let mut out: Vec<Span> = Vec::with_capacity(spans.len());
    for span in spans {
        match out.last_mut() {
            Some(last) if span.start <= last.end => {
                last.end = last.end.max(span.end);
            }
            _ => out.push(span),
        }
    }
    out
}

/// Pure interval union of two footprints, markers ignored.
pub fn union_footprints(a: &ReadRegion, b: &ReadRegion) -> ReadRegion {
    let mut spans = a.parts.clone();
    spans.extend_from_slice(&b.parts);
    ReadRegion::new(spans)
}

/// Union of a consistent mate pair's footprints.
///
/// When the mates do not overlap and do not touch, the gap between them is
/// either marked as the missing-information intron or, under
/// [`GapPolicy::Join`], filled in as covered sequence.
pub fn union_pair(a: &ReadRegion, b: &ReadRegion, gap: GapPolicy) -> ReadRegion {
    let (left, right) = if a.start() <= b.start() { (a, b) } else { (b, a) };
    if left.end() < right.start() {
        match gap {
            GapPolicy::Join => {
                let mut spans = left.parts.clone();
                spans.extend_from_slice(&right.parts);
                // bridge the inter-mate gap
                spans.push(Span::new(left.end(), right.start()));
                ReadRegion::new(spans)
            }
            GapPolicy::MissingIntron => {
                let missing_gap = Some(left.parts.len() - 1);
                let mut parts = left.parts.clone();
                parts.extend_from_slice(&right.parts);
                ReadRegion {
                    parts,
                    missing_gap,
                    truncated: None,
                }
            }
        }
    } else {
        union_footprints(left, right)
    }
}

/// Every intron of `a` intersecting `b`'s span must be an intron of `b`,
/// and vice versa. Catches, among others, a mate lying inside the other
/// mate's intron.
pub fn intron_consistent(a: &ReadRegion, b: &ReadRegion) -> bool {
    let one_way = |x: &ReadRegion, y: &ReadRegion| {
        let span = Span::new(y.start(), y.end());
        x.introns()
            .filter(|g| g.overlaps(&span))
            .all(|g| y.introns().any(|h| h == g))
    };
    one_way(a, b) && one_way(b, a)
}

/// The consistency predicate for a mate pair: each mate intron-consistent
/// with the union and with the other mate, and both contained in the union.
/// Violations are recoverable; aligners occasionally emit geometrically
/// contradictory but individually valid mates.
pub fn pair_consistent(a: &ReadRegion, b: &ReadRegion) -> bool {
    let union = union_footprints(a, b);
    intron_consistent(a, &union)
        && intron_consistent(b, &union)
        && intron_consistent(a, b)
        && union.contains_region(a)
        && union.contains_region(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_htslib::bam::record::CigarString;

    fn region(spans: &[(i64, i64)]) -> ReadRegion {
        ReadRegion::new(spans.iter().map(|&(s, e)| Span::new(s, e)).collect())
    }

    #[test]
    fn footprint_from_plain_cigar() {
        // 3M1I2M1D2M covers 3 + 2 + 1 + 2 = 8 reference bases, one part
        let cigar = CigarString(vec![
            Cigar::Match(3),
            Cigar::Ins(1),
            Cigar::Match(2),
            Cigar::Del(1),
            Cigar::Match(2),
        ]);
        let r = ReadRegion::from_cigar(100, cigar.iter(), b"r1").unwrap();
        assert_eq!(r.parts(), &[Span::new(100, 108)]);
        assert_eq!(r.total_len(), 8);
    }

    #[test]
    fn refskip_splits_parts() {
        let cigar = CigarString(vec![
            Cigar::SoftClip(2),
            Cigar::Match(5),
            Cigar::RefSkip(10),
            Cigar::Match(5),
        ]);
        let r = ReadRegion::from_cigar(100, cigar.iter(), b"r1").unwrap();
        assert_eq!(r.parts(), &[Span::new(100, 105), Span::new(115, 120)]);
        assert_eq!(r.total_len(), 10);
        assert_eq!(r.introns().collect::<Vec<_>>(), vec![Span::new(105, 115)]);
        assert!(r.missing_gap().is_none());
    }

    #[test]
    fn empty_footprint_is_an_error() {
        let cigar = CigarString(vec![Cigar::SoftClip(4)]);
        assert!(ReadRegion::from_cigar(0, cigar.iter(), b"clip_only").is_err());
    }

    #[test]
    fn induced_offsets_skip_introns() {
        let r = region(&[(100, 105), (115, 120)]);
        assert_eq!(r.induced_offset(100), Some(0));
        assert_eq!(r.induced_offset(104), Some(4));
        assert_eq!(r.induced_offset(110), None);
        assert_eq!(r.induced_offset(115), Some(5));
        assert_eq!(r.induced_offset(119), Some(9));
        assert_eq!(r.induced_offset(120), None);
        assert_eq!(r.induced_boundary(105), Some(5));
        assert_eq!(r.induced_boundary(120), Some(10));
    }

    #[test]
    fn disjoint_mates_mark_missing_intron() {
        let a = region(&[(100, 120)]);
        let b = region(&[(150, 170)]);
        let u = union_pair(&a, &b, GapPolicy::MissingIntron);
        assert_eq!(u.parts(), &[Span::new(100, 120), Span::new(150, 170)]);
        assert_eq!(u.missing_span(), Some(Span::new(120, 150)));
        assert_eq!(u.total_len(), 40);
    }

    #[test]
    fn joined_mates_fill_the_gap() {
        let a = region(&[(100, 120)]);
        let b = region(&[(150, 170)]);
        let u = union_pair(&a, &b, GapPolicy::Join);
        assert_eq!(u.parts(), &[Span::new(100, 170)]);
        assert!(u.missing_gap().is_none());
    }

    #[test]
    fn overlapping_mates_merge_without_marker() {
        let a = region(&[(100, 120)]);
        let b = region(&[(110, 140)]);
        let u = union_pair(&a, &b, GapPolicy::MissingIntron);
        assert_eq!(u.parts(), &[Span::new(100, 140)]);
        assert!(u.missing_gap().is_none());
    }

    #[test]
    fn marker_distinguishes_equal_geometry() {
        let a = region(&[(100, 120)]);
        let b = region(&[(150, 170)]);
        let with_marker = union_pair(&a, &b, GapPolicy::MissingIntron);
        let without = region(&[(100, 120), (150, 170)]);
        assert_eq!(with_marker.parts(), without.parts());
        assert_ne!(with_marker, without);
        assert!(without < with_marker);
    }

    #[test]
    fn truncation_does_not_affect_identity() {
        let a = region(&[(100, 120)]);
        let b = region(&[(100, 120)]).with_truncated(TruncatedEnd::Right);
        assert_eq!(a, b);
        assert_eq!(a.cmp(&b), Ordering::Equal);
    }

    #[test]
    fn ordering_is_start_major() {
        let mut regions = vec![
            region(&[(200, 210)]),
            region(&[(100, 120), (150, 170)]),
            region(&[(100, 110)]),
        ];
        regions.sort();
        assert_eq!(regions[0].start(), 100);
        assert_eq!(regions[0].end(), 110);
        assert_eq!(regions[2].start(), 200);
    }

    #[test]
    fn consistent_spliced_pair() {
        // both mates agree on the 105-115 intron
        let a = region(&[(100, 105), (115, 125)]);
        let b = region(&[(103, 105), (115, 130)]);
        assert!(pair_consistent(&a, &b));
    }

    #[test]
    fn mate_inside_intron_is_inconsistent() {
        let a = region(&[(100, 105), (115, 125)]);
        let b = region(&[(107, 112)]);
        assert!(!pair_consistent(&a, &b));
    }

    #[test]
    fn disagreeing_introns_are_inconsistent() {
        let a = region(&[(100, 105), (115, 125)]);
        let b = region(&[(100, 107), (118, 125)]);
        assert!(!pair_consistent(&a, &b));
    }

    #[test]
    fn disjoint_mates_are_consistent() {
        let a = region(&[(100, 120)]);
        let b = region(&[(150, 170)]);
        assert!(pair_consistent(&a, &b));
    }

    #[test]
    fn display_marks_the_missing_gap() {
        let a = region(&[(100, 120)]);
        let b = region(&[(150, 170)]);
        let u = union_pair(&a, &b, GapPolicy::MissingIntron);
        assert_eq!(u.to_string(), "100-120~150-170");
        let plain = region(&[(100, 120), (150, 170)]);
        assert_eq!(plain.to_string(), "100-120|150-170");
    }
}
