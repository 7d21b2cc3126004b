//! The pull-based streaming merge/aggregation engine for one reference.
//!
//! [`RegionScan`] merges the per-file record streams (each already sorted by
//! alignment start) into position cohorts, routes every record through
//! filtering and single/paired handling, groups evidence by the
//! [`ReadRegion`] it induces, and emits one aggregated result per region.
//!
//! Emission is held back behind a low-water mark: a grouped region is only
//! finalized once neither the merged input nor any buffered mate can still
//! contribute evidence starting at or before its start position. This is
//! what gives the two guarantees of the main pass: results come out in
//! non-decreasing region-start order (region-order within ties), and each
//! region key is emitted exactly once.
//!
//! The orphan phases are the exception. Under `ReportSingle` or `Query`,
//! aggregations synthesized at stream end may repeat a region key that the
//! main pass already emitted, and may start before previously emitted
//! regions. Downstream consumers must tolerate or deduplicate that; closing
//! the gap with an engine-lifetime seen-set was considered and deliberately
//! left to consumers.

use std::collections::{BTreeMap, VecDeque};
use std::iter::Peekable;

use itertools::Itertools;
use log::{debug, warn};
use rust_htslib::bam::record::Record;
use serde::Serialize;
use smartstring::{LazyCompact, SmartString};

use crate::checker::ConsistencyChecker;
use crate::config::{ConditionLayout, OrphanPolicy, PairHandling, ScanOptions, SourceOptions};
use crate::core::error::Result;
use crate::factory::ReadDataFactory;
use crate::model::region::{pair_consistent, union_pair};
use crate::model::{ReadRegion, RegionReadData, Span, TruncatedEnd};

use super::mates::{MateBuffer, PendingMate};

/// A record tagged with the index of the source file it came from.
pub struct SourceRecord {
    pub file: usize,
    pub record: Record,
}

/// One emitted aggregation result.
#[derive(Debug, Clone, Serialize)]
pub struct ScanItem {
    pub reference: SmartString<LazyCompact>,
    pub region: ReadRegion,
    pub data: RegionReadData,
}

/// Recoverable-tier diagnostics accumulated over one scan.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ScanStats {
    /// Records consumed from the merged input.
    pub records: u64,
    /// Records rejected by quality, strand, primary or barcode filters.
    pub filtered: u64,
    /// Mate pairs dropped for contradictory geometry.
    pub inconsistent_pairs: u64,
    /// Paired records whose mate never appeared in the scanned span.
    pub orphaned: u64,
    /// Regions suppressed because they start before the requested range.
    pub suppressed: u64,
}

/// Locates the missing mate of an orphaned record, for the `Query` policy.
pub trait MateResolver {
    fn locate_mate(&mut self, orphan: &Record, file: usize) -> Result<Option<Record>>;
}

#[derive(Default)]
struct RegionGroup {
    singles: Vec<PendingMate>,
    pairs: Vec<PairEvidence>,
}

struct PairEvidence {
    first: Record,
    second: Record,
    file: usize,
}

pub struct RegionScan {
    input: Peekable<Box<dyn Iterator<Item = SourceRecord>>>,
    sources: std::sync::Arc<Vec<SourceOptions>>,
    opts: ScanOptions,
    reference: SmartString<LazyCompact>,
    range: Option<Span>,
    factory: ReadDataFactory,
    checker: ConsistencyChecker,
    pending: BTreeMap<ReadRegion, RegionGroup>,
    mates: MateBuffer,
    resolver: Option<Box<dyn MateResolver>>,
    queue: VecDeque<ScanItem>,
    stats: ScanStats,
    exhausted: bool,
}

impl RegionScan {
    /// Build a scan over per-file record streams. Streams must be sorted by
    /// alignment start; a stream that ends with an I/O error is treated as
    /// exhausted by the source layer, not surfaced here.
    pub fn new(
        streams: Vec<Box<dyn Iterator<Item = Record>>>,
        sources: Vec<SourceOptions>,
        opts: ScanOptions,
        reference: &str,
        range: Option<Span>,
        resolver: Option<Box<dyn MateResolver>>,
    ) -> RegionScan {
        let layout = ConditionLayout::from_sources(&sources);
        let sources = std::sync::Arc::new(sources);
        let merged: Box<dyn Iterator<Item = SourceRecord>> = Box::new(
            streams
                .into_iter()
                .enumerate()
                .map(|(file, stream)| stream.map(move |record| SourceRecord { file, record }))
                .kmerge_by(|a, b| a.record.pos() <= b.record.pos()),
        );
        let factory = ReadDataFactory::new(
            layout,
            sources.clone(),
            opts.gap,
            opts.keep_read_ids,
        );
        RegionScan {
            input: merged.peekable(),
            sources,
            opts,
            reference: SmartString::from(reference),
            range,
            factory,
            checker: ConsistencyChecker::default(),
            pending: BTreeMap::new(),
            mates: MateBuffer::new(),
            resolver,
            queue: VecDeque::new(),
            stats: ScanStats::default(),
            exhausted: false,
        }
    }

    pub fn stats(&self) -> &ScanStats {
        &self.stats
    }

    pub fn checker(&self) -> &ConsistencyChecker {
        &self.checker
    }

    fn past_end(&self, pos: i64) -> bool {
        self.range.map_or(false, |r| pos >= r.end)
    }

    fn before_start(&self, pos: i64) -> bool {
        self.range.map_or(false, |r| pos < r.start)
    }

    /// Consume the next same-start cohort and release every pending region
    /// that can no longer gain evidence.
    fn advance(&mut self) -> Result<()> {
        let pos = match self.input.peek().map(|sr| sr.record.pos()) {
            Some(pos) if !self.past_end(pos) => pos,
            _ => {
                self.finish()?;
                self.exhausted = true;
                return Ok(());
            }
        };
        let skip_cohort = self.before_start(pos);
        while let Some(sr) = self.input.peek() {
            if sr.record.pos() != pos {
                break;
            }
            let sr = self.input.next().expect("peeked record");
            if skip_cohort {
                continue;
            }
            self.route(sr)?;
        }
        let horizon = self
            .input
            .peek()
            .map(|sr| sr.record.pos())
            .unwrap_or(i64::MAX);
        let limit = self
            .mates
            .min_position()
            .map_or(horizon, |m| horizon.min(m));
        self.release_ready(limit)
    }

    fn route(&mut self, sr: SourceRecord) -> Result<()> {
        let SourceRecord { file, record } = sr;
        self.stats.records += 1;
        if record.is_unmapped() || !self.opts.read_filter.filter_read(&record) {
            self.stats.filtered += 1;
            return Ok(());
        }
        if self.opts.primary_only && (record.is_secondary() || record.is_supplementary()) {
            self.stats.filtered += 1;
            return Ok(());
        }
        if let Some(barcode) = &self.opts.barcode {
            if !barcode.accepts(&record) {
                self.stats.filtered += 1;
                return Ok(());
            }
        }
        match self.opts.pairing {
            PairHandling::Paired { require_proper } if record.is_paired() => {
                if require_proper && !record.is_proper_pair() {
                    self.stats.filtered += 1;
                    return Ok(());
                }
                if record.is_mate_unmapped() {
                    return self.handle_orphan(PendingMate { record, file });
                }
                match self.mates.take_mate(&record, file) {
                    Some(pending) => self.form_pair(pending.record, record, file),
                    None => {
                        self.mates.push(record, file);
                        Ok(())
                    }
                }
            }
            _ => self.route_single(record, file),
        }
    }

    fn route_single(&mut self, record: Record, file: usize) -> Result<()> {
        let strandedness = self.sources[file].strandedness;
        if !strandedness.accepts_single(self.opts.target_strand, &record) {
            self.stats.filtered += 1;
            return Ok(());
        }
        let region = ReadRegion::from_record(&record)?;
        self.pending
            .entry(region)
            .or_default()
            .singles
            .push(PendingMate { record, file });
        Ok(())
    }

    fn form_pair(&mut self, a: Record, b: Record, file: usize) -> Result<()> {
        let (first, second) = if a.is_first_in_template() { (a, b) } else { (b, a) };
        let strandedness = self.sources[file].strandedness;
        if !strandedness.accepts_pair(self.opts.target_strand, &first) {
            self.stats.filtered += 1;
            return Ok(());
        }
        let fp1 = ReadRegion::from_record(&first)?;
        let fp2 = ReadRegion::from_record(&second)?;
        if !pair_consistent(&fp1, &fp2) {
            self.stats.inconsistent_pairs += 1;
            debug!(
                "dropping geometrically inconsistent pair {} ({} / {})",
                String::from_utf8_lossy(first.qname()),
                fp1,
                fp2
            );
            return Ok(());
        }
        let region = union_pair(&fp1, &fp2, self.opts.gap);
        self.pending
            .entry(region)
            .or_default()
            .pairs
            .push(PairEvidence {
                first,
                second,
                file,
            });
        Ok(())
    }

    /// A paired record whose mate cannot arrive anymore.
    fn handle_orphan(&mut self, orphan: PendingMate) -> Result<()> {
        match self.opts.orphans {
            OrphanPolicy::Drop | OrphanPolicy::Query => {
                self.stats.orphaned += 1;
                Ok(())
            }
            OrphanPolicy::ReportSingle => self.report_orphan_single(orphan),
        }
    }

    fn report_orphan_single(&mut self, orphan: PendingMate) -> Result<()> {
        self.stats.orphaned += 1;
        let PendingMate { record, file } = orphan;
        let strandedness = self.sources[file].strandedness;
        if !strandedness.accepts_single(self.opts.target_strand, &record) {
            self.stats.filtered += 1;
            return Ok(());
        }
        let truncated = if record.mpos() >= record.pos() {
            TruncatedEnd::Right
        } else {
            TruncatedEnd::Left
        };
        let region = ReadRegion::from_record(&record)?.with_truncated(truncated);
        self.pending
            .entry(region)
            .or_default()
            .singles
            .push(PendingMate { record, file });
        Ok(())
    }

    /// Input exhausted: resolve buffered mates per the orphan policy, then
    /// flush everything still pending.
    fn finish(&mut self) -> Result<()> {
        if !self.mates.is_empty() {
            let orphans = self.mates.drain();
            debug!(
                "{} paired record(s) without a mate in the scanned span",
                orphans.len()
            );
            match self.opts.orphans {
                OrphanPolicy::Drop => {
                    self.stats.orphaned += orphans.len() as u64;
                }
                OrphanPolicy::ReportSingle => {
                    for orphan in orphans {
                        self.report_orphan_single(orphan)?;
                    }
                }
                OrphanPolicy::Query => {
                    for orphan in orphans {
                        self.query_orphan(orphan)?;
                    }
                }
            }
        }
        self.release_ready(i64::MAX)
    }

    fn query_orphan(&mut self, orphan: PendingMate) -> Result<()> {
        let resolved = match self.resolver.as_mut() {
            Some(resolver) => resolver.locate_mate(&orphan.record, orphan.file)?,
            None => {
                warn!("orphan query requested but no mate resolver is attached");
                None
            }
        };
        match resolved {
            Some(mate) => self.form_pair(orphan.record, mate, orphan.file),
            None => {
                self.stats.orphaned += 1;
                Ok(())
            }
        }
    }

    /// Finalize every pending region starting strictly below `limit`, in
    /// region order.
    fn release_ready(&mut self, limit: i64) -> Result<()> {
        while let Some(entry) = self.pending.first_entry() {
            if entry.key().start() >= limit {
                break;
            }
            let (region, group) = entry.remove_entry();
            if self
                .range
                .map_or(false, |r| region.start() < r.start)
            {
                self.stats.suppressed += 1;
                continue;
            }
            let item = self.aggregate(region, group)?;
            self.queue.push_back(item);
        }
        Ok(())
    }

    fn aggregate(&mut self, region: ReadRegion, group: RegionGroup) -> Result<ScanItem> {
        self.factory.start(region.clone());
        for single in &group.singles {
            self.factory.add_single(&single.record, single.file)?;
        }
        for pair in &group.pairs {
            self.factory.add_pair(&pair.first, &pair.second, pair.file)?;
        }
        let data = self.factory.create()?;
        if self.opts.check_consistency && data.len() == 1 {
            if let Some(single) = group.singles.first() {
                let tag = self.sources[single.file].variant_tag;
                self.checker.verify_single(&single.record, &region, &data, &tag);
            } else if let Some(pair) = group.pairs.first() {
                let tag = self.sources[pair.file].variant_tag;
                self.checker
                    .verify_pair(&pair.first, &pair.second, &region, &data, &tag);
            }
        }
        Ok(ScanItem {
            reference: self.reference.clone(),
            region,
            data,
        })
    }
}

impl Iterator for RegionScan {
    type Item = Result<ScanItem>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.queue.pop_front() {
                return Some(Ok(item));
            }
            if self.exhausted {
                return None;
            }
            if let Err(e) = self.advance() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
    }
}
