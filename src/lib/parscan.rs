//! # ParScan
//!
//! Fans independent reference scans across a Rayon pool.
//!
//! One [`crate::engine::RegionScan`] is inherently sequential; what
//! parallelizes safely is scanning different references (or disjoint
//! BED-restricted intervals) at the same time, each with its own file
//! handles. `ParScan` drives exactly that: it takes an
//! [`AlignedReadsScanner`], derives the interval list from the sequence
//! dictionary or a BED file (overlaps merged), runs one scan per interval on
//! a Rayon pool, and streams every [`ScanItem`] through a bounded crossbeam
//! channel.
//!
//! Results from different intervals interleave on the channel; within one
//! interval the engine's ordering guarantees hold. Mate pairs crossing a
//! BED-interval boundary resolve per interval under the configured orphan
//! policy.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::Result;
use bio::io::bed;
use crossbeam::channel::{bounded, Receiver};
use lazy_static::lazy_static;
use log::{error, info, trace, warn};
use rayon::prelude::*;
use rust_lapper::{Interval, Lapper};
use smartstring::{LazyCompact, SmartString};

use crate::core::concurrency::determine_allowed_cpus;
use crate::engine::{AlignedReadsScanner, ScanItem};
use crate::model::Span;

const BYTES_INA_GIGABYTE: usize = 1024 * 1024 * 1024;

/// A modifier to apply to the channel size formula that is
/// `(BYTES_INA_GIGABYTE * channel_size_modifier) * threads / size_of(ScanItem)`.
pub const CHANNEL_SIZE_MODIFIER: f64 = 0.25;

lazy_static! {
    /// CHANNEL_SIZE_MODIFIER as a str
    pub static ref CHANNEL_SIZE_MODIFIER_STR: String = CHANNEL_SIZE_MODIFIER.to_string();
}

/// One unit of parallel work: a reference plus an optional sub-range.
type ScanInterval = (SmartString<LazyCompact>, Option<Span>);

pub struct ParScan {
    scanner: Arc<AlignedReadsScanner>,
    /// Optional BED file restricting the scanned intervals.
    regions_bed: Option<PathBuf>,
    /// Merge overlapping BED intervals to avoid duplicate scanning.
    merge_regions: bool,
    threads: usize,
    channel_size_modifier: f64,
    pool: rayon::ThreadPool,
}

impl ParScan {
    pub fn new(
        scanner: AlignedReadsScanner,
        regions_bed: Option<PathBuf>,
        merge_regions: bool,
        threads: Option<usize>,
        channel_size_modifier: Option<f64>,
    ) -> Result<ParScan> {
        let threads = determine_allowed_cpus(threads.unwrap_or_else(num_cpus::get))?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()?;
        info!("Using {} worker threads.", threads);
        Ok(ParScan {
            scanner: Arc::new(scanner),
            regions_bed,
            merge_regions,
            threads,
            channel_size_modifier: channel_size_modifier.unwrap_or(CHANNEL_SIZE_MODIFIER),
            pool,
        })
    }

    /// Launch the scans and return the receiving end of the result channel.
    /// Dropping the receiver stops the producers at their next send.
    pub fn process(self) -> Result<Receiver<ScanItem>> {
        let channel_size: usize = ((BYTES_INA_GIGABYTE as f64 * self.channel_size_modifier).floor()
            as usize
            / std::mem::size_of::<ScanItem>())
        .saturating_mul(self.threads)
        .max(1);
        info!(
            "Creating channel of length {:?} (* {} bytes to get mem)",
            channel_size,
            std::mem::size_of::<ScanItem>()
        );
        let (snd, rxv) = bounded::<ScanItem>(channel_size);
        let intervals = self.intervals()?;
        info!("Processing {} interval(s)", intervals.len());
        let scanner = self.scanner;
        let pool = self.pool;
        thread::spawn(move || {
            pool.install(|| {
                intervals
                    .into_par_iter()
                    .for_each_with(snd, |snd, (reference, range)| {
                        trace!("Processing {}:{:?}", reference, range);
                        let scan = match scanner.scan(&reference, range) {
                            Ok(scan) => scan,
                            Err(e) => {
                                error!("failed to open scan of {}: {}", reference, e);
                                return;
                            }
                        };
                        for result in scan {
                            match result {
                                Ok(item) => {
                                    if snd.send(item).is_err() {
                                        warn!("Channel closed, writer may have disconnected");
                                        return;
                                    }
                                }
                                Err(e) => {
                                    error!("scan of {} aborted: {}", reference, e);
                                    return;
                                }
                            }
                        }
                    });
            });
        });
        Ok(rxv)
    }

    fn intervals(&self) -> Result<Vec<ScanInterval>> {
        match &self.regions_bed {
            Some(bed_path) => self.bed_to_intervals(bed_path),
            None => Ok(self
                .scanner
                .dictionary()
                .names()
                .iter()
                .map(|name| (name.clone(), None))
                .collect()),
        }
    }

    /// Read a BED file into per-reference interval sets, optionally merging
    /// overlaps. References absent from the sequence dictionary are skipped
    /// with a warning.
    fn bed_to_intervals(&self, bed_path: &PathBuf) -> Result<Vec<ScanInterval>> {
        let mut bed_reader = bed::Reader::from_file(bed_path)?;
        let dict = self.scanner.dictionary();
        let mut by_reference: Vec<(SmartString<LazyCompact>, Vec<Interval<u64, ()>>)> = Vec::new();
        for record in bed_reader.records() {
            let record = record?;
            if !dict.contains(record.chrom()) {
                warn!(
                    "BED reference `{}` not present in any source, skipping",
                    record.chrom()
                );
                continue;
            }
            let name = SmartString::from(record.chrom());
            let entry = match by_reference.iter_mut().find(|(n, _)| *n == name) {
                Some(entry) => entry,
                None => {
                    by_reference.push((name, Vec::new()));
                    by_reference.last_mut().expect("just pushed")
                }
            };
            entry.1.push(Interval {
                start: record.start(),
                stop: record.end(),
                val: (),
            });
        }
        let mut out = Vec::new();
        for (name, intervals) in by_reference {
            let mut lapper = Lapper::new(intervals);
            if self.merge_regions {
                lapper.merge_overlaps();
            }
            for iv in lapper.iter() {
                out.push((
                    name.clone(),
                    Some(Span::new(iv.start as i64, iv.stop as i64)),
                ));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ScanOptions, SourceOptions};
    use crate::engine::BamSource;
    use rust_htslib::bam::header::{Header, HeaderRecord};
    use rust_htslib::bam::record::{Cigar, CigarString};
    use rust_htslib::bam::{self, Format};
    use std::io::Write as IoWrite;
    use tempfile::tempdir;

    fn test_bam(dir: &std::path::Path) -> PathBuf {
        let path = dir.join("test.bam");
        let mut header = Header::new();
        let mut hd = HeaderRecord::new(b"HD");
        hd.push_tag(b"VN", &"1.6".to_string());
        hd.push_tag(b"SO", &"coordinate".to_string());
        header.push_record(&hd);
        for name in ["chr1", "chr2"] {
            let mut rec = HeaderRecord::new(b"SQ");
            rec.push_tag(b"SN", &name.to_string());
            rec.push_tag(b"LN", &"100000".to_string());
            header.push_record(&rec);
        }
        {
            let mut writer =
                bam::Writer::from_path(&path, &header, Format::Bam).expect("opened test.bam");
            for (tid, pos) in [(0, 100i64), (0, 500), (1, 250)] {
                let mut rec = bam::Record::new();
                rec.set(
                    format!("r{}{}", tid, pos).as_bytes(),
                    Some(&CigarString(vec![Cigar::Match(5)])),
                    b"AAAAA",
                    &[30; 5],
                );
                rec.set_tid(tid);
                rec.set_pos(pos);
                rec.set_mapq(60);
                rec.set_flags(0);
                writer.write(&rec).expect("wrote record");
            }
        }
        bam::index::build(&path, None, bam::index::Type::Bai, 1).expect("built index");
        path
    }

    fn scanner(path: &PathBuf) -> AlignedReadsScanner {
        AlignedReadsScanner::new(
            vec![BamSource::new(path, SourceOptions::default())],
            ScanOptions::default(),
        )
        .expect("built scanner")
    }

    #[test]
    fn streams_all_references() {
        let dir = tempdir().unwrap();
        let path = test_bam(dir.path());
        let par = ParScan::new(scanner(&path), None, true, Some(2), Some(0.001)).unwrap();
        let receiver = par.process().unwrap();
        let mut items: Vec<ScanItem> = receiver.into_iter().collect();
        items.sort_by(|a, b| (a.reference.as_str(), a.region.start())
            .cmp(&(b.reference.as_str(), b.region.start())));
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].reference.as_str(), "chr1");
        assert_eq!(items[0].region.start(), 100);
        assert_eq!(items[2].reference.as_str(), "chr2");
    }

    #[test]
    fn bed_restriction_limits_intervals() {
        let dir = tempdir().unwrap();
        let path = test_bam(dir.path());
        let bed_path = dir.path().join("regions.bed");
        {
            let mut bed = std::fs::File::create(&bed_path).unwrap();
            writeln!(bed, "chr1\t400\t600").unwrap();
            writeln!(bed, "chr1\t450\t700").unwrap();
        }
        let par = ParScan::new(
            scanner(&path),
            Some(bed_path),
            true,
            Some(2),
            Some(0.001),
        )
        .unwrap();
        let receiver = par.process().unwrap();
        let items: Vec<ScanItem> = receiver.into_iter().collect();
        // only the chr1:500 record falls inside the merged 400-700 window
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].region.start(), 500);
    }
}
