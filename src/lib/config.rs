//! Scan and source configuration.
//!
//! Everything here is pure configuration consumed by the engine: the
//! cumulative condition-count layout across input files, strandedness
//! policies, paired-end handling policies, and optional barcode filtering.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use flate2::read::GzDecoder;
use rust_htslib::bam::record::{Aux, Record};
use rustc_hash::FxHashSet;

use crate::core::error::{RegataError, Result};
use crate::core::numeric;
use crate::filter::{DefaultReadFilter, ReadFilter};
use crate::model::GapPolicy;

/// Which strand of the reference a scan targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strand {
    Forward,
    Reverse,
}

/// Library strandedness of one input source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strandedness {
    Sense,
    Antisense,
    Unspecific,
}

impl Strandedness {
    /// Single-end validity: does this record's strand fit the scan target?
    pub fn accepts_single(&self, target: Strand, record: &Record) -> bool {
        let read_strand = if record.is_reverse() {
            Strand::Reverse
        } else {
            Strand::Forward
        };
        match self {
            Strandedness::Unspecific => true,
            Strandedness::Sense => read_strand == target,
            Strandedness::Antisense => read_strand != target,
        }
    }

    /// Paired-end validity, judged on the first mate's orientation.
    pub fn accepts_pair(&self, target: Strand, first: &Record) -> bool {
        self.accepts_single(target, first)
    }
}

impl FromStr for Strandedness {
    type Err = RegataError;

    fn from_str(s: &str) -> Result<Strandedness> {
        match s.to_ascii_lowercase().as_str() {
            "sense" => Ok(Strandedness::Sense),
            "antisense" => Ok(Strandedness::Antisense),
            "unspecific" => Ok(Strandedness::Unspecific),
            other => Err(RegataError::Config(format!(
                "unknown strandedness `{}`",
                other
            ))),
        }
    }
}

/// What to do with paired records whose mate never shows up in the scanned
/// span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrphanPolicy {
    /// Discard silently (counted in the scan statistics).
    Drop,
    /// Synthesize a single-end aggregation with a truncated-end marker.
    ReportSingle,
    /// Re-query the mate position through the index before giving up.
    Query,
}

impl FromStr for OrphanPolicy {
    type Err = RegataError;

    fn from_str(s: &str) -> Result<OrphanPolicy> {
        match s.to_ascii_lowercase().as_str() {
            "drop" => Ok(OrphanPolicy::Drop),
            "report-single" | "single" => Ok(OrphanPolicy::ReportSingle),
            "query" => Ok(OrphanPolicy::Query),
            other => Err(RegataError::Config(format!(
                "unknown orphan policy `{}`",
                other
            ))),
        }
    }
}

/// How the engine treats paired-end flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairHandling {
    /// Every record is aggregated on its own footprint.
    SingleEnd,
    /// Mates are buffered and aggregated as pairs.
    Paired { require_proper: bool },
}

/// Per-source configuration: how many conditions its count tag packs, its
/// strandedness, and which aux tags carry counts and variant evidence.
#[derive(Debug, Clone)]
pub struct SourceOptions {
    pub conditions: usize,
    pub strandedness: Strandedness,
    pub count_tag: [u8; 2],
    pub variant_tag: [u8; 2],
}

impl Default for SourceOptions {
    fn default() -> SourceOptions {
        SourceOptions {
            conditions: 1,
            strandedness: Strandedness::Unspecific,
            count_tag: *b"XC",
            variant_tag: *b"XV",
        }
    }
}

/// Cumulative condition counts across input files. File `i` populates the
/// half-open slice `cumulative[i-1]..cumulative[i]` of the global condition
/// vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionLayout {
    cumulative: Vec<usize>,
}

impl ConditionLayout {
    pub fn new(per_file: &[usize]) -> ConditionLayout {
        ConditionLayout {
            cumulative: numeric::cumsum(per_file),
        }
    }

    pub fn from_sources(sources: &[SourceOptions]) -> ConditionLayout {
        let per_file: Vec<usize> = sources.iter().map(|s| s.conditions).collect();
        ConditionLayout::new(&per_file)
    }

    /// Rebuild from a cumulative array; must be non-decreasing.
    pub fn from_cumulative(cumulative: Vec<usize>) -> Result<ConditionLayout> {
        if cumulative.windows(2).any(|w| w[1] < w[0]) {
            return Err(RegataError::Config(
                "cumulative condition counts must be non-decreasing".to_string(),
            ));
        }
        Ok(ConditionLayout { cumulative })
    }

    /// Total number of conditions across all files.
    pub fn total(&self) -> usize {
        self.cumulative.last().copied().unwrap_or(0)
    }

    pub fn files(&self) -> usize {
        self.cumulative.len()
    }

    /// The slice of the global condition vector file `file` populates.
    pub fn slice(&self, file: usize) -> std::ops::Range<usize> {
        let start = if file == 0 {
            0
        } else {
            self.cumulative[file - 1]
        };
        start..self.cumulative[file]
    }
}

/// Whitelist of valid barcodes, loaded from a plain or gzipped file with one
/// barcode per line. Suffixes after `-` are stripped.
#[derive(Debug, Clone)]
pub struct BarcodeWhitelist {
    barcodes: Arc<FxHashSet<String>>,
}

impl BarcodeWhitelist {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<BarcodeWhitelist> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let reader: Box<dyn BufRead> = if path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.eq_ignore_ascii_case("gz"))
            .unwrap_or(false)
        {
            Box::new(BufReader::new(GzDecoder::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };
        let mut barcodes = FxHashSet::default();
        for line in reader.lines() {
            let line = line?;
            let barcode = line.trim();
            if !barcode.is_empty() {
                let clean = barcode.split('-').next().unwrap_or(barcode);
                barcodes.insert(clean.to_string());
            }
        }
        Ok(BarcodeWhitelist {
            barcodes: Arc::new(barcodes),
        })
    }

    pub fn from_vec(barcodes: Vec<String>) -> BarcodeWhitelist {
        BarcodeWhitelist {
            barcodes: Arc::new(barcodes.into_iter().collect()),
        }
    }

    #[inline]
    pub fn is_valid(&self, barcode: &str) -> bool {
        self.barcodes.contains(barcode)
    }

    pub fn len(&self) -> usize {
        self.barcodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.barcodes.is_empty()
    }
}

/// Barcode-based record filtering: extract the configured tag and check it
/// against an optional whitelist. Records without a decodable tag fail.
#[derive(Debug, Clone)]
pub struct BarcodeFilter {
    pub tag: [u8; 2],
    pub whitelist: Option<BarcodeWhitelist>,
}

impl BarcodeFilter {
    pub fn accepts(&self, record: &Record) -> bool {
        match decode_barcode(record, &self.tag) {
            Some(barcode) => self
                .whitelist
                .as_ref()
                .map(|w| w.is_valid(&barcode))
                .unwrap_or(true),
            None => false,
        }
    }
}

/// Extract and normalize a barcode from the requested BAM tag.
pub fn decode_barcode(record: &Record, tag: &[u8; 2]) -> Option<String> {
    let raw = match record.aux(tag) {
        Ok(Aux::String(s)) => s.to_string(),
        Ok(Aux::ArrayU8(arr)) => {
            let bytes: Vec<u8> = arr.iter().collect();
            String::from_utf8(bytes).ok()?
        }
        _ => return None,
    };
    let clean = raw.split('-').next().unwrap_or(&raw).trim();
    if clean.is_empty() || clean == "-" {
        None
    } else {
        Some(clean.to_string())
    }
}

/// Options for one scan of one reference sequence.
#[derive(Clone)]
pub struct ScanOptions {
    /// Strand of the reference this scan targets.
    pub target_strand: Strand,
    pub pairing: PairHandling,
    pub gap: GapPolicy,
    pub orphans: OrphanPolicy,
    /// Quality filter applied to every record before routing.
    pub read_filter: Arc<dyn ReadFilter + Send + Sync>,
    /// Drop secondary and supplementary alignments.
    pub primary_only: bool,
    /// Track numeric read ids and keep the smallest per distinct sequence.
    pub keep_read_ids: bool,
    /// Re-derive variation content per aggregation and log disagreements.
    pub check_consistency: bool,
    pub barcode: Option<BarcodeFilter>,
}

impl Default for ScanOptions {
    fn default() -> ScanOptions {
        ScanOptions {
            target_strand: Strand::Forward,
            pairing: PairHandling::SingleEnd,
            gap: GapPolicy::MissingIntron,
            orphans: OrphanPolicy::Drop,
            read_filter: Arc::new(DefaultReadFilter::new(0)),
            primary_only: false,
            keep_read_ids: false,
            check_consistency: false,
            barcode: None,
        }
    }
}
