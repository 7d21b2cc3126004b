//! The `scan` subcommand: stream aggregated region data out of one or more
//! BAM files as TSV.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use itertools::Itertools;
use log::info;
use regata_lib::config::{
    BarcodeFilter, BarcodeWhitelist, OrphanPolicy, PairHandling, ScanOptions, SourceOptions,
    Strand, Strandedness,
};
use regata_lib::core::prelude::*;
use regata_lib::engine::{AlignedReadsScanner, BamSource, ScanItem};
use regata_lib::filter::DefaultReadFilter;
use regata_lib::model::GapPolicy;
use regata_lib::parscan::{ParScan, CHANNEL_SIZE_MODIFIER_STR};
use serde::Serialize;
use structopt::StructOpt;

/// CLI arguments for the `scan` subcommand.
#[derive(Debug, Clone, StructOpt)]
#[structopt(author, name = "scan")]
pub struct ScanArgs {
    /// Input indexed BAM files, position sorted.
    pub bams: Vec<PathBuf>,

    /// Output path (TSV, `.gz` for compression); stdout when omitted.
    #[structopt(long, short = "o")]
    pub output: Option<PathBuf>,

    /// Conditions packed into each file's count tag, comma separated, one
    /// entry per input file. Defaults to 1 per file.
    #[structopt(long, short = "c", use_delimiter = true)]
    pub conditions: Vec<usize>,

    /// Library strandedness applied to every input (sense/antisense/unspecific).
    #[structopt(long, default_value = "unspecific")]
    pub strandedness: Strandedness,

    /// Scan the reverse strand of each reference instead of the forward one.
    #[structopt(long)]
    pub minus_strand: bool,

    /// Buffer mates and aggregate read pairs instead of single ends.
    #[structopt(long, short = "p")]
    pub paired: bool,

    /// Keep pairs that are not flagged as proper.
    #[structopt(long)]
    pub no_proper_pair: bool,

    /// Policy for paired records without a mate in the scanned span
    /// (drop/report-single/query).
    #[structopt(long, default_value = "drop")]
    pub orphans: OrphanPolicy,

    /// Fill the gap between non-overlapping mates instead of marking it as
    /// a missing-information intron.
    #[structopt(long)]
    pub join_mates: bool,

    /// Minimum mapping quality for reads to be counted.
    #[structopt(long, short = "q", default_value = "0")]
    pub min_mapq: u8,

    /// Drop secondary and supplementary alignments.
    #[structopt(long)]
    pub primary_only: bool,

    /// Barcode whitelist file (plain or gzipped, one barcode per line).
    #[structopt(long)]
    pub barcodes: Option<PathBuf>,

    /// Tag carrying the barcode.
    #[structopt(long, default_value = "CB")]
    pub barcode_tag: String,

    /// Optional BED file restricting the scanned intervals.
    #[structopt(long)]
    pub bed: Option<PathBuf>,

    /// Track numeric read ids and report the smallest per distinct sequence.
    #[structopt(long)]
    pub keep_read_ids: bool,

    /// Re-derive variation content per aggregation and log disagreements.
    #[structopt(long)]
    pub check: bool,

    /// Number of worker threads to use.
    #[structopt(long, short = "t", default_value = "4")]
    pub threads: usize,

    /// Modifier for the result channel size formula.
    #[structopt(long, default_value = CHANNEL_SIZE_MODIFIER_STR.as_str())]
    pub channel_size_modifier: f64,
}

/// One output row per distinct sequence of an emitted region.
#[derive(Debug, Serialize)]
struct ScanRow {
    reference: String,
    start: i64,
    end: i64,
    region: String,
    length: u32,
    distinct: usize,
    multiplicity: u32,
    read_id: Option<u64>,
    variations: String,
    counts: String,
}

impl ScanRow {
    fn from_item(item: &ScanItem) -> impl Iterator<Item = ScanRow> + '_ {
        item.data.iter().enumerate().map(move |(index, d)| ScanRow {
            reference: item.reference.to_string(),
            start: item.region.start(),
            end: item.region.end(),
            region: item.region.to_string(),
            length: item.region.total_len(),
            distinct: index,
            multiplicity: d.multiplicity,
            read_id: d.read_id,
            variations: d.variations.iter().map(|v| v.to_string()).join(","),
            counts: d.counts.iter().map(|c| c.to_string()).join(","),
        })
    }
}

pub fn run_scan(args: ScanArgs) -> Result<()> {
    if args.bams.is_empty() {
        return Err(anyhow!("at least one BAM file is required"));
    }
    if !args.conditions.is_empty() && args.conditions.len() != args.bams.len() {
        return Err(anyhow!(
            "--conditions must list one entry per input file ({} given, {} files)",
            args.conditions.len(),
            args.bams.len()
        ));
    }
    let barcode_tag: [u8; 2] = args
        .barcode_tag
        .as_bytes()
        .try_into()
        .map_err(|_| anyhow!("barcode tag must be exactly 2 characters"))?;

    let sources: Vec<BamSource> = args
        .bams
        .iter()
        .enumerate()
        .map(|(i, path)| {
            BamSource::new(
                path,
                SourceOptions {
                    conditions: args.conditions.get(i).copied().unwrap_or(1),
                    strandedness: args.strandedness,
                    ..SourceOptions::default()
                },
            )
        })
        .collect();

    let barcode = match &args.barcodes {
        Some(path) => Some(BarcodeFilter {
            tag: barcode_tag,
            whitelist: Some(BarcodeWhitelist::from_file(path)?),
        }),
        None => None,
    };

    let opts = ScanOptions {
        target_strand: if args.minus_strand {
            Strand::Reverse
        } else {
            Strand::Forward
        },
        pairing: if args.paired {
            PairHandling::Paired {
                require_proper: !args.no_proper_pair,
            }
        } else {
            PairHandling::SingleEnd
        },
        gap: if args.join_mates {
            GapPolicy::Join
        } else {
            GapPolicy::MissingIntron
        },
        orphans: args.orphans,
        read_filter: Arc::new(DefaultReadFilter::new(args.min_mapq)),
        primary_only: args.primary_only,
        keep_read_ids: args.keep_read_ids,
        check_consistency: args.check,
        barcode,
    };

    let scanner = AlignedReadsScanner::new(sources, opts)?;
    info!(
        "Scanning {} reference(s) from {} file(s)",
        scanner.dictionary().names().len(),
        args.bams.len()
    );

    let gzipped = args.output.as_ref().map(is_gzipped).unwrap_or(false);
    if let Some(output) = &args.output {
        make_parent_dirs(output)?;
    }
    let mut writer = get_writer(&args.output, gzipped, true, args.threads, 6)?;

    let par = ParScan::new(
        scanner,
        args.bed.clone(),
        true,
        Some(args.threads),
        Some(args.channel_size_modifier),
    )?;
    let receiver = par.process()?;
    let mut regions = 0u64;
    for item in receiver {
        for row in ScanRow::from_item(&item) {
            writer.serialize(row)?;
        }
        regions += 1;
    }
    writer.flush()?;
    info!("Wrote {} region(s)", regions);
    Ok(())
}
