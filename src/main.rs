//! REGATA - region-level aggregation of alignments toolkit
//!
//! REGATA scans position-sorted BAM files and reduces them to aggregated
//! aligned-reads data: one row per distinct sequence of every genomic region
//! induced by the reads, with per-condition counts across input files.
//!
//! # Usage
//!
//! ```bash
//! # single-end aggregation of one file to stdout
//! regata scan input.bam
//!
//! # paired-end aggregation of two files with per-file condition counts
//! regata scan a.bam b.bam --paired -c 1,2 -o regions.tsv.gz
//!
//! # restrict to BED intervals, recover orphaned mates through the index
//! regata scan input.bam --paired --orphans query --bed targets.bed
//! ```

extern crate regata_lib;
pub mod commands;

use anyhow::Result;
use env_logger::Env;
use log::*;
use regata_lib::core::error::is_broken_pipe;
use structopt::StructOpt;

#[derive(StructOpt)]
#[structopt(rename_all = "kebab-case", author, about)]
/// Commands for aggregating aligned reads with REGATA
struct Args {
    #[structopt(subcommand)]
    subcommand: Subcommand,
}

#[derive(StructOpt)]
enum Subcommand {
    /// Stream aggregated region data out of BAM files as TSV
    Scan(commands::ScanArgs),
}

impl Subcommand {
    fn run(self) -> Result<()> {
        match self {
            Subcommand::Scan(args) => commands::run_scan(args)?,
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    if let Err(err) = Args::from_args().subcommand.run() {
        if is_broken_pipe(&err) {
            std::process::exit(0);
        }
        error!("{}", err);
        std::process::exit(1);
    }
    Ok(())
}
