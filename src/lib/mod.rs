//! REGATA: region-level aggregation of alignments toolkit
//!
//! REGATA converts position-sorted BAM files into aggregated aligned-reads
//! data: it reconstructs the genomic region every record (or consistent mate
//! pair) covers, deduplicates identical alignments into distinct sequences,
//! tracks per-condition read counts across input files, and streams sorted
//! `(reference, region, data)` results to the caller.
//!
//! # Modules
//!
//! The main modules are:
//! - [`model`]: regions, variations, and aggregated read data
//! - [`reconstruct`]: CIGAR/MD walking and variation extraction
//! - [`factory`]: deduplication and per-condition count accumulation
//! - [`engine`]: the pull-based streaming merge engine over BAM sources
//! - [`parscan`]: parallel fan-out of independent reference scans
//! - [`checker`]: optional re-derivation of variation content
//! - [`config`]: condition layouts, strandedness, and policies
//! - [`filter`]: read quality filtering
//! - [`core`]: errors, numeric helpers, and I/O plumbing

pub mod checker;
pub mod config;
pub mod core;
pub mod engine;
pub mod factory;
pub mod filter;
pub mod model;
pub mod parscan;
pub mod reconstruct;
