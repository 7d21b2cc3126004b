//! Error types for the REGATA library.
//!
//! Errors come in two tiers. The variants of [`RegataError`] are the fatal
//! tier: data-contract or configuration violations where continuing would
//! silently corrupt counts. Recoverable conditions (inconsistent mate pairs,
//! orphaned mates, truncated input streams) never surface here; the engine
//! counts and logs them and keeps scanning.

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegataError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("htslib error: {0}")]
    Htslib(#[from] rust_htslib::errors::Error),

    #[error("read {name}: covered length {record} does not match target region length {region}")]
    CoveredLengthMismatch {
        name: String,
        record: u32,
        region: u32,
    },

    #[error("read {name}: mate footprints do not induce the target region")]
    PairRegionMismatch { name: String },

    #[error(
        "read {name}: count tag carries {found} fields but source {file} is configured \
         for {expected} condition(s)"
    )]
    ConditionCardinality {
        name: String,
        file: usize,
        found: usize,
        expected: usize,
    },

    #[error("read {name}: no count tag and source {file} is configured for {expected} conditions")]
    MissingCountTag {
        name: String,
        file: usize,
        expected: usize,
    },

    #[error("read name `{0}` is not numeric; read-id retention requires numeric names")]
    NonNumericReadId(String),

    #[error("read {name}: CIGAR induces an empty footprint")]
    EmptyFootprint { name: String },

    #[error("invalid variant token `{0}`")]
    InvalidVariantToken(String),

    #[error("invalid MD tag `{0}`")]
    InvalidMdTag(String),

    #[error("sequence dictionaries disagree: {reference} is {first} bp and {second} bp in different sources")]
    DictionaryMismatch {
        reference: String,
        first: u64,
        second: u64,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RegataError>;

/// Returns `true` if the error originated from a broken pipe.
#[inline]
pub fn is_broken_pipe(err: &anyhow::Error) -> bool {
    err.root_cause()
        .downcast_ref::<io::Error>()
        .map(|io_err| io_err.kind() == io::ErrorKind::BrokenPipe)
        .unwrap_or(false)
}
