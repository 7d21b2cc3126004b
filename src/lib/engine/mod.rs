//! The streaming merge/aggregation engine.
//!
//! [`scan::RegionScan`] is the pull-based core: it merges sorted per-file
//! record streams into position cohorts, buffers unpaired mates, groups
//! evidence by induced region, and emits aggregated results in region order.
//! [`sources::AlignedReadsScanner`] adapts indexed BAM files onto that core,
//! one fresh set of file handles per scan.

pub mod mates;
pub mod scan;
pub mod sources;

pub use mates::MateBuffer;
pub use scan::{MateResolver, RegionScan, ScanItem, ScanStats, SourceRecord};
pub use sources::{AlignedReadsScanner, BamSource, SequenceDictionary};
