//! Core data model: regions, variations, and aggregated read data.

pub mod distinct;
pub mod region;
pub mod variant;

pub use distinct::{DistinctSequence, PairGeometry, RegionReadData};
pub use region::{GapPolicy, ReadRegion, Span, TruncatedEnd};
pub use variant::Variation;
