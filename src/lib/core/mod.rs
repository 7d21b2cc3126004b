pub mod concurrency;
pub mod error;
pub mod fs;
pub mod io;
pub mod numeric;

pub mod prelude {
    pub use super::concurrency::determine_allowed_cpus;
    pub use super::error::{is_broken_pipe, RegataError, Result};
    pub use super::fs::{is_gzipped, make_parent_dirs};
    pub use super::io::get_writer;
    pub use super::numeric::{cumsum, cumsum_rev, dedup_sorted, sum};
}
