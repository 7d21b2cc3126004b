use anyhow::{Error, Result};
use log::{error, warn};

/// Validate and normalize a requested CPU count.
pub fn determine_allowed_cpus(desired: usize) -> Result<usize> {
    if desired == 0 {
        error!("Must select > 0 threads");
        Err(Error::msg("Too few threads selected"))
    } else if desired > num_cpus::get() {
        warn!(
            "Specified more threads than are available, using {}",
            desired
        );
        Ok(desired)
    } else {
        Ok(desired)
    }
}
