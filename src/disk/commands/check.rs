use anyhow::{Context, Result};
use std::path::Path;

use super::open_disk;
use crate::disk::device::RetryPolicy;
use crate::disk::exception::ExceptionHandler;

pub fn check(path: &Path, handler: &dyn ExceptionHandler, retry: RetryPolicy) -> Result<()> {
    let disk = open_disk(path, true, retry)?;
    disk.check(handler)
        .with_context(|| format!("check of {} failed", path.display()))?;
    println!("{}: partitions consistent", path.display());
    Ok(())
}
