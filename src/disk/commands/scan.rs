use anyhow::{bail, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;

use super::{find_partition, open_disk};
use crate::disk::device::RetryPolicy;
use crate::disk::geometry::Geometry;
use crate::disk::Sector;

const TICKS: u64 = 1000;

/// Reads every sector of partition `num`, or of the whole disk, and fails
/// on the first one that cannot be read.
pub fn scan(path: &Path, num: Option<i32>, buffer_sectors: Sector, retry: RetryPolicy) -> Result<()> {
    let disk = open_disk(path, true, retry)?;
    let geom = match num {
        Some(num) => {
            let id = find_partition(&disk, num)?;
            match disk.partition(id) {
                Some(part) => part.geometry().clone(),
                None => bail!("no partition numbered {num}"),
            }
        }
        None => Geometry::whole(disk.device()),
    };

    let pb = ProgressBar::new(TICKS);
    pb.set_style(
        ProgressStyle::with_template(
            "{msg} {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {percent}% ({eta})",
        )?
        .progress_chars("=>-"),
    );
    pb.set_message(format!("scanning {} sectors", geom.length()));

    let result = disk.device().with_open(|_| {
        geom.check(buffer_sectors, 0, 1, geom.length(), &mut |fraction: f64| {
            pb.set_position((fraction * TICKS as f64) as u64);
        })
    });
    pb.finish_and_clear();

    match result? {
        Some(sector) => bail!(
            "unreadable sector {} (device sector {})",
            sector,
            geom.start() + sector
        ),
        None => {
            println!(
                "{}: {} sectors readable",
                path.display(),
                geom.length()
            );
            Ok(())
        }
    }
}
