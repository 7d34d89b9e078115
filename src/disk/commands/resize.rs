use anyhow::Result;
use std::path::Path;

use super::{commit, find_partition, near, open_disk};
use crate::disk::constraint::Constraint;
use crate::disk::device::RetryPolicy;
use crate::disk::table::Disk;
use crate::disk::utils::{parse_position, Bound};

fn report(disk: &Disk, num: i32) {
    if let Some(part) = disk.get_partition(num).and_then(|id| disk.partition(id)) {
        println!(
            "partition {} now {}s-{}s ({} sectors)",
            num,
            part.start(),
            part.end(),
            part.length()
        );
    }
}

/// Moves partition `num` to the given bounds, within a sector of them.
pub fn resize(path: &Path, num: i32, start: &str, end: &str, retry: RetryPolicy) -> Result<()> {
    let mut disk = open_disk(path, false, retry)?;
    let dev = disk.device().clone();
    let id = find_partition(&disk, num)?;
    let start = parse_position(start, &dev, Bound::Start)?;
    let end = parse_position(end, &dev, Bound::End)?;

    let constraint = near(&dev, start, end, 1)?;
    disk.set_partition_geom(id, &constraint, start, end)?;
    commit(&mut disk)?;
    report(&disk, num);
    Ok(())
}

pub fn maximize(path: &Path, num: i32, retry: RetryPolicy) -> Result<()> {
    let mut disk = open_disk(path, false, retry)?;
    let id = find_partition(&disk, num)?;
    let any = Constraint::any(disk.device());
    disk.maximize_partition(id, &any)?;
    commit(&mut disk)?;
    report(&disk, num);
    Ok(())
}

pub fn minimize(path: &Path, retry: RetryPolicy) -> Result<()> {
    let mut disk = open_disk(path, false, retry)?;
    let Some(ext) = disk.extended_partition() else {
        println!("no extended partition");
        return Ok(());
    };
    let num = disk.partition(ext).map(|p| p.num()).unwrap_or(-1);
    disk.minimize_extended_partition()?;
    commit(&mut disk)?;
    if disk.extended_partition().is_some() {
        report(&disk, num);
    } else {
        println!("extended partition {num} was empty and has been deleted");
    }
    Ok(())
}
