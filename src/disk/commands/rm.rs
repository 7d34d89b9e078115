use anyhow::Result;
use std::path::Path;

use super::{commit, find_partition, open_disk};
use crate::disk::device::RetryPolicy;
use crate::disk::utils::confirm_or_yes;

pub fn rm(path: &Path, num: i32, retry: RetryPolicy, yes: bool) -> Result<()> {
    let mut disk = open_disk(path, false, retry)?;
    let id = find_partition(&disk, num)?;
    if let Some(part) = disk.partition(id)
        && part.is_extended()
        && !part.children().is_empty()
    {
        confirm_or_yes(
            yes,
            &format!(
                "Partition {} is extended and holds {} logical partitions. Delete them all?",
                num,
                part.children().len()
            ),
        )?;
    }
    disk.delete_partition(id)?;
    commit(&mut disk)?;
    println!("deleted partition {num}");
    Ok(())
}
