use anyhow::{bail, Result};
use std::path::Path;

use super::{commit, find_partition, open_disk};
use crate::disk::device::RetryPolicy;
use crate::disk::partition::PartitionFlag;

pub fn set_flag(
    path: &Path,
    num: i32,
    flag: PartitionFlag,
    state: bool,
    retry: RetryPolicy,
) -> Result<()> {
    let mut disk = open_disk(path, false, retry)?;
    let id = find_partition(&disk, num)?;
    if !disk.is_partition_flag_available(id, flag)? {
        bail!(
            "flag {} is not available on {} partition {}",
            flag,
            disk.label_kind(),
            num
        );
    }
    disk.set_partition_flag(id, flag, state)?;
    commit(&mut disk)?;
    println!("partition {} {} {}", num, flag, if state { "on" } else { "off" });
    Ok(())
}

pub fn set_name(path: &Path, num: i32, name: &str, retry: RetryPolicy) -> Result<()> {
    let mut disk = open_disk(path, false, retry)?;
    let id = find_partition(&disk, num)?;
    disk.set_partition_name(id, name)?;
    commit(&mut disk)?;
    println!("partition {num} named {name:?}");
    Ok(())
}
