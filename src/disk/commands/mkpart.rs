use anyhow::{Context, Result};
use std::path::Path;

use super::{commit, grain_sectors, near, open_disk};
use crate::disk::device::RetryPolicy;
use crate::disk::partition::{FsType, PartitionType};
use crate::disk::utils::{parse_position, Bound};

#[derive(Debug, Clone)]
pub struct MkpartRequest {
    pub kind: PartitionType,
    pub fs_type: Option<FsType>,
    pub start: String,
    pub end: String,
    pub name: Option<String>,
    pub align_bytes: u64,
}

/// Adds a partition as close to the requested bounds as alignment and the
/// existing partitions allow. Returns its number.
pub fn mkpart(path: &Path, request: &MkpartRequest, retry: RetryPolicy) -> Result<i32> {
    let mut disk = open_disk(path, false, retry)?;
    let dev = disk.device().clone();
    let grain = grain_sectors(&dev, request.align_bytes);
    disk.set_alignment_grain(grain);

    let start = parse_position(&request.start, &dev, Bound::Start)?;
    let end = parse_position(&request.end, &dev, Bound::End)?;
    let constraint = near(&dev, start, end, grain.unwrap_or(1))?;

    let id = disk.new_partition(request.kind, request.fs_type, start, end)?;
    if let Err(e) = disk.add_partition(id, Some(&constraint)) {
        disk.destroy_partition(id)?;
        return Err(e).with_context(|| {
            format!("unable to place a partition at {}s-{}s", start, end)
        });
    }
    if let Some(name) = &request.name {
        disk.set_partition_name(id, name)?;
    }
    commit(&mut disk)?;

    let part = disk
        .partition(id)
        .context("partition vanished after commit")?;
    if part.start() != start || part.end() != end {
        info!(
            "requested {}s-{}s, placed at {}s-{}s",
            start,
            end,
            part.start(),
            part.end()
        );
    }
    println!(
        "created {} partition {} ({}s-{}s)",
        part.type_name(),
        part.num(),
        part.start(),
        part.end()
    );
    Ok(part.num())
}
