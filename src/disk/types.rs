use serde::Serialize;

use super::partition::Partition;
use super::table::Disk;

#[derive(Debug, Serialize)]
pub struct PartitionInfo {
    /// 0 for free space and metadata
    pub number: i32,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub start: i64,
    pub end: i64,
    pub sectors: i64,
    pub size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct DiskInfo {
    pub disk: String,
    pub label: &'static str,
    pub sector_size: u64,
    pub sectors: i64,
    pub size_bytes: u64,
    pub max_primary: usize,
    pub partitions: Vec<PartitionInfo>,
}

impl PartitionInfo {
    fn new(part: &Partition, sector_size: u64) -> Self {
        Self {
            number: part.num().max(0),
            kind: part.type_name(),
            start: part.start(),
            end: part.end(),
            sectors: part.length(),
            size_bytes: part.length() as u64 * sector_size,
            filesystem: part.fs_type().map(|fs| fs.name()),
            name: part.name().map(str::to_string),
            flags: part.flags().map(|f| f.name()).collect(),
        }
    }
}

impl DiskInfo {
    /// Snapshot of `disk`. Placeholders are left out unless `free` is set.
    pub fn new(disk: &Disk, free: bool) -> Self {
        let dev = disk.device();
        let sector_size = dev.sector_size();
        Self {
            disk: dev.path().display().to_string(),
            label: disk.label_kind().name(),
            sector_size,
            sectors: dev.length(),
            size_bytes: dev.length() as u64 * sector_size,
            max_primary: disk.max_primary_partition_count(),
            partitions: disk
                .iter()
                .filter(|p| free || p.is_active())
                .map(|p| PartitionInfo::new(p, sector_size))
                .collect(),
        }
    }
}
