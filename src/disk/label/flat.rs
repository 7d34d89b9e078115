use super::{LabelFeatures, LabelKind, LabelOps, first_free_num, num_is_unique};
use crate::disk::constraint::Constraint;
use crate::disk::error::{DiskError, Result};
use crate::disk::geometry::Geometry;
use crate::disk::partition::{PartId, Partition, PartitionFlag};
use crate::disk::table::Disk;

const DEFAULT_MAX_PRIMARY: usize = 4;

/// An in-memory label with no on-disk format and no placement rules beyond
/// the caller's constraint. Useful for planning layouts and for testing.
#[derive(Debug, Clone)]
pub struct FlatLabel {
    max_primary: usize,
}

impl Default for FlatLabel {
    fn default() -> Self {
        Self {
            max_primary: DEFAULT_MAX_PRIMARY,
        }
    }
}

impl FlatLabel {
    pub fn with_max_primary(max_primary: usize) -> Self {
        Self { max_primary }
    }
}

impl LabelOps for FlatLabel {
    fn kind(&self) -> LabelKind {
        LabelKind::Flat
    }

    fn features(&self) -> LabelFeatures {
        LabelFeatures::empty()
    }

    fn max_primary_partition_count(&self) -> usize {
        self.max_primary
    }

    fn read(&mut self, _disk: &mut Disk) -> Result<()> {
        Ok(())
    }

    fn write(&self, _disk: &Disk) -> Result<()> {
        Err(DiskError::unsupported("flat", "writing to a device"))
    }

    fn partition_align(
        &self,
        disk: &Disk,
        id: PartId,
        constraint: &Constraint,
    ) -> Result<Geometry> {
        constraint
            .solve_nearest(disk.geom(id)?)
            .ok_or(DiskError::AlignmentFailed)
    }

    fn partition_enumerate(&self, disk: &Disk, id: PartId) -> Result<i32> {
        let num = disk.part(id)?.num;
        if num_is_unique(disk, id, num) {
            return Ok(num);
        }
        let max = i32::try_from(self.max_primary).unwrap_or(i32::MAX);
        first_free_num(disk, id, 1..=max)
            .ok_or_else(|| DiskError::Enumeration(format!("all {max} slots are taken")))
    }

    fn alloc_metadata(&self, _disk: &mut Disk) -> Result<()> {
        Ok(())
    }

    fn is_flag_available(&self, _part: &Partition, flag: PartitionFlag) -> bool {
        flag == PartitionFlag::Boot
    }
}
