use super::Disk;
use crate::disk::error::{DiskError, Result};
use crate::disk::exception::{self, Choice, ExceptionHandler, ExceptionOptions, ExceptionType};
use crate::disk::fs;
use crate::disk::label::{LabelFeatures, LabelOps};
use crate::disk::partition::{FsType, PartId, PartitionFlag};
use crate::disk::Sector;

/// Sectors of slack allowed between a file system and its partition.
pub fn fs_size_tolerance(part_length: Sector) -> Sector {
    (part_length / 100).max(4096)
}

impl Disk {
    /// Compares every partition's declared size with the size recorded by
    /// the file system inside it. A mismatch is reported to `handler` as a
    /// warning; only Cancel turns it into an error.
    pub fn check(&self, handler: &dyn ExceptionHandler) -> Result<()> {
        self.dev.with_open(|_| {
            for part in self.iter() {
                if !part.is_active() {
                    continue;
                }
                let Some(fs_type) = part.fs_type else {
                    continue;
                };
                let Some(fs_geom) = fs::probe_specific(fs_type, &part.geom) else {
                    continue;
                };

                let length_error = (part.length() - fs_geom.length()).abs();
                let max_length_error = fs_size_tolerance(part.length());
                if part.geom.test_inside(&fs_geom) && length_error <= max_length_error {
                    continue;
                }

                let choice = exception::throw(
                    handler,
                    ExceptionType::Warning,
                    ExceptionOptions::IGNORE_CANCEL,
                    format!(
                        "Partition {} is {} sectors, but the file system is {} sectors.",
                        part.num,
                        part.length(),
                        fs_geom.length()
                    ),
                );
                if choice == Choice::Cancel {
                    return Err(DiskError::FileSystemMismatch {
                        num: part.num,
                        part_sectors: part.length(),
                        fs_sectors: fs_geom.length(),
                    });
                }
            }
            Ok(())
        })
    }

    fn require_active(&self, id: PartId) -> Result<()> {
        if self.part(id)?.is_active() {
            Ok(())
        } else {
            Err(DiskError::label(
                self.label.kind().name(),
                format!("partition {id} is a placeholder"),
            ))
        }
    }

    pub fn is_partition_flag_available(&self, id: PartId, flag: PartitionFlag) -> Result<bool> {
        self.require_active(id)?;
        Ok(self.label.is_flag_available(self.part(id)?, flag))
    }

    pub fn set_partition_flag(&mut self, id: PartId, flag: PartitionFlag, state: bool) -> Result<()> {
        if !self.is_partition_flag_available(id, flag)? {
            return Err(DiskError::unsupported(
                self.label.kind().name(),
                format!("the '{flag}' flag"),
            ));
        }
        let label = self.label.clone();
        label.set_flag(self, id, flag, state)
    }

    pub fn get_partition_flag(&self, id: PartId, flag: PartitionFlag) -> Result<bool> {
        self.require_active(id)?;
        Ok(self.part(id)?.has_flag(flag))
    }

    fn require_names(&self) -> Result<()> {
        if self.supports(LabelFeatures::PARTITION_NAME) {
            Ok(())
        } else {
            Err(DiskError::unsupported(
                self.label.kind().name(),
                "partition names",
            ))
        }
    }

    pub fn set_partition_name(&mut self, id: PartId, name: &str) -> Result<()> {
        self.require_active(id)?;
        self.require_names()?;
        self.label.check_name(name)?;
        self.part_mut(id)?.name = Some(name.to_string());
        Ok(())
    }

    pub fn partition_name(&self, id: PartId) -> Result<Option<&str>> {
        self.require_active(id)?;
        self.require_names()?;
        Ok(self.part(id)?.name())
    }

    /// Records the file system a partition is meant to hold, letting the
    /// label pick its type code.
    pub fn set_partition_system(&mut self, id: PartId, fs_type: Option<FsType>) -> Result<()> {
        self.require_active(id)?;
        let label = self.label.clone();
        let part = self.part_mut(id)?;
        label.set_system(part, fs_type)?;
        part.fs_type = fs_type;
        Ok(())
    }
}
