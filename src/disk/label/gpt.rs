//! GUID partition tables, read and written through the `gpt` crate.
//!
//! The crate only ever sees a [`DeviceCursor`], so every byte it moves goes
//! through our device layer and its retry policy.

use gpt::disk::LogicalBlockSize;
use gpt::{GptConfig, partition_types};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use super::{
    LabelFeatures, LabelKind, LabelOps, PartData, add_metadata, dos, first_free_num,
    num_is_unique, range_policy, solve_with_policies,
};
use crate::disk::constraint::Constraint;
use crate::disk::device::Device;
use crate::disk::error::{DiskError, Result};
use crate::disk::geometry::Geometry;
use crate::disk::partition::{FsType, PartId, Partition, PartitionFlag, PartitionType};
use crate::disk::table::Disk;
use crate::disk::Sector;

const LABEL: &str = "gpt";

const HEADER_SIGNATURE: &[u8; 8] = b"EFI PART";
const MAX_PARTITIONS: usize = 128;
/// Protective MBR, header and a 128-entry array.
const RESERVED_HEAD: Sector = 34;
/// Backup array and backup header.
const RESERVED_TAIL: Sector = 33;
const MAX_NAME_UNITS: usize = 36;

const ATTR_LEGACY_BOOT: u64 = 1 << 2;
const ATTR_HIDDEN: u64 = 1 << 62;

/// Byte-addressed view of a [`Device`] for the `gpt` crate. Partial-sector
/// accesses are widened to whole sectors.
#[derive(Debug)]
struct DeviceCursor<'a> {
    dev: &'a Device,
    pos: u64,
}

impl<'a> DeviceCursor<'a> {
    fn new(dev: &'a Device) -> Self {
        Self { dev, pos: 0 }
    }

    fn size(&self) -> u64 {
        self.dev.length() as u64 * self.dev.sector_size()
    }

    /// Sector span covering `len` bytes from the current position.
    fn span(&self, len: u64) -> (Sector, Sector, usize) {
        let ss = self.dev.sector_size();
        let first = self.pos / ss;
        let last = (self.pos + len - 1) / ss;
        (
            first as Sector,
            (last - first + 1) as Sector,
            (self.pos - first * ss) as usize,
        )
    }
}

fn to_io(e: DiskError) -> io::Error {
    io::Error::other(e)
}

impl Read for DeviceCursor<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.size().saturating_sub(self.pos);
        let len = (buf.len() as u64).min(remaining);
        if len == 0 {
            return Ok(0);
        }
        let (first, count, skip) = self.span(len);
        let data = self.dev.read_sectors(first, count).map_err(to_io)?;
        let len = len as usize;
        buf[..len].copy_from_slice(&data[skip..skip + len]);
        self.pos += len as u64;
        Ok(len)
    }
}

impl Write for DeviceCursor<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let remaining = self.size().saturating_sub(self.pos);
        let len = (buf.len() as u64).min(remaining);
        if len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "write past the end of the device",
            ));
        }
        let (first, count, skip) = self.span(len);
        let len = len as usize;
        let ss = self.dev.sector_size() as usize;
        let mut data = if skip == 0 && len % ss == 0 {
            vec![0u8; len]
        } else {
            self.dev.read_sectors(first, count).map_err(to_io)?
        };
        data[skip..skip + len].copy_from_slice(&buf[..len]);
        self.dev.write(&data, first, count).map_err(to_io)?;
        self.pos += len as u64;
        Ok(len)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.dev.sync_fast().map_err(to_io)
    }
}

impl Seek for DeviceCursor<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(n) => self.size().checked_add_signed(n),
            SeekFrom::Current(n) => self.pos.checked_add_signed(n),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of device")
        })?;
        self.pos = target;
        Ok(target)
    }
}

fn gpt_error(action: &str, e: impl std::fmt::Display) -> DiskError {
    DiskError::label(LABEL, format!("failed to {action}: {e}"))
}

fn check_sector_size(dev: &Device) -> Result<()> {
    if dev.sector_size() != 512 {
        return Err(DiskError::unsupported(
            LABEL,
            format!("{}-byte sectors", dev.sector_size()),
        ));
    }
    Ok(())
}

pub(super) fn probe(dev: &Arc<Device>) -> Result<bool> {
    if dev.sector_size() != 512 || dev.length() < RESERVED_HEAD + RESERVED_TAIL {
        return Ok(false);
    }
    let header = dev.read_sectors(1, 1)?;
    Ok(&header[..HEADER_SIGNATURE.len()] == HEADER_SIGNATURE)
}

pub(super) fn clobber(dev: &Arc<Device>) -> Result<()> {
    let zero = vec![0u8; dev.sector_size() as usize];
    dev.write(&zero, 1, 1)?;
    dev.write(&zero, dev.length() - 1, 1)
}

#[derive(Debug, Clone, Default)]
pub struct GptLabel {
    grain: Option<Sector>,
}

impl GptLabel {
    pub fn with_grain(mut self, grain: Option<Sector>) -> Self {
        self.grain = grain;
        self
    }

    fn part_type(part: &Partition) -> partition_types::Type {
        match &part.data {
            PartData::Gpt { part_type } => part_type.clone(),
            _ => partition_types::LINUX_FS,
        }
    }

    fn attributes(part: &Partition) -> u64 {
        let mut attrs = 0;
        if part.has_flag(PartitionFlag::Boot) {
            attrs |= ATTR_LEGACY_BOOT;
        }
        if part.has_flag(PartitionFlag::Hidden) {
            attrs |= ATTR_HIDDEN;
        }
        attrs
    }
}

impl LabelOps for GptLabel {
    fn kind(&self) -> LabelKind {
        LabelKind::Gpt
    }

    fn features(&self) -> LabelFeatures {
        LabelFeatures::PARTITION_NAME
    }

    fn max_primary_partition_count(&self) -> usize {
        MAX_PARTITIONS
    }

    fn new_partition_data(&self, _kind: PartitionType) -> PartData {
        PartData::Gpt {
            part_type: partition_types::LINUX_FS,
        }
    }

    fn read(&mut self, disk: &mut Disk) -> Result<()> {
        let dev = Arc::clone(disk.device());
        check_sector_size(&dev)?;
        let gdisk = GptConfig::new()
            .writable(false)
            .logical_block_size(LogicalBlockSize::Lb512)
            .open_from_device(DeviceCursor::new(&dev))
            .map_err(|e| gpt_error("open GPT", e))?;

        for (idx, entry) in gdisk.partitions().iter() {
            if !entry.is_used() {
                continue;
            }
            let id = disk.new_partition(
                PartitionType::NORMAL,
                None,
                entry.first_lba as Sector,
                entry.last_lba as Sector,
            )?;
            let part = disk.part_mut(id)?;
            part.num = *idx as i32;
            if !entry.name.is_empty() {
                part.name = Some(entry.name.clone());
            }
            if entry.flags & ATTR_LEGACY_BOOT != 0 {
                part.flags.insert(PartitionFlag::Boot);
            }
            if entry.flags & ATTR_HIDDEN != 0 {
                part.flags.insert(PartitionFlag::Hidden);
            }
            part.data = PartData::Gpt {
                part_type: entry.part_type_guid.clone(),
            };
            disk.add_partition(id, None)?;
        }
        Ok(())
    }

    fn write(&self, disk: &Disk) -> Result<()> {
        let dev = disk.device();
        check_sector_size(dev)?;
        if dev.is_read_only() {
            return Err(DiskError::ReadOnly(dev.path().to_path_buf()));
        }

        let mut gdisk = GptConfig::new()
            .writable(true)
            .logical_block_size(LogicalBlockSize::Lb512)
            .create_from_device(DeviceCursor::new(dev), None)
            .map_err(|e| gpt_error("create GPT", e))?;

        for part in disk.iter().filter(|p| p.is_active()) {
            let num = u32::try_from(part.num)
                .map_err(|_| DiskError::label(LABEL, "partition without a number"))?;
            gdisk
                .add_partition_at(
                    part.name().unwrap_or_default(),
                    num,
                    part.start() as u64,
                    part.length() as u64,
                    Self::part_type(part),
                    Self::attributes(part),
                )
                .map_err(|e| gpt_error(&format!("add partition {num}"), e))?;
        }

        gdisk.write().map_err(|e| gpt_error("write GPT", e))?;
        dos::write_protective_mbr(dev)
    }

    fn partition_align(
        &self,
        disk: &Disk,
        id: PartId,
        constraint: &Constraint,
    ) -> Result<Geometry> {
        let dev = disk.device();
        let usable = (RESERVED_HEAD, dev.length() - RESERVED_TAIL - 1);

        let mut policies = Vec::new();
        if let Some(grain) = self.grain
            && let Some(aligned) = range_policy(dev, usable, usable, Some(grain))
        {
            policies.push(aligned);
        }
        if let Some(plain) = range_policy(dev, usable, usable, None) {
            policies.push(plain);
        }
        solve_with_policies(disk.geom(id)?, constraint, &policies)
    }

    fn partition_enumerate(&self, disk: &Disk, id: PartId) -> Result<i32> {
        let num = disk.part(id)?.num;
        if num <= MAX_PARTITIONS as i32 && num_is_unique(disk, id, num) {
            return Ok(num);
        }
        first_free_num(disk, id, 1..=MAX_PARTITIONS as i32).ok_or_else(|| {
            DiskError::Enumeration(format!("all {MAX_PARTITIONS} entries are taken"))
        })
    }

    fn alloc_metadata(&self, disk: &mut Disk) -> Result<()> {
        let length = disk.device().length();
        if length < RESERVED_HEAD + RESERVED_TAIL {
            debug!("device too small for GPT metadata: {} sectors", length);
            return Ok(());
        }
        add_metadata(disk, false, 0, RESERVED_HEAD - 1);
        add_metadata(disk, false, length - RESERVED_TAIL, length - 1);
        Ok(())
    }

    fn is_flag_available(&self, _part: &Partition, flag: PartitionFlag) -> bool {
        matches!(flag, PartitionFlag::Boot | PartitionFlag::Hidden)
    }

    fn set_system(&self, part: &mut Partition, fs_type: Option<FsType>) -> Result<()> {
        let part_type = match fs_type {
            Some(FsType::LinuxSwap) => partition_types::LINUX_SWAP,
            Some(fs) if fs.is_fat() => partition_types::BASIC,
            _ => partition_types::LINUX_FS,
        };
        part.data = PartData::Gpt { part_type };
        Ok(())
    }

    fn check_name(&self, name: &str) -> Result<()> {
        let units = name.encode_utf16().count();
        if units > MAX_NAME_UNITS {
            return Err(DiskError::label(
                LABEL,
                format!("partition name is {units} characters, the limit is {MAX_NAME_UNITS}"),
            ));
        }
        Ok(())
    }
}
