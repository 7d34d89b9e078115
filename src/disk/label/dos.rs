//! MS-DOS partition tables: four primary slots in the master boot record
//! and a chain of extended boot records for logical partitions.

use std::sync::Arc;

use super::{
    LabelFeatures, LabelKind, LabelOps, PartData, add_metadata, first_free_num, num_is_unique,
    range_policy, solve_with_policies,
};
use crate::disk::constraint::Constraint;
use crate::disk::device::{Chs, Device};
use crate::disk::error::{DiskError, Result};
use crate::disk::geometry::Geometry;
use crate::disk::partition::{FsType, PartId, Partition, PartitionFlag, PartitionType};
use crate::disk::table::Disk;
use crate::disk::Sector;

const LABEL: &str = "dos";

const DISK_SIGNATURE_OFFSET: usize = 440;
const TABLE_OFFSET: usize = 446;
const ENTRY_SIZE: usize = 16;
const SIGNATURE_OFFSET: usize = 510;
const SIGNATURE: [u8; 2] = [0x55, 0xAA];
const MAX_PRIMARY: usize = 4;
const FIRST_LOGICAL: i32 = 5;
const MAX_CHAIN: usize = 1024;

pub(super) mod system {
    pub const EMPTY: u8 = 0x00;
    pub const FAT16: u8 = 0x06;
    pub const EXTENDED: u8 = 0x05;
    pub const FAT32: u8 = 0x0b;
    pub const FAT32_LBA: u8 = 0x0c;
    pub const FAT16_LBA: u8 = 0x0e;
    pub const EXTENDED_LBA: u8 = 0x0f;
    pub const HIDDEN: u8 = 0x10;
    pub const LINUX_SWAP: u8 = 0x82;
    pub const LINUX: u8 = 0x83;
    pub const LINUX_EXTENDED: u8 = 0x85;
    pub const LVM: u8 = 0x8e;
    pub const RAID: u8 = 0xfd;
    pub const GPT_PROTECTIVE: u8 = 0xee;
}

fn is_extended_system(id: u8) -> bool {
    matches!(
        id,
        system::EXTENDED | system::EXTENDED_LBA | system::LINUX_EXTENDED
    )
}

fn is_fat_system(id: u8) -> bool {
    matches!(
        id & !system::HIDDEN,
        system::FAT16 | system::FAT32 | system::FAT32_LBA | system::FAT16_LBA
    )
}

/// One 16-byte slot of a boot record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(super) struct RawEntry {
    pub boot_ind: u8,
    pub system: u8,
    pub start: u32,
    pub length: u32,
}

impl RawEntry {
    fn parse(bytes: &[u8]) -> Self {
        Self {
            boot_ind: bytes[0],
            system: bytes[4],
            start: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            length: u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
        }
    }

    /// Serializes the entry. `offset` is the absolute sector `start` is
    /// relative to, used for the CHS fields.
    fn encode(&self, bytes: &mut [u8], chs: &Chs, offset: Sector) {
        bytes[0] = self.boot_ind;
        bytes[4] = self.system;
        bytes[8..12].copy_from_slice(&self.start.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.length.to_le_bytes());
        if self.is_empty() {
            bytes[1..4].fill(0);
            bytes[5..8].fill(0);
        } else {
            let first = offset + self.start as Sector;
            let last = first + self.length as Sector - 1;
            bytes[1..4].copy_from_slice(&chs_encode(chs, first));
            bytes[5..8].copy_from_slice(&chs_encode(chs, last));
        }
    }

    fn is_empty(&self) -> bool {
        self.system == system::EMPTY || self.length == 0
    }
}

/// Packs an LBA into the legacy 3-byte CHS form, saturating at the
/// largest addressable cylinder.
fn chs_encode(chs: &Chs, lba: Sector) -> [u8; 3] {
    let per_cylinder = chs.heads * chs.sectors;
    let mut cylinder = lba / per_cylinder;
    let mut head = (lba % per_cylinder) / chs.sectors;
    let mut sector = lba % chs.sectors + 1;
    if cylinder > 1023 {
        cylinder = 1023;
        head = chs.heads - 1;
        sector = chs.sectors;
    }
    [
        head as u8,
        (((cylinder >> 2) & 0xc0) as u8) | (sector as u8 & 0x3f),
        (cylinder & 0xff) as u8,
    ]
}

fn lba32(value: Sector, what: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| DiskError::label(LABEL, format!("{what} {value} does not fit in 32 bits")))
}

fn has_signature(sector: &[u8]) -> bool {
    sector.len() >= 512 && sector[SIGNATURE_OFFSET..SIGNATURE_OFFSET + 2] == SIGNATURE
}

fn entries(sector: &[u8]) -> [RawEntry; 4] {
    std::array::from_fn(|i| {
        let at = TABLE_OFFSET + i * ENTRY_SIZE;
        RawEntry::parse(&sector[at..at + ENTRY_SIZE])
    })
}

fn put_entries(sector: &mut [u8], table: &[RawEntry; 4], chs: &Chs, offsets: [Sector; 4]) {
    for (i, entry) in table.iter().enumerate() {
        let at = TABLE_OFFSET + i * ENTRY_SIZE;
        entry.encode(&mut sector[at..at + ENTRY_SIZE], chs, offsets[i]);
    }
    sector[SIGNATURE_OFFSET..SIGNATURE_OFFSET + 2].copy_from_slice(&SIGNATURE);
}

pub(super) fn probe(dev: &Arc<Device>) -> Result<bool> {
    if dev.length() < 1 || dev.sector_size() < 512 {
        return Ok(false);
    }
    let sector = dev.read_sectors(0, 1)?;
    if !has_signature(&sector) {
        return Ok(false);
    }
    let table = entries(&sector);
    // boot indicators other than 0x00 and 0x80 mean a boot sector, not a table
    if table.iter().any(|e| e.boot_ind != 0 && e.boot_ind != 0x80) {
        return Ok(false);
    }
    if table.iter().any(|e| e.system == system::GPT_PROTECTIVE) {
        return Ok(false);
    }
    Ok(true)
}

pub(super) fn clobber(dev: &Arc<Device>) -> Result<()> {
    let mut sector = dev.read_sectors(0, 1)?;
    sector[TABLE_OFFSET..SIGNATURE_OFFSET + 2].fill(0);
    dev.write(&sector, 0, 1)
}

/// Writes a master boot record holding a single 0xEE entry that covers the
/// whole device, keeping any boot code already there.
pub(super) fn write_protective_mbr(dev: &Arc<Device>) -> Result<()> {
    let mut sector = dev.read_sectors(0, 1)?;
    let length = (dev.length() - 1).min(u32::MAX as Sector) as u32;
    let table = [
        RawEntry {
            boot_ind: 0,
            system: system::GPT_PROTECTIVE,
            start: 1,
            length,
        },
        RawEntry::default(),
        RawEntry::default(),
        RawEntry::default(),
    ];
    put_entries(&mut sector, &table, &dev.bios_geometry(), [0; 4]);
    dev.write(&sector, 0, 1)
}

#[derive(Debug, Clone, Default)]
pub struct DosLabel {
    disk_signature: u32,
    grain: Option<Sector>,
}

impl DosLabel {
    pub fn with_grain(mut self, grain: Option<Sector>) -> Self {
        self.grain = grain;
        self
    }

    pub fn disk_signature(&self) -> u32 {
        self.disk_signature
    }

    fn system_of(part: &Partition) -> u8 {
        match part.data {
            PartData::Dos { system } => system,
            _ => system::LINUX,
        }
    }

    /// The system id implied by a partition's kind, file system and flags.
    fn compute_system(part: &Partition, fs_type: Option<FsType>) -> u8 {
        let lba = part.has_flag(PartitionFlag::Lba);
        if part.is_extended() {
            return if lba {
                system::EXTENDED_LBA
            } else {
                system::EXTENDED
            };
        }
        if part.has_flag(PartitionFlag::Raid) {
            return system::RAID;
        }
        if part.has_flag(PartitionFlag::Lvm) {
            return system::LVM;
        }
        let id = match fs_type {
            Some(FsType::LinuxSwap) => system::LINUX_SWAP,
            Some(FsType::Fat16) if lba => system::FAT16_LBA,
            Some(FsType::Fat16) => system::FAT16,
            Some(FsType::Fat32) if lba => system::FAT32_LBA,
            Some(FsType::Fat32) => system::FAT32,
            _ => system::LINUX,
        };
        if part.has_flag(PartitionFlag::Hidden) && is_fat_system(id) {
            id | system::HIDDEN
        } else {
            id
        }
    }

    fn flags_from_system(part: &mut Partition, entry: &RawEntry) {
        if entry.boot_ind == 0x80 {
            part.flags.insert(PartitionFlag::Boot);
        }
        match entry.system {
            system::RAID => {
                part.flags.insert(PartitionFlag::Raid);
            }
            system::LVM => {
                part.flags.insert(PartitionFlag::Lvm);
            }
            system::EXTENDED_LBA | system::FAT32_LBA | system::FAT16_LBA => {
                part.flags.insert(PartitionFlag::Lba);
            }
            id if is_fat_system(id) && id & system::HIDDEN != 0 => {
                part.flags.insert(PartitionFlag::Hidden);
                if matches!(id & !system::HIDDEN, system::FAT32_LBA | system::FAT16_LBA) {
                    part.flags.insert(PartitionFlag::Lba);
                }
            }
            _ => {}
        }
    }

    fn read_entry(
        disk: &mut Disk,
        kind: PartitionType,
        entry: &RawEntry,
        base: Sector,
        num: i32,
    ) -> Result<PartId> {
        let start = base + entry.start as Sector;
        let end = start + entry.length as Sector - 1;
        let id = disk.new_partition(kind, None, start, end)?;
        let part = disk.part_mut(id)?;
        part.num = num;
        part.data = PartData::Dos {
            system: entry.system,
        };
        Self::flags_from_system(part, entry);
        disk.add_partition(id, None)?;
        Ok(id)
    }

    fn read_logicals(disk: &mut Disk, ext_start: Sector) -> Result<()> {
        let dev = Arc::clone(disk.device());
        let mut ebr = ext_start;
        let mut num = FIRST_LOGICAL;
        let mut seen = Vec::new();
        for _ in 0..MAX_CHAIN {
            if seen.contains(&ebr) {
                warn!("extended boot record chain loops at sector {}", ebr);
                break;
            }
            seen.push(ebr);
            let sector = dev.read_sectors(ebr, 1)?;
            if !has_signature(&sector) {
                if ebr != ext_start {
                    warn!("invalid extended boot record at sector {}", ebr);
                }
                break;
            }
            let table = entries(&sector);
            if !table[0].is_empty() {
                Self::read_entry(disk, PartitionType::LOGICAL, &table[0], ebr, num)?;
                num += 1;
            }
            if table[1].is_empty() || !is_extended_system(table[1].system) {
                break;
            }
            ebr = ext_start + table[1].start as Sector;
        }
        Ok(())
    }

    fn write_logicals(&self, disk: &Disk, ext: &Partition) -> Result<()> {
        let dev = disk.device();
        let chs = dev.bios_geometry();
        let logicals: Vec<&Partition> = ext
            .children
            .iter()
            .filter_map(|id| disk.partition(*id))
            .filter(|p| p.is_active())
            .collect();

        if logicals.is_empty() {
            let mut sector = vec![0u8; dev.sector_size() as usize];
            put_entries(&mut sector, &[RawEntry::default(); 4], &chs, [0; 4]);
            return dev.write(&sector, ext.start(), 1);
        }

        for (i, part) in logicals.iter().enumerate() {
            let ebr = if i == 0 { ext.start() } else { part.start() - 1 };
            let mut table = [RawEntry::default(); 4];
            table[0] = RawEntry {
                boot_ind: if part.has_flag(PartitionFlag::Boot) { 0x80 } else { 0 },
                system: Self::system_of(part),
                start: lba32(part.start() - ebr, "logical offset")?,
                length: lba32(part.length(), "partition length")?,
            };
            let mut offsets = [ebr, 0, 0, 0];
            if let Some(next) = logicals.get(i + 1) {
                let next_ebr = next.start() - 1;
                table[1] = RawEntry {
                    boot_ind: 0,
                    system: system::EXTENDED,
                    start: lba32(next_ebr - ext.start(), "extended offset")?,
                    length: lba32(next.end() - next_ebr + 1, "partition length")?,
                };
                offsets[1] = ext.start();
            }
            let mut sector = vec![0u8; dev.sector_size() as usize];
            put_entries(&mut sector, &table, &chs, offsets);
            dev.write(&sector, ebr, 1)?;
        }
        Ok(())
    }
}

impl LabelOps for DosLabel {
    fn kind(&self) -> LabelKind {
        LabelKind::Dos
    }

    fn features(&self) -> LabelFeatures {
        LabelFeatures::EXTENDED
    }

    fn max_primary_partition_count(&self) -> usize {
        MAX_PRIMARY
    }

    fn new_partition_data(&self, kind: PartitionType) -> PartData {
        let system = if kind == PartitionType::EXTENDED {
            system::EXTENDED
        } else {
            system::LINUX
        };
        PartData::Dos { system }
    }

    fn read(&mut self, disk: &mut Disk) -> Result<()> {
        let dev = Arc::clone(disk.device());
        let sector = dev.read_sectors(0, 1)?;
        if !has_signature(&sector) {
            return Err(DiskError::label(LABEL, "missing boot record signature"));
        }
        self.disk_signature = u32::from_le_bytes([
            sector[DISK_SIGNATURE_OFFSET],
            sector[DISK_SIGNATURE_OFFSET + 1],
            sector[DISK_SIGNATURE_OFFSET + 2],
            sector[DISK_SIGNATURE_OFFSET + 3],
        ]);

        let mut ext_start = None;
        for (i, entry) in entries(&sector).iter().enumerate() {
            if entry.is_empty() {
                continue;
            }
            let kind = if is_extended_system(entry.system) {
                PartitionType::EXTENDED
            } else {
                PartitionType::NORMAL
            };
            let id = Self::read_entry(disk, kind, entry, 0, i as i32 + 1)?;
            if kind == PartitionType::EXTENDED {
                ext_start = Some(disk.geom(id)?.start());
            }
        }
        if let Some(ext_start) = ext_start {
            Self::read_logicals(disk, ext_start)?;
        }
        Ok(())
    }

    fn write(&self, disk: &Disk) -> Result<()> {
        let dev = disk.device();
        let chs = dev.bios_geometry();
        let mut sector = dev.read_sectors(0, 1)?;

        let signature = if self.disk_signature != 0 {
            self.disk_signature
        } else {
            rand::random::<u32>()
        };
        sector[DISK_SIGNATURE_OFFSET..DISK_SIGNATURE_OFFSET + 4]
            .copy_from_slice(&signature.to_le_bytes());

        let mut table = [RawEntry::default(); 4];
        for id in disk.top_level() {
            let Some(part) = disk.partition(*id) else {
                continue;
            };
            if !part.is_active() {
                continue;
            }
            let slot = usize::try_from(part.num - 1)
                .ok()
                .filter(|slot| *slot < MAX_PRIMARY)
                .ok_or_else(|| {
                    DiskError::label(LABEL, format!("primary partition numbered {}", part.num))
                })?;
            table[slot] = RawEntry {
                boot_ind: if part.has_flag(PartitionFlag::Boot) { 0x80 } else { 0 },
                system: Self::system_of(part),
                start: lba32(part.start(), "partition start")?,
                length: lba32(part.length(), "partition length")?,
            };
            if part.is_extended() {
                self.write_logicals(disk, part)?;
            }
        }
        put_entries(&mut sector, &table, &chs, [0; 4]);
        dev.write(&sector, 0, 1)
    }

    fn partition_align(
        &self,
        disk: &Disk,
        id: PartId,
        constraint: &Constraint,
    ) -> Result<Geometry> {
        let dev = disk.device();
        let part = disk.part(id)?;
        let last = dev.length() - 1;

        let (start_bounds, end_bounds) = if part.is_logical() {
            let ext = disk
                .extended_partition()
                .ok_or_else(|| DiskError::NoExtendedPartition {
                    path: dev.path().to_path_buf(),
                })?;
            let ext_part = disk.part(ext)?;
            let siblings: Vec<&Partition> = ext_part
                .children
                .iter()
                .filter(|c| **c != id)
                .filter_map(|c| disk.partition(*c))
                .filter(|p| p.is_active())
                .collect();
            // room for the boot record that precedes every logical partition
            let mut min_start = ext_part.start() + 1;
            let mut max_end = ext_part.end();
            for sibling in siblings {
                if sibling.start() < part.start() {
                    min_start = min_start.max(sibling.end() + 2);
                } else {
                    max_end = max_end.min(sibling.start() - 2);
                    break;
                }
            }
            ((min_start, max_end), (min_start, max_end))
        } else if part.is_extended() {
            let logicals: Vec<&Partition> = part
                .children
                .iter()
                .filter_map(|c| disk.partition(*c))
                .filter(|p| p.is_active())
                .collect();
            match (logicals.first(), logicals.last()) {
                (Some(first), Some(last_logical)) => (
                    (1, first.start() - 1),
                    (last_logical.end(), last),
                ),
                _ => ((1, last), (1, last)),
            }
        } else {
            ((1, last), (1, last))
        };

        let mut policies = Vec::new();
        if let Some(grain) = self.grain
            && let Some(aligned) = range_policy(dev, start_bounds, end_bounds, Some(grain))
        {
            policies.push(aligned);
        }
        if let Some(plain) = range_policy(dev, start_bounds, end_bounds, None) {
            policies.push(plain);
        }
        solve_with_policies(&part.geom, constraint, &policies)
    }

    fn partition_enumerate(&self, disk: &Disk, id: PartId) -> Result<i32> {
        let part = disk.part(id)?;
        if part.is_logical() {
            return first_free_num(disk, id, FIRST_LOGICAL..=i32::MAX)
                .ok_or_else(|| DiskError::Enumeration("no free logical number".into()));
        }
        if (1..=MAX_PRIMARY as i32).contains(&part.num) && num_is_unique(disk, id, part.num) {
            return Ok(part.num);
        }
        first_free_num(disk, id, 1..=MAX_PRIMARY as i32).ok_or_else(|| {
            DiskError::Enumeration(format!("all {MAX_PRIMARY} primary slots are taken"))
        })
    }

    fn alloc_metadata(&self, disk: &mut Disk) -> Result<()> {
        if disk.device().length() < 1 {
            return Ok(());
        }
        add_metadata(disk, false, 0, 0);

        let Some(ext) = disk.extended_partition() else {
            return Ok(());
        };
        let ext_start = disk.geom(ext)?.start();
        let logical_starts: Vec<Sector> = disk
            .part(ext)?
            .children
            .iter()
            .filter_map(|id| disk.partition(*id))
            .filter(|p| p.is_active())
            .map(Partition::start)
            .collect();

        add_metadata(disk, true, ext_start, ext_start);
        for start in logical_starts.into_iter().skip(1) {
            add_metadata(disk, true, start - 1, start - 1);
        }
        Ok(())
    }

    fn is_flag_available(&self, part: &Partition, flag: PartitionFlag) -> bool {
        if part.is_extended() {
            return flag == PartitionFlag::Lba;
        }
        matches!(
            flag,
            PartitionFlag::Boot
                | PartitionFlag::Hidden
                | PartitionFlag::Raid
                | PartitionFlag::Lvm
                | PartitionFlag::Lba
        )
    }

    fn set_flag(&self, disk: &mut Disk, id: PartId, flag: PartitionFlag, state: bool) -> Result<()> {
        if state && flag == PartitionFlag::Boot {
            let others: Vec<PartId> = disk.iter().map(Partition::id).filter(|p| *p != id).collect();
            for other in others {
                disk.part_mut(other)?.flags.remove(&PartitionFlag::Boot);
            }
        }

        let part = disk.part_mut(id)?;
        if state {
            part.flags.insert(flag);
            match flag {
                PartitionFlag::Raid => {
                    part.flags.remove(&PartitionFlag::Lvm);
                }
                PartitionFlag::Lvm => {
                    part.flags.remove(&PartitionFlag::Raid);
                }
                _ => {}
            }
        } else {
            part.flags.remove(&flag);
        }
        let fs_type = part.fs_type;
        self.set_system(part, fs_type)
    }

    fn set_system(&self, part: &mut Partition, fs_type: Option<FsType>) -> Result<()> {
        part.data = PartData::Dos {
            system: Self::compute_system(part, fs_type),
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chs_encode() {
        let chs = Chs {
            cylinders: 1024,
            heads: 255,
            sectors: 63,
        };
        assert_eq!(chs_encode(&chs, 0), [0, 1, 0]);
        assert_eq!(chs_encode(&chs, 63), [1, 1, 0]);
        assert_eq!(chs_encode(&chs, 255 * 63), [0, 1, 1]);
        assert_eq!(chs_encode(&chs, 1024 * 255 * 63), [254, 0xff, 0xff]);
    }

    #[test]
    fn test_entry_layout() {
        let chs = Chs {
            cylinders: 16,
            heads: 255,
            sectors: 63,
        };
        let entry = RawEntry {
            boot_ind: 0x80,
            system: system::LINUX,
            start: 2048,
            length: 4096,
        };
        let mut bytes = [0u8; ENTRY_SIZE];
        entry.encode(&mut bytes, &chs, 0);
        assert_eq!(bytes[0], 0x80);
        assert_eq!(bytes[4], 0x83);
        assert_eq!(&bytes[8..12], &2048u32.to_le_bytes());
        assert_eq!(RawEntry::parse(&bytes), entry);
    }

    #[test]
    fn test_probe_rejects_protective_mbr() {
        let dev = Device::memory("mem0", 4096, 512);
        dev.with_open(|_| {
            assert!(!probe(&dev)?);
            write_protective_mbr(&dev)?;
            assert!(!probe(&dev)?);
            clobber(&dev)?;
            let mut sector = dev.read_sectors(0, 1)?;
            sector[SIGNATURE_OFFSET..].copy_from_slice(&SIGNATURE);
            dev.write(&sector, 0, 1)?;
            assert!(probe(&dev)?);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_system_ids() {
        let dev = Device::memory("mem0", 4096, 512);
        let geom = Geometry::new(&dev, 100, 100).unwrap();
        let mut part = Partition::new(PartId::new(0, 0), geom, PartitionType::NORMAL, None);
        assert_eq!(DosLabel::compute_system(&part, Some(FsType::Fat32)), system::FAT32);
        part.flags.insert(PartitionFlag::Lba);
        assert_eq!(DosLabel::compute_system(&part, Some(FsType::Fat32)), system::FAT32_LBA);
        part.flags.insert(PartitionFlag::Hidden);
        assert_eq!(DosLabel::compute_system(&part, Some(FsType::Fat32)), 0x1c);
        assert_eq!(DosLabel::compute_system(&part, Some(FsType::Ext4)), system::LINUX);
        part.flags.insert(PartitionFlag::Raid);
        assert_eq!(DosLabel::compute_system(&part, Some(FsType::Ext4)), system::RAID);
    }
}
