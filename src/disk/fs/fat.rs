use crate::disk::partition::FsType;

const BPB_BYTES_PER_SECTOR: usize = 11;
const BPB_TOTAL_SECTORS_16: usize = 19;
const BPB_SECTORS_PER_FAT_16: usize = 22;
const BPB_TOTAL_SECTORS_32: usize = 32;
const FAT16_FS_TYPE: usize = 54;
const FAT32_FS_TYPE: usize = 82;

/// Recognises a FAT boot sector and returns the variant and the byte size
/// recorded in its BIOS parameter block.
pub(super) fn probe(head: &[u8]) -> Option<(FsType, u64)> {
    let boot = head.get(..512)?;
    if boot[510] != 0x55 || boot[511] != 0xAA {
        return None;
    }

    let fs_type = if &boot[FAT32_FS_TYPE..FAT32_FS_TYPE + 5] == b"FAT32" {
        FsType::Fat32
    } else if matches!(&boot[FAT16_FS_TYPE..FAT16_FS_TYPE + 5], b"FAT16" | b"FAT12") {
        FsType::Fat16
    } else {
        return None;
    };

    let bytes_per_sector = u16::from_le_bytes([boot[BPB_BYTES_PER_SECTOR], boot[BPB_BYTES_PER_SECTOR + 1]]);
    if !matches!(bytes_per_sector, 512 | 1024 | 2048 | 4096) {
        return None;
    }
    let sectors_per_fat = u16::from_le_bytes([
        boot[BPB_SECTORS_PER_FAT_16],
        boot[BPB_SECTORS_PER_FAT_16 + 1],
    ]);
    if fs_type == FsType::Fat32 && sectors_per_fat != 0 {
        return None;
    }

    let total16 = u16::from_le_bytes([boot[BPB_TOTAL_SECTORS_16], boot[BPB_TOTAL_SECTORS_16 + 1]]);
    let total = if total16 != 0 {
        total16 as u64
    } else {
        u32::from_le_bytes([
            boot[BPB_TOTAL_SECTORS_32],
            boot[BPB_TOTAL_SECTORS_32 + 1],
            boot[BPB_TOTAL_SECTORS_32 + 2],
            boot[BPB_TOTAL_SECTORS_32 + 3],
        ]) as u64
    };
    Some((fs_type, total * bytes_per_sector as u64))
}
