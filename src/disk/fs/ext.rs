use crate::disk::partition::FsType;

const SUPERBLOCK_OFFSET: usize = 1024;
const MAGIC: u16 = 0xEF53;

const S_BLOCKS_COUNT: usize = 4;
const S_LOG_BLOCK_SIZE: usize = 24;
const S_MAGIC: usize = 56;
const S_FEATURE_COMPAT: usize = 92;
const S_FEATURE_INCOMPAT: usize = 96;
const S_BLOCKS_COUNT_HI: usize = 336;

const COMPAT_HAS_JOURNAL: u32 = 0x0004;
const INCOMPAT_EXTENTS: u32 = 0x0040;
const INCOMPAT_64BIT: u32 = 0x0080;
const INCOMPAT_FLEX_BG: u32 = 0x0200;

fn le16(sb: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([sb[at], sb[at + 1]])
}

fn le32(sb: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([sb[at], sb[at + 1], sb[at + 2], sb[at + 3]])
}

/// Recognises an ext2/3/4 superblock and returns the variant and the byte
/// size it records.
pub(super) fn probe(head: &[u8]) -> Option<(FsType, u64)> {
    let sb = head.get(SUPERBLOCK_OFFSET..SUPERBLOCK_OFFSET + 1024)?;
    if le16(sb, S_MAGIC) != MAGIC {
        return None;
    }
    let log_block_size = le32(sb, S_LOG_BLOCK_SIZE);
    if log_block_size > 6 {
        return None;
    }
    let block_size = 1024u64 << log_block_size;

    let incompat = le32(sb, S_FEATURE_INCOMPAT);
    let mut blocks = le32(sb, S_BLOCKS_COUNT) as u64;
    if incompat & INCOMPAT_64BIT != 0 {
        blocks |= (le32(sb, S_BLOCKS_COUNT_HI) as u64) << 32;
    }

    let fs_type = if incompat & (INCOMPAT_EXTENTS | INCOMPAT_64BIT | INCOMPAT_FLEX_BG) != 0 {
        FsType::Ext4
    } else if le32(sb, S_FEATURE_COMPAT) & COMPAT_HAS_JOURNAL != 0 {
        FsType::Ext3
    } else {
        FsType::Ext2
    };
    Some((fs_type, blocks.checked_mul(block_size)?))
}

/// Writes a minimal superblock into `head`.
#[cfg(test)]
pub(crate) fn format(head: &mut [u8], fs_type: FsType, blocks: u32, log_block_size: u32) {
    let sb = &mut head[SUPERBLOCK_OFFSET..SUPERBLOCK_OFFSET + 1024];
    sb[S_BLOCKS_COUNT..S_BLOCKS_COUNT + 4].copy_from_slice(&blocks.to_le_bytes());
    sb[S_LOG_BLOCK_SIZE..S_LOG_BLOCK_SIZE + 4].copy_from_slice(&log_block_size.to_le_bytes());
    sb[S_MAGIC..S_MAGIC + 2].copy_from_slice(&MAGIC.to_le_bytes());
    let (compat, incompat) = match fs_type {
        FsType::Ext4 => (COMPAT_HAS_JOURNAL, INCOMPAT_EXTENTS | INCOMPAT_FLEX_BG),
        FsType::Ext3 => (COMPAT_HAS_JOURNAL, 0),
        _ => (0, 0),
    };
    sb[S_FEATURE_COMPAT..S_FEATURE_COMPAT + 4].copy_from_slice(&compat.to_le_bytes());
    sb[S_FEATURE_INCOMPAT..S_FEATURE_INCOMPAT + 4].copy_from_slice(&incompat.to_le_bytes());
}
