use crate::disk::partition::FsType;

const PAGE_SIZE: u64 = 4096;
const MAGIC_OFFSET: usize = PAGE_SIZE as usize - 10;
const LAST_PAGE_OFFSET: usize = 1024 + 4;

/// Recognises a Linux swap signature and returns the byte size it records.
pub(super) fn probe(head: &[u8]) -> Option<(FsType, u64)> {
    let magic = head.get(MAGIC_OFFSET..MAGIC_OFFSET + 10)?;
    if magic != b"SWAPSPACE2" {
        return None;
    }
    let last_page = u32::from_le_bytes([
        head[LAST_PAGE_OFFSET],
        head[LAST_PAGE_OFFSET + 1],
        head[LAST_PAGE_OFFSET + 2],
        head[LAST_PAGE_OFFSET + 3],
    ]) as u64;
    Some((FsType::LinuxSwap, (last_page + 1) * PAGE_SIZE))
}

/// Writes a swap header claiming `bytes` bytes into `head`.
#[cfg(test)]
pub(crate) fn format(head: &mut [u8], bytes: u64) {
    let last_page = (bytes / PAGE_SIZE).saturating_sub(1) as u32;
    head[LAST_PAGE_OFFSET..LAST_PAGE_OFFSET + 4].copy_from_slice(&last_page.to_le_bytes());
    head[MAGIC_OFFSET..MAGIC_OFFSET + 10].copy_from_slice(b"SWAPSPACE2");
}
