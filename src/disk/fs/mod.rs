//! File system signature probing.
//!
//! Only enough of each on-disk format is understood to recognise it and
//! learn how many sectors it claims. Nothing here mounts or modifies a
//! file system.

mod ext;
mod fat;
mod swap;

#[cfg(test)]
pub(crate) use ext::format as format_ext;

use super::exception::Quiet;
use super::geometry::Geometry;
use super::partition::FsType;
use super::Sector;

/// Bytes every probe may look at: a 4 KiB page covers the swap signature.
const PROBE_BYTES: usize = 4096;

/// Reads the first [`PROBE_BYTES`] of `geom`, or `None` if the region is
/// too small or unreadable.
fn read_head(geom: &Geometry) -> Option<Vec<u8>> {
    let sector_size = geom.device().sector_size() as usize;
    let count = PROBE_BYTES.div_ceil(sector_size) as Sector;
    if geom.length() < count {
        return None;
    }
    let mut buffer = vec![0u8; count as usize * sector_size];
    match geom.read(&mut buffer, 0, count, &Quiet) {
        Ok(()) => Some(buffer),
        Err(e) => {
            debug!("unable to read for probing at sector {}: {}", geom.start(), e);
            None
        }
    }
}

/// The region a file system claiming `bytes` bytes would occupy from the
/// start of `geom`, clipped to the device.
fn claimed_region(geom: &Geometry, bytes: u64) -> Option<Geometry> {
    let dev = geom.device();
    let sectors = (bytes / dev.sector_size()) as Sector;
    if sectors < 1 {
        return None;
    }
    let end = (geom.start() + sectors - 1).min(dev.length() - 1);
    Geometry::from_bounds(dev, geom.start(), end).ok()
}

fn detect(geom: &Geometry) -> Option<(FsType, Geometry)> {
    let head = read_head(geom)?;
    ext::probe(&head)
        .or_else(|| fat::probe(&head))
        .or_else(|| swap::probe(&head))
        .and_then(|(fs_type, bytes)| Some((fs_type, claimed_region(geom, bytes)?)))
}

/// The file system found at the start of `geom`, if any.
pub fn probe(geom: &Geometry) -> Option<FsType> {
    detect(geom).map(|(fs_type, _)| fs_type)
}

/// The region a file system of type `fs_type` at the start of `geom` says
/// it occupies. `None` when no such file system is there.
pub fn probe_specific(fs_type: FsType, geom: &Geometry) -> Option<Geometry> {
    detect(geom)
        .filter(|(found, _)| *found == fs_type)
        .map(|(_, region)| region)
}
