use std::fmt;
use std::sync::Arc;

use super::device::Device;
use super::error::{DiskError, Result};
use super::exception::{self, ExceptionHandler, ExceptionOptions, ExceptionType, Quiet};
use super::Sector;

/// Upper bound on coarse rescans in [`Geometry::check`].
pub const MAX_SCAN_PASSES: u32 = 16;

/// A contiguous, validated run of sectors on one device.
#[derive(Clone)]
pub struct Geometry {
    dev: Arc<Device>,
    start: Sector,
    length: Sector,
    end: Sector,
}

impl Geometry {
    pub fn new(dev: &Arc<Device>, start: Sector, length: Sector) -> Result<Self> {
        let mut geom = Self {
            dev: Arc::clone(dev),
            start: 0,
            length: 1,
            end: 0,
        };
        geom.set(start, length)?;
        Ok(geom)
    }

    /// Builds the geometry `[start, end]`, both inclusive.
    pub fn from_bounds(dev: &Arc<Device>, start: Sector, end: Sector) -> Result<Self> {
        Self::new(dev, start, end - start + 1)
    }

    /// Every sector of `dev`.
    pub fn whole(dev: &Arc<Device>) -> Self {
        Self {
            dev: Arc::clone(dev),
            start: 0,
            length: dev.length(),
            end: dev.length() - 1,
        }
    }

    /// The first sector of `self` as a geometry of its own.
    pub fn head(&self) -> Self {
        Self {
            dev: Arc::clone(&self.dev),
            start: self.start,
            length: 1,
            end: self.start,
        }
    }

    /// The last sector of `self` as a geometry of its own.
    pub fn tail(&self) -> Self {
        Self {
            dev: Arc::clone(&self.dev),
            start: self.end,
            length: 1,
            end: self.end,
        }
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.dev
    }

    pub fn start(&self) -> Sector {
        self.start
    }

    pub fn length(&self) -> Sector {
        self.length
    }

    pub fn end(&self) -> Sector {
        self.end
    }

    pub fn set(&mut self, start: Sector, length: Sector) -> Result<()> {
        if length < 1 || start < 0 || start + length - 1 >= self.dev.length() {
            return Err(DiskError::InvalidRange {
                start,
                length,
                device_length: self.dev.length(),
            });
        }
        self.start = start;
        self.length = length;
        self.end = start + length - 1;
        Ok(())
    }

    /// Moves the start while keeping the end fixed.
    pub fn set_start(&mut self, start: Sector) -> Result<()> {
        self.set(start, self.end - start + 1)
    }

    /// Moves the end while keeping the start fixed.
    pub fn set_end(&mut self, end: Sector) -> Result<()> {
        self.set(self.start, end - self.start + 1)
    }

    pub fn same_device(&self, other: &Geometry) -> bool {
        Arc::ptr_eq(&self.dev, &other.dev)
    }

    pub fn test_overlap(&self, other: &Geometry) -> bool {
        if !self.same_device(other) {
            return false;
        }
        if self.start < other.start {
            self.end >= other.start
        } else {
            other.end >= self.start
        }
    }

    /// True when `other` lies entirely inside `self`.
    pub fn test_inside(&self, other: &Geometry) -> bool {
        self.same_device(other) && other.start >= self.start && other.end <= self.end
    }

    pub fn test_equal(&self, other: &Geometry) -> bool {
        self.same_device(other) && self.start == other.start && self.end == other.end
    }

    pub fn test_sector_inside(&self, sector: Sector) -> bool {
        sector >= self.start && sector <= self.end
    }

    /// The region common to both, or `None` when they are disjoint.
    pub fn intersect(&self, other: &Geometry) -> Option<Geometry> {
        if !self.same_device(other) {
            return None;
        }
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        if start > end {
            return None;
        }
        Geometry::from_bounds(&self.dev, start, end).ok()
    }

    /// Translates `sector`, relative to `src`, into a sector relative to
    /// `dst`. Reading `map(dst, src, s)` from `dst` touches the same sector
    /// as reading `s` from `src`.
    pub fn map(dst: &Geometry, src: &Geometry, sector: Sector) -> Option<Sector> {
        if !dst.same_device(src) || sector < 0 || sector >= src.length {
            return None;
        }
        let result = src.start + sector - dst.start;
        (result >= 0 && result < dst.length).then_some(result)
    }

    fn check_range(
        &self,
        op: &str,
        offset: Sector,
        count: Sector,
        handler: &dyn ExceptionHandler,
    ) -> Result<bool> {
        if offset < 0 || count < 0 {
            return Err(DiskError::OutOfGeometry {
                start: offset,
                end: offset + count - 1,
                path: self.dev.path().to_path_buf(),
            });
        }
        if self.start + offset + count - 1 <= self.end {
            return Ok(true);
        }
        let choice = exception::throw(
            handler,
            ExceptionType::Error,
            ExceptionOptions::IGNORE_CANCEL,
            format!(
                "Attempt to {} sectors {}-{} outside of partition on {}.",
                op,
                offset,
                offset + count - 1,
                self.dev.path().display()
            ),
        );
        if choice == exception::Choice::Ignore {
            Ok(false)
        } else {
            Err(DiskError::OutOfGeometry {
                start: offset,
                end: offset + count - 1,
                path: self.dev.path().to_path_buf(),
            })
        }
    }

    /// Reads `count` sectors starting `offset` sectors into the geometry.
    /// An out-of-range request is reported to `handler`; answering Ignore
    /// returns success without transferring anything.
    pub fn read(
        &self,
        buffer: &mut [u8],
        offset: Sector,
        count: Sector,
        handler: &dyn ExceptionHandler,
    ) -> Result<()> {
        if !self.check_range("read", offset, count, handler)? {
            return Ok(());
        }
        self.dev.read(buffer, self.start + offset, count)
    }

    pub fn write(
        &self,
        buffer: &[u8],
        offset: Sector,
        count: Sector,
        handler: &dyn ExceptionHandler,
    ) -> Result<()> {
        if !self.check_range("write", offset, count, handler)? {
            return Ok(());
        }
        self.dev.write(buffer, self.start + offset, count)
    }

    pub fn sync(&self) -> Result<()> {
        self.dev.sync()
    }

    pub fn sync_fast(&self) -> Result<()> {
        self.dev.sync_fast()
    }

    /// Scans `count` sectors from `offset` for read errors and returns the
    /// first bad sector found.
    ///
    /// Reads go in groups of `buffer_sectors`. When a group fails, its
    /// sectors are re-read `granularity` at a time to locate the culprit.
    /// If they all succeed individually the whole scan starts over.
    pub fn check(
        &self,
        buffer_sectors: Sector,
        offset: Sector,
        granularity: Sector,
        count: Sector,
        progress: &mut dyn FnMut(f64),
    ) -> Result<Option<Sector>> {
        let buffer_sectors = buffer_sectors.max(1);
        let granularity = granularity.max(1);
        let sector_size = self.dev.sector_size() as usize;
        let mut buffer = vec![0u8; buffer_sectors.max(granularity) as usize * sector_size];

        for pass in 1..=MAX_SCAN_PASSES {
            let mut failed_group = None;
            let mut group = offset;
            while group < offset + count {
                progress((group - offset) as f64 / count as f64);
                let read_len = buffer_sectors.min(offset + count - group);
                if self.read(&mut buffer, group, read_len, &Quiet).is_err() {
                    failed_group = Some(group);
                    break;
                }
                group += buffer_sectors;
            }

            let Some(group) = failed_group else {
                progress(1.0);
                return Ok(None);
            };

            let mut i = group;
            while i < offset + count {
                let read_len = granularity.min(offset + count - i);
                if self.read(&mut buffer, i, read_len, &Quiet).is_err() {
                    return Ok(Some(i));
                }
                i += granularity;
            }
            warn!(
                "group read at sector {} failed but every single read succeeded, rescanning (pass {})",
                group, pass
            );
        }
        Err(DiskError::ScanUnstable {
            passes: MAX_SCAN_PASSES,
        })
    }
}

impl PartialEq for Geometry {
    fn eq(&self, other: &Self) -> bool {
        self.test_equal(other)
    }
}

impl Eq for Geometry {}

impl fmt::Debug for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Geometry({}: {}-{}, {} sectors)",
            self.dev.path().display(),
            self.start,
            self.end,
            self.length
        )
    }
}
