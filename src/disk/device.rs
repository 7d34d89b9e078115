use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::error::{DiskError, Result};
use super::Sector;

pub const DEFAULT_SECTOR_SIZE: u64 = 512;

/// Raw byte-addressed storage under a [`Device`].
pub trait DeviceBackend: Send + fmt::Debug {
    fn open(&mut self) -> io::Result<()>;
    fn close(&mut self) -> io::Result<()>;
    fn read_at(&mut self, buffer: &mut [u8], offset: u64) -> io::Result<()>;
    fn write_at(&mut self, buffer: &[u8], offset: u64) -> io::Result<()>;
    /// Flushes every cache between us and the medium.
    fn flush(&mut self) -> io::Result<()>;
    /// Flushes our own write-behind buffers only.
    fn flush_fast(&mut self) -> io::Result<()> {
        self.flush()
    }
    fn is_busy(&self) -> bool {
        false
    }
}

#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    writable: bool,
    file: Option<File>,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>, writable: bool) -> Self {
        Self {
            path: path.into(),
            writable,
            file: None,
        }
    }

    fn file(&mut self) -> io::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "backend not open"))
    }
}

impl DeviceBackend for FileBackend {
    fn open(&mut self) -> io::Result<()> {
        let file = OpenOptions::new()
            .read(true)
            .write(self.writable)
            .open(&self.path)?;
        self.file = Some(file);
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.file = None;
        Ok(())
    }

    fn read_at(&mut self, buffer: &mut [u8], offset: u64) -> io::Result<()> {
        let file = self.file()?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buffer)
    }

    fn write_at(&mut self, buffer: &[u8], offset: u64) -> io::Result<()> {
        let file = self.file()?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buffer)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file()?.sync_all()
    }

    fn flush_fast(&mut self) -> io::Result<()> {
        self.file()?.flush()
    }
}

/// In-memory storage, with optional injected faults for exercising the
/// retry and scan paths.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    data: Vec<u8>,
    sector_size: u64,
    bad_sectors: BTreeSet<u64>,
    transient_failures: u32,
}

impl MemoryBackend {
    pub fn new(sectors: u64, sector_size: u64) -> Self {
        Self {
            data: vec![0; (sectors * sector_size) as usize],
            sector_size,
            ..Default::default()
        }
    }

    /// Every read or write touching `sector` fails.
    pub fn with_bad_sector(mut self, sector: u64) -> Self {
        self.bad_sectors.insert(sector);
        self
    }

    /// The next `count` reads or writes fail once each.
    pub fn with_transient_failures(mut self, count: u32) -> Self {
        self.transient_failures = count;
        self
    }

    fn check(&mut self, offset: u64, len: usize) -> io::Result<()> {
        if self.transient_failures > 0 {
            self.transient_failures -= 1;
            return Err(io::Error::other("transient failure"));
        }
        let first = offset / self.sector_size;
        let last = (offset + len as u64).div_ceil(self.sector_size);
        if self.bad_sectors.range(first..last).next().is_some() {
            return Err(io::Error::other("bad sector"));
        }
        if offset as usize + len > self.data.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "access past end of memory device",
            ));
        }
        Ok(())
    }
}

impl DeviceBackend for MemoryBackend {
    fn open(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn read_at(&mut self, buffer: &mut [u8], offset: u64) -> io::Result<()> {
        self.check(offset, buffer.len())?;
        let start = offset as usize;
        buffer.copy_from_slice(&self.data[start..start + buffer.len()]);
        Ok(())
    }

    fn write_at(&mut self, buffer: &[u8], offset: u64) -> io::Result<()> {
        self.check(offset, buffer.len())?;
        let start = offset as usize;
        self.data[start..start + buffer.len()].copy_from_slice(buffer);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Bounded retry applied to every backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub attempts: u32,
    #[serde(with = "humantime_serde")]
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(10),
        }
    }
}

/// BIOS cylinder/head/sector translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chs {
    pub cylinders: Sector,
    pub heads: Sector,
    pub sectors: Sector,
}

impl Chs {
    fn for_length(length: Sector) -> Self {
        let heads = 255;
        let sectors = 63;
        Self {
            cylinders: (length / (heads * sectors)).max(1),
            heads,
            sectors,
        }
    }
}

#[derive(Debug)]
struct DeviceState {
    backend: Box<dyn DeviceBackend>,
    open_count: u32,
    external_access: bool,
    retry: RetryPolicy,
}

/// A block device as seen by the partition engine. Shared as `Arc<Device>`;
/// geometries compare devices by identity.
pub struct Device {
    path: PathBuf,
    model: String,
    sector_size: u64,
    length: Sector,
    bios_geom: Chs,
    read_only: bool,
    state: Mutex<DeviceState>,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("path", &self.path)
            .field("sector_size", &self.sector_size)
            .field("length", &self.length)
            .finish()
    }
}

impl Device {
    pub fn new(
        path: impl Into<PathBuf>,
        model: impl Into<String>,
        sector_size: u64,
        length: Sector,
        read_only: bool,
        backend: Box<dyn DeviceBackend>,
    ) -> Arc<Self> {
        Arc::new(Self {
            path: path.into(),
            model: model.into(),
            sector_size,
            length,
            bios_geom: Chs::for_length(length),
            read_only,
            state: Mutex::new(DeviceState {
                backend,
                open_count: 0,
                external_access: false,
                retry: RetryPolicy::default(),
            }),
        })
    }

    /// A disk image file with 512-byte sectors.
    pub fn open_image(path: &Path, read_only: bool) -> Result<Arc<Self>> {
        let size = std::fs::metadata(path)
            .map_err(|source| DiskError::Io {
                path: path.to_path_buf(),
                source,
            })?
            .len();
        let length = (size / DEFAULT_SECTOR_SIZE) as Sector;
        if length < 1 {
            return Err(DiskError::InvalidRange {
                start: 0,
                length,
                device_length: length,
            });
        }
        debug!("image {} has {} sectors", path.display(), length);
        Ok(Self::new(
            path,
            "disk image",
            DEFAULT_SECTOR_SIZE,
            length,
            read_only,
            Box::new(FileBackend::new(path, !read_only)),
        ))
    }

    pub fn memory(name: &str, length: Sector, sector_size: u64) -> Arc<Self> {
        Self::memory_with(name, MemoryBackend::new(length as u64, sector_size), length, sector_size)
    }

    pub fn memory_with(
        name: &str,
        backend: MemoryBackend,
        length: Sector,
        sector_size: u64,
    ) -> Arc<Self> {
        Self::new(name, "memory", sector_size, length, false, Box::new(backend))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn sector_size(&self) -> u64 {
        self.sector_size
    }

    pub fn length(&self) -> Sector {
        self.length
    }

    pub fn bios_geometry(&self) -> Chs {
        self.bios_geom
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn set_retry_policy(&self, retry: RetryPolicy) {
        self.state().retry = retry;
    }

    pub fn is_open(&self) -> bool {
        self.state().open_count > 0
    }

    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn io_error(&self, source: io::Error) -> DiskError {
        DiskError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn run<T>(
        &self,
        state: &mut DeviceState,
        what: &str,
        mut op: impl FnMut(&mut dyn DeviceBackend) -> io::Result<T>,
    ) -> Result<T> {
        let attempts = state.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(state.backend.as_mut()) {
                Ok(value) => return Ok(value),
                Err(e) if attempt < attempts => {
                    warn!(
                        "{} on {} failed (attempt {}/{}): {}",
                        what,
                        self.path.display(),
                        attempt,
                        attempts,
                        e
                    );
                    std::thread::sleep(state.retry.delay);
                    attempt += 1;
                }
                Err(e) => return Err(self.io_error(e)),
            }
        }
    }

    pub fn open(&self) -> Result<()> {
        let mut state = self.state();
        if state.open_count == 0 && !state.external_access {
            self.run(&mut state, "open", |b| b.open())?;
        }
        state.open_count += 1;
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        let mut state = self.state();
        if state.open_count == 0 {
            return Err(DiskError::DeviceClosed(self.path.clone()));
        }
        if state.open_count == 1 && !state.external_access {
            self.run(&mut state, "close", |b| b.close())?;
        }
        state.open_count -= 1;
        Ok(())
    }

    /// Releases the backend so that another program may use the device.
    pub fn begin_external_access(&self) -> Result<()> {
        let mut state = self.state();
        if state.external_access {
            return Ok(());
        }
        if state.open_count > 0 {
            self.run(&mut state, "close", |b| b.close())?;
        }
        state.external_access = true;
        Ok(())
    }

    pub fn end_external_access(&self) -> Result<()> {
        let mut state = self.state();
        if !state.external_access {
            return Ok(());
        }
        state.external_access = false;
        if state.open_count > 0 {
            self.run(&mut state, "open", |b| b.open())?;
        }
        Ok(())
    }

    fn check_access(
        &self,
        state: &DeviceState,
        start: Sector,
        count: Sector,
        buffer_len: usize,
    ) -> Result<usize> {
        if state.open_count == 0 || state.external_access {
            return Err(DiskError::DeviceClosed(self.path.clone()));
        }
        if start < 0 || count < 0 || start + count > self.length {
            return Err(DiskError::OutOfDevice {
                start,
                end: start + count - 1,
                path: self.path.clone(),
            });
        }
        let required = (count as u64 * self.sector_size) as usize;
        if buffer_len < required {
            return Err(DiskError::BufferTooSmall {
                provided: buffer_len,
                required,
            });
        }
        Ok(required)
    }

    pub fn read(&self, buffer: &mut [u8], start: Sector, count: Sector) -> Result<()> {
        let mut state = self.state();
        let required = self.check_access(&state, start, count, buffer.len())?;
        let offset = start as u64 * self.sector_size;
        self.run(&mut state, "read", |b| b.read_at(&mut buffer[..required], offset))
    }

    pub fn write(&self, buffer: &[u8], start: Sector, count: Sector) -> Result<()> {
        if self.read_only {
            return Err(DiskError::ReadOnly(self.path.clone()));
        }
        let mut state = self.state();
        let required = self.check_access(&state, start, count, buffer.len())?;
        let offset = start as u64 * self.sector_size;
        self.run(&mut state, "write", |b| b.write_at(&buffer[..required], offset))
    }

    pub fn sync(&self) -> Result<()> {
        let mut state = self.state();
        if state.read_only_or_closed(self.read_only) {
            return Ok(());
        }
        self.run(&mut state, "sync", |b| b.flush())
    }

    pub fn sync_fast(&self) -> Result<()> {
        let mut state = self.state();
        if state.read_only_or_closed(self.read_only) {
            return Ok(());
        }
        self.run(&mut state, "sync", |b| b.flush_fast())
    }

    pub fn is_busy(&self) -> bool {
        self.state().backend.is_busy()
    }

    /// Reads `count` sectors into a fresh buffer.
    pub fn read_sectors(&self, start: Sector, count: Sector) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; (count as u64 * self.sector_size) as usize];
        self.read(&mut buffer, start, count)?;
        Ok(buffer)
    }

    /// Runs `f` with the device open, closing it afterwards even on error.
    pub fn with_open<R>(&self, f: impl FnOnce(&Device) -> Result<R>) -> Result<R> {
        self.open()?;
        let result = f(self);
        let closed = self.close();
        let value = result?;
        closed?;
        Ok(value)
    }
}

impl DeviceState {
    fn read_only_or_closed(&self, read_only: bool) -> bool {
        read_only || self.open_count == 0 || self.external_access
    }
}
