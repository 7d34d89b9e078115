use std::io;
use std::path::PathBuf;
use thiserror::Error;

use super::partition::PartId;
use super::Sector;

pub type Result<T> = std::result::Result<T, DiskError>;

#[derive(Error, Debug)]
pub enum DiskError {
    // Geometry and layout.
    #[error("invalid range: start {start}, length {length} on a device of {device_length} sectors")]
    InvalidRange {
        start: Sector,
        length: Sector,
        device_length: Sector,
    },

    #[error("can't have overlapping partitions")]
    Overlap,

    #[error("unable to satisfy all constraints on the partition")]
    AlignmentFailed,

    #[error("can't add a logical partition to {path}, because there is no extended partition")]
    NoExtendedPartition { path: PathBuf },

    #[error("can't have more than one extended partition on {path}")]
    TooManyExtendedPartitions { path: PathBuf },

    #[error("too many primary partitions (maximum {max})")]
    TooManyPrimaryPartitions { max: usize },

    #[error("can't have a logical partition outside of the extended partition")]
    LogicalOutsideExtended,

    #[error("can't have a primary partition inside an extended partition")]
    PrimaryInsideExtended,

    #[error("{label} disk labels do not support {feature}")]
    UnsupportedOnLabel {
        label: &'static str,
        feature: String,
    },

    #[error("unable to number partition: {0}")]
    Enumeration(String),

    // Preconditions. Correct callers never see these.
    #[error("partition {0} still has logical partitions")]
    HasChildren(PartId),

    #[error("operation requires update mode {expected}, disk is at {actual}")]
    UpdateMode { expected: &'static str, actual: u32 },

    #[error("no partition with id {0}")]
    UnknownPartition(PartId),

    #[error("partition {0} is already part of the table")]
    PartitionLinked(PartId),

    #[error("partition {0} is not part of the table")]
    PartitionNotLinked(PartId),

    // Labels and devices.
    #[error("unable to open {path}: unrecognised disk label")]
    UnrecognisedLabel { path: PathBuf },

    #[error("{label} label: {message}")]
    Label {
        label: &'static str,
        message: String,
    },

    #[error("attempt to access sectors {start}-{end} outside of partition on {path}")]
    OutOfGeometry {
        start: Sector,
        end: Sector,
        path: PathBuf,
    },

    #[error("attempt to access sectors {start}-{end} outside of device {path}")]
    OutOfDevice {
        start: Sector,
        end: Sector,
        path: PathBuf,
    },

    #[error("device {0} is not open")]
    DeviceClosed(PathBuf),

    #[error("device {0} is read-only")]
    ReadOnly(PathBuf),

    #[error("buffer too small: provided {provided} bytes, required {required}")]
    BufferTooSmall { provided: usize, required: usize },

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    // Checks.
    #[error("partition {num} is {part_sectors} sectors, but the file system is {fs_sectors} sectors")]
    FileSystemMismatch {
        num: i32,
        part_sectors: Sector,
        fs_sectors: Sector,
    },

    #[error("bad sector scan did not settle after {passes} passes")]
    ScanUnstable { passes: u32 },
}

impl DiskError {
    pub(crate) fn label(label: &'static str, message: impl Into<String>) -> Self {
        DiskError::Label {
            label,
            message: message.into(),
        }
    }

    pub(crate) fn unsupported(label: &'static str, feature: impl Into<String>) -> Self {
        DiskError::UnsupportedOnLabel {
            label,
            feature: feature.into(),
        }
    }
}
