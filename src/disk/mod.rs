//! Partition-table modeling and layout.
//!
//! [`table::Disk`] is the in-memory table. Partition placement is driven by
//! [`constraint::Constraint`]s built from [`geometry::Geometry`] ranges and
//! [`alignment::Alignment`]s; each [`label::Label`] adds its own placement
//! rules and knows how to read and write its on-disk format.

pub mod alignment;
mod cli;
pub mod commands;
pub mod constraint;
pub mod device;
pub mod error;
pub mod exception;
pub mod fs;
pub mod geometry;
pub mod label;
pub mod partition;
pub mod table;
pub mod types;
mod utils;

/// A sector number or count. Signed so that bound arithmetic may dip below
/// zero before it is validated.
pub type Sector = i64;

pub use cli::DiskCli;
pub use commands::run;
pub use constraint::Constraint;
pub use device::{Device, RetryPolicy};
pub use error::DiskError;
pub use geometry::Geometry;
pub use label::{Label, LabelKind};
pub use partition::{FsType, PartId, Partition, PartitionFlag, PartitionType};
pub use table::Disk;
