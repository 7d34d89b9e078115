//! Partition-table formats.
//!
//! Each format decides where partitions may sit, how they are numbered,
//! which sectors the table itself occupies, and how it is stored on disk.
//! The set of formats is closed; [`Label`] dispatches to them.

mod dos;
mod flat;
mod gpt;

pub use dos::DosLabel;
pub use flat::FlatLabel;
pub use gpt::GptLabel;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::sync::Arc;

use super::constraint::Constraint;
use super::device::Device;
use super::error::{DiskError, Result};
use super::geometry::Geometry;
use super::partition::{FsType, PartId, Partition, PartitionFlag, PartitionType};
use super::table::Disk;
use super::Sector;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LabelFeatures: u8 {
        const EXTENDED = 1 << 0;
        const PARTITION_NAME = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelKind {
    Flat,
    Dos,
    Gpt,
}

impl LabelKind {
    pub const ALL: [LabelKind; 3] = [LabelKind::Flat, LabelKind::Dos, LabelKind::Gpt];

    pub fn name(&self) -> &'static str {
        match self {
            LabelKind::Flat => "flat",
            LabelKind::Dos => "dos",
            LabelKind::Gpt => "gpt",
        }
    }

    /// True when a table of this kind is present on `dev`, which must be open.
    pub fn probe(&self, dev: &Arc<Device>) -> Result<bool> {
        match self {
            LabelKind::Flat => Ok(false),
            LabelKind::Dos => dos::probe(dev),
            LabelKind::Gpt => gpt::probe(dev),
        }
    }

    /// Destroys the signature of a table of this kind on `dev`.
    pub fn clobber(&self, dev: &Arc<Device>) -> Result<()> {
        match self {
            LabelKind::Flat => Ok(()),
            LabelKind::Dos => dos::clobber(dev),
            LabelKind::Gpt => gpt::clobber(dev),
        }
    }
}

impl fmt::Display for LabelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LabelKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "flat" | "loop" => Ok(LabelKind::Flat),
            "dos" | "msdos" | "mbr" => Ok(LabelKind::Dos),
            "gpt" => Ok(LabelKind::Gpt),
            other => Err(format!("unknown disk label type: {other}")),
        }
    }
}

/// Per-partition state that only one format understands.
#[derive(Debug, Clone, Default)]
pub enum PartData {
    #[default]
    None,
    Dos {
        system: u8,
    },
    Gpt {
        part_type: ::gpt::partition_types::Type,
    },
}

pub trait LabelOps {
    fn kind(&self) -> LabelKind;

    fn features(&self) -> LabelFeatures;

    fn max_primary_partition_count(&self) -> usize;

    fn new_partition_data(&self, _kind: PartitionType) -> PartData {
        PartData::None
    }

    /// Populates `disk`, which is in update mode, from the device.
    fn read(&mut self, disk: &mut Disk) -> Result<()>;

    fn write(&self, disk: &Disk) -> Result<()>;

    /// The geometry nearest the partition's current one that satisfies both
    /// `constraint` and this format's placement rules.
    fn partition_align(&self, disk: &Disk, id: PartId, constraint: &Constraint)
    -> Result<Geometry>;

    /// The number partition `id` should carry.
    fn partition_enumerate(&self, disk: &Disk, id: PartId) -> Result<i32>;

    /// Adds metadata placeholders for the sectors the table occupies.
    fn alloc_metadata(&self, disk: &mut Disk) -> Result<()>;

    fn is_flag_available(&self, part: &Partition, flag: PartitionFlag) -> bool;

    fn set_flag(&self, disk: &mut Disk, id: PartId, flag: PartitionFlag, state: bool) -> Result<()> {
        let part = disk.part_mut(id)?;
        if state {
            part.flags.insert(flag);
        } else {
            part.flags.remove(&flag);
        }
        Ok(())
    }

    fn set_system(&self, _part: &mut Partition, _fs_type: Option<FsType>) -> Result<()> {
        Ok(())
    }

    fn check_name(&self, _name: &str) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum Label {
    Flat(FlatLabel),
    Dos(DosLabel),
    Gpt(GptLabel),
}

impl Label {
    pub fn new(kind: LabelKind) -> Self {
        match kind {
            LabelKind::Flat => Label::Flat(FlatLabel::default()),
            LabelKind::Dos => Label::Dos(DosLabel::default()),
            LabelKind::Gpt => Label::Gpt(GptLabel::default()),
        }
    }

    /// Applies an alignment grain to formats that honor one.
    pub fn with_grain(self, grain: Option<Sector>) -> Self {
        match self {
            Label::Dos(l) => Label::Dos(l.with_grain(grain)),
            Label::Gpt(l) => Label::Gpt(l.with_grain(grain)),
            other => other,
        }
    }

    /// The first format found on `dev`, which must be open.
    pub fn probe(dev: &Arc<Device>) -> Result<Option<LabelKind>> {
        // gpt first: its protective MBR also carries the dos signature
        for kind in [LabelKind::Gpt, LabelKind::Dos] {
            if kind.probe(dev)? {
                debug!("found {} label on {}", kind, dev.path().display());
                return Ok(Some(kind));
            }
        }
        Ok(None)
    }

    /// Wipes the signatures of every other format present on `dev`.
    pub fn clobber_except(dev: &Arc<Device>, keep: LabelKind) -> Result<()> {
        for kind in LabelKind::ALL {
            if kind != keep && kind.probe(dev)? {
                info!("removing {} label from {}", kind, dev.path().display());
                kind.clobber(dev)?;
            }
        }
        Ok(())
    }

    fn ops(&self) -> &dyn LabelOps {
        match self {
            Label::Flat(l) => l,
            Label::Dos(l) => l,
            Label::Gpt(l) => l,
        }
    }

    fn ops_mut(&mut self) -> &mut dyn LabelOps {
        match self {
            Label::Flat(l) => l,
            Label::Dos(l) => l,
            Label::Gpt(l) => l,
        }
    }
}

impl LabelOps for Label {
    fn kind(&self) -> LabelKind {
        self.ops().kind()
    }

    fn features(&self) -> LabelFeatures {
        self.ops().features()
    }

    fn max_primary_partition_count(&self) -> usize {
        self.ops().max_primary_partition_count()
    }

    fn new_partition_data(&self, kind: PartitionType) -> PartData {
        self.ops().new_partition_data(kind)
    }

    fn read(&mut self, disk: &mut Disk) -> Result<()> {
        self.ops_mut().read(disk)
    }

    fn write(&self, disk: &Disk) -> Result<()> {
        self.ops().write(disk)
    }

    fn partition_align(
        &self,
        disk: &Disk,
        id: PartId,
        constraint: &Constraint,
    ) -> Result<Geometry> {
        self.ops().partition_align(disk, id, constraint)
    }

    fn partition_enumerate(&self, disk: &Disk, id: PartId) -> Result<i32> {
        self.ops().partition_enumerate(disk, id)
    }

    fn alloc_metadata(&self, disk: &mut Disk) -> Result<()> {
        self.ops().alloc_metadata(disk)
    }

    fn is_flag_available(&self, part: &Partition, flag: PartitionFlag) -> bool {
        self.ops().is_flag_available(part, flag)
    }

    fn set_flag(&self, disk: &mut Disk, id: PartId, flag: PartitionFlag, state: bool) -> Result<()> {
        self.ops().set_flag(disk, id, flag, state)
    }

    fn set_system(&self, part: &mut Partition, fs_type: Option<FsType>) -> Result<()> {
        self.ops().set_system(part, fs_type)
    }

    fn check_name(&self, name: &str) -> Result<()> {
        self.ops().check_name(name)
    }
}

/// Smallest number in `range` that no other partition on `disk` carries.
pub(crate) fn first_free_num(disk: &Disk, id: PartId, range: RangeInclusive<i32>) -> Option<i32> {
    range
        .into_iter()
        .find(|n| !disk.iter().any(|p| p.id != id && p.num == *n))
}

/// True when `num` is set and no other partition on `disk` carries it.
pub(crate) fn num_is_unique(disk: &Disk, id: PartId, num: i32) -> bool {
    num > 0 && !disk.iter().any(|p| p.id != id && p.num == num)
}

/// Intersects `external` with each of `policies` in turn and returns the
/// first solution nearest `target`.
pub(crate) fn solve_with_policies(
    target: &Geometry,
    external: &Constraint,
    policies: &[Constraint],
) -> Result<Geometry> {
    policies
        .iter()
        .filter_map(|policy| policy.intersect(external))
        .find_map(|combined| combined.solve_nearest(target))
        .ok_or(DiskError::AlignmentFailed)
}

/// Placement policy with both ends inside `[start_min, start_max]` and
/// `[end_min, end_max]`, optionally snapped to `grain`.
pub(crate) fn range_policy(
    dev: &Arc<Device>,
    (start_min, start_max): (Sector, Sector),
    (end_min, end_max): (Sector, Sector),
    grain: Option<Sector>,
) -> Option<Constraint> {
    use super::alignment::Alignment;

    let start_range = Geometry::from_bounds(dev, start_min, start_max).ok()?;
    let end_range = Geometry::from_bounds(dev, end_min, end_max).ok()?;
    let (start_align, end_align) = match grain {
        Some(grain) if grain > 1 => (Alignment::new(0, grain)?, Alignment::new(grain - 1, grain)?),
        _ => (Alignment::ANY, Alignment::ANY),
    };
    Constraint::new(
        start_align,
        end_align,
        start_range,
        end_range,
        1,
        dev.length(),
    )
}

/// Links a metadata placeholder covering `[start, end]`. Sectors already
/// claimed by a real partition are left alone.
pub(crate) fn add_metadata(disk: &mut Disk, logical: bool, start: Sector, end: Sector) {
    let kind = if logical {
        PartitionType::METADATA | PartitionType::LOGICAL
    } else {
        PartitionType::METADATA
    };
    let id = match disk.new_partition(kind, None, start, end) {
        Ok(id) => id,
        Err(e) => {
            debug!("no metadata at {}-{}: {}", start, end, e);
            return;
        }
    };
    if let Err(e) = disk.add_partition(id, None) {
        debug!("no metadata at {}-{}: {}", start, end, e);
        let _ = disk.destroy_partition(id);
    }
}
