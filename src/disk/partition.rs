use bitflags::bitflags;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use super::geometry::Geometry;
use super::label::PartData;

/// Handle to a partition in its disk's arena. Only meaningful for the disk
/// that handed it out. Slots are reused, so the generation tells a freed
/// partition's id apart from whatever occupies the slot afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartId {
    pub(crate) slot: usize,
    pub(crate) generation: u32,
}

impl PartId {
    pub(crate) fn new(slot: usize, generation: u32) -> Self {
        Self { slot, generation }
    }
}

impl fmt::Display for PartId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.slot, self.generation)
    }
}

bitflags! {
    /// An empty set is a normal (primary) partition.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PartitionType: u8 {
        const LOGICAL = 1 << 0;
        const EXTENDED = 1 << 1;
        const FREESPACE = 1 << 2;
        const METADATA = 1 << 3;
    }
}

impl PartitionType {
    pub const NORMAL: Self = Self::empty();

    /// Real partitions, as opposed to freespace and metadata placeholders.
    pub fn is_active(&self) -> bool {
        !self.intersects(Self::FREESPACE | Self::METADATA)
    }

    pub fn name(&self) -> &'static str {
        if self.contains(Self::METADATA) {
            "metadata"
        } else if self.contains(Self::FREESPACE) {
            "free"
        } else if self.contains(Self::EXTENDED) {
            "extended"
        } else if self.contains(Self::LOGICAL) {
            "logical"
        } else {
            "primary"
        }
    }
}

impl FromStr for PartitionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "primary" => Ok(Self::NORMAL),
            "logical" => Ok(Self::LOGICAL),
            "extended" => Ok(Self::EXTENDED),
            other => Err(format!("unknown partition type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PartitionFlag {
    Boot,
    Root,
    Swap,
    Hidden,
    Raid,
    Lvm,
    Lba,
    HpService,
    Palo,
    Prep,
    MsftReserved,
}

impl PartitionFlag {
    pub const ALL: [PartitionFlag; 11] = [
        PartitionFlag::Boot,
        PartitionFlag::Root,
        PartitionFlag::Swap,
        PartitionFlag::Hidden,
        PartitionFlag::Raid,
        PartitionFlag::Lvm,
        PartitionFlag::Lba,
        PartitionFlag::HpService,
        PartitionFlag::Palo,
        PartitionFlag::Prep,
        PartitionFlag::MsftReserved,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PartitionFlag::Boot => "boot",
            PartitionFlag::Root => "root",
            PartitionFlag::Swap => "swap",
            PartitionFlag::Hidden => "hidden",
            PartitionFlag::Raid => "raid",
            PartitionFlag::Lvm => "lvm",
            PartitionFlag::Lba => "lba",
            PartitionFlag::HpService => "hp-service",
            PartitionFlag::Palo => "palo",
            PartitionFlag::Prep => "prep",
            PartitionFlag::MsftReserved => "msftres",
        }
    }

    /// Case-insensitive lookup by name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|flag| flag.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for PartitionFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsType {
    Ext2,
    Ext3,
    Ext4,
    Fat16,
    Fat32,
    LinuxSwap,
}

impl FsType {
    pub const ALL: [FsType; 6] = [
        FsType::Ext2,
        FsType::Ext3,
        FsType::Ext4,
        FsType::Fat16,
        FsType::Fat32,
        FsType::LinuxSwap,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FsType::Ext2 => "ext2",
            FsType::Ext3 => "ext3",
            FsType::Ext4 => "ext4",
            FsType::Fat16 => "fat16",
            FsType::Fat32 => "fat32",
            FsType::LinuxSwap => "linux-swap",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|fs| fs.name().eq_ignore_ascii_case(name))
    }

    pub fn is_fat(&self) -> bool {
        matches!(self, FsType::Fat16 | FsType::Fat32)
    }
}

impl fmt::Display for FsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One entry of a partition table, real or placeholder.
#[derive(Debug, Clone)]
pub struct Partition {
    pub(crate) id: PartId,
    pub(crate) geom: Geometry,
    pub(crate) kind: PartitionType,
    pub(crate) num: i32,
    pub(crate) fs_type: Option<FsType>,
    pub(crate) parent: Option<PartId>,
    pub(crate) children: Vec<PartId>,
    pub(crate) flags: BTreeSet<PartitionFlag>,
    pub(crate) name: Option<String>,
    pub(crate) data: PartData,
}

impl Partition {
    pub(crate) fn new(
        id: PartId,
        geom: Geometry,
        kind: PartitionType,
        fs_type: Option<FsType>,
    ) -> Self {
        Self {
            id,
            geom,
            kind,
            num: -1,
            fs_type,
            parent: None,
            children: Vec::new(),
            flags: BTreeSet::new(),
            name: None,
            data: PartData::None,
        }
    }

    pub fn id(&self) -> PartId {
        self.id
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geom
    }

    pub fn kind(&self) -> PartitionType {
        self.kind
    }

    /// 1-based partition number, or -1 when none is assigned.
    pub fn num(&self) -> i32 {
        self.num
    }

    pub fn fs_type(&self) -> Option<FsType> {
        self.fs_type
    }

    /// The extended partition holding this one, if it is a linked logical.
    pub fn parent(&self) -> Option<PartId> {
        self.parent
    }

    /// Logical partitions in ascending start order; empty unless extended.
    pub fn children(&self) -> &[PartId] {
        &self.children
    }

    pub fn flags(&self) -> impl Iterator<Item = PartitionFlag> + '_ {
        self.flags.iter().copied()
    }

    pub fn has_flag(&self, flag: PartitionFlag) -> bool {
        self.flags.contains(&flag)
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_active(&self) -> bool {
        self.kind.is_active()
    }

    pub fn is_extended(&self) -> bool {
        self.kind == PartitionType::EXTENDED
    }

    pub fn is_logical(&self) -> bool {
        self.kind.contains(PartitionType::LOGICAL)
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn start(&self) -> super::Sector {
        self.geom.start()
    }

    pub fn end(&self) -> super::Sector {
        self.geom.end()
    }

    pub fn length(&self) -> super::Sector {
        self.geom.length()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names() {
        assert_eq!(PartitionType::NORMAL.name(), "primary");
        assert_eq!(PartitionType::LOGICAL.name(), "logical");
        assert_eq!(PartitionType::EXTENDED.name(), "extended");
        assert_eq!(
            (PartitionType::FREESPACE | PartitionType::LOGICAL).name(),
            "free"
        );
        assert_eq!(
            (PartitionType::METADATA | PartitionType::LOGICAL).name(),
            "metadata"
        );
        assert!(!(PartitionType::FREESPACE | PartitionType::LOGICAL).is_active());
        assert!(PartitionType::LOGICAL.is_active());
        assert_eq!("Extended".parse::<PartitionType>(), Ok(PartitionType::EXTENDED));
    }

    #[test]
    fn test_flag_lookup() {
        for flag in PartitionFlag::ALL {
            assert_eq!(PartitionFlag::from_name(flag.name()), Some(flag));
        }
        assert_eq!(PartitionFlag::from_name("LVM"), Some(PartitionFlag::Lvm));
        assert_eq!(PartitionFlag::from_name("bogus"), None);
        assert_eq!(FsType::from_name("Linux-Swap"), Some(FsType::LinuxSwap));
    }
}
