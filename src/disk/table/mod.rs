//! The in-memory partition table.
//!
//! A [`Disk`] owns every partition in an arena and links them into two
//! ordered scopes: the top-level list and the extended partition's list of
//! logical partitions. Outside update mode both lists are dense, with
//! freespace and metadata placeholders covering every sector that no real
//! partition does. Structural edits run inside an [`UpdateGuard`], which
//! strips the placeholders on entry and rebuilds them when the outermost
//! guard is dropped.

mod check;
mod edit;
mod update;

pub use update::UpdateGuard;

use std::sync::Arc;

use super::device::Device;
use super::error::{DiskError, Result};
use super::fs;
use super::geometry::Geometry;
use super::label::{Label, LabelFeatures, LabelKind, LabelOps};
use super::partition::{FsType, PartId, Partition, PartitionType};
use super::Sector;

#[derive(Debug)]
pub struct Disk {
    dev: Arc<Device>,
    label: Label,
    arena: Vec<Option<Partition>>,
    generations: Vec<u32>,
    vacant: Vec<usize>,
    top: Vec<PartId>,
    update_mode: u32,
    needs_clobber: bool,
}

impl Disk {
    fn alloc(dev: &Arc<Device>, label: Label, needs_clobber: bool) -> Self {
        Self {
            dev: Arc::clone(dev),
            label,
            arena: Vec::new(),
            generations: Vec::new(),
            vacant: Vec::new(),
            top: Vec::new(),
            // entering the first pop builds metadata and freespace
            update_mode: 1,
            needs_clobber,
        }
    }

    /// An empty table of the given label. Other labels' signatures are
    /// wiped on the first commit.
    pub fn new_fresh(dev: &Arc<Device>, label: Label) -> Self {
        let mut disk = Self::alloc(dev, label, true);
        disk.pop_update_mode();
        debug!(
            "new {} label on {} ({} sectors)",
            disk.label.kind(),
            dev.path().display(),
            dev.length()
        );
        disk
    }

    /// Which label, if any, is present on `dev`.
    pub fn probe(dev: &Arc<Device>) -> Result<Option<LabelKind>> {
        dev.with_open(|_| Label::probe(dev))
    }

    /// Reads the table found on `dev`.
    pub fn open(dev: &Arc<Device>) -> Result<Self> {
        let kind = Self::probe(dev)?.ok_or_else(|| DiskError::UnrecognisedLabel {
            path: dev.path().to_path_buf(),
        })?;
        Self::open_as(dev, Label::new(kind))
    }

    /// Reads the table on `dev` with an explicitly chosen label.
    pub fn open_as(dev: &Arc<Device>, mut label: Label) -> Result<Self> {
        let mut disk = Self::alloc(dev, label.clone(), false);
        dev.with_open(|_| {
            label.read(&mut disk)?;
            disk.probe_file_systems();
            Ok(())
        })?;
        disk.label = label;
        disk.pop_update_mode();
        info!(
            "read {} label from {}: {} partitions",
            disk.label.kind(),
            dev.path().display(),
            disk.iter().filter(|p| p.is_active()).count()
        );
        Ok(disk)
    }

    fn probe_file_systems(&mut self) {
        let ids: Vec<PartId> = self.iter_ids().collect();
        for id in ids {
            let Some(part) = self.partition(id) else {
                continue;
            };
            if !part.is_active() || part.is_extended() || part.fs_type.is_some() {
                continue;
            }
            let found = fs::probe(&part.geom);
            if let Some(fs_type) = found
                && let Some(part) = self.arena_get_mut(id)
            {
                debug!("partition {} holds {}", part.num, fs_type);
                part.fs_type = Some(fs_type);
            }
        }
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.dev
    }

    pub fn label(&self) -> &Label {
        &self.label
    }

    pub fn label_kind(&self) -> LabelKind {
        self.label.kind()
    }

    pub fn update_mode(&self) -> u32 {
        self.update_mode
    }

    pub fn needs_clobber(&self) -> bool {
        self.needs_clobber
    }

    /// Sets the grain new partitions are aligned to. `None` restores the
    /// label's default.
    pub fn set_alignment_grain(&mut self, grain: Option<Sector>) {
        self.label = self.label.clone().with_grain(grain);
    }

    pub(crate) fn supports(&self, feature: LabelFeatures) -> bool {
        self.label.features().contains(feature)
    }

    /// Writes the table to the device.
    pub fn commit(&mut self) -> Result<()> {
        if self.update_mode != 0 {
            return Err(DiskError::UpdateMode {
                expected: "0",
                actual: self.update_mode,
            });
        }
        let dev = Arc::clone(&self.dev);
        dev.with_open(|dev| {
            if self.needs_clobber {
                Label::clobber_except(&self.dev, self.label.kind())?;
            }
            self.label.write(self)?;
            dev.sync()
        })?;
        self.needs_clobber = false;
        info!(
            "wrote {} label to {}",
            self.label.kind(),
            self.dev.path().display()
        );
        Ok(())
    }

    /// An independent copy of the table on the same device.
    pub fn duplicate(&self) -> Result<Disk> {
        if self.update_mode != 0 {
            return Err(DiskError::UpdateMode {
                expected: "0",
                actual: self.update_mode,
            });
        }
        let mut copy = Self::alloc(&self.dev, self.label.clone(), self.needs_clobber);
        for part in self.iter().filter(|p| p.is_active()) {
            let id = copy.new_partition(part.kind, part.fs_type, part.start(), part.end())?;
            if let Some(new_part) = copy.arena_get_mut(id) {
                new_part.num = part.num;
                new_part.flags = part.flags.clone();
                new_part.name = part.name.clone();
                new_part.data = part.data.clone();
            }
            let exact = super::constraint::Constraint::exact(&part.geom);
            copy.add_partition(id, Some(&exact))?;
        }
        copy.pop_update_mode();
        Ok(copy)
    }

    // Arena.

    fn arena_get(&self, id: PartId) -> Option<&Partition> {
        self.arena
            .get(id.slot)
            .and_then(Option::as_ref)
            .filter(|part| part.id == id)
    }

    fn arena_get_mut(&mut self, id: PartId) -> Option<&mut Partition> {
        self.arena
            .get_mut(id.slot)
            .and_then(Option::as_mut)
            .filter(|part| part.id == id)
    }

    pub fn partition(&self, id: PartId) -> Option<&Partition> {
        self.arena_get(id)
    }

    pub(crate) fn part(&self, id: PartId) -> Result<&Partition> {
        self.arena_get(id).ok_or(DiskError::UnknownPartition(id))
    }

    pub(crate) fn part_mut(&mut self, id: PartId) -> Result<&mut Partition> {
        self.arena_get_mut(id).ok_or(DiskError::UnknownPartition(id))
    }

    pub(crate) fn geom(&self, id: PartId) -> Result<&Geometry> {
        Ok(&self.part(id)?.geom)
    }

    /// Allocates an unlinked partition `[start, end]` bound to this disk.
    pub fn new_partition(
        &mut self,
        kind: PartitionType,
        fs_type: Option<FsType>,
        start: Sector,
        end: Sector,
    ) -> Result<PartId> {
        if (kind == PartitionType::EXTENDED || kind == PartitionType::LOGICAL)
            && !self.supports(LabelFeatures::EXTENDED)
        {
            return Err(DiskError::unsupported(
                self.label.kind().name(),
                "extended partitions",
            ));
        }
        let geom = Geometry::from_bounds(&self.dev, start, end)?;
        let id = match self.vacant.pop() {
            Some(slot) => PartId::new(slot, self.generations[slot]),
            None => {
                self.arena.push(None);
                self.generations.push(0);
                PartId::new(self.arena.len() - 1, 0)
            }
        };
        let mut part = Partition::new(id, geom, kind, fs_type);
        part.data = self.label.new_partition_data(kind);
        if kind.is_active()
            && (fs_type.is_some() || kind == PartitionType::EXTENDED)
            && let Err(e) = self.label.set_system(&mut part, fs_type)
        {
            self.vacant.push(id.slot);
            return Err(e);
        }
        self.arena[id.slot] = Some(part);
        Ok(id)
    }

    /// Frees a partition that is not part of the table.
    pub fn destroy_partition(&mut self, id: PartId) -> Result<()> {
        self.part(id)?;
        if self.is_linked(id) {
            return Err(DiskError::PartitionLinked(id));
        }
        self.arena[id.slot] = None;
        self.generations[id.slot] = self.generations[id.slot].wrapping_add(1);
        self.vacant.push(id.slot);
        Ok(())
    }

    pub fn is_linked(&self, id: PartId) -> bool {
        match self.arena_get(id) {
            Some(part) => match part.parent {
                Some(parent) => self
                    .arena_get(parent)
                    .is_some_and(|ext| ext.children.contains(&id)),
                None => self.top.contains(&id),
            },
            None => false,
        }
    }

    // Scopes.

    /// The list a partition of `kind` lives in: `None` for the top level,
    /// the extended partition for logicals.
    fn scope_for(&self, kind: PartitionType) -> Result<Option<PartId>> {
        if kind.contains(PartitionType::LOGICAL) {
            let ext = self
                .extended_partition()
                .ok_or_else(|| DiskError::NoExtendedPartition {
                    path: self.dev.path().to_path_buf(),
                })?;
            Ok(Some(ext))
        } else {
            Ok(None)
        }
    }

    pub(crate) fn list(&self, scope: Option<PartId>) -> &[PartId] {
        match scope {
            None => &self.top,
            Some(ext) => self
                .arena_get(ext)
                .map(|p| p.children.as_slice())
                .unwrap_or(&[]),
        }
    }

    fn list_mut(&mut self, scope: Option<PartId>) -> Result<&mut Vec<PartId>> {
        match scope {
            None => Ok(&mut self.top),
            Some(ext) => Ok(&mut self.part_mut(ext)?.children),
        }
    }

    /// Top-level entries in start order.
    pub fn top_level(&self) -> &[PartId] {
        &self.top
    }

    // Traversal.

    pub fn extended_partition(&self) -> Option<PartId> {
        self.top
            .iter()
            .copied()
            .find(|id| self.arena_get(*id).is_some_and(Partition::is_extended))
    }

    /// Pre-order successor of `cur`; `None` starts from the beginning.
    pub fn next_partition(&self, cur: Option<PartId>) -> Option<PartId> {
        let Some(cur) = cur else {
            return self.top.first().copied();
        };
        let part = self.arena_get(cur)?;
        if part.is_extended()
            && let Some(first) = part.children.first()
        {
            return Some(*first);
        }
        let list = self.list(part.parent);
        let pos = list.iter().position(|id| *id == cur)?;
        if let Some(next) = list.get(pos + 1) {
            return Some(*next);
        }
        let ext = part.parent?;
        let pos = self.top.iter().position(|id| *id == ext)?;
        self.top.get(pos + 1).copied()
    }

    pub fn iter_ids(&self) -> impl Iterator<Item = PartId> + '_ {
        std::iter::successors(self.next_partition(None), move |cur| {
            self.next_partition(Some(*cur))
        })
    }

    /// Every linked entry, placeholders included, in pre-order.
    pub fn iter(&self) -> impl Iterator<Item = &Partition> + '_ {
        self.iter_ids().filter_map(move |id| self.arena_get(id))
    }

    pub fn get_partition(&self, num: i32) -> Option<PartId> {
        self.iter()
            .find(|p| p.num == num && !p.kind.contains(PartitionType::FREESPACE))
            .map(Partition::id)
    }

    /// The entry holding `sector`. Logical partitions win over their
    /// extended parent.
    pub fn get_partition_by_sector(&self, sector: Sector) -> Option<PartId> {
        self.iter()
            .find(|p| p.geom.test_sector_inside(sector) && !p.is_extended())
            .map(Partition::id)
    }

    pub fn primary_partition_count(&self) -> usize {
        self.iter()
            .filter(|p| p.is_active() && !p.is_logical())
            .count()
    }

    /// Highest assigned number, or -1.
    pub fn last_partition_num(&self) -> i32 {
        self.iter().map(|p| p.num).max().unwrap_or(-1)
    }

    pub fn max_primary_partition_count(&self) -> usize {
        self.label.max_primary_partition_count()
    }

    /// Logs the table at debug level.
    pub fn print(&self) {
        for part in self.iter() {
            debug!(
                "  {:<10} {:02}  ({}->{})",
                part.type_name(),
                part.num,
                part.start(),
                part.end()
            );
        }
    }
}

#[cfg(test)]
mod tests;
