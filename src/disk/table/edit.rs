use super::Disk;
use crate::disk::constraint::Constraint;
use crate::disk::error::{DiskError, Result};
use crate::disk::geometry::Geometry;
use crate::disk::label::{LabelFeatures, LabelOps};
use crate::disk::partition::{PartId, PartitionType};
use crate::disk::Sector;

impl Disk {
    /// Links an unlinked partition into the table.
    ///
    /// With a constraint the partition may be moved or resized to the
    /// nearest geometry satisfying it, the free space around it, and the
    /// label's own policy. Without one its geometry is taken as is.
    pub fn add_partition(&mut self, id: PartId, constraint: Option<&Constraint>) -> Result<()> {
        if self.is_linked(id) {
            return Err(DiskError::PartitionLinked(id));
        }
        self.check_basic_sanity(id)?;

        let (old_geom, old_num) = {
            let part = self.part(id)?;
            (part.geom.clone(), part.num)
        };
        let mut disk = self.begin_update();
        let result = disk.add_partition_locked(id, constraint);
        if result.is_err()
            && let Ok(part) = disk.part_mut(id)
        {
            part.geom = old_geom;
            part.num = old_num;
        }
        drop(disk);

        if result.is_ok()
            && let Ok(part) = self.part(id)
        {
            debug!(
                "added {} partition {} at {}-{}",
                part.type_name(),
                part.num,
                part.start(),
                part.end()
            );
        }
        result
    }

    fn add_partition_locked(&mut self, id: PartId, constraint: Option<&Constraint>) -> Result<()> {
        let part = self.part(id)?;
        if part.is_active() {
            let geom = part.geom.clone();
            let exact;
            let constraint = match constraint {
                Some(c) => c,
                None => {
                    exact = Constraint::exact(&geom);
                    &exact
                }
            };
            let combined = self
                .overlap_constraint(id, &geom)?
                .and_then(|overlap| overlap.intersect(constraint))
                .ok_or(DiskError::Overlap)?;

            self.enumerate_partitions()?;
            self.enumerate_partition(id)?;
            self.align_partition(id, &combined)?;
        }
        self.check_partition(id)?;
        self.raw_add(id)
    }

    /// Unlinks a partition without freeing it and closes the numbering gap
    /// it leaves.
    pub fn remove_partition(&mut self, id: PartId) -> Result<()> {
        let mut disk = self.begin_update();
        if !disk.part(id)?.children.is_empty() {
            debug_assert!(false, "removing an extended partition with children");
            return Err(DiskError::HasChildren(id));
        }
        disk.raw_remove(id)?;
        drop(disk);
        self.enumerate_partitions()
    }

    /// Removes and frees a partition. An extended partition takes its
    /// logical partitions with it.
    pub fn delete_partition(&mut self, id: PartId) -> Result<()> {
        let mut disk = self.begin_update();
        if disk.part(id)?.is_extended() {
            disk.delete_all_logical(id)?;
        }
        disk.remove_partition(id)?;
        disk.destroy_partition(id)
    }

    fn delete_all_logical(&mut self, ext: PartId) -> Result<()> {
        let children = self.part(ext)?.children.clone();
        for child in children {
            self.delete_partition(child)?;
        }
        Ok(())
    }

    pub fn delete_all(&mut self) -> Result<()> {
        let mut disk = self.begin_update();
        let top = disk.top.clone();
        for id in top {
            disk.delete_partition(id)?;
        }
        Ok(())
    }

    /// Moves or resizes a linked partition to `[start, end]`, adjusted to
    /// satisfy `constraint`. The partition may grow into space it already
    /// occupies. On failure its geometry is left untouched.
    pub fn set_partition_geom(
        &mut self,
        id: PartId,
        constraint: &Constraint,
        start: Sector,
        end: Sector,
    ) -> Result<()> {
        if !self.is_linked(id) {
            return Err(DiskError::PartitionNotLinked(id));
        }
        let old_geom = self.geom(id)?.clone();
        let new_geom = Geometry::from_bounds(&self.dev, start, end)?;

        let mut disk = self.begin_update();
        let result = disk.set_partition_geom_locked(id, constraint, new_geom);
        if result.is_err()
            && let Ok(part) = disk.part_mut(id)
        {
            part.geom = old_geom;
        }
        result
    }

    fn set_partition_geom_locked(
        &mut self,
        id: PartId,
        constraint: &Constraint,
        new_geom: Geometry,
    ) -> Result<()> {
        let combined = self
            .overlap_constraint(id, &new_geom)?
            .and_then(|overlap| overlap.intersect(constraint))
            .ok_or(DiskError::Overlap)?;

        self.part_mut(id)?.geom = new_geom;
        self.align_partition(id, &combined)?;
        self.check_partition(id)?;

        // re-link so the scope stays ordered if the start moved
        self.raw_remove(id)?;
        self.raw_add(id)
    }

    /// Grows a partition over the free space on both sides of it.
    pub fn maximize_partition(&mut self, id: PartId, constraint: &Constraint) -> Result<()> {
        let (kind, old_geom) = {
            let part = self.part(id)?;
            (part.kind, part.geom.clone())
        };
        let (global_min, global_max) = self.scope_bounds(kind)?;

        let mut disk = self.begin_update();
        let scope = disk.part(id)?.parent;
        let list = disk.list(scope);
        let pos = list
            .iter()
            .position(|walk| *walk == id)
            .ok_or(DiskError::PartitionNotLinked(id))?;
        let new_start = match pos.checked_sub(1).and_then(|p| list.get(p)) {
            Some(prev) => disk.geom(*prev)?.end() + 1,
            None => global_min,
        };
        let new_end = match list.get(pos + 1) {
            Some(next) => disk.geom(*next)?.start() - 1,
            None => global_max,
        };

        let result = disk.set_partition_geom(id, constraint, new_start, new_end);
        if result.is_err() {
            let any = Constraint::any(&disk.dev);
            if let Err(e) =
                disk.set_partition_geom(id, &any, old_geom.start(), old_geom.end())
            {
                warn!("unable to restore partition geometry: {}", e);
            }
        }
        result
    }

    /// The geometry [`maximize_partition`](Self::maximize_partition) would
    /// produce, leaving the partition where it is.
    pub fn get_max_partition_geometry(
        &mut self,
        id: PartId,
        constraint: &Constraint,
    ) -> Result<Geometry> {
        if !self.part(id)?.is_active() {
            return Err(DiskError::UnknownPartition(id));
        }
        let old_geom = self.geom(id)?.clone();
        self.maximize_partition(id, constraint)?;
        let max_geom = self.geom(id)?.clone();

        let exact = Constraint::exact(&old_geom);
        self.set_partition_geom(id, &exact, old_geom.start(), old_geom.end())?;
        debug_assert_eq!(self.geom(id)?, &old_geom);
        Ok(max_geom)
    }

    /// Shrinks the extended partition around its logical partitions, or
    /// deletes it when it has none.
    pub fn minimize_extended_partition(&mut self) -> Result<()> {
        let Some(ext) = self.extended_partition() else {
            return Ok(());
        };

        let mut disk = self.begin_update();
        let children = disk.part(ext)?.children.clone();
        let (Some(first), Some(last)) = (children.first(), children.last()) else {
            drop(disk);
            return self.delete_partition(ext);
        };
        let start = disk.geom(*first)?.start();
        let end = disk.geom(*last)?.end();
        let any = Constraint::any(&disk.dev);
        disk.set_partition_geom(ext, &any, start, end)
    }

    /// Renumbers already-numbered partitions in number order, which closes
    /// gaps left by removals, then numbers the rest.
    pub(crate) fn enumerate_partitions(&mut self) -> Result<()> {
        let end = self.last_partition_num();
        for num in 1..=end {
            if let Some(id) = self.get_partition(num) {
                self.enumerate_partition(id)?;
            }
        }

        let unnumbered: Vec<PartId> = self
            .iter()
            .filter(|p| p.is_active() && p.num == -1)
            .map(|p| p.id)
            .collect();
        for id in unnumbered {
            self.enumerate_partition(id)?;
        }
        Ok(())
    }

    fn enumerate_partition(&mut self, id: PartId) -> Result<()> {
        let num = self.label.partition_enumerate(self, id)?;
        self.part_mut(id)?.num = num;
        Ok(())
    }

    fn align_partition(&mut self, id: PartId, constraint: &Constraint) -> Result<()> {
        self.require_update_mode()?;
        let solved = self.label.partition_align(self, id, constraint)?;
        self.part_mut(id)?.geom = solved;
        Ok(())
    }

    /// Sector bounds of the scope a partition of `kind` lives in.
    fn scope_bounds(&self, kind: PartitionType) -> Result<(Sector, Sector)> {
        match self.scope_for(kind)? {
            Some(ext) => {
                let geom = self.geom(ext)?;
                Ok((geom.start(), geom.end()))
            }
            None => Ok((0, self.dev.length() - 1)),
        }
    }

    /// The largest free interval around `geom` in the scope of `id`,
    /// ignoring `id` itself. `None` when there is no room.
    pub(crate) fn overlap_constraint(
        &self,
        id: PartId,
        geom: &Geometry,
    ) -> Result<Option<Constraint>> {
        self.require_update_mode()?;
        let kind = self.part(id)?.kind;
        let scope = self.scope_for(kind)?;
        let (mut min_start, mut max_end) = self.scope_bounds(kind)?;
        let list = self.list(scope);

        let mut pos = 0;
        while let Some(walk) = list.get(pos) {
            let walk_geom = self.geom(*walk)?;
            if !(walk_geom.start() < geom.start() || min_start >= walk_geom.start()) {
                break;
            }
            if *walk != id {
                min_start = walk_geom.end() + 1;
            }
            pos += 1;
        }
        if list.get(pos) == Some(&id) {
            pos += 1;
        }
        if let Some(next) = list.get(pos) {
            max_end = self.geom(*next)?.start() - 1;
        }

        if min_start >= max_end {
            return Ok(None);
        }
        let free = Geometry::from_bounds(&self.dev, min_start, max_end)?;
        Ok(Some(Constraint::from_max(&free)))
    }

    fn check_basic_sanity(&self, id: PartId) -> Result<()> {
        let part = self.part(id)?;
        let ext = self.extended_partition();

        if (part.kind == PartitionType::EXTENDED || part.kind == PartitionType::LOGICAL)
            && !self.supports(LabelFeatures::EXTENDED)
        {
            return Err(DiskError::unsupported(
                self.label.kind().name(),
                "logical or extended partitions",
            ));
        }

        if part.is_active()
            && !part.is_logical()
            && self.primary_partition_count() + 1 > self.max_primary_partition_count()
        {
            return Err(DiskError::TooManyPrimaryPartitions {
                max: self.max_primary_partition_count(),
            });
        }

        if part.is_logical() {
            let Some(ext) = ext else {
                return Err(DiskError::NoExtendedPartition {
                    path: self.dev.path().to_path_buf(),
                });
            };
            if !self.geom(ext)?.test_inside(&part.geom) {
                return Err(DiskError::LogicalOutsideExtended);
            }
        }
        Ok(())
    }

    fn check_extended_partition(&self, id: PartId) -> Result<()> {
        let ext = self.extended_partition().unwrap_or(id);
        if ext != id {
            return Err(DiskError::TooManyExtendedPartitions {
                path: self.dev.path().to_path_buf(),
            });
        }
        let ext_geom = self.geom(ext)?;
        for child in &self.part(ext)?.children {
            if !ext_geom.test_inside(self.geom(*child)?) {
                return Err(DiskError::LogicalOutsideExtended);
            }
        }
        Ok(())
    }

    /// Structural checks run before a partition is (re)linked.
    fn check_partition(&self, id: PartId) -> Result<()> {
        let part = self.part(id)?;
        let ext = self.extended_partition();

        if part.is_extended() {
            self.check_extended_partition(id)?;
        }

        if part.is_logical() {
            let inside = match ext {
                Some(ext) => self.geom(ext)?.test_inside(&part.geom),
                None => false,
            };
            if !inside {
                return Err(DiskError::LogicalOutsideExtended);
            }
        }

        if !self.check_part_overlaps(id)? {
            return Err(DiskError::Overlap);
        }

        if !part.is_logical()
            && let Some(ext) = ext
            && ext != id
            && self.geom(ext)?.test_inside(&part.geom)
        {
            return Err(DiskError::PrimaryInsideExtended);
        }
        Ok(())
    }

    /// False when `id` collides with any other linked entry. A logical
    /// partition may overlap the extended partition that contains it.
    fn check_part_overlaps(&self, id: PartId) -> Result<bool> {
        let part = self.part(id)?;
        for walk in self.iter() {
            if walk.kind.contains(PartitionType::FREESPACE) || walk.id == id {
                continue;
            }
            if part.kind.contains(PartitionType::EXTENDED) && walk.is_logical() {
                continue;
            }
            if walk.geom.test_overlap(&part.geom) {
                if walk.is_extended() && part.is_logical() && walk.geom.test_inside(&part.geom) {
                    continue;
                }
                return Ok(false);
            }
        }
        Ok(true)
    }
}
