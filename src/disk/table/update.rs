use std::ops::{Deref, DerefMut};

use super::Disk;
use crate::disk::error::{DiskError, Result};
use crate::disk::label::LabelOps;
use crate::disk::partition::{PartId, PartitionType};
use crate::disk::Sector;

/// Holds a disk in update mode. Placeholders are absent while any guard is
/// alive; dropping the outermost one regenerates metadata, then freespace.
pub struct UpdateGuard<'a> {
    disk: &'a mut Disk,
}

impl Deref for UpdateGuard<'_> {
    type Target = Disk;

    fn deref(&self) -> &Disk {
        self.disk
    }
}

impl DerefMut for UpdateGuard<'_> {
    fn deref_mut(&mut self) -> &mut Disk {
        self.disk
    }
}

impl Drop for UpdateGuard<'_> {
    fn drop(&mut self) {
        self.disk.pop_update_mode();
    }
}

impl Disk {
    pub fn begin_update(&mut self) -> UpdateGuard<'_> {
        self.push_update_mode();
        UpdateGuard { disk: self }
    }

    pub(super) fn push_update_mode(&mut self) {
        if self.update_mode == 0 {
            self.remove_freespace();
            self.update_mode += 1;
            self.remove_metadata();
        } else {
            self.update_mode += 1;
        }
    }

    pub(super) fn pop_update_mode(&mut self) {
        debug_assert!(self.update_mode > 0, "unbalanced update mode");
        match self.update_mode {
            0 => error!("update mode popped while not in update mode"),
            1 => {
                // metadata first: adding it needs update mode
                let label = self.label.clone();
                if let Err(e) = label.alloc_metadata(self) {
                    error!("failed to allocate label metadata: {}", e);
                }
                self.update_mode -= 1;
                self.alloc_freespace();
            }
            _ => self.update_mode -= 1,
        }
    }

    pub(crate) fn require_update_mode(&self) -> Result<()> {
        if self.update_mode == 0 {
            debug_assert!(false, "operation needs update mode");
            return Err(DiskError::UpdateMode {
                expected: ">0",
                actual: 0,
            });
        }
        Ok(())
    }

    fn drop_placeholders(&mut self, kind: PartitionType) {
        let ids: Vec<PartId> = self
            .iter()
            .filter(|p| p.kind.contains(kind))
            .map(|p| p.id)
            .collect();
        for id in ids {
            if self.raw_remove(id).is_ok() {
                let _ = self.destroy_partition(id);
            }
        }
    }

    fn remove_freespace(&mut self) {
        self.drop_placeholders(PartitionType::FREESPACE);
    }

    fn remove_metadata(&mut self) {
        self.drop_placeholders(PartitionType::METADATA);
    }

    /// Fills every gap of `scope` between `first` and `last` (inclusive)
    /// with a freespace entry.
    fn fill_gaps(&mut self, scope: Option<PartId>, first: Sector, last: Sector) {
        let kind = match scope {
            Some(_) => PartitionType::FREESPACE | PartitionType::LOGICAL,
            None => PartitionType::FREESPACE,
        };
        let bounds: Vec<(Sector, Sector)> = self
            .list(scope)
            .iter()
            .filter_map(|id| self.arena_get(*id))
            .map(|p| (p.start(), p.end()))
            .collect();

        let mut gaps = Vec::new();
        let mut last_end = first - 1;
        for (start, end) in bounds {
            if start > last_end + 1 {
                gaps.push((last_end + 1, start - 1));
            }
            last_end = end;
        }
        if last_end < last {
            gaps.push((last_end + 1, last));
        }

        for (start, end) in gaps {
            let id = match self.new_partition(kind, None, start, end) {
                Ok(id) => id,
                Err(e) => {
                    error!("unable to describe free space {}-{}: {}", start, end, e);
                    continue;
                }
            };
            if let Err(e) = self.raw_add_to(scope, id) {
                error!("unable to insert free space {}-{}: {}", start, end, e);
                let _ = self.destroy_partition(id);
            }
        }
    }

    fn alloc_freespace(&mut self) {
        self.remove_freespace();
        if let Some(ext) = self.extended_partition()
            && let Some(geom) = self.arena_get(ext).map(|p| p.geom.clone())
        {
            // the extended partition's first sector is never logical free space
            self.fill_gaps(Some(ext), geom.start() + 1, geom.end());
        }
        let last = self.dev.length() - 1;
        self.fill_gaps(None, 0, last);
    }

    /// Links `id` into its scope, keeping the scope ordered by start sector.
    pub(crate) fn raw_add(&mut self, id: PartId) -> Result<()> {
        self.require_update_mode()?;
        let kind = self.part(id)?.kind;
        let scope = self.scope_for(kind)?;
        self.raw_add_to(scope, id)
    }

    fn raw_add_to(&mut self, scope: Option<PartId>, id: PartId) -> Result<()> {
        let end = self.part(id)?.end();
        let list = self.list(scope);
        let pos = list
            .iter()
            .position(|walk| self.arena_get(*walk).is_some_and(|p| p.start() > end))
            .unwrap_or(list.len());
        self.list_mut(scope)?.insert(pos, id);
        self.part_mut(id)?.parent = scope;
        Ok(())
    }

    pub(crate) fn raw_remove(&mut self, id: PartId) -> Result<()> {
        let scope = self.part(id)?.parent;
        let list = self.list_mut(scope)?;
        let pos = list
            .iter()
            .position(|walk| *walk == id)
            .ok_or(DiskError::PartitionNotLinked(id))?;
        list.remove(pos);
        self.part_mut(id)?.parent = None;
        Ok(())
    }
}
