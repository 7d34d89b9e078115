use super::*;
use crate::disk::constraint::Constraint;
use crate::disk::exception::{Choice, FixedPolicy};
use crate::disk::label::FlatLabel;
use crate::disk::partition::PartitionFlag;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

type Entry = (&'static str, i32, Sector, Sector);

fn fresh(kind: LabelKind, length: Sector) -> Disk {
    let dev = Device::memory("mem0", length, 512);
    Disk::new_fresh(&dev, Label::new(kind))
}

fn add(disk: &mut Disk, kind: PartitionType, start: Sector, end: Sector) -> Result<PartId> {
    let id = disk.new_partition(kind, None, start, end)?;
    match disk.add_partition(id, None) {
        Ok(()) => Ok(id),
        Err(e) => {
            disk.destroy_partition(id).unwrap();
            Err(e)
        }
    }
}

fn layout(disk: &Disk) -> Vec<Entry> {
    disk.iter()
        .map(|p| (p.type_name(), p.num(), p.start(), p.end()))
        .collect()
}

/// Asserts that `ids` tile `[first, last]` with no gap or overlap.
fn assert_tiles(disk: &Disk, ids: &[PartId], first: Sector, last: Sector) {
    let mut next = first;
    for id in ids {
        let part = disk.partition(*id).unwrap();
        assert_eq!(part.start(), next, "gap or overlap before {:?}", layout(disk));
        next = part.end() + 1;
    }
    assert_eq!(next, last + 1, "table does not reach the end: {:?}", layout(disk));
}

fn assert_dense(disk: &Disk) {
    assert_eq!(disk.update_mode(), 0);
    assert_tiles(disk, disk.top_level(), 0, disk.device().length() - 1);
    if let Some(ext) = disk.extended_partition() {
        let part = disk.partition(ext).unwrap();
        assert_tiles(disk, part.children(), part.start(), part.end());
    }
}

#[test]
fn test_fresh_disk_is_one_free_region() {
    let disk = fresh(LabelKind::Flat, 1000);
    assert_eq!(layout(&disk), vec![("free", -1, 0, 999)]);
    assert_dense(&disk);
}

#[test]
fn test_add_and_overlap() {
    let mut disk = fresh(LabelKind::Flat, 1000);
    let id = add(&mut disk, PartitionType::NORMAL, 100, 199).unwrap();
    assert_eq!(disk.partition(id).unwrap().num(), 1);
    assert_eq!(
        layout(&disk),
        vec![("free", -1, 0, 99), ("primary", 1, 100, 199), ("free", -1, 200, 999)]
    );

    let before = layout(&disk);
    let err = add(&mut disk, PartitionType::NORMAL, 150, 250).unwrap_err();
    assert!(matches!(err, DiskError::Overlap));
    assert_eq!(layout(&disk), before);
    assert_dense(&disk);
}

#[test]
fn test_dos_extended_and_logical() {
    let mut disk = fresh(LabelKind::Dos, 1000);
    add(&mut disk, PartitionType::EXTENDED, 100, 899).unwrap();
    let logical = add(&mut disk, PartitionType::LOGICAL, 150, 199).unwrap();
    assert_eq!(disk.partition(logical).unwrap().num(), 5);
    assert_eq!(
        layout(&disk),
        vec![
            ("metadata", -1, 0, 0),
            ("free", -1, 1, 99),
            ("extended", 1, 100, 899),
            ("metadata", -1, 100, 100),
            ("free", -1, 101, 149),
            ("logical", 5, 150, 199),
            ("free", -1, 200, 899),
            ("free", -1, 900, 999),
        ]
    );
    assert_dense(&disk);

    let err = add(&mut disk, PartitionType::LOGICAL, 50, 60).unwrap_err();
    assert!(matches!(err, DiskError::LogicalOutsideExtended));
}

#[test]
fn test_logical_without_extended() {
    let mut disk = fresh(LabelKind::Dos, 1000);
    let err = add(&mut disk, PartitionType::LOGICAL, 150, 199).unwrap_err();
    assert!(matches!(err, DiskError::NoExtendedPartition { .. }));
}

#[test]
fn test_second_extended_rejected() {
    let mut disk = fresh(LabelKind::Dos, 1000);
    add(&mut disk, PartitionType::EXTENDED, 100, 499).unwrap();
    let err = add(&mut disk, PartitionType::EXTENDED, 500, 899).unwrap_err();
    assert!(matches!(err, DiskError::TooManyExtendedPartitions { .. }));
}

#[test]
fn test_primary_inside_extended_rejected() {
    let mut disk = fresh(LabelKind::Dos, 1000);
    add(&mut disk, PartitionType::EXTENDED, 100, 899).unwrap();
    let err = add(&mut disk, PartitionType::NORMAL, 200, 299).unwrap_err();
    assert!(matches!(err, DiskError::Overlap | DiskError::PrimaryInsideExtended));
}

#[test]
fn test_logical_gap_for_boot_record() {
    let mut disk = fresh(LabelKind::Dos, 1000);
    add(&mut disk, PartitionType::EXTENDED, 100, 899).unwrap();
    add(&mut disk, PartitionType::LOGICAL, 101, 199).unwrap();
    // sector 200 must stay free for the next boot record
    let err = add(&mut disk, PartitionType::LOGICAL, 200, 299).unwrap_err();
    assert!(matches!(err, DiskError::AlignmentFailed));
    add(&mut disk, PartitionType::LOGICAL, 201, 299).unwrap();
    let meta: Vec<Sector> = disk
        .iter()
        .filter(|p| p.kind().contains(PartitionType::METADATA))
        .map(|p| p.start())
        .collect();
    assert_eq!(meta, vec![0, 100, 200]);
    assert_dense(&disk);
}

#[test]
fn test_delete_extended_cascades() {
    let mut disk = fresh(LabelKind::Dos, 1000);
    let ext = add(&mut disk, PartitionType::EXTENDED, 100, 899).unwrap();
    let logical = add(&mut disk, PartitionType::LOGICAL, 150, 199).unwrap();

    disk.delete_partition(ext).unwrap();
    assert!(disk.partition(ext).is_none());
    assert!(disk.partition(logical).is_none());
    assert!(disk.extended_partition().is_none());
    assert_eq!(
        layout(&disk),
        vec![("metadata", -1, 0, 0), ("free", -1, 1, 999)]
    );
}

#[test]
fn test_deleted_id_stays_dead_after_slot_reuse() {
    let mut disk = fresh(LabelKind::Dos, 1000);
    let first = add(&mut disk, PartitionType::NORMAL, 100, 199).unwrap();
    disk.delete_partition(first).unwrap();
    assert!(disk.partition(first).is_none());

    let second = add(&mut disk, PartitionType::NORMAL, 300, 399).unwrap();
    assert_ne!(second, first);
    assert!(disk.partition(first).is_none());
    assert_eq!(disk.partition(second).unwrap().start(), 300);
    assert!(disk.delete_partition(first).is_err());
    assert_dense(&disk);
}

#[test]
fn test_remove_keeps_partition_alive() {
    let mut disk = fresh(LabelKind::Flat, 1000);
    let id = add(&mut disk, PartitionType::NORMAL, 100, 199).unwrap();
    disk.remove_partition(id).unwrap();
    assert!(!disk.is_linked(id));
    assert!(disk.partition(id).is_some());
    disk.add_partition(id, None).unwrap();
    assert!(disk.is_linked(id));
    assert!(matches!(
        disk.destroy_partition(id),
        Err(DiskError::PartitionLinked(_))
    ));
}

#[test]
fn test_renumber_fills_gap() {
    let mut disk = fresh(LabelKind::Flat, 1000);
    add(&mut disk, PartitionType::NORMAL, 0, 99).unwrap();
    let second = add(&mut disk, PartitionType::NORMAL, 100, 199).unwrap();
    add(&mut disk, PartitionType::NORMAL, 200, 299).unwrap();
    assert_eq!(disk.last_partition_num(), 3);

    disk.delete_partition(second).unwrap();
    let id = add(&mut disk, PartitionType::NORMAL, 300, 399).unwrap();
    assert_eq!(disk.partition(id).unwrap().num(), 2);
}

#[test]
fn test_logicals_renumber_compactly() {
    let mut disk = fresh(LabelKind::Dos, 1000);
    add(&mut disk, PartitionType::EXTENDED, 100, 899).unwrap();
    add(&mut disk, PartitionType::LOGICAL, 150, 199).unwrap();
    let middle = add(&mut disk, PartitionType::LOGICAL, 250, 299).unwrap();
    let last = add(&mut disk, PartitionType::LOGICAL, 350, 399).unwrap();
    assert_eq!(disk.partition(last).unwrap().num(), 7);

    disk.delete_partition(middle).unwrap();
    assert_eq!(disk.partition(last).unwrap().num(), 6);
    assert_eq!(disk.get_partition(6), Some(last));
    assert_eq!(disk.get_partition(7), None);
}

#[test]
fn test_update_mode_round_trip() {
    let mut disk = fresh(LabelKind::Dos, 1000);
    add(&mut disk, PartitionType::EXTENDED, 100, 899).unwrap();
    add(&mut disk, PartitionType::LOGICAL, 150, 199).unwrap();
    let before = layout(&disk);
    {
        let mut guard = disk.begin_update();
        assert_eq!(guard.update_mode(), 1);
        assert!(guard.iter().all(Partition::is_active));
        {
            let inner = guard.begin_update();
            assert_eq!(inner.update_mode(), 2);
        }
        assert_eq!(guard.update_mode(), 1);
    }
    assert_eq!(layout(&disk), before);
    assert_dense(&disk);
}

#[test]
fn test_commit_requires_idle_disk() {
    let mut disk = fresh(LabelKind::Flat, 1000);
    let mut guard = disk.begin_update();
    assert!(matches!(
        guard.commit(),
        Err(DiskError::UpdateMode { actual: 1, .. })
    ));
}

#[test]
fn test_duplicate_is_independent() {
    let mut disk = fresh(LabelKind::Dos, 1000);
    add(&mut disk, PartitionType::NORMAL, 1, 99).unwrap();
    add(&mut disk, PartitionType::EXTENDED, 100, 899).unwrap();
    add(&mut disk, PartitionType::LOGICAL, 150, 199).unwrap();
    add(&mut disk, PartitionType::LOGICAL, 300, 399).unwrap();

    let mut copy = disk.duplicate().unwrap();
    assert_eq!(layout(&copy), layout(&disk));
    assert!(Arc::ptr_eq(copy.device(), disk.device()));

    let first = copy.get_partition(1).unwrap();
    copy.delete_partition(first).unwrap();
    assert!(disk.get_partition(1).is_some());
    assert_ne!(layout(&copy), layout(&disk));
}

#[test]
fn test_minimize_extended() {
    let mut disk = fresh(LabelKind::Dos, 1000);
    let ext = add(&mut disk, PartitionType::EXTENDED, 100, 899).unwrap();
    add(&mut disk, PartitionType::LOGICAL, 150, 199).unwrap();

    disk.minimize_extended_partition().unwrap();
    let geom = disk.partition(ext).unwrap().geometry();
    assert_eq!((geom.start(), geom.end()), (149, 199));
    assert_dense(&disk);
}

#[test]
fn test_minimize_empty_extended_deletes_it() {
    let mut disk = fresh(LabelKind::Dos, 1000);
    add(&mut disk, PartitionType::EXTENDED, 100, 899).unwrap();
    disk.minimize_extended_partition().unwrap();
    assert!(disk.extended_partition().is_none());
}

#[test]
fn test_maximize_and_get_max() {
    let mut disk = fresh(LabelKind::Flat, 1000);
    let first = add(&mut disk, PartitionType::NORMAL, 100, 199).unwrap();
    let second = add(&mut disk, PartitionType::NORMAL, 400, 499).unwrap();
    let any = Constraint::any(disk.device());

    disk.maximize_partition(first, &any).unwrap();
    let geom = disk.partition(first).unwrap().geometry();
    assert_eq!((geom.start(), geom.end()), (0, 399));

    let max = disk.get_max_partition_geometry(second, &any).unwrap();
    assert_eq!((max.start(), max.end()), (400, 999));
    let geom = disk.partition(second).unwrap().geometry();
    assert_eq!((geom.start(), geom.end()), (400, 499));
    assert_dense(&disk);
}

#[test]
fn test_maximize_logical_leaves_boot_record() {
    let mut disk = fresh(LabelKind::Dos, 1000);
    add(&mut disk, PartitionType::EXTENDED, 100, 899).unwrap();
    let logical = add(&mut disk, PartitionType::LOGICAL, 150, 199).unwrap();
    let any = Constraint::any(disk.device());

    disk.maximize_partition(logical, &any).unwrap();
    let geom = disk.partition(logical).unwrap().geometry();
    assert_eq!((geom.start(), geom.end()), (101, 899));
}

#[test]
fn test_set_geom_is_atomic() {
    let mut disk = fresh(LabelKind::Flat, 1000);
    let first = add(&mut disk, PartitionType::NORMAL, 100, 199).unwrap();
    add(&mut disk, PartitionType::NORMAL, 300, 399).unwrap();
    let before = layout(&disk);

    let target = Geometry::from_bounds(disk.device(), 250, 350).unwrap();
    let exact = Constraint::exact(&target);
    let err = disk.set_partition_geom(first, &exact, 250, 350).unwrap_err();
    assert!(matches!(err, DiskError::Overlap));
    assert_eq!(layout(&disk), before);

    let any = Constraint::any(disk.device());
    disk.set_partition_geom(first, &any, 250, 350).unwrap();
    let geom = disk.partition(first).unwrap().geometry();
    assert_eq!((geom.start(), geom.end()), (250, 299));
    assert_dense(&disk);
}

#[test]
fn test_too_many_primaries() {
    let mut disk = fresh(LabelKind::Flat, 1000);
    for i in 0..4 {
        add(&mut disk, PartitionType::NORMAL, i * 100, i * 100 + 99).unwrap();
    }
    let err = add(&mut disk, PartitionType::NORMAL, 500, 599).unwrap_err();
    assert!(matches!(err, DiskError::TooManyPrimaryPartitions { max: 4 }));
}

#[test]
fn test_flat_primary_limit_is_configurable() {
    let dev = Device::memory("mem0", 1000, 512);
    let mut disk = Disk::new_fresh(&dev, Label::Flat(FlatLabel::with_max_primary(2)));
    assert_eq!(disk.max_primary_partition_count(), 2);
    add(&mut disk, PartitionType::NORMAL, 0, 99).unwrap();
    add(&mut disk, PartitionType::NORMAL, 100, 199).unwrap();
    let err = add(&mut disk, PartitionType::NORMAL, 200, 299).unwrap_err();
    assert!(matches!(err, DiskError::TooManyPrimaryPartitions { max: 2 }));
}

#[test]
fn test_flat_has_no_extended() {
    let mut disk = fresh(LabelKind::Flat, 1000);
    let err = disk
        .new_partition(PartitionType::EXTENDED, None, 100, 199)
        .unwrap_err();
    assert!(matches!(err, DiskError::UnsupportedOnLabel { .. }));
}

#[test]
fn test_lookup_by_sector() {
    let mut disk = fresh(LabelKind::Dos, 1000);
    add(&mut disk, PartitionType::EXTENDED, 100, 899).unwrap();
    let logical = add(&mut disk, PartitionType::LOGICAL, 150, 199).unwrap();
    assert_eq!(disk.get_partition_by_sector(160), Some(logical));
    let free = disk.get_partition_by_sector(500).unwrap();
    assert!(
        disk.partition(free)
            .unwrap()
            .kind()
            .contains(PartitionType::FREESPACE)
    );
    assert_eq!(disk.primary_partition_count(), 1);
}

#[test]
fn test_flags_and_names() {
    let mut disk = fresh(LabelKind::Dos, 1000);
    let first = add(&mut disk, PartitionType::NORMAL, 1, 99).unwrap();
    let second = add(&mut disk, PartitionType::NORMAL, 100, 199).unwrap();

    disk.set_partition_flag(first, PartitionFlag::Boot, true).unwrap();
    disk.set_partition_flag(second, PartitionFlag::Boot, true).unwrap();
    assert!(!disk.get_partition_flag(first, PartitionFlag::Boot).unwrap());
    assert!(disk.get_partition_flag(second, PartitionFlag::Boot).unwrap());

    assert!(matches!(
        disk.set_partition_flag(first, PartitionFlag::Prep, true),
        Err(DiskError::UnsupportedOnLabel { .. })
    ));
    assert!(matches!(
        disk.set_partition_name(first, "root"),
        Err(DiskError::UnsupportedOnLabel { .. })
    ));

    let mut gpt = fresh(LabelKind::Gpt, 4096);
    let id = add(&mut gpt, PartitionType::NORMAL, 2048, 3071).unwrap();
    gpt.set_partition_name(id, "rootfs").unwrap();
    assert_eq!(gpt.partition_name(id).unwrap(), Some("rootfs"));
}

#[test]
fn test_gpt_reserves_headers() {
    let mut disk = fresh(LabelKind::Gpt, 4096);
    let err = add(&mut disk, PartitionType::NORMAL, 10, 99).unwrap_err();
    assert!(matches!(err, DiskError::Overlap | DiskError::AlignmentFailed));
    let meta: Vec<(Sector, Sector)> = disk
        .iter()
        .filter(|p| p.kind().contains(PartitionType::METADATA))
        .map(|p| (p.start(), p.end()))
        .collect();
    assert_eq!(meta, vec![(0, 33), (4063, 4095)]);
}

#[test]
fn test_check_reports_oversized_file_system() {
    let dev = Device::memory("mem0", 20000, 512);
    let mut disk = Disk::new_fresh(&dev, Label::new(LabelKind::Flat));
    let id = disk
        .new_partition(PartitionType::NORMAL, Some(FsType::Ext4), 2048, 10239)
        .unwrap();
    disk.add_partition(id, None).unwrap();

    // a 4 KiB-block file system of 4096 blocks: 32768 sectors
    let mut head = vec![0u8; 4096];
    fs::format_ext(&mut head, FsType::Ext4, 4096, 2);
    dev.with_open(|dev| dev.write(&head, 2048, 8)).unwrap();

    let err = disk.check(&FixedPolicy(Choice::Cancel)).unwrap_err();
    assert!(matches!(err, DiskError::FileSystemMismatch { num: 1, .. }));
    disk.check(&FixedPolicy(Choice::Ignore)).unwrap();
}

#[test]
fn test_check_accepts_matching_file_system() {
    let dev = Device::memory("mem0", 20000, 512);
    let mut disk = Disk::new_fresh(&dev, Label::new(LabelKind::Flat));
    let id = disk
        .new_partition(PartitionType::NORMAL, Some(FsType::Ext4), 2048, 10239)
        .unwrap();
    disk.add_partition(id, None).unwrap();

    let mut head = vec![0u8; 4096];
    fs::format_ext(&mut head, FsType::Ext4, 1024, 2);
    dev.with_open(|dev| dev.write(&head, 2048, 8)).unwrap();
    disk.check(&FixedPolicy(Choice::Cancel)).unwrap();
}

#[test]
fn test_random_edits_keep_table_dense() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut disk = fresh(LabelKind::Dos, 5000);
    add(&mut disk, PartitionType::EXTENDED, 2000, 4999).unwrap();

    for _ in 0..200 {
        let logical = rng.random_bool(0.6);
        let (lo, hi) = if logical { (2000, 4999) } else { (1, 1999) };
        let start = rng.random_range(lo..hi);
        let end = (start + rng.random_range(0..300)).min(hi);
        let kind = if logical {
            PartitionType::LOGICAL
        } else {
            PartitionType::NORMAL
        };
        let _ = add(&mut disk, kind, start, end);

        if rng.random_bool(0.2) {
            let victims: Vec<PartId> = disk
                .iter()
                .filter(|p| p.is_active() && !p.is_extended())
                .map(Partition::id)
                .collect();
            if !victims.is_empty() {
                let victim = victims[rng.random_range(0..victims.len())];
                disk.delete_partition(victim).unwrap();
            }
        }

        assert_dense(&disk);
        let active: Vec<&Partition> = disk
            .iter()
            .filter(|p| p.is_active() && !p.is_extended())
            .collect();
        for (i, a) in active.iter().enumerate() {
            assert!(a.num() > 0);
            for b in &active[i + 1..] {
                assert!(!a.geometry().test_overlap(b.geometry()));
                assert_ne!(a.num(), b.num());
            }
        }
        assert!(disk.primary_partition_count() <= disk.max_primary_partition_count());
    }
}
