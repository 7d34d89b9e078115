use std::fs;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use clap::Parser;
use tempfile::TempDir;
use partkit::disk::{self, commands, Device, Disk, DiskCli, LabelKind, PartitionFlag};

const MIB: u64 = 1024 * 1024;

fn image(temp: &TempDir, size_mib: u64) -> PathBuf {
    let path = temp.path().join("disk.img");
    commands::mkimg::mkimg(&path, size_mib * MIB, false).expect("mkimg");
    path
}

fn partkit(path: &Path, policy: &str, args: &[&str]) -> anyhow::Result<()> {
    let disk_path = path.to_str().expect("utf-8 path");
    let mut argv = vec!["disk", "--disk", disk_path, "--yes", "--on-error", policy];
    argv.extend_from_slice(args);
    disk::run(DiskCli::try_parse_from(argv)?, None)
}

fn reopen(path: &Path) -> Disk {
    let dev = Device::open_image(path, true).expect("open image");
    Disk::open(&dev).expect("read table")
}

fn bounds(disk: &Disk, num: i32) -> (i64, i64) {
    let id = disk.get_partition(num).expect("partition exists");
    let part = disk.partition(id).expect("partition linked");
    (part.start(), part.end())
}

/// Writes a swap signature claiming `pages` pages at `sector`.
fn write_swap(path: &Path, sector: u64, pages: u32) {
    let mut file = fs::OpenOptions::new().write(true).open(path).expect("open");
    let base = sector * 512;
    file.seek(SeekFrom::Start(base + 1028)).expect("seek");
    file.write_all(&(pages - 1).to_le_bytes()).expect("write");
    file.seek(SeekFrom::Start(base + 4086)).expect("seek");
    file.write_all(b"SWAPSPACE2").expect("write");
}

#[test]
fn mkimg_rounds_to_sectors() {
    let temp = TempDir::new().expect("temp dir");
    let path = temp.path().join("odd.img");
    commands::mkimg::mkimg(&path, 4 * MIB + 100, false).expect("mkimg");
    assert_eq!(fs::metadata(&path).expect("metadata").len(), 4 * MIB);
    assert!(commands::mkimg::mkimg(&path, MIB, false).is_err());
    commands::mkimg::mkimg(&path, MIB, true).expect("overwrite");
    assert_eq!(fs::metadata(&path).expect("metadata").len(), MIB);
}

#[test]
fn gpt_workflow() {
    let temp = TempDir::new().expect("temp dir");
    let path = image(&temp, 64);

    partkit(&path, "cancel", &["mklabel", "gpt"]).expect("mklabel");
    partkit(&path, "cancel", &["mkpart", "primary", "1M", "33M", "--name", "boot"]).expect("mkpart 1");
    partkit(&path, "cancel", &["mkpart", "primary", "33M", "100%"]).expect("mkpart 2");
    partkit(&path, "cancel", &["set", "1", "boot", "on"]).expect("set boot");
    partkit(&path, "cancel", &["name", "2", "rootfs"]).expect("name");

    let disk = reopen(&path);
    assert_eq!(disk.label_kind(), LabelKind::Gpt);
    assert_eq!(bounds(&disk, 1), (2048, 67583));
    let (start, end) = bounds(&disk, 2);
    assert_eq!(start, 67584);
    // the backup header takes the last 33 sectors
    assert!(end <= 131071 - 33);
    assert_eq!((end + 1) % 2048, 0);

    let boot = disk.partition(disk.get_partition(1).expect("p1")).expect("p1");
    assert_eq!(boot.name(), Some("boot"));
    assert!(boot.has_flag(PartitionFlag::Boot));
    let root = disk.partition(disk.get_partition(2).expect("p2")).expect("p2");
    assert_eq!(root.name(), Some("rootfs"));

    partkit(&path, "cancel", &["print", "--json", "--free"]).expect("print");
    partkit(&path, "cancel", &["check"]).expect("check");
    commands::scan::scan(&path, Some(1), 2048, Default::default()).expect("scan");
}

#[test]
fn set_flag_on_then_off() {
    let temp = TempDir::new().expect("temp dir");
    let path = image(&temp, 16);

    partkit(&path, "cancel", &["mklabel", "msdos"]).expect("mklabel");
    partkit(&path, "cancel", &["mkpart", "primary", "1M", "100%"]).expect("mkpart");

    partkit(&path, "cancel", &["set", "1", "boot", "on"]).expect("set on");
    let disk = reopen(&path);
    let part = disk.partition(disk.get_partition(1).expect("p1")).expect("p1");
    assert!(part.has_flag(PartitionFlag::Boot));

    partkit(&path, "cancel", &["set", "1", "boot", "off"]).expect("set off");
    let disk = reopen(&path);
    let part = disk.partition(disk.get_partition(1).expect("p1")).expect("p1");
    assert!(!part.has_flag(PartitionFlag::Boot));

    assert!(partkit(&path, "cancel", &["set", "1", "boot", "maybe"]).is_err());
}

#[test]
fn dos_extended_workflow() {
    let temp = TempDir::new().expect("temp dir");
    let path = image(&temp, 64);

    partkit(&path, "cancel", &["mklabel", "msdos"]).expect("mklabel");
    partkit(&path, "cancel", &["mkpart", "primary", "1M", "10M", "--fs", "linux-swap"]).expect("p1");
    partkit(&path, "cancel", &["mkpart", "extended", "10M", "100%"]).expect("ext");
    partkit(&path, "cancel", &["mkpart", "logical", "11M", "20M"]).expect("l1");
    partkit(&path, "cancel", &["mkpart", "logical", "20M", "30M"]).expect("l2");

    // overlaps partition 1
    assert!(partkit(&path, "cancel", &["mkpart", "primary", "5M", "8M"]).is_err());
    // names are a gpt feature
    assert!(partkit(&path, "cancel", &["name", "1", "swap"]).is_err());

    let disk = reopen(&path);
    assert_eq!(disk.label_kind(), LabelKind::Dos);
    assert_eq!(bounds(&disk, 1), (2048, 20479));
    assert_eq!(bounds(&disk, 2), (20480, 131071));
    assert_eq!(bounds(&disk, 5), (22528, 40959));
    // the second EBR needs the sector before it
    assert_eq!(bounds(&disk, 6), (43008, 61439));

    partkit(&path, "cancel", &["rm", "5"]).expect("rm");
    let disk = reopen(&path);
    assert_eq!(bounds(&disk, 5), (43008, 61439));
    assert!(disk.get_partition(6).is_none());

    partkit(&path, "cancel", &["minimize"]).expect("minimize");
    let disk = reopen(&path);
    let (ext_start, ext_end) = bounds(&disk, 2);
    assert!((20480..43008).contains(&ext_start));
    assert_eq!(ext_end, 61439);
    assert_eq!(bounds(&disk, 5), (43008, 61439));

    partkit(&path, "cancel", &["rm", "2"]).expect("rm extended");
    partkit(&path, "cancel", &["maximize", "1"]).expect("maximize");
    let disk = reopen(&path);
    assert_eq!(bounds(&disk, 1), (1, 131071));
}

#[test]
fn dos_check_reports_file_system_size() {
    let temp = TempDir::new().expect("temp dir");
    let path = image(&temp, 64);

    partkit(&path, "cancel", &["mklabel", "dos"]).expect("mklabel");
    partkit(&path, "cancel", &["mkpart", "primary", "1M", "10M"]).expect("mkpart");

    // partition 1 is 18432 sectors, 2304 pages
    write_swap(&path, 2048, 2304);
    let disk = reopen(&path);
    let part = disk.partition(disk.get_partition(1).expect("p1")).expect("p1");
    assert_eq!(part.fs_type(), Some(disk::FsType::LinuxSwap));
    partkit(&path, "cancel", &["check"]).expect("matching size");

    write_swap(&path, 2048, 1000);
    assert!(partkit(&path, "cancel", &["check"]).is_err());
    partkit(&path, "ignore", &["check"]).expect("ignored mismatch");
}

#[test]
fn mklabel_replaces_other_label() {
    let temp = TempDir::new().expect("temp dir");
    let path = image(&temp, 16);

    partkit(&path, "cancel", &["mklabel", "gpt"]).expect("gpt");
    partkit(&path, "cancel", &["mkpart", "primary", "1M", "8M"]).expect("mkpart");
    partkit(&path, "cancel", &["mklabel", "dos"]).expect("dos");

    let dev = Device::open_image(&path, true).expect("open");
    assert_eq!(Disk::probe(&dev).expect("probe"), Some(LabelKind::Dos));
    let disk = Disk::open(&dev).expect("read");
    assert_eq!(disk.iter().filter(|p| p.is_active()).count(), 0);

    // flat tables only exist in memory
    assert!(partkit(&path, "cancel", &["mklabel", "flat"]).is_err());
    assert_eq!(Disk::probe(&dev).expect("probe"), Some(LabelKind::Dos));
}

#[test]
fn unlabelled_image_is_rejected() {
    let temp = TempDir::new().expect("temp dir");
    let path = image(&temp, 4);
    assert!(partkit(&path, "cancel", &["print"]).is_err());
    assert!(partkit(&path, "cancel", &["mkpart", "primary", "1M", "2M"]).is_err());
}
