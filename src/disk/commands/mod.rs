use anyhow::{anyhow, Context, Result};
use std::path::Path;
use std::sync::Arc;

use super::alignment::Alignment;
use super::cli::{DiskAction, DiskCli};
use super::constraint::Constraint;
use super::device::{Device, RetryPolicy};
use super::geometry::Geometry;
use super::partition::PartId;
use super::table::Disk;
use super::utils::{handler_for, open_device, parse_size};
use super::Sector;
use crate::config::DiskConfig;

mod check;
pub mod mkimg;
pub mod mklabel;
pub mod mkpart;
mod print;
pub mod resize;
mod rm;
pub mod scan;
pub mod set;

const DEFAULT_ALIGN: &str = "1M";

pub fn run(cli: DiskCli, config: Option<&DiskConfig>) -> Result<()> {
    let retry = config.map(DiskConfig::retry_policy).unwrap_or_default();
    let policy = cli
        .on_error
        .or_else(|| config.and_then(|c| c.on_error))
        .unwrap_or_default();
    let handler = handler_for(policy);

    match cli.action {
        DiskAction::Mkimg { size, overwrite } => {
            let size_bytes = parse_size(&size)?;
            mkimg::mkimg(&cli.disk, size_bytes, overwrite)
        }
        DiskAction::Mklabel { label } => {
            let label = label
                .or_else(|| config.and_then(|c| c.label))
                .ok_or_else(|| anyhow!("no label type given and none configured"))?;
            mklabel::mklabel(&cli.disk, label, retry, cli.yes)
        }
        DiskAction::Mkpart {
            kind,
            start,
            end,
            fs,
            name,
            align,
        } => {
            let align = align
                .or_else(|| config.and_then(|c| c.align.clone()))
                .unwrap_or_else(|| DEFAULT_ALIGN.to_string());
            let request = mkpart::MkpartRequest {
                kind,
                fs_type: fs,
                start,
                end,
                name,
                align_bytes: parse_size(&align)?,
            };
            mkpart::mkpart(&cli.disk, &request, retry)?;
            Ok(())
        }
        DiskAction::Rm { num } => rm::rm(&cli.disk, num, retry, cli.yes),
        DiskAction::Resize { num, start, end } => {
            resize::resize(&cli.disk, num, &start, &end, retry)
        }
        DiskAction::Maximize { num } => resize::maximize(&cli.disk, num, retry),
        DiskAction::Minimize => resize::minimize(&cli.disk, retry),
        DiskAction::Set { num, flag, state } => set::set_flag(&cli.disk, num, flag, state, retry),
        DiskAction::Name { num, name } => set::set_name(&cli.disk, num, &name, retry),
        DiskAction::Print { json, free } => print::print(&cli.disk, json, free, retry),
        DiskAction::Check => check::check(&cli.disk, handler.as_ref(), retry),
        DiskAction::Scan { num, buffer } => scan::scan(&cli.disk, num, buffer, retry),
    }
}

/// Opens the image and reads the table on it.
pub(crate) fn open_disk(path: &Path, read_only: bool, retry: RetryPolicy) -> Result<Disk> {
    let dev = open_device(path, read_only, retry)?;
    Disk::open(&dev).with_context(|| format!("failed to read partition table of {}", path.display()))
}

pub(crate) fn find_partition(disk: &Disk, num: i32) -> Result<PartId> {
    disk.get_partition(num)
        .ok_or_else(|| anyhow!("no partition numbered {num}"))
}

pub(crate) fn commit(disk: &mut Disk) -> Result<()> {
    disk.commit().with_context(|| {
        format!(
            "failed to write partition table to {}",
            disk.device().path().display()
        )
    })
}

/// Alignment in sectors for a grain given in bytes. Grains below a sector
/// disable alignment.
pub(crate) fn grain_sectors(dev: &Arc<Device>, align_bytes: u64) -> Option<Sector> {
    let sectors = (align_bytes / dev.sector_size()) as Sector;
    (sectors > 1).then_some(sectors)
}

/// A constraint keeping the start within `fuzz` sectors of `start` and the
/// end within `fuzz` sectors of `end`.
pub(crate) fn near(dev: &Arc<Device>, start: Sector, end: Sector, fuzz: Sector) -> Result<Constraint> {
    let last = dev.length() - 1;
    let around = |sector: Sector| {
        Geometry::from_bounds(dev, (sector - fuzz).clamp(0, last), (sector + fuzz).clamp(0, last))
    };
    Constraint::new(
        Alignment::ANY,
        Alignment::ANY,
        around(start)?,
        around(end)?,
        1,
        dev.length(),
    )
    .ok_or_else(|| anyhow!("no region satisfies {start}s-{end}s"))
}
