use anyhow::{bail, Result};
use std::path::Path;

use super::commit;
use crate::disk::device::RetryPolicy;
use crate::disk::label::{Label, LabelKind};
use crate::disk::table::Disk;
use crate::disk::utils::{confirm_or_yes, open_device};

/// Replaces whatever table is on the image with an empty `kind` table.
pub fn mklabel(path: &Path, kind: LabelKind, retry: RetryPolicy, yes: bool) -> Result<()> {
    if kind == LabelKind::Flat {
        bail!("{kind} partition tables only exist in memory and can't be written");
    }
    let dev = open_device(path, false, retry)?;
    if let Some(existing) = Disk::probe(&dev)? {
        confirm_or_yes(
            yes,
            &format!(
                "{} already has a {} partition table. Partitions on it will be lost. Continue?",
                path.display(),
                existing
            ),
        )?;
    }

    let mut disk = Disk::new_fresh(&dev, Label::new(kind));
    commit(&mut disk)?;
    println!("{}: new {} partition table", path.display(), kind);
    Ok(())
}
