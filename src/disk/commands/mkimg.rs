use anyhow::{bail, Context, Result};
use std::path::Path;

const SECTOR_SIZE: u64 = 512;

/// Creates a zero-filled image of `size_bytes`, rounded down to whole
/// sectors.
pub fn mkimg(path: &Path, size_bytes: u64, overwrite: bool) -> Result<()> {
    if path.exists() && !overwrite {
        bail!("image already exists, use --overwrite to replace");
    }
    let size_bytes = size_bytes - size_bytes % SECTOR_SIZE;
    if size_bytes == 0 {
        bail!("image must hold at least one {SECTOR_SIZE}-byte sector");
    }
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).with_context(|| {
            format!("failed to create parent directory: {}", parent.display())
        })?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(true)
        .read(true)
        .write(true)
        .open(path)
        .with_context(|| format!("failed to create image {}", path.display()))?;
    file.set_len(size_bytes)
        .with_context(|| "failed to set image size".to_string())?;
    info!(
        "created {} ({} sectors)",
        path.display(),
        size_bytes / SECTOR_SIZE
    );
    Ok(())
}
