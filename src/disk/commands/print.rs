use anyhow::Result;
use std::path::Path;

use super::open_disk;
use crate::disk::device::RetryPolicy;
use crate::disk::types::DiskInfo;

pub fn print(path: &Path, json: bool, free: bool, retry: RetryPolicy) -> Result<()> {
    let disk = open_disk(path, true, retry)?;
    let info = DiskInfo::new(&disk, free);

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!(
        "Disk: {} ({} M, {} sectors of {} bytes)",
        info.disk,
        format_mib(info.size_bytes),
        info.sectors,
        info.sector_size
    );
    println!("Partition table: {}", info.label);
    if info.partitions.is_empty() {
        println!("No partitions found.");
        return Ok(());
    }

    println!(
        "{:>3} {:>10} {:>10} {:>8} {:<9} {:<10} {:<16} Flags",
        "Num", "Start", "End", "Size", "Type", "Filesystem", "Name"
    );
    for p in &info.partitions {
        let num = if p.number > 0 {
            p.number.to_string()
        } else {
            String::new()
        };
        println!(
            "{:>3} {:>10} {:>10} {:>7}M {:<9} {:<10} {:<16} {}",
            num,
            format!("{}s", p.start),
            format!("{}s", p.end),
            format_mib(p.size_bytes),
            p.kind,
            p.filesystem.unwrap_or(""),
            p.name.as_deref().unwrap_or(""),
            p.flags.join(", ")
        );
    }
    Ok(())
}

fn format_mib(bytes: u64) -> String {
    const MIB: u64 = 1024 * 1024;
    if bytes.is_multiple_of(MIB) {
        format!("{}", bytes / MIB)
    } else {
        format!("{:.1}", bytes as f64 / MIB as f64)
    }
}
