use clap::{Parser, Subcommand};
use std::path::PathBuf;

use super::label::LabelKind;
use super::partition::{FsType, PartitionFlag, PartitionType};
use crate::config::ErrorPolicy;

#[derive(Parser, Debug)]
pub struct DiskCli {
    /// Target disk image path
    #[arg(long, value_name = "PATH")]
    pub disk: PathBuf,

    /// Skip confirmation
    #[arg(short = 'y', long, global = true)]
    pub yes: bool,

    /// How to answer warnings and errors (default from config, else prompt)
    #[arg(long, value_enum, global = true)]
    pub on_error: Option<ErrorPolicy>,

    #[command(subcommand)]
    pub action: DiskAction,
}

#[derive(Subcommand, Debug)]
pub enum DiskAction {
    /// Create a blank disk image
    Mkimg {
        /// Image size (bytes or with K/M/G suffix)
        #[arg(long, value_name = "SIZE")]
        size: String,

        /// Allow overwrite existing file
        #[arg(long)]
        overwrite: bool,
    },

    /// Write a new, empty partition table
    Mklabel {
        /// Label type (dos/gpt/flat), default from config
        #[arg(value_name = "LABEL", value_parser = parse_label)]
        label: Option<LabelKind>,
    },

    /// Create a partition
    Mkpart {
        /// Partition type (primary/logical/extended)
        #[arg(value_name = "TYPE", value_parser = parse_part_type)]
        kind: PartitionType,

        /// Start position (bytes with K/M/G suffix, `Ns` sectors or `N%`)
        #[arg(value_name = "START", allow_hyphen_values = true)]
        start: String,

        /// End position, exclusive unless given in sectors
        #[arg(value_name = "END", allow_hyphen_values = true)]
        end: String,

        /// File system the partition will hold
        #[arg(long, value_parser = parse_fs_type)]
        fs: Option<FsType>,

        /// Partition name, where the label supports one
        #[arg(long, value_name = "NAME")]
        name: Option<String>,

        /// Alignment grain (default from config, else 1M)
        #[arg(long, value_name = "SIZE")]
        align: Option<String>,
    },

    /// Delete a partition
    Rm {
        #[arg(value_name = "NUM")]
        num: i32,
    },

    /// Move or resize a partition
    Resize {
        #[arg(value_name = "NUM")]
        num: i32,

        #[arg(value_name = "START", allow_hyphen_values = true)]
        start: String,

        #[arg(value_name = "END", allow_hyphen_values = true)]
        end: String,
    },

    /// Grow a partition into the free space around it
    Maximize {
        #[arg(value_name = "NUM")]
        num: i32,
    },

    /// Shrink the extended partition to fit its logical partitions
    Minimize,

    /// Change a partition flag
    Set {
        #[arg(value_name = "NUM")]
        num: i32,

        #[arg(value_name = "FLAG", value_parser = parse_flag)]
        flag: PartitionFlag,

        #[arg(value_name = "STATE", value_parser = parse_state, action = clap::ArgAction::Set)]
        state: bool,
    },

    /// Name a partition
    Name {
        #[arg(value_name = "NUM")]
        num: i32,

        #[arg(value_name = "NAME")]
        name: String,
    },

    /// Show disk and partition info
    Print {
        /// JSON output
        #[arg(long)]
        json: bool,

        /// Include free space and metadata regions
        #[arg(long)]
        free: bool,
    },

    /// Check partitions against the file systems they hold
    Check,

    /// Scan a partition, or the whole disk, for unreadable sectors
    Scan {
        /// Partition number, whole disk if omitted
        #[arg(value_name = "NUM")]
        num: Option<i32>,

        /// Sectors read per request
        #[arg(long, default_value = "2048", value_name = "SECTORS")]
        buffer: i64,
    },
}

fn parse_label(s: &str) -> Result<LabelKind, String> {
    s.parse().map_err(|e| format!("{e}"))
}

fn parse_part_type(s: &str) -> Result<PartitionType, String> {
    s.parse().map_err(|e| format!("{e}"))
}

fn parse_fs_type(s: &str) -> Result<FsType, String> {
    FsType::from_name(s).ok_or_else(|| format!("unknown file system: {s}"))
}

fn parse_flag(s: &str) -> Result<PartitionFlag, String> {
    PartitionFlag::from_name(s).ok_or_else(|| format!("unknown flag: {s}"))
}

fn parse_state(s: &str) -> Result<bool, String> {
    match s.to_ascii_lowercase().as_str() {
        "on" | "true" | "1" => Ok(true),
        "off" | "false" | "0" => Ok(false),
        _ => Err(format!("expected on or off, got {s}")),
    }
}
