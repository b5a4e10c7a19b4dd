//! Filesystem types and their tool capabilities.
//!
//! Everything that differs between filesystems (how to pass a label, which
//! mkfs defaults to apply, how to shrink an image) lives in one
//! [`Capabilities`] record per type. Adding a filesystem means adding a
//! variant and a table entry; callers never branch on the type.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::process::Cmd;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum FsType {
    Ext2,
    Ext3,
    Ext4,
    Xfs,
    Vfat,
    Ntfs,
    Btrfs,
    Exfat,
    F2fs,
    Minix,
}

/// One command in a shrink sequence. The image path is appended last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrimStep {
    pub program: &'static str,
    pub args: &'static [&'static str],
}

impl TrimStep {
    pub fn command(&self, image: &Path) -> Cmd {
        Cmd::new(self.program).args(self.args).arg_path(image)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// mkfs flag that sets the volume label, if the tool has one.
    pub label_flag: Option<&'static str>,
    /// Options passed to mkfs before any user options.
    pub mkfs_defaults: &'static [&'static str],
    /// Ordered shrink sequence for an unmounted image. Empty means no-op.
    pub trim_steps: &'static [TrimStep],
}

const NO_TRIM: &[TrimStep] = &[];

// Check first so resize2fs accepts the image, then shrink to minimum.
const EXT_TRIM: &[TrimStep] = &[
    TrimStep {
        program: "e2fsck",
        args: &["-f", "-y"],
    },
    TrimStep {
        program: "resize2fs",
        args: &["-M"],
    },
];

const EXT: Capabilities = Capabilities {
    label_flag: Some("-L"),
    mkfs_defaults: &["-F", "-q"],
    trim_steps: EXT_TRIM,
};

impl FsType {
    pub const ALL: &'static [FsType] = &[
        FsType::Ext2,
        FsType::Ext3,
        FsType::Ext4,
        FsType::Xfs,
        FsType::Vfat,
        FsType::Ntfs,
        FsType::Btrfs,
        FsType::Exfat,
        FsType::F2fs,
        FsType::Minix,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FsType::Ext2 => "ext2",
            FsType::Ext3 => "ext3",
            FsType::Ext4 => "ext4",
            FsType::Xfs => "xfs",
            FsType::Vfat => "vfat",
            FsType::Ntfs => "ntfs",
            FsType::Btrfs => "btrfs",
            FsType::Exfat => "exfat",
            FsType::F2fs => "f2fs",
            FsType::Minix => "minix",
        }
    }

    /// The formatter binary, e.g. `mkfs.ext4`.
    pub fn mkfs_program(self) -> String {
        format!("mkfs.{}", self.name())
    }

    pub fn is_ext_family(self) -> bool {
        matches!(self, FsType::Ext2 | FsType::Ext3 | FsType::Ext4)
    }

    pub fn capabilities(self) -> Capabilities {
        match self {
            FsType::Ext2 | FsType::Ext3 | FsType::Ext4 => EXT,
            FsType::Xfs => Capabilities {
                label_flag: Some("-L"),
                mkfs_defaults: &["-f"],
                trim_steps: NO_TRIM,
            },
            // mkfs.fat takes the volume name with -n
            FsType::Vfat => Capabilities {
                label_flag: Some("-n"),
                mkfs_defaults: &[],
                trim_steps: NO_TRIM,
            },
            // -F: target is a regular file, -Q: skip zeroing the image
            FsType::Ntfs => Capabilities {
                label_flag: Some("-L"),
                mkfs_defaults: &["-F", "-Q"],
                trim_steps: NO_TRIM,
            },
            FsType::Btrfs => Capabilities {
                label_flag: Some("-L"),
                mkfs_defaults: &["-f"],
                trim_steps: NO_TRIM,
            },
            FsType::Exfat => Capabilities {
                label_flag: Some("-L"),
                mkfs_defaults: &[],
                trim_steps: NO_TRIM,
            },
            FsType::F2fs => Capabilities {
                label_flag: Some("-l"),
                mkfs_defaults: &["-f"],
                trim_steps: NO_TRIM,
            },
            FsType::Minix => Capabilities {
                label_flag: None,
                mkfs_defaults: &[],
                trim_steps: NO_TRIM,
            },
        }
    }
}

impl fmt::Display for FsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FsType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        // blkid and users both say "fat" occasionally
        let wanted = match wanted.as_str() {
            "fat" | "fat32" | "msdos" => "vfat",
            other => other,
        };
        FsType::ALL
            .iter()
            .copied()
            .find(|fs| fs.name() == wanted)
            .ok_or_else(|| {
                let known: Vec<&str> = FsType::ALL.iter().map(|fs| fs.name()).collect();
                format!(
                    "unsupported filesystem '{}' (expected one of: {})",
                    s.trim(),
                    known.join(", ")
                )
            })
    }
}

impl TryFrom<String> for FsType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
