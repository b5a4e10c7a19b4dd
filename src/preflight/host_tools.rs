//! Host tool availability checks.

use crate::fstype::FsType;

use super::CheckResult;

/// Tools every lifecycle operation depends on, with the package that ships them.
const REQUIRED_TOOLS: &[(&str, &str, &str)] = &[
    ("truncate", "coreutils", "sparse image allocation"),
    ("dd", "coreutils", "image export"),
    ("mount", "util-linux", "loop mounting"),
    ("umount", "util-linux", "unmounting"),
    ("losetup", "util-linux", "loop device inspection"),
    ("findmnt", "util-linux", "mountpoint lookup"),
    ("blkid", "util-linux", "filesystem type detection"),
    ("e2fsck", "e2fsprogs", "ext* trimming"),
    ("resize2fs", "e2fsprogs", "ext* trimming"),
];

fn mkfs_package(fs: FsType) -> &'static str {
    match fs {
        FsType::Ext2 | FsType::Ext3 | FsType::Ext4 => "e2fsprogs",
        FsType::Xfs => "xfsprogs",
        FsType::Vfat => "dosfstools",
        FsType::Ntfs => "ntfs-3g",
        FsType::Btrfs => "btrfs-progs",
        FsType::Exfat => "exfatprogs",
        FsType::F2fs => "f2fs-tools",
        FsType::Minix => "util-linux",
    }
}

/// Check host tools are installed.
///
/// Missing formatters are warnings: only images of that type are affected.
pub fn check_host_tools() -> Vec<CheckResult> {
    let mut results = Vec::new();

    for (tool, package, purpose) in REQUIRED_TOOLS {
        results.push(check_tool(tool, package, purpose, true));
    }

    for fs in FsType::ALL {
        let tool = fs.mkfs_program();
        let purpose = format!("formatting {} images", fs);
        results.push(check_tool(&tool, mkfs_package(*fs), &purpose, false));
    }

    results
}

fn check_tool(tool: &str, package: &str, purpose: &str, required: bool) -> CheckResult {
    match which::which(tool) {
        Ok(path) => CheckResult::pass(tool, &path.display().to_string()),
        Err(_) => {
            let msg = format!("Not found. Install '{}' (needed for {}).", package, purpose);
            if required {
                CheckResult::fail(tool, &msg)
            } else {
                CheckResult::warn(tool, &msg)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preflight::CheckStatus;

    #[test]
    fn test_missing_required_tool_fails() {
        let result = check_tool("nonexistent_tool_12345", "pkg", "testing", true);
        assert_eq!(result.status, CheckStatus::Fail);
        assert!(result.details.unwrap().contains("'pkg'"));
    }

    #[test]
    fn test_missing_optional_tool_warns() {
        let result = check_tool("nonexistent_tool_12345", "pkg", "testing", false);
        assert_eq!(result.status, CheckStatus::Warn);
    }

    #[test]
    fn test_present_tool_passes() {
        assert_eq!(check_tool("sh", "dash", "testing", true).status, CheckStatus::Pass);
    }

    #[test]
    fn test_every_filesystem_checked() {
        let names: Vec<String> = check_host_tools().into_iter().map(|c| c.name).collect();
        for fs in FsType::ALL {
            assert!(names.contains(&fs.mkfs_program()));
        }
    }
}
