//! Mount state inspection.
//!
//! The host's loop and mount tables are the only source of truth for whether
//! an image is in use. A previous run may have crashed with the image still
//! attached, so nothing here is cached: every call asks the OS again.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::process::{Cmd, Runner};

/// One loop device bound to an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopAssociation {
    /// Loop device node, e.g. `/dev/loop3`.
    pub device: String,
    /// Backing file as reported by losetup.
    pub backing_file: PathBuf,
    /// Mount target, `None` when the device is attached but not mounted.
    pub mountpoint: Option<PathBuf>,
}

/// Snapshot of an image's loop/mount state at the time of the query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountState {
    pub image: PathBuf,
    pub associations: Vec<LoopAssociation>,
}

impl MountState {
    pub fn is_loop_mounted(&self) -> bool {
        !self.associations.is_empty()
    }

    pub fn mountpoints(&self) -> impl Iterator<Item = &Path> {
        self.associations
            .iter()
            .filter_map(|a| a.mountpoint.as_deref())
    }

    /// The association mounted at `target`, if any.
    pub fn mounted_at(&self, target: &Path) -> Option<&LoopAssociation> {
        self.associations
            .iter()
            .find(|a| a.mountpoint.as_deref() == Some(target))
    }
}

/// Outcome of [`force_unmount`]. Every step is best-effort.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForceUnmountReport {
    pub unmounted: usize,
    pub detached: usize,
    pub failures: usize,
}

/// Parse `losetup -j <image>` output into `(device, backing file)` pairs.
///
/// Lines look like `/dev/loop0: [2049]:1311 (/tmp/disk.img)`, optionally
/// followed by `, offset N`. A backing file removed from disk is reported
/// with a ` (deleted)` suffix inside the parentheses.
pub fn parse_losetup_associations(output: &str) -> Vec<(String, PathBuf)> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let (device, rest) = line.split_once(':')?;
            let open = rest.find('(')?;
            let close = rest.rfind(')')?;
            if close <= open {
                return None;
            }
            let backing = &rest[open + 1..close];
            let backing = backing.strip_suffix(" (deleted)").unwrap_or(backing);
            Some((device.trim().to_string(), PathBuf::from(backing)))
        })
        .collect()
}

/// Canonical form used to compare against losetup's backing file.
fn canonical(image: &Path) -> PathBuf {
    fs::canonicalize(image).unwrap_or_else(|_| image.to_path_buf())
}

/// Loop devices whose backing file is exactly `image`.
fn loop_devices(runner: &dyn Runner, image: &Path) -> Vec<(String, PathBuf)> {
    let result = match runner.exec(Cmd::new("losetup").arg("-j").arg_path(image).allow_fail()) {
        Ok(result) if result.success() => result,
        Ok(result) => {
            debug!(image = %image.display(), code = result.code(), "losetup -j reported no associations");
            return Vec::new();
        }
        Err(e) => {
            warn!(image = %image.display(), error = %e, "could not query loop devices");
            return Vec::new();
        }
    };

    let wanted = canonical(image);
    parse_losetup_associations(&result.stdout)
        .into_iter()
        .filter(|(_, backing)| backing == &wanted || backing == image)
        .collect()
}

/// Mount target of a loop device, `None` if it is not mounted.
fn mount_target(runner: &dyn Runner, device: &str) -> Option<PathBuf> {
    let result = runner
        .exec(Cmd::new("findmnt").args(["-n", "-o", "TARGET", device]).allow_fail())
        .ok()?;
    if !result.success() {
        return None;
    }
    result
        .stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(PathBuf::from)
}

/// What the mount table reports for a target directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetState {
    /// Something is mounted there; `source` is the device, e.g. `/dev/loop0`.
    Mounted { source: String },
    NotMounted,
    /// findmnt could not be run, so the table could not be read.
    Unknown,
}

/// Look up `target` as a mountpoint in the mount table.
///
/// Unlike [`inspect`] this does not go through the image's backing file, so
/// it still works after the image was deleted or when losetup is unusable.
pub fn target_state(runner: &dyn Runner, target: &Path) -> TargetState {
    let cmd = Cmd::new("findmnt")
        .args(["-n", "-o", "SOURCE", "--mountpoint"])
        .arg_path(target)
        .allow_fail();
    let result = match runner.exec(cmd) {
        Ok(result) => result,
        Err(e) => {
            warn!(target = %target.display(), error = %e, "could not query mount table");
            return TargetState::Unknown;
        }
    };
    // A silent non-zero exit means "no such mountpoint"; anything on stderr
    // means findmnt itself failed.
    if !result.success() {
        if result.stderr_trimmed().is_empty() {
            return TargetState::NotMounted;
        }
        warn!(
            target = %target.display(),
            stderr = result.stderr_trimmed(),
            "could not query mount table"
        );
        return TargetState::Unknown;
    }
    match result.stdout.lines().map(str::trim).find(|l| !l.is_empty()) {
        Some(source) => TargetState::Mounted {
            source: source.to_string(),
        },
        None => TargetState::NotMounted,
    }
}

/// True if `device` still has a backing file attached.
pub fn device_attached(runner: &dyn Runner, device: &str) -> bool {
    runner
        .exec(Cmd::new("losetup").arg(device).allow_fail())
        .map(|result| result.success())
        .unwrap_or(false)
}

/// True iff the OS reports a loop association for exactly this image.
pub fn is_loop_mounted(runner: &dyn Runner, image: &Path) -> bool {
    !loop_devices(runner, image).is_empty()
}

/// Every loop device bound to `image` and where it is mounted, if anywhere.
pub fn resolve_loop_mount(runner: &dyn Runner, image: &Path) -> Vec<LoopAssociation> {
    loop_devices(runner, image)
        .into_iter()
        .map(|(device, backing_file)| {
            let mountpoint = mount_target(runner, &device);
            LoopAssociation {
                device,
                backing_file,
                mountpoint,
            }
        })
        .collect()
}

/// Fresh snapshot of the image's loop/mount state.
pub fn inspect(runner: &dyn Runner, image: &Path) -> MountState {
    MountState {
        image: image.to_path_buf(),
        associations: resolve_loop_mount(runner, image),
    }
}

/// Unmount and detach every loop association of `image`.
///
/// A failed unmount does not prevent the detach attempt and vice versa;
/// the aim is to leave fewer dangling resources, not to guarantee none.
pub fn force_unmount(runner: &dyn Runner, image: &Path) -> ForceUnmountReport {
    let mut report = ForceUnmountReport::default();

    for assoc in resolve_loop_mount(runner, image) {
        if let Some(target) = &assoc.mountpoint {
            let umount = Cmd::new("umount")
                .arg_path(target)
                .error_msg(format!("umount {} failed", target.display()));
            match runner.exec(umount) {
                Ok(_) => {
                    info!(image = %image.display(), target = %target.display(), "unmounted");
                    report.unmounted += 1;
                }
                Err(e) => {
                    warn!(target = %target.display(), error = %e, "failed to unmount");
                    report.failures += 1;
                }
            }
        }

        // A loop mount usually auto-clears on umount; only detach what is left.
        if !loop_devices(runner, image)
            .iter()
            .any(|(device, _)| device == &assoc.device)
        {
            continue;
        }
        let detach = Cmd::new("losetup")
            .args(["-d", &assoc.device])
            .error_msg(format!("losetup -d {} failed", assoc.device));
        match runner.exec(detach) {
            Ok(_) => {
                info!(device = %assoc.device, "detached loop device");
                report.detached += 1;
            }
            Err(e) => {
                warn!(device = %assoc.device, error = %e, "failed to detach loop device");
                report.failures += 1;
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_association() {
        let out = "/dev/loop0: [2049]:1311 (/tmp/disk.img)\n";
        assert_eq!(
            parse_losetup_associations(out),
            vec![("/dev/loop0".to_string(), PathBuf::from("/tmp/disk.img"))]
        );
    }

    #[test]
    fn test_parse_multiple_with_offset() {
        let out = "/dev/loop0: [2049]:1311 (/tmp/disk.img)\n\
                   /dev/loop7: [2049]:1311 (/tmp/disk.img), offset 1048576\n";
        let parsed = parse_losetup_associations(out);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].0, "/dev/loop7");
        assert_eq!(parsed[1].1, PathBuf::from("/tmp/disk.img"));
    }

    #[test]
    fn test_parse_deleted_backing_file() {
        let out = "/dev/loop2: []: (/tmp/disk.img (deleted))";
        assert_eq!(
            parse_losetup_associations(out),
            vec![("/dev/loop2".to_string(), PathBuf::from("/tmp/disk.img"))]
        );
    }

    #[test]
    fn test_parse_empty_and_garbage() {
        assert!(parse_losetup_associations("").is_empty());
        assert!(parse_losetup_associations("\n  \nnot losetup output\n").is_empty());
    }

    #[test]
    fn test_mount_state_queries() {
        let state = MountState {
            image: PathBuf::from("/tmp/disk.img"),
            associations: vec![
                LoopAssociation {
                    device: "/dev/loop0".into(),
                    backing_file: "/tmp/disk.img".into(),
                    mountpoint: None,
                },
                LoopAssociation {
                    device: "/dev/loop1".into(),
                    backing_file: "/tmp/disk.img".into(),
                    mountpoint: Some("/mnt/work".into()),
                },
            ],
        };
        assert!(state.is_loop_mounted());
        assert_eq!(state.mountpoints().count(), 1);
        assert_eq!(
            state.mounted_at(Path::new("/mnt/work")).map(|a| a.device.as_str()),
            Some("/dev/loop1")
        );
        assert!(state.mounted_at(Path::new("/mnt/other")).is_none());
    }
}
