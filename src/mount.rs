//! Loop mount management.
//!
//! A [`MountRecord`] is the only in-process memory that "this run must
//! unmount that target". It is never trusted on its own: both mounting and
//! teardown re-read the loop/mount tables first, so a stale mount from a
//! crashed run is cleaned up rather than stacked on, and a target someone
//! else already unmounted is simply skipped.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::anyhow;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::inspect::{self, TargetState};
use crate::process::{Cmd, Runner};

/// An active loop mount owned by the caller that created it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRecord {
    pub image: PathBuf,
    /// Loop device backing the mount, when it could be determined.
    pub loop_device: Option<String>,
    pub mountpoint: PathBuf,
}

/// Loop-mount `image` at `mountpoint`, creating the directory if needed.
///
/// If the image is already mounted at exactly this mountpoint the existing
/// mount is adopted. Any other association of the image is left over from an
/// earlier run and is torn down before mounting.
pub fn mount_new(runner: &dyn Runner, image: &Path, mountpoint: &Path) -> Result<MountRecord> {
    let mount_err = |source: anyhow::Error| Error::Mount {
        image: image.to_path_buf(),
        mountpoint: mountpoint.to_path_buf(),
        source,
    };

    fs::create_dir_all(mountpoint).map_err(|e| {
        mount_err(anyhow!(e).context(format!(
            "failed to create mountpoint {}",
            mountpoint.display()
        )))
    })?;
    let target = fs::canonicalize(mountpoint).unwrap_or_else(|_| mountpoint.to_path_buf());

    let state = inspect::inspect(runner, image);
    if let Some(existing) = state.mounted_at(&target) {
        info!(
            image = %image.display(),
            target = %target.display(),
            device = %existing.device,
            "image already mounted at target, adopting mount"
        );
        return Ok(MountRecord {
            image: image.to_path_buf(),
            loop_device: Some(existing.device.clone()),
            mountpoint: target,
        });
    }
    if state.is_loop_mounted() {
        warn!(
            image = %image.display(),
            associations = state.associations.len(),
            "image has stale loop associations, releasing them before mounting"
        );
        inspect::force_unmount(runner, image);
    }

    runner
        .exec(
            Cmd::new("mount")
                .args(["-o", "loop"])
                .arg_path(image)
                .arg_path(&target)
                .error_msg(format!("mount {} failed", image.display())),
        )
        .map_err(mount_err)?;

    let loop_device = inspect::inspect(runner, image)
        .mounted_at(&target)
        .map(|a| a.device.clone());
    if loop_device.is_none() {
        debug!(image = %image.display(), "mounted, but no loop device reported for image");
    }

    info!(image = %image.display(), target = %target.display(), "mounted image");
    Ok(MountRecord {
        image: image.to_path_buf(),
        loop_device,
        mountpoint: target,
    })
}

/// Unmount a recorded mount. Idempotent and best-effort.
///
/// The decision is made from the mount table entry of the recorded target,
/// not from the image's loop associations: the image may have been deleted
/// or be invisible to losetup while its mount is still live. A target that
/// is no longer mounted, or now holds a mount of something else, is left
/// alone. Failures are logged and never returned: this runs from cleanup
/// paths that must not abort.
pub fn teardown(runner: &dyn Runner, record: Option<MountRecord>) {
    let Some(record) = record else {
        debug!("no mount record, nothing to tear down");
        return;
    };
    let target = &record.mountpoint;

    let device = match inspect::target_state(runner, target) {
        TargetState::NotMounted => {
            debug!(target = %target.display(), "target already unmounted");
            return;
        }
        TargetState::Mounted { source } => {
            if !mounted_from_image(runner, &record, &source) {
                debug!(
                    target = %target.display(),
                    source = %source,
                    "target holds another mount, leaving it alone"
                );
                return;
            }
            Some(source)
        }
        TargetState::Unknown => record.loop_device.clone(),
    };

    let umount = Cmd::new("umount").arg_path(target).allow_fail();
    match runner.exec(umount) {
        Ok(result) if result.success() => info!(target = %target.display(), "unmounted"),
        Ok(result) if result.stderr.contains("not mounted") => {
            debug!(target = %target.display(), "target was not mounted");
            return;
        }
        Ok(result) => {
            warn!(
                target = %target.display(),
                code = result.code(),
                stderr = result.stderr_trimmed(),
                "failed to unmount"
            );
            return;
        }
        Err(e) => {
            warn!(target = %target.display(), error = %e, "failed to unmount");
            return;
        }
    }

    // Loop mounts normally auto-clear; only detach what is left.
    let Some(device) = device.or(record.loop_device) else {
        return;
    };
    if inspect::device_attached(runner, &device) {
        let detach = Cmd::new("losetup")
            .args(["-d", &device])
            .error_msg(format!("losetup -d {} failed", device));
        if let Err(e) = runner.exec(detach) {
            warn!(device = %device, error = %e, "failed to detach loop device");
        }
    }
}

/// Whether the mount `source` found at the record's target is the image's.
fn mounted_from_image(runner: &dyn Runner, record: &MountRecord, source: &str) -> bool {
    if record.loop_device.as_deref() == Some(source) {
        return true;
    }
    let associations = inspect::resolve_loop_mount(runner, &record.image);
    if associations.iter().any(|a| a.device == source) {
        return true;
    }
    // No recorded device and nothing visible for the image: trust the record.
    record.loop_device.is_none() && associations.is_empty()
}

/// Scoped ownership of a mount: dropping the guard tears it down.
pub struct MountGuard<'r> {
    runner: &'r dyn Runner,
    record: MountRecord,
    armed: bool,
}

impl<'r> MountGuard<'r> {
    pub fn mount(runner: &'r dyn Runner, image: &Path, mountpoint: &Path) -> Result<Self> {
        let record = mount_new(runner, image, mountpoint)?;
        Ok(Self {
            runner,
            record,
            armed: true,
        })
    }

    pub fn record(&self) -> &MountRecord {
        &self.record
    }

    /// Hand the mount over to another owner without unmounting it.
    pub fn into_record(mut self) -> MountRecord {
        self.armed = false;
        self.record.clone()
    }
}

impl Drop for MountGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            teardown(self.runner, Some(self.record.clone()));
        }
    }
}
