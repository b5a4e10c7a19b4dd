//! Shrink an unmounted filesystem image before export.
//!
//! Trimming only makes the exported artifact smaller; it never decides
//! whether the export succeeds. Every failure here is logged and reported in
//! the [`TrimOutcome`], never returned as an error.

use std::path::Path;

use tracing::{info, warn};

use crate::fstype::FsType;
use crate::inspect;
use crate::process::{Cmd, Runner};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrimOutcome {
    /// The image is loop-mounted; shrinking a live filesystem is unsafe.
    SkippedMounted,
    /// Type could not be probed or has no shrink policy.
    Unsupported(Option<String>),
    /// The shrink sequence ran. `failed_steps` counts commands that failed.
    Trimmed { fstype: FsType, failed_steps: usize },
}

/// Probe the filesystem type of an image with blkid.
pub fn probe_fstype(runner: &dyn Runner, image: &Path) -> Option<String> {
    let result = runner
        .exec(
            Cmd::new("blkid")
                .args(["-s", "TYPE", "-o", "value"])
                .arg_path(image)
                .allow_fail(),
        )
        .ok()?;
    if !result.success() {
        return None;
    }
    let value = result.stdout_trimmed();
    (!value.is_empty()).then(|| value.to_string())
}

/// Minimize the on-disk footprint of `image` according to its filesystem.
pub fn trim(runner: &dyn Runner, image: &Path) -> TrimOutcome {
    if inspect::is_loop_mounted(runner, image) {
        warn!(image = %image.display(), "image is loop-mounted, refusing to trim");
        return TrimOutcome::SkippedMounted;
    }

    let probed = probe_fstype(runner, image);
    let fstype = match probed.as_deref().map(str::parse::<FsType>) {
        Some(Ok(fstype)) => fstype,
        _ => {
            info!(image = %image.display(), fstype = ?probed, "no trim policy for filesystem");
            return TrimOutcome::Unsupported(probed);
        }
    };

    let steps = fstype.capabilities().trim_steps;
    if steps.is_empty() {
        info!(image = %image.display(), %fstype, "no trim policy for filesystem");
        return TrimOutcome::Unsupported(probed);
    }

    let mut failed_steps = 0;
    for step in steps {
        let cmd = step.command(image);
        info!(image = %image.display(), command = %cmd, "trimming");
        if let Err(e) = runner.exec(cmd) {
            warn!(image = %image.display(), step = step.program, error = %e, "trim step failed");
            failed_steps += 1;
        }
    }

    TrimOutcome::Trimmed {
        fstype,
        failed_steps,
    }
}
