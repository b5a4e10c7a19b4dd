//! Path resolution for image files.
//!
//! Actions that produce an image do not always agree on its file name, so an
//! image can be referred to by a symbolic name and looked up in the scratch
//! directory with a fixed, reproducible search order.

use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Join a relative path under `base`; absolute paths pass through.
pub fn absolutize(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Resolve a symbolic image name to a file in `scratch`.
///
/// Resolution order:
/// 1. `<scratch>/<name>.img`
/// 2. `<scratch>/<name>`
/// 3. the first entry of `<scratch>` whose file name starts with `<name>`,
///    in byte-wise lexicographic order of file names
pub fn resolve_name(scratch: &Path, name: &str) -> Result<PathBuf> {
    let not_found = || Error::NotFound {
        name: name.to_string(),
        searched: format!("{}/{}{{.img,,*}}", scratch.display(), name),
    };

    if name.is_empty() || name.contains('/') {
        return Err(not_found());
    }

    let candidates = [
        scratch.join(format!("{}.img", name)),
        scratch.join(name),
    ];
    if let Some(found) = candidates.into_iter().find(|c| c.is_file()) {
        return Ok(found);
    }

    glob_first(scratch, name).ok_or_else(not_found)
}

/// First non-directory entry directly under `dir` whose name starts with `prefix`.
fn glob_first(dir: &Path, prefix: &str) -> Option<PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().as_bytes().starts_with(prefix.as_bytes()))
        .find(|entry| !entry.path().is_dir())
        .map(|entry| entry.into_path())
}
