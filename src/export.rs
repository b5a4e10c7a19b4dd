//! Export a filesystem image as a final artifact.

use std::fs;
use std::io::{self, BufReader};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::inspect::{self, ForceUnmountReport};
use crate::process::Cmd;
use crate::resolve;
use crate::trim::{self, TrimOutcome};

/// dd transfer block size.
pub const EXPORT_BLOCK_SIZE: u64 = 4 * 1024 * 1024;

/// Where the image to export comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocator {
    /// Explicit path; relative paths resolve under the artifact directory.
    Path(PathBuf),
    /// Symbolic name looked up in the scratch directory.
    Name(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportJob {
    pub source: SourceLocator,
    pub destination: PathBuf,
    pub trim: bool,
    /// Write a `<destination>.sha256` sidecar after copying.
    pub checksum: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Set when a stale mount had to be released before trimming.
    pub unmounted: Option<ForceUnmountReport>,
    /// Set when trimming was requested.
    pub trim: Option<TrimOutcome>,
    pub bytes: u64,
    pub sha256: Option<String>,
}

/// Resolve a source locator to an existing file.
pub fn resolve_source(ctx: &Context, source: &SourceLocator) -> Result<PathBuf> {
    match source {
        SourceLocator::Path(path) => {
            let path = resolve::absolutize(&ctx.artifact_dir, path);
            if path.exists() {
                Ok(path)
            } else {
                Err(Error::NotFound {
                    name: path.display().to_string(),
                    searched: "explicit source path".to_string(),
                })
            }
        }
        SourceLocator::Name(name) => resolve::resolve_name(&ctx.scratch_dir, name),
    }
}

/// True if both paths name the same file. A missing destination never does.
fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::metadata(a), fs::metadata(b)) {
        (Ok(a), Ok(b)) => a.dev() == b.dev() && a.ino() == b.ino(),
        _ => false,
    }
}

/// Resolve, optionally unmount and trim, then block-copy the image.
///
/// With `trim` disabled the source's mount state is neither queried nor
/// touched. On a copy failure the destination may hold a partial write and
/// must not be used. A destination that is the source itself is rejected
/// before anything runs.
pub fn export(ctx: &Context, job: &ExportJob) -> Result<ExportReport> {
    let runner = ctx.runner();
    let source = resolve_source(ctx, &job.source)?;
    let destination = resolve::absolutize(&ctx.artifact_dir, &job.destination);
    if same_file(&source, &destination) {
        return Err(Error::validation(
            "export-filesystem",
            format!(
                "destination {} is the source image itself",
                destination.display()
            ),
        ));
    }

    let copy_err = |source_err: anyhow::Error| Error::Copy {
        from: source.clone(),
        to: destination.clone(),
        source: source_err,
    };

    let mut unmounted = None;
    let mut trimmed = None;
    if job.trim {
        if inspect::is_loop_mounted(runner, &source) {
            info!(image = %source.display(), "image is mounted, unmounting before export");
            unmounted = Some(inspect::force_unmount(runner, &source));
        }
        trimmed = Some(trim::trim(runner, &source));
    }

    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))
            .map_err(copy_err)?;
    }

    info!(from = %source.display(), to = %destination.display(), "exporting filesystem image");
    runner
        .exec(
            Cmd::new("dd")
                .arg(format!("if={}", source.display()))
                .arg(format!("of={}", destination.display()))
                .arg(format!("bs={}", EXPORT_BLOCK_SIZE))
                .error_msg("dd failed"),
        )
        .map_err(copy_err)?;

    let bytes = fs::metadata(&destination)
        .with_context(|| format!("exported image {} missing", destination.display()))
        .map_err(copy_err)?
        .len();

    let sha256 = if job.checksum {
        Some(write_checksum(&destination).map_err(copy_err)?)
    } else {
        None
    };

    info!(
        from = %source.display(),
        to = %destination.display(),
        bytes,
        "exported filesystem image"
    );

    Ok(ExportReport {
        source,
        destination,
        unmounted,
        trim: trimmed,
        bytes,
        sha256,
    })
}

/// Hex SHA-256 of a file's contents.
pub fn sha256_file(path: &Path) -> anyhow::Result<String> {
    let file = fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut BufReader::new(file), &mut hasher)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Path of the checksum sidecar for an exported image.
pub fn checksum_path(image: &Path) -> PathBuf {
    let mut name = image.as_os_str().to_owned();
    name.push(".sha256");
    PathBuf::from(name)
}

/// Write `<image>.sha256` in sha256sum format and return the digest.
fn write_checksum(image: &Path) -> anyhow::Result<String> {
    let digest = sha256_file(image)?;
    let file_name = image
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let sidecar = checksum_path(image);
    fs::write(&sidecar, format!("{}  {}\n", digest, file_name))
        .with_context(|| format!("failed to write {}", sidecar.display()))?;
    Ok(digest)
}
