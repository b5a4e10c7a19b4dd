//! Image provisioning: sparse allocation and formatting.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::anyhow;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::fstype::FsType;
use crate::process::{Cmd, Runner};

/// Image size in `truncate(1)` syntax.
///
/// Accepts a byte count with an optional unit: `K M G T P E` and `KiB`..`EiB`
/// are powers of 1024, `KB`..`EB` powers of 1000. Relative forms such as
/// `+1G` are rejected since a new image has no size to be relative to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSize {
    expr: String,
    bytes: u64,
}

impl ImageSize {
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// The expression as given, passed verbatim to `truncate -s`.
    pub fn as_str(&self) -> &str {
        &self.expr
    }
}

impl FromStr for ImageSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let expr = s.trim();
        let digits_end = expr
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(expr.len());
        let (digits, unit) = expr.split_at(digits_end);
        if digits.is_empty() {
            return Err(format!("invalid size '{}': expected a byte count like 256M", s));
        }
        let count: u64 = digits
            .parse()
            .map_err(|_| format!("invalid size '{}': number too large", s))?;

        let multiplier: u64 = match unit.to_ascii_uppercase().as_str() {
            "" => 1,
            "K" | "KIB" => 1 << 10,
            "M" | "MIB" => 1 << 20,
            "G" | "GIB" => 1 << 30,
            "T" | "TIB" => 1 << 40,
            "P" | "PIB" => 1 << 50,
            "E" | "EIB" => 1 << 60,
            "KB" => 1_000,
            "MB" => 1_000_000,
            "GB" => 1_000_000_000,
            "TB" => 1_000_000_000_000,
            "PB" => 1_000_000_000_000_000,
            "EB" => 1_000_000_000_000_000_000,
            _ => return Err(format!("invalid size '{}': unknown unit '{}'", s, unit)),
        };

        let bytes = count
            .checked_mul(multiplier)
            .ok_or_else(|| format!("invalid size '{}': too large", s))?;
        if bytes == 0 {
            return Err(format!("invalid size '{}': must be greater than zero", s));
        }

        Ok(Self {
            expr: expr.to_string(),
            bytes,
        })
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expr)
    }
}

/// Desired state of a new image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSpec {
    pub path: PathBuf,
    pub size: ImageSize,
    pub filesystem: FsType,
    pub label: Option<String>,
    /// Raw mkfs options, split on whitespace.
    pub options: Option<String>,
    pub mountpoint: PathBuf,
}

impl ImageSpec {
    /// The full mkfs invocation for this spec.
    ///
    /// Policy options first, then the label, then user options so they can
    /// override defaults, then the image path.
    pub fn mkfs_command(&self) -> Cmd {
        let caps = self.filesystem.capabilities();
        let mut cmd = Cmd::new(self.filesystem.mkfs_program()).args(caps.mkfs_defaults);

        if let Some(label) = self.label.as_deref().filter(|l| !l.is_empty()) {
            match caps.label_flag {
                Some(flag) => cmd = cmd.args([flag, label]),
                None => warn!(
                    filesystem = %self.filesystem,
                    label,
                    "filesystem has no label option, label ignored"
                ),
            }
        }

        if let Some(options) = &self.options {
            cmd = cmd.args(options.split_whitespace());
        }

        cmd.arg_path(&self.path).allow_fail()
    }
}

/// Create the sparse image file and format it.
///
/// On a formatting failure the file stays on disk unformatted and the error
/// is returned; the image must not be treated as ready.
pub fn provision(runner: &dyn Runner, spec: &ImageSpec) -> Result<()> {
    info!(
        path = %spec.path.display(),
        size = %spec.size,
        filesystem = %spec.filesystem,
        "provisioning image"
    );

    allocate(runner, &spec.path, &spec.size)?;
    format(runner, spec)?;

    info!(path = %spec.path.display(), "image formatted");
    Ok(())
}

fn allocate(runner: &dyn Runner, path: &Path, size: &ImageSize) -> Result<()> {
    let provision_err = |source: anyhow::Error| Error::Provision {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| provision_err(e.into()))?;
    }
    fs::File::create(path).map_err(|e| provision_err(e.into()))?;

    runner
        .exec(
            Cmd::new("truncate")
                .args(["-s", size.as_str()])
                .arg_path(path)
                .error_msg(format!("failed to set size of {}", path.display())),
        )
        .map_err(provision_err)?;

    Ok(())
}

fn format(runner: &dyn Runner, spec: &ImageSpec) -> Result<()> {
    let format_err = |code: i32, detail: String| Error::Format {
        path: spec.path.clone(),
        fstype: spec.filesystem,
        code,
        detail,
    };

    let result = runner
        .exec(spec.mkfs_command())
        .map_err(|e| format_err(-1, e.to_string()))?;

    if !result.success() {
        let detail = match result.stderr_trimmed() {
            "" => result.stdout_trimmed().to_string(),
            stderr => stderr.to_string(),
        };
        return Err(format_err(result.code(), detail));
    }

    Ok(())
}

/// Sanity check used by callers that did not parse the size themselves.
pub fn parse_size(path: &Path, size: &str) -> Result<ImageSize> {
    size.parse().map_err(|e: String| Error::Provision {
        path: path.to_path_buf(),
        source: anyhow!(e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(fs: FsType, label: Option<&str>, options: Option<&str>) -> ImageSpec {
        ImageSpec {
            path: PathBuf::from("/tmp/disk.img"),
            size: "256M".parse().unwrap(),
            filesystem: fs,
            label: label.map(String::from),
            options: options.map(String::from),
            mountpoint: PathBuf::from("/mnt/work"),
        }
    }

    #[test]
    fn test_size_units() {
        assert_eq!("256M".parse::<ImageSize>().unwrap().bytes(), 256 << 20);
        assert_eq!("2G".parse::<ImageSize>().unwrap().bytes(), 2 << 30);
        assert_eq!("4096".parse::<ImageSize>().unwrap().bytes(), 4096);
        assert_eq!("1MB".parse::<ImageSize>().unwrap().bytes(), 1_000_000);
        assert_eq!("1MiB".parse::<ImageSize>().unwrap().bytes(), 1 << 20);
        assert_eq!("8g".parse::<ImageSize>().unwrap().bytes(), 8 << 30);
    }

    #[test]
    fn test_size_keeps_expression() {
        let size: ImageSize = " 256M ".parse().unwrap();
        assert_eq!(size.as_str(), "256M");
        assert_eq!(size.to_string(), "256M");
    }

    #[test]
    fn test_size_rejects_invalid() {
        for bad in ["", "M", "+1G", "-5M", "0", "0G", "12X", "1.5G", "99999999999E"] {
            assert!(bad.parse::<ImageSize>().is_err(), "accepted '{}'", bad);
        }
    }

    #[test]
    fn test_mkfs_label_and_options_order() {
        let cmd = spec(FsType::Ext4, Some("root"), Some("-O ^has_journal  -m 0")).mkfs_command();
        assert_eq!(
            cmd.argv(),
            vec![
                "mkfs.ext4", "-F", "-q", "-L", "root", "-O", "^has_journal", "-m", "0",
                "/tmp/disk.img"
            ]
        );
    }

    #[test]
    fn test_mkfs_vfat_label_flag() {
        let cmd = spec(FsType::Vfat, Some("EFI"), None).mkfs_command();
        assert_eq!(cmd.argv(), vec!["mkfs.vfat", "-n", "EFI", "/tmp/disk.img"]);
    }

    #[test]
    fn test_mkfs_label_omitted_without_support() {
        let cmd = spec(FsType::Minix, Some("data"), None).mkfs_command();
        assert_eq!(cmd.argv(), vec!["mkfs.minix", "/tmp/disk.img"]);
    }

    #[test]
    fn test_mkfs_empty_label_ignored() {
        let cmd = spec(FsType::Xfs, Some(""), None).mkfs_command();
        assert_eq!(cmd.argv(), vec!["mkfs.xfs", "-f", "/tmp/disk.img"]);
    }

    #[test]
    fn test_parse_size_error_names_path() {
        let err = parse_size(Path::new("/tmp/disk.img"), "lots").unwrap_err();
        assert!(matches!(err, Error::Provision { .. }));
        assert!(err.to_string().contains("/tmp/disk.img"));
    }
}
