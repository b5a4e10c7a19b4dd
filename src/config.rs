//! Configuration management for loopimg.
//!
//! Reads configuration from a .env file and environment variables.
//! Environment variables take precedence over .env file.

use std::env;
use std::path::{Path, PathBuf};

/// Default scratch directory searched for images referenced by name.
pub const DEFAULT_SCRATCH_DIR: &str = "/tmp";

/// Default root under which relative mountpoints are placed.
pub const DEFAULT_MOUNT_ROOT: &str = "/mnt";

/// loopimg configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Base directory for relative image and export paths (default: current dir)
    pub artifact_dir: PathBuf,
    /// Directory searched when an image is referenced by name (default: /tmp)
    pub scratch_dir: PathBuf,
    /// Parent directory for relative mountpoints (default: /mnt)
    pub mount_root: PathBuf,
}

impl Config {
    /// Load configuration from .env file and environment.
    ///
    /// `.env` is looked up in the current directory and its parents; values
    /// already present in the environment win.
    pub fn load() -> Self {
        dotenvy::dotenv().ok();
        let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        Self::from_lookup(&cwd, |key| env::var(key).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    ///
    /// Relative values are resolved against `cwd`.
    pub fn from_lookup(cwd: &Path, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let dir = |key: &str, default: &Path| {
            lookup(key)
                .filter(|s| !s.trim().is_empty())
                .map(|s| {
                    let path = PathBuf::from(s.trim());
                    if path.is_absolute() {
                        path
                    } else {
                        cwd.join(path)
                    }
                })
                .unwrap_or_else(|| default.to_path_buf())
        };

        Self {
            artifact_dir: dir("LOOPIMG_ARTIFACT_DIR", cwd),
            scratch_dir: dir("LOOPIMG_SCRATCH_DIR", Path::new(DEFAULT_SCRATCH_DIR)),
            mount_root: dir("LOOPIMG_MOUNT_ROOT", Path::new(DEFAULT_MOUNT_ROOT)),
        }
    }

    /// Print configuration for debugging.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  LOOPIMG_ARTIFACT_DIR: {}", self.artifact_dir.display());
        println!("  LOOPIMG_SCRATCH_DIR:  {}", self.scratch_dir.display());
        println!("  LOOPIMG_MOUNT_ROOT:   {}", self.mount_root.display());
        if self.scratch_dir.is_dir() {
            println!("  Scratch dir: FOUND");
        } else {
            println!("  Scratch dir: NOT FOUND (name lookups will fail)");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(Path::new("/work"), |_| None);
        assert_eq!(config.artifact_dir, PathBuf::from("/work"));
        assert_eq!(config.scratch_dir, PathBuf::from("/tmp"));
        assert_eq!(config.mount_root, PathBuf::from("/mnt"));
    }

    #[test]
    fn test_relative_values_resolve_against_cwd() {
        let vars: HashMap<&str, &str> = [
            ("LOOPIMG_ARTIFACT_DIR", "out"),
            ("LOOPIMG_SCRATCH_DIR", "/var/tmp/images"),
            ("LOOPIMG_MOUNT_ROOT", "  "),
        ]
        .into_iter()
        .collect();
        let config =
            Config::from_lookup(Path::new("/work"), |k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.artifact_dir, PathBuf::from("/work/out"));
        assert_eq!(config.scratch_dir, PathBuf::from("/var/tmp/images"));
        // Blank values fall back to the default
        assert_eq!(config.mount_root, PathBuf::from("/mnt"));
    }

    #[test]
    #[serial]
    fn test_load_reads_process_environment() {
        env::set_var("LOOPIMG_SCRATCH_DIR", "/srv/scratch");
        let config = Config::load();
        env::remove_var("LOOPIMG_SCRATCH_DIR");

        assert_eq!(config.scratch_dir, PathBuf::from("/srv/scratch"));
    }
}
