//! Shared build context handed to every action.

use std::fmt;
use std::path::PathBuf;

use crate::config::Config;
use crate::process::{Runner, SystemRunner};

pub struct Context {
    /// Base for relative image and export paths.
    pub artifact_dir: PathBuf,
    /// Searched when an image is referenced by name.
    pub scratch_dir: PathBuf,
    /// Parent of relative mountpoints.
    pub mount_root: PathBuf,
    runner: Box<dyn Runner>,
}

impl Context {
    /// Context that runs commands on the host.
    pub fn new(config: &Config) -> Self {
        Self::with_runner(config, Box::new(SystemRunner))
    }

    pub fn with_runner(config: &Config, runner: Box<dyn Runner>) -> Self {
        Self {
            artifact_dir: config.artifact_dir.clone(),
            scratch_dir: config.scratch_dir.clone(),
            mount_root: config.mount_root.clone(),
            runner,
        }
    }

    pub fn runner(&self) -> &dyn Runner {
        self.runner.as_ref()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("artifact_dir", &self.artifact_dir)
            .field("scratch_dir", &self.scratch_dir)
            .field("mount_root", &self.mount_root)
            .finish_non_exhaustive()
    }
}
