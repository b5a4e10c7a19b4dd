//! Build actions and the sequential runner that drives their lifecycle.
//!
//! Every action goes through `verify` (no side effects), `run`, and
//! `cleanup`. The runner verifies the whole list before anything touches the
//! host, and calls `cleanup` on every action whose `run` was attempted, in
//! reverse order, whether the pipeline succeeded or not. That is what
//! guarantees a mount made by `new-filesystem` is released.

mod export_filesystem;
mod new_filesystem;

pub use export_filesystem::ExportFilesystem;
pub use new_filesystem::NewFilesystem;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::Deserialize;
use tracing::{error, warn};

use crate::context::Context;
use crate::error::{Error, Result};
use crate::timing::Timer;

pub trait Action {
    /// Action kind as written in a pipeline, e.g. `new-filesystem`.
    fn kind(&self) -> &'static str;

    /// Human readable summary for progress output.
    fn describe(&self) -> String;

    /// Pre-flight validation. Must not touch the host.
    fn verify(&self, ctx: &Context) -> Result<()>;

    fn run(&mut self, ctx: &Context) -> Result<()>;

    /// Always invoked after `run` was attempted. Non-fatal teardown problems
    /// are logged, not returned.
    fn cleanup(&mut self, _ctx: &Context) -> Result<()> {
        Ok(())
    }
}

/// One entry of a pipeline document.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum ActionConfig {
    NewFilesystem(NewFilesystem),
    ExportFilesystem(ExportFilesystem),
}

impl ActionConfig {
    pub fn into_action(self) -> Box<dyn Action> {
        match self {
            ActionConfig::NewFilesystem(a) => Box::new(a),
            ActionConfig::ExportFilesystem(a) => Box::new(a),
        }
    }
}

/// A JSON pipeline document.
///
/// ```json
/// {
///   "artifactdir": "out",
///   "actions": [
///     { "action": "new-filesystem", "path": "/tmp/disk.img", "size": "256M",
///       "filesystem": "ext4", "mountpoint": "work" },
///     { "action": "export-filesystem", "name": "disk", "destination": "final.img" }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Pipeline {
    /// Overrides the configured artifact directory. Relative to the file.
    #[serde(default)]
    pub artifactdir: Option<PathBuf>,
    pub actions: Vec<ActionConfig>,
}

impl Pipeline {
    pub fn load(path: &Path) -> Result<Self> {
        let pipeline_err = |source: anyhow::Error| Error::Pipeline {
            path: path.to_path_buf(),
            source,
        };
        let text = fs::read_to_string(path)
            .context("failed to read file")
            .map_err(pipeline_err)?;
        let pipeline: Pipeline = serde_json::from_str(&text)
            .context("failed to parse JSON")
            .map_err(pipeline_err)?;
        if pipeline.actions.is_empty() {
            return Err(pipeline_err(anyhow::anyhow!("no actions defined")));
        }
        Ok(pipeline)
    }

    pub fn into_actions(self) -> Vec<Box<dyn Action>> {
        self.actions
            .into_iter()
            .map(ActionConfig::into_action)
            .collect()
    }
}

/// Verify, run, and clean up `actions` in order.
///
/// Returns the first verification or run error. Cleanup errors are logged.
pub fn run_actions(ctx: &Context, actions: &mut [Box<dyn Action>]) -> Result<()> {
    for action in actions.iter() {
        action.verify(ctx)?;
    }

    let mut attempted = 0;
    let mut outcome = Ok(());
    for action in actions.iter_mut() {
        attempted += 1;
        let timer = Timer::start(&action.describe());
        match action.run(ctx) {
            Ok(()) => timer.finish(),
            Err(e) => {
                error!(action = action.kind(), kind = e.kind(), error = %e, "action failed");
                outcome = Err(e);
                break;
            }
        }
    }

    for action in actions[..attempted].iter_mut().rev() {
        if let Err(e) = action.cleanup(ctx) {
            warn!(action = action.kind(), error = %e, "cleanup failed");
        }
    }

    outcome
}

/// Run a single action with the same lifecycle guarantees as a pipeline.
pub fn run_action(ctx: &Context, action: Box<dyn Action>) -> Result<()> {
    run_actions(ctx, &mut [action])
}
