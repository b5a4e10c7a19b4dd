//! One-shot image actions.
//!
//! These run a single action through the same verify/run/cleanup lifecycle
//! as a pipeline, so a `new-filesystem` mount is released on exit.

use anyhow::Result;

use loopimg::actions::{self, ExportFilesystem, NewFilesystem};
use loopimg::context::Context;

pub fn cmd_new_filesystem(ctx: &Context, action: NewFilesystem) -> Result<()> {
    actions::run_action(ctx, Box::new(action))?;
    Ok(())
}

pub fn cmd_export_filesystem(ctx: &Context, action: ExportFilesystem) -> Result<()> {
    actions::run_action(ctx, Box::new(action))?;
    Ok(())
}
