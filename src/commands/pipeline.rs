//! Pipeline command - runs a JSON document of actions.

use anyhow::Result;
use std::path::Path;

use loopimg::actions::{self, Pipeline};
use loopimg::context::Context;
use loopimg::resolve;

pub fn cmd_pipeline(ctx: &mut Context, file: &Path) -> Result<()> {
    let pipeline = Pipeline::load(file)?;

    if let Some(dir) = &pipeline.artifactdir {
        let base = file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        ctx.artifact_dir = resolve::absolutize(base, dir);
    }

    println!(
        "=== Running pipeline {} ({} actions) ===\n",
        file.display(),
        pipeline.actions.len()
    );
    let mut actions = pipeline.into_actions();
    actions::run_actions(ctx, &mut actions)?;
    println!("\n=== Pipeline complete ===");
    Ok(())
}
