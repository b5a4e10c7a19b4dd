//! Status and detach commands - inspect and release an image's loop devices.

use anyhow::Result;
use std::path::Path;

use loopimg::context::Context;
use loopimg::inspect;
use loopimg::resolve;

pub fn cmd_status(ctx: &Context, image: &Path) -> Result<()> {
    let image = resolve::absolutize(&ctx.artifact_dir, image);
    let state = inspect::inspect(ctx.runner(), &image);

    println!("Image: {}", image.display());
    if !state.is_loop_mounted() {
        println!("  not attached to any loop device");
        return Ok(());
    }
    for assoc in &state.associations {
        match &assoc.mountpoint {
            Some(target) => println!("  {} mounted at {}", assoc.device, target.display()),
            None => println!("  {} attached, not mounted", assoc.device),
        }
    }
    Ok(())
}

pub fn cmd_detach(ctx: &Context, image: &Path) -> Result<()> {
    let image = resolve::absolutize(&ctx.artifact_dir, image);
    let report = inspect::force_unmount(ctx.runner(), &image);

    println!(
        "{}: {} unmounted, {} detached, {} failed",
        image.display(),
        report.unmounted,
        report.detached,
        report.failures
    );
    if report.failures > 0 {
        anyhow::bail!("some loop resources of {} could not be released", image.display());
    }
    Ok(())
}
