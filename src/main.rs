//! loopimg - loopback filesystem image lifecycle manager.
//!
//! Creates, mounts, trims and exports filesystem images for OS builds:
//! - new-filesystem: sparse image + mkfs + loop mount (released on exit)
//! - export-filesystem: unmount, shrink, and dd the image to its destination
//! - pipeline: run a JSON list of actions with guaranteed cleanup

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use loopimg::actions::{ExportFilesystem, NewFilesystem};
use loopimg::config::Config;
use loopimg::context::Context;
use loopimg::logging;

#[derive(Parser)]
#[command(name = "loopimg")]
#[command(about = "Loopback filesystem image lifecycle manager")]
#[command(
    after_help = "QUICK START:\n  loopimg preflight                  Check host tools\n  loopimg pipeline build.json        Run a pipeline\n  loopimg status /tmp/disk.img       Show loop devices for an image\n  loopimg detach /tmp/disk.img       Release a stale mount"
)]
struct Cli {
    /// Base directory for relative image and export paths
    #[arg(long, global = true)]
    artifact_dir: Option<PathBuf>,

    /// Directory searched when an image is referenced by name
    #[arg(long, global = true)]
    scratch_dir: Option<PathBuf>,

    /// Parent directory for relative mountpoints
    #[arg(long, global = true)]
    mount_root: Option<PathBuf>,

    /// Debug logging (overridden by LOOPIMG_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create, format and loop-mount a new image (unmounted again on exit)
    NewFilesystem {
        /// Image file to create
        #[arg(long)]
        path: String,
        /// Image size, e.g. 256M or 2G
        #[arg(long)]
        size: String,
        /// Filesystem type (ext2, ext3, ext4, xfs, vfat, ntfs, btrfs, exfat, f2fs, minix)
        #[arg(long)]
        filesystem: String,
        /// Where to mount the image
        #[arg(long)]
        mountpoint: String,
        /// Volume label (ignored for filesystems without label support)
        #[arg(long)]
        label: Option<String>,
        /// Extra mkfs options
        #[arg(long, allow_hyphen_values = true)]
        options: Option<String>,
    },

    /// Export an image, shrinking it first
    ExportFilesystem {
        /// Explicit image path
        #[arg(long, conflicts_with = "name")]
        source: Option<String>,
        /// Image name to look up in the scratch directory
        #[arg(long)]
        name: Option<String>,
        /// Destination of the exported image
        #[arg(long)]
        destination: String,
        /// Copy as-is without unmounting or shrinking
        #[arg(long)]
        no_trim: bool,
        /// Write <destination>.sha256
        #[arg(long)]
        checksum: bool,
    },

    /// Run a JSON pipeline of actions
    Pipeline {
        /// Pipeline document
        file: PathBuf,
    },

    /// Show loop devices and mountpoints for an image
    Status {
        image: PathBuf,
    },

    /// Unmount and detach every loop device backed by an image
    Detach {
        image: PathBuf,
    },

    /// Run preflight checks (host tools, privileges)
    Preflight {
        /// Fail if any checks fail (exit code 1)
        #[arg(long)]
        strict: bool,
    },

    /// Show current configuration
    ShowConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let mut config = Config::load();
    if let Some(dir) = cli.artifact_dir {
        config.artifact_dir = dir;
    }
    if let Some(dir) = cli.scratch_dir {
        config.scratch_dir = dir;
    }
    if let Some(dir) = cli.mount_root {
        config.mount_root = dir;
    }
    let mut ctx = Context::new(&config);

    match cli.command {
        Commands::NewFilesystem {
            path,
            size,
            filesystem,
            mountpoint,
            label,
            options,
        } => {
            let mut action = NewFilesystem::new(path, size, filesystem, mountpoint);
            action.label = label;
            action.options = options;
            commands::cmd_new_filesystem(&ctx, action)?;
        }

        Commands::ExportFilesystem {
            source,
            name,
            destination,
            no_trim,
            checksum,
        } => {
            let mut action = ExportFilesystem::by_name(name.unwrap_or_default(), destination);
            action.source = source;
            action.trim = !no_trim;
            action.checksum = checksum;
            commands::cmd_export_filesystem(&ctx, action)?;
        }

        Commands::Pipeline { file } => {
            commands::cmd_pipeline(&mut ctx, &file)?;
        }

        Commands::Status { image } => {
            commands::cmd_status(&ctx, &image)?;
        }

        Commands::Detach { image } => {
            commands::cmd_detach(&ctx, &image)?;
        }

        Commands::Preflight { strict } => {
            commands::cmd_preflight(&config, strict)?;
        }

        Commands::ShowConfig => {
            config.print();
        }
    }

    Ok(())
}
