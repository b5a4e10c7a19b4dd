//! `new-filesystem`: create, format and mount a filesystem image.

use std::path::Path;

use serde::Deserialize;
use tracing::info;

use super::Action;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::fstype::FsType;
use crate::mount::{self, MountRecord};
use crate::provision::{self, ImageSize, ImageSpec};
use crate::resolve;

const KIND: &str = "new-filesystem";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewFilesystem {
    #[serde(default)]
    pub description: Option<String>,
    /// Image file to create. Relative to the artifact directory.
    #[serde(default)]
    pub path: String,
    /// Size expression, e.g. `2G`.
    #[serde(default)]
    pub size: String,
    /// Filesystem type (ext4, xfs, vfat, ntfs, btrfs, ...).
    #[serde(default)]
    pub filesystem: String,
    #[serde(default)]
    pub label: Option<String>,
    /// Where to mount for subsequent actions. Relative to the mount root.
    #[serde(default)]
    pub mountpoint: String,
    /// Extra mkfs options, whitespace separated.
    #[serde(default)]
    pub options: Option<String>,

    #[serde(skip)]
    mount: Option<MountRecord>,
}

impl NewFilesystem {
    pub fn new(
        path: impl Into<String>,
        size: impl Into<String>,
        filesystem: impl Into<String>,
        mountpoint: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            size: size.into(),
            filesystem: filesystem.into(),
            mountpoint: mountpoint.into(),
            ..Default::default()
        }
    }

    /// The mount this action is responsible for releasing, if any.
    pub fn mount_record(&self) -> Option<&MountRecord> {
        self.mount.as_ref()
    }

    fn filesystem_type(&self) -> Result<FsType> {
        self.filesystem
            .parse()
            .map_err(|e: String| Error::validation(KIND, e))
    }

    fn image_size(&self) -> Result<ImageSize> {
        self.size
            .parse()
            .map_err(|e: String| Error::validation(KIND, e))
    }

    /// Resolve the configured paths into an immutable spec.
    pub fn image_spec(&self, ctx: &Context) -> Result<ImageSpec> {
        let path = resolve::absolutize(&ctx.artifact_dir, Path::new(&self.path));
        Ok(ImageSpec {
            size: provision::parse_size(&path, &self.size)?,
            filesystem: self.filesystem_type()?,
            label: self.label.clone().filter(|l| !l.is_empty()),
            options: self.options.clone().filter(|o| !o.trim().is_empty()),
            mountpoint: resolve::absolutize(&ctx.mount_root, Path::new(&self.mountpoint)),
            path,
        })
    }
}

impl Action for NewFilesystem {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn describe(&self) -> String {
        match &self.description {
            Some(d) if !d.is_empty() => d.clone(),
            _ => format!(
                "{} (image: {}, fs: {}, mount: {})",
                KIND, self.path, self.filesystem, self.mountpoint
            ),
        }
    }

    fn verify(&self, _ctx: &Context) -> Result<()> {
        let required = [&self.path, &self.size, &self.filesystem, &self.mountpoint];
        if required.iter().any(|v| v.trim().is_empty()) {
            return Err(Error::validation(
                KIND,
                "path, size, filesystem, and mountpoint are required",
            ));
        }
        self.filesystem_type()?;
        self.image_size()?;
        Ok(())
    }

    fn run(&mut self, ctx: &Context) -> Result<()> {
        let spec = self.image_spec(ctx)?;
        provision::provision(ctx.runner(), &spec)?;

        let record = mount::mount_new(ctx.runner(), &spec.path, &spec.mountpoint)?;
        info!(
            image = %record.image.display(),
            target = %record.mountpoint.display(),
            "filesystem ready"
        );
        self.mount = Some(record);
        Ok(())
    }

    fn cleanup(&mut self, ctx: &Context) -> Result<()> {
        mount::teardown(ctx.runner(), self.mount.take());
        Ok(())
    }
}
