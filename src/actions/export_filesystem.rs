//! `export-filesystem`: copy a (trimmed) image to its final location.

use std::path::PathBuf;

use serde::Deserialize;
use tracing::debug;

use super::Action;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::export::{self, ExportJob, ExportReport, SourceLocator};

const KIND: &str = "export-filesystem";

fn default_trim() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportFilesystem {
    #[serde(default)]
    pub description: Option<String>,
    /// Explicit image path. Takes precedence over `name`.
    #[serde(default)]
    pub source: Option<String>,
    /// Image name looked up in the scratch directory.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub destination: String,
    /// Unmount and shrink the image before copying.
    #[serde(default = "default_trim")]
    pub trim: bool,
    /// Write a `.sha256` file next to the exported image.
    #[serde(default)]
    pub checksum: bool,

    #[serde(skip)]
    report: Option<ExportReport>,
}

impl Default for ExportFilesystem {
    fn default() -> Self {
        Self {
            description: None,
            source: None,
            name: None,
            destination: String::new(),
            trim: default_trim(),
            checksum: false,
            report: None,
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl ExportFilesystem {
    /// Export of the image called `name` in the scratch directory.
    pub fn by_name(name: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            destination: destination.into(),
            ..Default::default()
        }
    }

    /// Export of an explicit image path.
    pub fn by_source(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            destination: destination.into(),
            ..Default::default()
        }
    }

    /// Result of the last successful run.
    pub fn report(&self) -> Option<&ExportReport> {
        self.report.as_ref()
    }

    pub fn job(&self) -> Result<ExportJob> {
        let source = match (non_empty(&self.source), non_empty(&self.name)) {
            (Some(path), name) => {
                if name.is_some() {
                    debug!(source = path, "both source and name given, using source");
                }
                SourceLocator::Path(PathBuf::from(path))
            }
            (None, Some(name)) => SourceLocator::Name(name.to_string()),
            (None, None) => {
                return Err(Error::validation(
                    KIND,
                    "either source or name must be specified",
                ))
            }
        };
        Ok(ExportJob {
            source,
            destination: PathBuf::from(self.destination.trim()),
            trim: self.trim,
            checksum: self.checksum,
        })
    }
}

impl Action for ExportFilesystem {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn describe(&self) -> String {
        match &self.description {
            Some(d) if !d.is_empty() => d.clone(),
            _ => {
                let source = non_empty(&self.source)
                    .or(non_empty(&self.name))
                    .unwrap_or_default();
                format!(
                    "{} (source: {}, destination: {})",
                    KIND, source, self.destination
                )
            }
        }
    }

    fn verify(&self, _ctx: &Context) -> Result<()> {
        let job = self.job()?;
        if self.destination.trim().is_empty() {
            return Err(Error::validation(KIND, "destination must be specified"));
        }
        if let SourceLocator::Name(name) = &job.source {
            if name.contains('/') {
                return Err(Error::validation(
                    KIND,
                    format!("name '{}' must not contain '/'; use source for paths", name),
                ));
            }
        }
        Ok(())
    }

    fn run(&mut self, ctx: &Context) -> Result<()> {
        let job = self.job()?;
        let report = export::export(ctx, &job)?;
        println!(
            "  Exported {} -> {} ({} MB)",
            report.source.display(),
            report.destination.display(),
            report.bytes / 1024 / 1024
        );
        self.report = Some(report);
        Ok(())
    }
}
