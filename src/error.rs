//! Error types for image lifecycle operations.
//!
//! Only fatal conditions live here. Teardown failures, trim step failures and
//! unsupported labels are logged with `tracing::warn!` and never surface as
//! an `Error`.

use std::path::PathBuf;

use thiserror::Error;

use crate::fstype::FsType;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Missing or inconsistent configuration, raised before any side effect.
    #[error("{action}: {detail}")]
    Validation { action: &'static str, detail: String },

    /// A symbolic name or explicit source resolved to no file.
    #[error("could not find a file for '{name}' (searched {searched})")]
    NotFound { name: String, searched: String },

    /// Image file could not be created or sized.
    #[error("failed to provision image {path}: {source}")]
    Provision {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    /// mkfs failed.
    #[error("failed to format {path} as {fstype} (exit code {code}): {detail}")]
    Format {
        path: PathBuf,
        fstype: FsType,
        code: i32,
        detail: String,
    },

    /// Loop mount failed; no mount record exists.
    #[error("failed to mount {image} at {mountpoint}: {source}")]
    Mount {
        image: PathBuf,
        mountpoint: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    /// Block copy failed; the destination is not usable.
    #[error("failed to export {from} to {to}: {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    /// Pipeline document could not be read or parsed.
    #[error("invalid pipeline {path}: {source}")]
    Pipeline {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

impl Error {
    pub(crate) fn validation(action: &'static str, detail: impl Into<String>) -> Self {
        Error::Validation {
            action,
            detail: detail.into(),
        }
    }

    /// Short, stable name of the error kind, used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation { .. } => "validation",
            Error::NotFound { .. } => "not_found",
            Error::Provision { .. } => "provision",
            Error::Format { .. } => "format",
            Error::Mount { .. } => "mount",
            Error::Copy { .. } => "copy",
            Error::Pipeline { .. } => "pipeline",
        }
    }
}
