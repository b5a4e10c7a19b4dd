//! CLI command handlers.
//!
//! Each submodule handles a specific CLI command:
//! - `image` - new-filesystem / export-filesystem as one-shot actions
//! - `pipeline` - run a JSON pipeline of actions
//! - `status` - inspect or release an image's loop devices
//! - `preflight` - run preflight checks

pub mod image;
pub mod pipeline;
mod preflight;
pub mod status;

pub use image::{cmd_export_filesystem, cmd_new_filesystem};
pub use pipeline::cmd_pipeline;
pub use preflight::cmd_preflight;
pub use status::{cmd_detach, cmd_status};
