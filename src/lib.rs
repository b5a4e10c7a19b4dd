//! loopimg - loopback filesystem image lifecycle for OS image builds.
//!
//! Creates sparse images, formats and loop-mounts them, and later releases,
//! shrinks and exports them. The host's loop and mount tables are treated as
//! the single source of truth: every mutating step re-inspects them instead
//! of trusting state remembered from an earlier step or an earlier run.
//!
//! Modules, leaves first:
//! - [`resolve`] - image paths from relative paths or symbolic names
//! - [`inspect`] - loop/mount state queries and forced release
//! - [`provision`] - sparse allocation and mkfs
//! - [`mount`] - loop mounts with guaranteed teardown
//! - [`trim`] - filesystem-aware shrinking
//! - [`export`] - unmount, trim and block-copy to the final artifact
//! - [`actions`] - the `new-filesystem` / `export-filesystem` lifecycle

pub mod actions;
pub mod config;
pub mod context;
pub mod error;
pub mod export;
pub mod fstype;
pub mod inspect;
pub mod logging;
pub mod mount;
pub mod preflight;
pub mod process;
pub mod provision;
pub mod resolve;
pub mod timing;
pub mod trim;

pub use context::Context;
pub use error::{Error, Result};
