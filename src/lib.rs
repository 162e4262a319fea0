#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # bdsync
//!
//! Declarative convergence of one MAAS block device and its partitions.
//!
//! This library re-exports the workspace crates and the CLI layer for
//! convenience.

pub use bdsync_core;
pub use bdsync_maas;
pub use bdsync_reconciler;

pub mod cli;
pub mod commands;
