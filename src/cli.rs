//! CLI command definitions using clap.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use url::Url;

/// bdsync - declarative block devices for MAAS machines
#[derive(Parser, Debug)]
#[command(name = "bdsync")]
#[command(version)]
#[command(about = "Converge a MAAS machine block device and its partitions to a declaration")]
#[command(
    long_about = "bdsync reads a YAML or JSON declaration of one block device, compares it with what MAAS reports, and issues only the calls needed to converge. The resulting record and before/after diff are printed as JSON."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Converge the remote block device to the declaration
    Apply {
        /// Declaration file (.yaml, .yml or .json)
        #[arg(short, long)]
        file: PathBuf,

        /// Settings file (.toml or .json)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// MAAS root URL, overriding settings and environment
        #[arg(long)]
        url: Option<Url>,

        /// Print the planned actions without changing anything
        #[arg(long, default_value_t = false)]
        check: bool,

        /// Send declared partition `bootable` flags on create
        #[arg(long, default_value_t = false)]
        forward_partition_bootable: bool,
    },

    /// Validate a declaration without contacting MAAS
    Validate {
        /// Declaration file (.yaml, .yml or .json)
        #[arg(short, long)]
        file: PathBuf,
    },
}
