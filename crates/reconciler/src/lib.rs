//! Convergence of one block device and its partitions.
//!
//! A run follows the familiar reconciliation shape:
//!
//! - **Desired State**: a validated [`DesiredState`] declaration
//! - **Actual State**: the block device snapshot read from the remote
//! - **Diff**: only fields that differ and may change in the machine status
//! - **Actions**: an ordered list of remote mutations, applied fail-fast
//!
//! # Actions
//!
//! - `CreateBlockDevice` - Create the block device
//! - `UpdateBlockDevice` - Send the changed fields
//! - `AddDeviceTag` - Append a missing tag
//! - `SetBootDevice` - Assign the boot disk
//! - `Partition` - Create, format, mount or tag one declared partition
//! - `DeleteBlockDevice` - Remove the device and its partitions
//!
//! # Example
//!
//! ```ignore
//! use bdsync_core::{InMemoryRemote, MachineStatus, Declaration};
//! use bdsync_reconciler::Reconciler;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> bdsync_core::Result<()> {
//!     let remote = Arc::new(InMemoryRemote::new().with_machine("m1.maas", MachineStatus::Ready));
//!     let reconciler = Reconciler::with_defaults(remote);
//!
//!     let desired = Declaration::from_yaml_str(
//!         "state: present\nmachine_fqdn: m1.maas\nname: vdb\nsize_gigabytes: 27\nid_path: /dev/vdb\n",
//!     )?
//!     .into_desired()?;
//!
//!     let outcome = reconciler.reconcile(&desired).await?;
//!     assert!(outcome.changed);
//!     Ok(())
//! }
//! ```
//!
//! [`DesiredState`]: bdsync_core::DesiredState

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod diff;
pub mod normalize;
pub mod partition;
pub mod reconciler;
pub mod types;

// Re-export main types
pub use diff::{block_device_diff, missing_tags};
pub use normalize::{block_device_payload, format_payload, mount_payload, partition_payload};
pub use partition::{PartitionDriver, partition_actions, partition_steps};
pub use reconciler::{Reconciler, ReconcilerConfig};
pub use types::{ChangeDiff, PartitionStep, Plan, ReconcileAction, ReconcileOutcome};
