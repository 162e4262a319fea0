//! Core records and seams for declarative block device convergence.
//!
//! - [`model`]: typed snapshots returned by the remote service
//! - [`payload`]: request bodies, with unset optional fields omitted
//! - [`declaration`]: the user-facing declaration and its validation
//! - [`desired`]: the immutable desired state handed to the reconciler
//! - [`remote`]: the [`RemoteClient`] trait every backend implements
//! - [`memory`]: an in-memory backend that records every call

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod declaration;
pub mod desired;
pub mod error;
pub mod memory;
pub mod model;
pub mod payload;
pub mod remote;

pub use declaration::{DEFAULT_BLOCK_SIZE, Declaration, Lifecycle, PartitionDeclaration};
pub use desired::{
    DesiredBlockDevice, DesiredFilesystem, DesiredMount, DesiredPartition, DesiredState,
    DeviceIdentity,
};
pub use error::{Error, Result};
pub use memory::{InMemoryRemote, RemoteCall, RemoteOperation};
pub use model::{
    BlockDevice, BlockDeviceId, Machine, MachineId, MachineStatus, Partition,
    PartitionFilesystem, PartitionId,
};
pub use payload::{
    BlockDeviceUpdate, CreateBlockDevice, CreatePartition, FormatPartition, MountPartition,
};
pub use remote::RemoteClient;
