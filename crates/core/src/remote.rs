//! The seam between convergence logic and the remote service.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{BlockDevice, BlockDeviceId, Machine, MachineId, Partition, PartitionId};
use crate::payload::{
    BlockDeviceUpdate, CreateBlockDevice, CreatePartition, FormatPartition, MountPartition,
};

/// Client for block device and partition endpoints scoped to a machine.
///
/// Lookups return `Ok(None)` when nothing matches; every other failure is a
/// fatal [`crate::Error`].
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Resolve a machine by fully-qualified domain name.
    async fn find_machine(&self, fqdn: &str) -> Result<Option<Machine>>;

    /// Locate a block device by name on a machine.
    async fn find_block_device(&self, machine: &MachineId, name: &str)
    -> Result<Option<BlockDevice>>;

    /// Fetch the full snapshot of a block device.
    async fn get_block_device(&self, machine: &MachineId, device: BlockDeviceId)
    -> Result<BlockDevice>;

    async fn create_block_device(
        &self,
        machine: &MachineId,
        payload: &CreateBlockDevice,
    ) -> Result<BlockDevice>;

    async fn update_block_device(
        &self,
        machine: &MachineId,
        device: BlockDeviceId,
        diff: &BlockDeviceUpdate,
    ) -> Result<()>;

    async fn delete_block_device(&self, machine: &MachineId, device: BlockDeviceId) -> Result<()>;

    async fn add_device_tag(&self, machine: &MachineId, device: BlockDeviceId, tag: &str)
    -> Result<()>;

    /// Mark the device as the machine's boot disk.
    async fn set_boot_device(&self, machine: &MachineId, device: BlockDeviceId) -> Result<()>;

    async fn create_partition(
        &self,
        machine: &MachineId,
        device: BlockDeviceId,
        payload: &CreatePartition,
    ) -> Result<Partition>;

    async fn format_partition(
        &self,
        machine: &MachineId,
        device: BlockDeviceId,
        partition: PartitionId,
        payload: &FormatPartition,
    ) -> Result<()>;

    async fn mount_partition(
        &self,
        machine: &MachineId,
        device: BlockDeviceId,
        partition: PartitionId,
        payload: &MountPartition,
    ) -> Result<()>;

    async fn add_partition_tag(
        &self,
        machine: &MachineId,
        device: BlockDeviceId,
        partition: PartitionId,
        tag: &str,
    ) -> Result<()>;
}
