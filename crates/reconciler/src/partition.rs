//! Partition sub-lifecycle: create, then format, then mount, then tag.
//!
//! Format is only planned when a filesystem is declared, and mount only
//! under a declared filesystem, so an unformatted partition is never
//! mounted. Tags always come last for a partition.

use std::collections::HashMap;

use bdsync_core::{
    BlockDeviceId, DesiredPartition, Error, MachineId, PartitionId, RemoteClient, Result,
};
use tracing::info;

use crate::normalize::{format_payload, mount_payload, partition_payload};
use crate::types::{PartitionStep, ReconcileAction};

/// Ordered steps for one declared partition.
pub fn partition_steps(desired: &DesiredPartition, forward_bootable: bool) -> Vec<PartitionStep> {
    let mut steps = vec![PartitionStep::Create(partition_payload(
        desired,
        forward_bootable,
    ))];

    if let Some(filesystem) = &desired.filesystem {
        steps.push(PartitionStep::Format(format_payload(filesystem)));
        if let Some(mount) = &filesystem.mount {
            steps.push(PartitionStep::Mount(mount_payload(mount)));
        }
    }

    steps.extend(desired.tags.iter().cloned().map(PartitionStep::AddTag));
    steps
}

/// Actions for every declared partition, strictly in declaration order.
pub fn partition_actions(
    partitions: &[DesiredPartition],
    forward_bootable: bool,
) -> Vec<ReconcileAction> {
    partitions
        .iter()
        .enumerate()
        .flat_map(|(index, desired)| {
            partition_steps(desired, forward_bootable)
                .into_iter()
                .map(move |step| ReconcileAction::Partition { index, step })
        })
        .collect()
}

/// Drives partition steps against the remote, remembering the id each
/// declaration index was assigned.
pub struct PartitionDriver<'a> {
    client: &'a dyn RemoteClient,
    machine: &'a MachineId,
    device: BlockDeviceId,
    created: HashMap<usize, PartitionId>,
}

impl<'a> PartitionDriver<'a> {
    pub fn new(client: &'a dyn RemoteClient, machine: &'a MachineId, device: BlockDeviceId) -> Self {
        Self {
            client,
            machine,
            device,
            created: HashMap::new(),
        }
    }

    /// Id assigned to the partition declared at `index`, once created.
    pub fn partition_id(&self, index: usize) -> Option<PartitionId> {
        self.created.get(&index).copied()
    }

    /// Apply one step.
    ///
    /// # Errors
    ///
    /// Propagates any remote failure unchanged. Steps after `Create` fail
    /// when the partition at `index` was never created.
    pub async fn apply(&mut self, index: usize, step: &PartitionStep) -> Result<()> {
        match step {
            PartitionStep::Create(payload) => {
                let partition = self
                    .client
                    .create_partition(self.machine, self.device, payload)
                    .await?;
                info!(
                    index,
                    partition = %partition.id,
                    size = partition.size,
                    "Partition created"
                );
                self.created.insert(index, partition.id);
            }
            PartitionStep::Format(payload) => {
                let partition = self.require(index, "format_partition")?;
                self.client
                    .format_partition(self.machine, self.device, partition, payload)
                    .await?;
                info!(index, partition = %partition, fstype = %payload.fstype, "Partition formatted");
            }
            PartitionStep::Mount(payload) => {
                let partition = self.require(index, "mount_partition")?;
                self.client
                    .mount_partition(self.machine, self.device, partition, payload)
                    .await?;
                info!(
                    index,
                    partition = %partition,
                    mount_point = %payload.mount_point,
                    "Partition mounted"
                );
            }
            PartitionStep::AddTag(tag) => {
                let partition = self.require(index, "add_partition_tag")?;
                self.client
                    .add_partition_tag(self.machine, self.device, partition, tag)
                    .await?;
                info!(index, partition = %partition, tag = %tag, "Partition tagged");
            }
        }
        Ok(())
    }

    fn require(&self, index: usize, operation: &str) -> Result<PartitionId> {
        self.partition_id(index).ok_or_else(|| {
            Error::remote_failed(operation, format!("partition #{index} was not created"))
        })
    }
}
