//! In-memory [`RemoteClient`] for tests and dry runs.
//!
//! Mimics the service closely enough to exercise convergence: names are
//! unique per machine, deletes cascade, tags behave as sets, mounting needs
//! a filesystem, and partitions cannot over-allocate the device. Every call
//! is recorded so tests can assert exactly which remote operations ran.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::model::{
    BlockDevice, BlockDeviceId, Machine, MachineId, MachineStatus, Partition,
    PartitionFilesystem, PartitionId,
};
use crate::payload::{
    BlockDeviceUpdate, CreateBlockDevice, CreatePartition, FormatPartition, MountPartition,
};
use crate::remote::RemoteClient;

/// Remote operation kinds, used for failure injection and call filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOperation {
    FindMachine,
    FindBlockDevice,
    GetBlockDevice,
    CreateBlockDevice,
    UpdateBlockDevice,
    DeleteBlockDevice,
    AddDeviceTag,
    SetBootDevice,
    CreatePartition,
    FormatPartition,
    MountPartition,
    AddPartitionTag,
}

impl RemoteOperation {
    /// Whether the operation changes remote state.
    pub const fn is_mutating(self) -> bool {
        !matches!(
            self,
            Self::FindMachine | Self::FindBlockDevice | Self::GetBlockDevice
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FindMachine => "find_machine",
            Self::FindBlockDevice => "find_block_device",
            Self::GetBlockDevice => "get_block_device",
            Self::CreateBlockDevice => "create_block_device",
            Self::UpdateBlockDevice => "update_block_device",
            Self::DeleteBlockDevice => "delete_block_device",
            Self::AddDeviceTag => "add_device_tag",
            Self::SetBootDevice => "set_boot_device",
            Self::CreatePartition => "create_partition",
            Self::FormatPartition => "format_partition",
            Self::MountPartition => "mount_partition",
            Self::AddPartitionTag => "add_partition_tag",
        }
    }
}

impl fmt::Display for RemoteOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded call with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    FindMachine {
        fqdn: String,
    },
    FindBlockDevice {
        machine: MachineId,
        name: String,
    },
    GetBlockDevice {
        machine: MachineId,
        device: BlockDeviceId,
    },
    CreateBlockDevice {
        machine: MachineId,
        payload: CreateBlockDevice,
    },
    UpdateBlockDevice {
        machine: MachineId,
        device: BlockDeviceId,
        diff: BlockDeviceUpdate,
    },
    DeleteBlockDevice {
        machine: MachineId,
        device: BlockDeviceId,
    },
    AddDeviceTag {
        machine: MachineId,
        device: BlockDeviceId,
        tag: String,
    },
    SetBootDevice {
        machine: MachineId,
        device: BlockDeviceId,
    },
    CreatePartition {
        machine: MachineId,
        device: BlockDeviceId,
        payload: CreatePartition,
    },
    FormatPartition {
        machine: MachineId,
        device: BlockDeviceId,
        partition: PartitionId,
        payload: FormatPartition,
    },
    MountPartition {
        machine: MachineId,
        device: BlockDeviceId,
        partition: PartitionId,
        payload: MountPartition,
    },
    AddPartitionTag {
        machine: MachineId,
        device: BlockDeviceId,
        partition: PartitionId,
        tag: String,
    },
}

impl RemoteCall {
    pub const fn operation(&self) -> RemoteOperation {
        match self {
            Self::FindMachine { .. } => RemoteOperation::FindMachine,
            Self::FindBlockDevice { .. } => RemoteOperation::FindBlockDevice,
            Self::GetBlockDevice { .. } => RemoteOperation::GetBlockDevice,
            Self::CreateBlockDevice { .. } => RemoteOperation::CreateBlockDevice,
            Self::UpdateBlockDevice { .. } => RemoteOperation::UpdateBlockDevice,
            Self::DeleteBlockDevice { .. } => RemoteOperation::DeleteBlockDevice,
            Self::AddDeviceTag { .. } => RemoteOperation::AddDeviceTag,
            Self::SetBootDevice { .. } => RemoteOperation::SetBootDevice,
            Self::CreatePartition { .. } => RemoteOperation::CreatePartition,
            Self::FormatPartition { .. } => RemoteOperation::FormatPartition,
            Self::MountPartition { .. } => RemoteOperation::MountPartition,
            Self::AddPartitionTag { .. } => RemoteOperation::AddPartitionTag,
        }
    }
}

#[derive(Debug)]
struct MachineEntry {
    machine: Machine,
    devices: Vec<BlockDevice>,
    boot_device: Option<BlockDeviceId>,
}

/// In-memory remote service.
#[derive(Debug, Default)]
pub struct InMemoryRemote {
    machines: RwLock<Vec<MachineEntry>>,
    calls: RwLock<Vec<RemoteCall>>,
    failures: RwLock<HashSet<RemoteOperation>>,
    next_id: AtomicU64,
}

impl InMemoryRemote {
    /// Create an empty remote with no machines.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a machine. Its id is derived from the FQDN.
    #[must_use]
    pub fn with_machine(mut self, fqdn: impl Into<String>, status: MachineStatus) -> Self {
        let fqdn = fqdn.into();
        let id = MachineId::new(format!("sys-{}", fqdn.split('.').next().unwrap_or(&fqdn)));
        self.machines.get_mut().push(MachineEntry {
            machine: Machine { id, fqdn, status },
            devices: Vec::new(),
            boot_device: None,
        });
        self
    }

    /// Make every call of `operation` fail with a remote error.
    #[must_use]
    pub fn failing_on(mut self, operation: RemoteOperation) -> Self {
        self.failures.get_mut().insert(operation);
        self
    }

    /// Insert a pre-existing block device without recording a call.
    ///
    /// # Errors
    ///
    /// Fails when the machine is unknown or the name is taken.
    pub async fn seed_block_device(
        &self,
        fqdn: &str,
        payload: &CreateBlockDevice,
    ) -> Result<BlockDevice> {
        let machine = self.machine_id(fqdn).await?;
        self.insert_device(&machine, payload).await
    }

    /// Insert a pre-existing partition without recording a call.
    ///
    /// # Errors
    ///
    /// Fails when the device is unknown or lacks capacity.
    pub async fn seed_partition(
        &self,
        fqdn: &str,
        device: BlockDeviceId,
        payload: &CreatePartition,
    ) -> Result<Partition> {
        let machine = self.machine_id(fqdn).await?;
        self.insert_partition(&machine, device, payload).await
    }

    /// Change the status of a registered machine.
    pub async fn set_machine_status(&self, fqdn: &str, status: MachineStatus) {
        let mut machines = self.machines.write().await;
        if let Some(entry) = machines.iter_mut().find(|e| e.machine.fqdn == fqdn) {
            entry.machine.status = status;
        }
    }

    /// Current boot device of a machine.
    pub async fn boot_device(&self, fqdn: &str) -> Option<BlockDeviceId> {
        self.machines
            .read()
            .await
            .iter()
            .find(|e| e.machine.fqdn == fqdn)
            .and_then(|e| e.boot_device)
    }

    /// Every call issued so far, in order.
    pub async fn calls(&self) -> Vec<RemoteCall> {
        self.calls.read().await.clone()
    }

    /// Only the calls that change remote state.
    pub async fn mutating_calls(&self) -> Vec<RemoteCall> {
        self.calls
            .read()
            .await
            .iter()
            .filter(|c| c.operation().is_mutating())
            .cloned()
            .collect()
    }

    /// Forget recorded calls.
    pub async fn clear_calls(&self) {
        self.calls.write().await.clear();
    }

    async fn record(&self, call: RemoteCall) -> Result<()> {
        let operation = call.operation();
        self.calls.write().await.push(call);
        if self.failures.read().await.contains(&operation) {
            return Err(Error::remote_failed(
                operation.as_str(),
                "injected failure",
            ));
        }
        Ok(())
    }

    fn allocate_id(&self) -> u64 {
        self.next_id
            .fetch_add(1, Ordering::Relaxed)
            .saturating_add(1)
    }

    async fn machine_id(&self, fqdn: &str) -> Result<MachineId> {
        self.machines
            .read()
            .await
            .iter()
            .find(|e| e.machine.fqdn == fqdn)
            .map(|e| e.machine.id.clone())
            .ok_or_else(|| Error::machine_not_found(fqdn))
    }

    async fn insert_device(
        &self,
        machine: &MachineId,
        payload: &CreateBlockDevice,
    ) -> Result<BlockDevice> {
        let id = BlockDeviceId(self.allocate_id());
        let mut machines = self.machines.write().await;
        let entry = entry_mut(&mut machines, machine, RemoteOperation::CreateBlockDevice)?;

        if entry.devices.iter().any(|d| d.name == payload.name) {
            return Err(Error::remote_failed(
                RemoteOperation::CreateBlockDevice.as_str(),
                format!("a block device named '{}' already exists", payload.name),
            ));
        }

        let mut extra = Map::new();
        extra.insert("system_id".to_string(), Value::from(machine.as_str()));
        extra.insert("type".to_string(), Value::from("physical"));

        let device = BlockDevice {
            id,
            name: payload.name.clone(),
            size: payload.size,
            block_size: payload.block_size,
            model: payload.model.clone(),
            serial: payload.serial.clone(),
            id_path: payload.id_path.clone(),
            tags: Vec::new(),
            partitions: Vec::new(),
            extra,
        };
        entry.devices.push(device.clone());
        Ok(device)
    }

    async fn insert_partition(
        &self,
        machine: &MachineId,
        device: BlockDeviceId,
        payload: &CreatePartition,
    ) -> Result<Partition> {
        let id = PartitionId(self.allocate_id());
        let mut machines = self.machines.write().await;
        let target = device_mut(&mut machines, machine, device, RemoteOperation::CreatePartition)?;

        let available = target.available();
        let size = payload.size.unwrap_or(available);
        if size == 0 || size > available {
            return Err(Error::remote_failed(
                RemoteOperation::CreatePartition.as_str(),
                format!("requested {size} but only {available} available on '{}'", target.name),
            ));
        }

        let partition = Partition {
            id,
            size,
            bootable: payload.bootable.unwrap_or(false),
            tags: Vec::new(),
            filesystem: None,
            extra: Map::new(),
        };
        target.partitions.push(partition.clone());
        Ok(partition)
    }
}

fn entry_mut<'a>(
    machines: &'a mut [MachineEntry],
    machine: &MachineId,
    operation: RemoteOperation,
) -> Result<&'a mut MachineEntry> {
    machines
        .iter_mut()
        .find(|e| &e.machine.id == machine)
        .ok_or_else(|| Error::remote_failed(operation.as_str(), format!("no machine {machine}")))
}

fn device_mut<'a>(
    machines: &'a mut [MachineEntry],
    machine: &MachineId,
    device: BlockDeviceId,
    operation: RemoteOperation,
) -> Result<&'a mut BlockDevice> {
    entry_mut(machines, machine, operation)?
        .devices
        .iter_mut()
        .find(|d| d.id == device)
        .ok_or_else(|| {
            Error::remote_failed(operation.as_str(), format!("no block device {device}"))
        })
}

fn partition_mut<'a>(
    machines: &'a mut [MachineEntry],
    machine: &MachineId,
    device: BlockDeviceId,
    partition: PartitionId,
    operation: RemoteOperation,
) -> Result<&'a mut Partition> {
    device_mut(machines, machine, device, operation)?
        .partitions
        .iter_mut()
        .find(|p| p.id == partition)
        .ok_or_else(|| {
            Error::remote_failed(operation.as_str(), format!("no partition {partition}"))
        })
}

fn push_tag(tags: &mut Vec<String>, tag: &str) {
    if !tags.iter().any(|t| t == tag) {
        tags.push(tag.to_string());
    }
}

#[async_trait]
impl RemoteClient for InMemoryRemote {
    async fn find_machine(&self, fqdn: &str) -> Result<Option<Machine>> {
        self.record(RemoteCall::FindMachine {
            fqdn: fqdn.to_string(),
        })
        .await?;
        Ok(self
            .machines
            .read()
            .await
            .iter()
            .find(|e| e.machine.fqdn == fqdn)
            .map(|e| e.machine.clone()))
    }

    async fn find_block_device(
        &self,
        machine: &MachineId,
        name: &str,
    ) -> Result<Option<BlockDevice>> {
        self.record(RemoteCall::FindBlockDevice {
            machine: machine.clone(),
            name: name.to_string(),
        })
        .await?;
        Ok(self
            .machines
            .read()
            .await
            .iter()
            .find(|e| &e.machine.id == machine)
            .and_then(|e| e.devices.iter().find(|d| d.name == name))
            .cloned())
    }

    async fn get_block_device(
        &self,
        machine: &MachineId,
        device: BlockDeviceId,
    ) -> Result<BlockDevice> {
        self.record(RemoteCall::GetBlockDevice {
            machine: machine.clone(),
            device,
        })
        .await?;
        self.machines
            .read()
            .await
            .iter()
            .find(|e| &e.machine.id == machine)
            .and_then(|e| e.devices.iter().find(|d| d.id == device))
            .cloned()
            .ok_or_else(|| Error::block_device_not_found(machine.as_str(), device.to_string()))
    }

    async fn create_block_device(
        &self,
        machine: &MachineId,
        payload: &CreateBlockDevice,
    ) -> Result<BlockDevice> {
        self.record(RemoteCall::CreateBlockDevice {
            machine: machine.clone(),
            payload: payload.clone(),
        })
        .await?;
        self.insert_device(machine, payload).await
    }

    async fn update_block_device(
        &self,
        machine: &MachineId,
        device: BlockDeviceId,
        diff: &BlockDeviceUpdate,
    ) -> Result<()> {
        let operation = RemoteOperation::UpdateBlockDevice;
        self.record(RemoteCall::UpdateBlockDevice {
            machine: machine.clone(),
            device,
            diff: diff.clone(),
        })
        .await?;

        let mut machines = self.machines.write().await;
        let entry = entry_mut(&mut machines, machine, operation)?;
        if !entry.machine.status.is_ready() && (diff.size.is_some() || diff.block_size.is_some()) {
            return Err(Error::remote_failed(
                operation.as_str(),
                format!(
                    "size and block_size can only change while the machine is Ready (status: {})",
                    entry.machine.status
                ),
            ));
        }
        let target = device_mut(&mut machines, machine, device, operation)?;

        if let Some(name) = &diff.name {
            target.name.clone_from(name);
        }
        if let Some(model) = &diff.model {
            target.model = Some(model.clone());
        }
        if let Some(serial) = &diff.serial {
            target.serial = Some(serial.clone());
        }
        if let Some(id_path) = &diff.id_path {
            target.id_path = Some(id_path.clone());
        }
        if let Some(size) = diff.size {
            target.size = size;
        }
        if let Some(block_size) = diff.block_size {
            target.block_size = block_size;
        }
        Ok(())
    }

    async fn delete_block_device(&self, machine: &MachineId, device: BlockDeviceId) -> Result<()> {
        let operation = RemoteOperation::DeleteBlockDevice;
        self.record(RemoteCall::DeleteBlockDevice {
            machine: machine.clone(),
            device,
        })
        .await?;

        let mut machines = self.machines.write().await;
        let entry = entry_mut(&mut machines, machine, operation)?;
        let before = entry.devices.len();
        entry.devices.retain(|d| d.id != device);
        if entry.devices.len() == before {
            return Err(Error::remote_failed(
                operation.as_str(),
                format!("no block device {device}"),
            ));
        }
        if entry.boot_device == Some(device) {
            entry.boot_device = None;
        }
        Ok(())
    }

    async fn add_device_tag(
        &self,
        machine: &MachineId,
        device: BlockDeviceId,
        tag: &str,
    ) -> Result<()> {
        self.record(RemoteCall::AddDeviceTag {
            machine: machine.clone(),
            device,
            tag: tag.to_string(),
        })
        .await?;

        let mut machines = self.machines.write().await;
        let target = device_mut(&mut machines, machine, device, RemoteOperation::AddDeviceTag)?;
        push_tag(&mut target.tags, tag);
        Ok(())
    }

    async fn set_boot_device(&self, machine: &MachineId, device: BlockDeviceId) -> Result<()> {
        let operation = RemoteOperation::SetBootDevice;
        self.record(RemoteCall::SetBootDevice {
            machine: machine.clone(),
            device,
        })
        .await?;

        let mut machines = self.machines.write().await;
        device_mut(&mut machines, machine, device, operation)?;
        let entry = entry_mut(&mut machines, machine, operation)?;
        entry.boot_device = Some(device);
        Ok(())
    }

    async fn create_partition(
        &self,
        machine: &MachineId,
        device: BlockDeviceId,
        payload: &CreatePartition,
    ) -> Result<Partition> {
        self.record(RemoteCall::CreatePartition {
            machine: machine.clone(),
            device,
            payload: payload.clone(),
        })
        .await?;
        self.insert_partition(machine, device, payload).await
    }

    async fn format_partition(
        &self,
        machine: &MachineId,
        device: BlockDeviceId,
        partition: PartitionId,
        payload: &FormatPartition,
    ) -> Result<()> {
        self.record(RemoteCall::FormatPartition {
            machine: machine.clone(),
            device,
            partition,
            payload: payload.clone(),
        })
        .await?;

        let mut machines = self.machines.write().await;
        let target = partition_mut(
            &mut machines,
            machine,
            device,
            partition,
            RemoteOperation::FormatPartition,
        )?;
        target.filesystem = Some(PartitionFilesystem {
            fstype: payload.fstype.clone(),
            label: payload.label.clone(),
            ..Default::default()
        });
        Ok(())
    }

    async fn mount_partition(
        &self,
        machine: &MachineId,
        device: BlockDeviceId,
        partition: PartitionId,
        payload: &MountPartition,
    ) -> Result<()> {
        let operation = RemoteOperation::MountPartition;
        self.record(RemoteCall::MountPartition {
            machine: machine.clone(),
            device,
            partition,
            payload: payload.clone(),
        })
        .await?;

        let mut machines = self.machines.write().await;
        let target = partition_mut(&mut machines, machine, device, partition, operation)?;
        let filesystem = target.filesystem.as_mut().ok_or_else(|| {
            Error::remote_failed(operation.as_str(), "partition is not formatted")
        })?;
        filesystem.mount_point = Some(payload.mount_point.clone());
        filesystem.mount_options.clone_from(&payload.mount_options);
        Ok(())
    }

    async fn add_partition_tag(
        &self,
        machine: &MachineId,
        device: BlockDeviceId,
        partition: PartitionId,
        tag: &str,
    ) -> Result<()> {
        self.record(RemoteCall::AddPartitionTag {
            machine: machine.clone(),
            device,
            partition,
            tag: tag.to_string(),
        })
        .await?;

        let mut machines = self.machines.write().await;
        let target = partition_mut(
            &mut machines,
            machine,
            device,
            partition,
            RemoteOperation::AddPartitionTag,
        )?;
        push_tag(&mut target.tags, tag);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vdb(size: u64) -> CreateBlockDevice {
        CreateBlockDevice {
            name: "vdb".to_string(),
            size,
            block_size: 512,
            model: None,
            serial: None,
            id_path: None,
        }
    }

    #[tokio::test]
    async fn test_find_unknown_machine_is_none() -> Result<()> {
        let remote = InMemoryRemote::new();
        assert!(remote.find_machine("nope.maas").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() -> Result<()> {
        let remote = InMemoryRemote::new().with_machine("m1.maas", MachineStatus::Ready);
        remote.seed_block_device("m1.maas", &vdb(100)).await?;
        let result = remote.seed_block_device("m1.maas", &vdb(100)).await;
        assert!(matches!(result, Err(Error::RemoteOperationFailed { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_partition_defaults_to_rest_of_device() -> Result<()> {
        let remote = InMemoryRemote::new().with_machine("m1.maas", MachineStatus::Ready);
        let device = remote.seed_block_device("m1.maas", &vdb(100)).await?;
        let machine = device
            .extra
            .get("system_id")
            .and_then(Value::as_str)
            .map(MachineId::new)
            .ok_or_else(|| Error::invalid_declaration("missing system_id"))?;

        let first = remote
            .create_partition(&machine, device.id, &CreatePartition { size: Some(40), bootable: None })
            .await?;
        let rest = remote
            .create_partition(&machine, device.id, &CreatePartition::default())
            .await?;
        assert_eq!(first.size, 40);
        assert_eq!(rest.size, 60);

        let overflow = remote
            .create_partition(&machine, device.id, &CreatePartition { size: Some(1), bootable: None })
            .await;
        assert!(overflow.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_mount_requires_filesystem() -> Result<()> {
        let remote = InMemoryRemote::new().with_machine("m1.maas", MachineStatus::Ready);
        let device = remote.seed_block_device("m1.maas", &vdb(100)).await?;
        let partition = remote
            .seed_partition("m1.maas", device.id, &CreatePartition::default())
            .await?;
        let machine = MachineId::new("sys-m1");

        let mount = MountPartition {
            mount_point: "/srv".to_string(),
            mount_options: None,
        };
        let result = remote
            .mount_partition(&machine, device.id, partition.id, &mount)
            .await;
        assert!(result.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_injected_failure_is_recorded() -> Result<()> {
        let remote = InMemoryRemote::new()
            .with_machine("m1.maas", MachineStatus::Ready)
            .failing_on(RemoteOperation::CreateBlockDevice);
        let machine = MachineId::new("sys-m1");

        let result = remote.create_block_device(&machine, &vdb(10)).await;
        assert!(result.is_err());
        assert_eq!(remote.mutating_calls().await.len(), 1);
        assert!(remote.find_block_device(&machine, "vdb").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_size_locked_unless_ready() -> Result<()> {
        let remote = InMemoryRemote::new().with_machine("m1.maas", MachineStatus::Deployed);
        let device = remote.seed_block_device("m1.maas", &vdb(100)).await?;
        let machine = MachineId::new("sys-m1");

        let diff = BlockDeviceUpdate {
            size: Some(200),
            ..Default::default()
        };
        let result = remote.update_block_device(&machine, device.id, &diff).await;
        assert!(result.is_err());
        Ok(())
    }
}
