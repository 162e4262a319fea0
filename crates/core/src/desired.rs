//! The immutable desired-state value object handed to the reconciler.
//!
//! Built only through [`crate::Declaration::into_desired`], so every value
//! here has already passed validation.

use serde::{Deserialize, Serialize};

/// Identifying hints for a block device. `model` + `serial` and `id_path`
/// are mutually exclusive, which the variants make unrepresentable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeviceIdentity {
    ModelSerial { model: String, serial: String },
    IdPath { id_path: String },
}

impl DeviceIdentity {
    pub fn model(&self) -> Option<&str> {
        match self {
            Self::ModelSerial { model, .. } => Some(model),
            Self::IdPath { .. } => None,
        }
    }

    pub fn serial(&self) -> Option<&str> {
        match self {
            Self::ModelSerial { serial, .. } => Some(serial),
            Self::IdPath { .. } => None,
        }
    }

    pub fn id_path(&self) -> Option<&str> {
        match self {
            Self::IdPath { id_path } => Some(id_path),
            Self::ModelSerial { .. } => None,
        }
    }
}

/// Mount sub-state. Only reachable through a [`DesiredFilesystem`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredMount {
    pub mount_point: String,
    pub mount_options: Option<String>,
}

/// Filesystem sub-state of a desired partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredFilesystem {
    pub fs_type: String,
    pub label: Option<String>,
    pub mount: Option<DesiredMount>,
}

/// A partition to create under a new block device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredPartition {
    /// Partition size; `None` takes the rest of the device.
    pub size: Option<u64>,
    pub bootable: Option<bool>,
    pub tags: Vec<String>,
    pub filesystem: Option<DesiredFilesystem>,
}

/// A block device that should exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredBlockDevice {
    pub machine_fqdn: String,
    /// Lookup key within the machine.
    pub name: String,
    /// Rename target applied on update.
    pub new_name: Option<String>,
    pub size: u64,
    pub block_size: Option<u64>,
    pub identity: Option<DeviceIdentity>,
    pub tags: Vec<String>,
    /// Only ever assigns the boot disk; `false` never unassigns it.
    pub is_boot_device: bool,
    pub partitions: Vec<DesiredPartition>,
}

impl DesiredBlockDevice {
    pub fn model(&self) -> Option<&str> {
        self.identity.as_ref().and_then(DeviceIdentity::model)
    }

    pub fn serial(&self) -> Option<&str> {
        self.identity.as_ref().and_then(DeviceIdentity::serial)
    }

    pub fn id_path(&self) -> Option<&str> {
        self.identity.as_ref().and_then(DeviceIdentity::id_path)
    }
}

/// Target lifecycle of one block device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum DesiredState {
    Present(DesiredBlockDevice),
    Absent { machine_fqdn: String, name: String },
}

impl DesiredState {
    /// FQDN of the owning machine.
    pub fn machine_fqdn(&self) -> &str {
        match self {
            Self::Present(device) => &device.machine_fqdn,
            Self::Absent { machine_fqdn, .. } => machine_fqdn,
        }
    }

    /// Name used to locate the block device.
    pub fn name(&self) -> &str {
        match self {
            Self::Present(device) => &device.name,
            Self::Absent { name, .. } => name,
        }
    }
}
