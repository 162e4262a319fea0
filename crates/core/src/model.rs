//! Typed records for the resources held by the remote service.
//!
//! Every record keeps the fields it does not model in an `extra` map, so a
//! snapshot round-trips verbatim and equality compares the whole structure.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque machine identity assigned by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MachineId(String);

impl MachineId {
    /// Wrap a raw machine identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Numeric block device id assigned once the device is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockDeviceId(pub u64);

impl fmt::Display for BlockDeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Numeric partition id assigned on creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionId(pub u64);

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a machine as reported by the remote service.
///
/// Only `Ready` matters to convergence: it unlocks `size` and `block_size`
/// changes. Unknown status names are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MachineStatus {
    New,
    Commissioning,
    Ready,
    Allocated,
    Deploying,
    Deployed,
    Releasing,
    Broken,
    Other(String),
}

impl MachineStatus {
    /// Whether every block device field may be changed.
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    fn as_str(&self) -> &str {
        match self {
            Self::New => "New",
            Self::Commissioning => "Commissioning",
            Self::Ready => "Ready",
            Self::Allocated => "Allocated",
            Self::Deploying => "Deploying",
            Self::Deployed => "Deployed",
            Self::Releasing => "Releasing",
            Self::Broken => "Broken",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for MachineStatus {
    fn from(name: String) -> Self {
        match name.as_str() {
            "New" => Self::New,
            "Commissioning" => Self::Commissioning,
            "Ready" => Self::Ready,
            "Allocated" => Self::Allocated,
            "Deploying" => Self::Deploying,
            "Deployed" => Self::Deployed,
            "Releasing" => Self::Releasing,
            "Broken" => Self::Broken,
            _ => Self::Other(name),
        }
    }
}

impl From<MachineStatus> for String {
    fn from(status: MachineStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A physical machine owning block devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    #[serde(rename = "system_id")]
    pub id: MachineId,
    pub fqdn: String,
    #[serde(rename = "status_name")]
    pub status: MachineStatus,
}

/// Filesystem sub-state of a formatted partition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartitionFilesystem {
    pub fstype: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub mount_point: Option<String>,
    #[serde(default)]
    pub mount_options: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A partition snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partition {
    pub id: PartitionId,
    pub size: u64,
    #[serde(default)]
    pub bootable: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub filesystem: Option<PartitionFilesystem>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Partition {
    /// Whether the partition carries a filesystem.
    pub const fn is_formatted(&self) -> bool {
        self.filesystem.is_some()
    }

    /// Whether the partition is formatted and mounted.
    pub fn is_mounted(&self) -> bool {
        self.filesystem
            .as_ref()
            .is_some_and(|fs| fs.mount_point.is_some())
    }
}

/// A block device snapshot, returned verbatim as the convergence record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockDevice {
    pub id: BlockDeviceId,
    pub name: String,
    pub size: u64,
    pub block_size: u64,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub serial: Option<String>,
    #[serde(default)]
    pub id_path: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub partitions: Vec<Partition>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BlockDevice {
    /// Whether the device already carries `tag`.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Sum of the sizes of all partitions.
    pub fn allocated(&self) -> u64 {
        self.partitions
            .iter()
            .fold(0_u64, |acc, p| acc.saturating_add(p.size))
    }

    /// Capacity not yet taken by partitions.
    pub fn available(&self) -> u64 {
        self.size.saturating_sub(self.allocated())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_machine_status_roundtrip_known_and_unknown() -> Result<(), serde_json::Error> {
        let ready: MachineStatus = serde_json::from_str("\"Ready\"")?;
        assert!(ready.is_ready());

        let odd: MachineStatus = serde_json::from_str("\"Rescue mode\"")?;
        assert_eq!(odd, MachineStatus::Other("Rescue mode".to_string()));
        assert_eq!(serde_json::to_string(&odd)?, "\"Rescue mode\"");
        Ok(())
    }

    #[test]
    fn test_machine_from_service_json() -> Result<(), serde_json::Error> {
        let machine: Machine = serde_json::from_value(serde_json::json!({
            "system_id": "y7388k",
            "fqdn": "m1.maas",
            "status_name": "Deployed",
            "hostname": "m1"
        }))?;
        assert_eq!(machine.id.as_str(), "y7388k");
        assert_eq!(machine.status, MachineStatus::Deployed);
        Ok(())
    }

    #[test]
    fn test_block_device_keeps_unmodelled_fields() -> Result<(), serde_json::Error> {
        let raw = serde_json::json!({
            "id": 73,
            "name": "vdb",
            "size": 1_000_000_000_u64,
            "block_size": 512,
            "model": null,
            "serial": null,
            "id_path": "/dev/vdb",
            "tags": ["ssd"],
            "partitions": [],
            "used_for": "Unused",
            "resource_uri": "/MAAS/api/2.0/nodes/y7388k/blockdevices/73/"
        });
        let device: BlockDevice = serde_json::from_value(raw.clone())?;

        assert_eq!(device.id, BlockDeviceId(73));
        assert!(device.has_tag("ssd"));
        assert_eq!(device.extra.get("used_for"), Some(&Value::from("Unused")));
        assert_eq!(serde_json::to_value(&device)?, raw);
        Ok(())
    }

    #[test]
    fn test_available_capacity() -> Result<(), serde_json::Error> {
        let device: BlockDevice = serde_json::from_value(serde_json::json!({
            "id": 1,
            "name": "sda",
            "size": 100,
            "block_size": 512,
            "partitions": [
                { "id": 10, "size": 30 },
                { "id": 11, "size": 20, "filesystem": { "fstype": "ext4", "mount_point": "/srv" } }
            ]
        }))?;

        assert_eq!(device.allocated(), 50);
        assert_eq!(device.available(), 50);
        assert!(device.partitions.iter().any(Partition::is_mounted));
        Ok(())
    }
}
