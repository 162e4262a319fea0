//! Request payloads sent to the remote service.
//!
//! Optional fields are tagged `Option`s and are never serialized when unset,
//! so the service only sees what the caller actually supplied.

use serde::{Deserialize, Serialize};

/// Payload for creating a block device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateBlockDevice {
    pub name: String,
    pub size: u64,
    pub block_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_path: Option<String>,
}

/// Field diff for a block device update. Only changed fields are set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDeviceUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_size: Option<u64>,
}

impl BlockDeviceUpdate {
    /// True when nothing differs; an empty update is never sent.
    pub const fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.model.is_none()
            && self.serial.is_none()
            && self.id_path.is_none()
            && self.size.is_none()
            && self.block_size.is_none()
    }

    /// Names of the fields carried by this update, in a stable order.
    pub fn fields(&self) -> Vec<&'static str> {
        [
            ("name", self.name.is_some()),
            ("model", self.model.is_some()),
            ("serial", self.serial.is_some()),
            ("id_path", self.id_path.is_some()),
            ("size", self.size.is_some()),
            ("block_size", self.block_size.is_some()),
        ]
        .into_iter()
        .filter_map(|(field, set)| set.then_some(field))
        .collect()
    }
}

/// Payload for creating a partition. `size` absent means "rest of device".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePartition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootable: Option<bool>,
}

/// Payload for formatting a partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatPartition {
    pub fstype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Payload for mounting a formatted partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountPartition {
    pub mount_point: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_options: Option<String>,
}
