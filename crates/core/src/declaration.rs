//! User-facing declaration and its validation into [`DesiredState`].

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::desired::{
    DesiredBlockDevice, DesiredFilesystem, DesiredMount, DesiredPartition, DesiredState,
    DeviceIdentity,
};
use crate::error::{Error, Result};

/// Requested lifecycle of the block device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Present,
    Absent,
}

/// Block size applied when the declaration does not name one.
pub const DEFAULT_BLOCK_SIZE: u64 = 512;

/// One partition entry of a declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartitionDeclaration {
    #[serde(default)]
    pub size_gigabytes: Option<u64>,
    #[serde(default)]
    pub bootable: Option<bool>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub fs_type: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub mount_point: Option<String>,
    #[serde(default)]
    pub mount_options: Option<String>,
}

/// Raw declaration as written by the user (YAML or JSON).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Declaration {
    pub state: Lifecycle,
    pub machine_fqdn: String,
    pub name: String,
    #[serde(default)]
    pub new_name: Option<String>,
    #[serde(default)]
    pub size_gigabytes: Option<u64>,
    #[serde(default)]
    pub block_size: Option<u64>,
    #[serde(default)]
    pub is_boot_device: Option<bool>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub serial: Option<String>,
    #[serde(default)]
    pub id_path: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub partitions: Vec<PartitionDeclaration>,
}

impl Declaration {
    /// Parse a YAML declaration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDeclaration`] when the document does not parse.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| Error::invalid_declaration(e.to_string()))
    }

    /// Parse a JSON declaration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDeclaration`] when the document does not parse.
    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| Error::invalid_declaration(e.to_string()))
    }

    /// Validate the declaration and build the desired-state value object.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidDeclaration`] for empty identifiers or a missing size
    ///   on a `present` declaration.
    /// - [`Error::ValidationConflict`] when `model`/`serial` are not given
    ///   together, or are combined with `id_path`.
    pub fn into_desired(self) -> Result<DesiredState> {
        if self.machine_fqdn.trim().is_empty() {
            return Err(Error::invalid_declaration("machine_fqdn must not be empty"));
        }
        if self.name.trim().is_empty() {
            return Err(Error::invalid_declaration("name must not be empty"));
        }

        let identity = identity(
            supplied_text(self.model),
            supplied_text(self.serial),
            supplied_text(self.id_path),
        )?;

        match self.state {
            Lifecycle::Absent => Ok(DesiredState::Absent {
                machine_fqdn: self.machine_fqdn,
                name: self.name,
            }),
            Lifecycle::Present => {
                let size = self.size_gigabytes.ok_or_else(|| {
                    Error::invalid_declaration("size_gigabytes is required when state is present")
                })?;

                Ok(DesiredState::Present(DesiredBlockDevice {
                    machine_fqdn: self.machine_fqdn,
                    name: self.name,
                    new_name: supplied_text(self.new_name),
                    size,
                    block_size: supplied_number(self.block_size),
                    identity,
                    tags: dedup_tags(self.tags),
                    is_boot_device: self.is_boot_device.unwrap_or(false),
                    partitions: self
                        .partitions
                        .into_iter()
                        .enumerate()
                        .map(|(index, p)| p.into_desired(index))
                        .collect(),
                }))
            }
        }
    }
}

impl PartitionDeclaration {
    fn into_desired(self, index: usize) -> DesiredPartition {
        let label = supplied_text(self.label);
        let mount_point = supplied_text(self.mount_point);
        let mount_options = supplied_text(self.mount_options);

        let filesystem = match supplied_text(self.fs_type) {
            Some(fs_type) => Some(DesiredFilesystem {
                fs_type,
                label,
                mount: mount_point.map(|mount_point| DesiredMount {
                    mount_point,
                    mount_options,
                }),
            }),
            None => {
                if let Some(mount_point) = &mount_point {
                    warn!(
                        partition = index,
                        mount_point = %mount_point,
                        "Partition has a mount point but no fs_type; it will not be mounted"
                    );
                }
                if label.is_some() {
                    warn!(partition = index, "Partition label ignored without fs_type");
                }
                None
            }
        };

        DesiredPartition {
            size: supplied_number(self.size_gigabytes),
            bootable: self.bootable,
            tags: dedup_tags(self.tags),
            filesystem,
        }
    }
}

fn identity(
    model: Option<String>,
    serial: Option<String>,
    id_path: Option<String>,
) -> Result<Option<DeviceIdentity>> {
    match (model, serial, id_path) {
        (None, None, None) => Ok(None),
        (Some(model), Some(serial), None) => Ok(Some(DeviceIdentity::ModelSerial { model, serial })),
        (None, None, Some(id_path)) => Ok(Some(DeviceIdentity::IdPath { id_path })),
        (Some(_), None, None) | (None, Some(_), None) => Err(Error::validation_conflict(
            "model and serial must be given together",
        )),
        (_, _, Some(_)) => Err(Error::validation_conflict(
            "id_path is mutually exclusive with model and serial",
        )),
    }
}

/// Zero means "not supplied": the service default applies.
fn supplied_number(value: Option<u64>) -> Option<u64> {
    value.filter(|v| *v != 0)
}

/// An empty string means "not supplied".
fn supplied_text(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn dedup_tags(tags: Vec<String>) -> Vec<String> {
    tags.into_iter().unique().collect()
}
