//! Desired-state normalization into request payloads.
//!
//! Pure transformations: defaults are applied here and nothing the caller
//! left unset ends up in a payload.

use bdsync_core::{
    CreateBlockDevice, CreatePartition, DEFAULT_BLOCK_SIZE, DesiredBlockDevice, DesiredFilesystem,
    DesiredMount, DesiredPartition, FormatPartition, MountPartition,
};
use tracing::debug;

/// Build the create payload for a block device.
pub fn block_device_payload(desired: &DesiredBlockDevice) -> CreateBlockDevice {
    CreateBlockDevice {
        name: desired.name.clone(),
        size: desired.size,
        block_size: desired.block_size.unwrap_or(DEFAULT_BLOCK_SIZE),
        model: desired.model().map(str::to_string),
        serial: desired.serial().map(str::to_string),
        id_path: desired.id_path().map(str::to_string),
    }
}

/// Build the create payload for a partition.
///
/// `bootable` is only sent when `forward_bootable` is set; by default the
/// payload carries the size alone.
pub fn partition_payload(desired: &DesiredPartition, forward_bootable: bool) -> CreatePartition {
    let bootable = if forward_bootable {
        desired.bootable
    } else {
        if desired.bootable.is_some() {
            debug!("Partition bootable flag declared but not forwarded");
        }
        None
    };

    CreatePartition {
        size: desired.size,
        bootable,
    }
}

/// Build the format payload for a partition filesystem.
pub fn format_payload(filesystem: &DesiredFilesystem) -> FormatPartition {
    FormatPartition {
        fstype: filesystem.fs_type.clone(),
        label: filesystem.label.clone(),
    }
}

/// Build the mount payload for a formatted partition.
pub fn mount_payload(mount: &DesiredMount) -> MountPartition {
    MountPartition {
        mount_point: mount.mount_point.clone(),
        mount_options: mount.mount_options.clone(),
    }
}
