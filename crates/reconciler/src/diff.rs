//! Diff engine: desired block device against its actual snapshot.
//!
//! `name`, `model`, `serial` and `id_path` are always diffable. `size` and
//! `block_size` are only diffable while the machine is Ready. Tags never
//! enter the field diff; they are append-only and handled per tag.

use bdsync_core::{BlockDevice, BlockDeviceUpdate, DesiredBlockDevice, MachineStatus};

/// Fields whose desired value differs from the actual one and that may be
/// changed in the machine's current status. Empty means "no update call".
pub fn block_device_diff(
    desired: &DesiredBlockDevice,
    actual: &BlockDevice,
    status: &MachineStatus,
) -> BlockDeviceUpdate {
    let mut diff = BlockDeviceUpdate {
        name: changed_text(desired.new_name.as_deref(), Some(actual.name.as_str())),
        model: changed_text(desired.model(), actual.model.as_deref()),
        serial: changed_text(desired.serial(), actual.serial.as_deref()),
        id_path: changed_text(desired.id_path(), actual.id_path.as_deref()),
        ..Default::default()
    };

    if status.is_ready() {
        diff.block_size = changed_number(desired.block_size, actual.block_size);
        diff.size = changed_number(Some(desired.size), actual.size);
    }

    diff
}

/// Declared tags the device does not carry yet, in declaration order.
pub fn missing_tags<'a>(desired: &'a [String], actual: &BlockDevice) -> Vec<&'a str> {
    desired
        .iter()
        .map(String::as_str)
        .filter(|tag| !actual.has_tag(tag))
        .collect()
}

fn changed_text(desired: Option<&str>, actual: Option<&str>) -> Option<String> {
    desired
        .filter(|value| Some(*value) != actual)
        .map(str::to_string)
}

fn changed_number(desired: Option<u64>, actual: u64) -> Option<u64> {
    desired.filter(|value| *value != actual)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bdsync_core::{BlockDeviceId, DeviceIdentity};
    use serde_json::Map;

    fn actual() -> BlockDevice {
        BlockDevice {
            id: BlockDeviceId(7),
            name: "vdb".to_string(),
            size: 27,
            block_size: 512,
            model: None,
            serial: None,
            id_path: Some("/dev/vdb".to_string()),
            tags: vec!["a".to_string(), "b".to_string()],
            partitions: Vec::new(),
            extra: Map::new(),
        }
    }

    fn desired() -> DesiredBlockDevice {
        DesiredBlockDevice {
            machine_fqdn: "m1".to_string(),
            name: "vdb".to_string(),
            new_name: None,
            size: 27,
            block_size: Some(512),
            identity: Some(DeviceIdentity::IdPath {
                id_path: "/dev/vdb".to_string(),
            }),
            tags: Vec::new(),
            is_boot_device: false,
            partitions: Vec::new(),
        }
    }

    #[test]
    fn test_matching_state_yields_empty_diff() {
        let diff = block_device_diff(&desired(), &actual(), &MachineStatus::Ready);
        assert!(diff.is_empty());
    }

    #[test]
    fn test_only_block_size_differs_when_ready() -> Result<(), serde_json::Error> {
        let desired = DesiredBlockDevice {
            block_size: Some(4096),
            ..desired()
        };
        let diff = block_device_diff(&desired, &actual(), &MachineStatus::Ready);
        assert_eq!(
            diff,
            BlockDeviceUpdate {
                block_size: Some(4096),
                ..Default::default()
            }
        );
        assert_eq!(
            serde_json::to_value(&diff)?,
            serde_json::json!({ "block_size": 4096 })
        );
        Ok(())
    }

    #[test]
    fn test_size_not_diffed_unless_ready() {
        let desired = DesiredBlockDevice {
            size: 64,
            block_size: Some(4096),
            ..desired()
        };
        for status in [
            MachineStatus::Deployed,
            MachineStatus::Allocated,
            MachineStatus::Other("Rescue mode".to_string()),
        ] {
            let diff = block_device_diff(&desired, &actual(), &status);
            assert_eq!(diff.size, None);
            assert_eq!(diff.block_size, None);
        }
    }

    #[test]
    fn test_identity_fields_diffed_regardless_of_status() {
        let desired = DesiredBlockDevice {
            new_name: Some("vdc".to_string()),
            identity: Some(DeviceIdentity::ModelSerial {
                model: "QEMU".to_string(),
                serial: "QM1".to_string(),
            }),
            ..desired()
        };
        let diff = block_device_diff(&desired, &actual(), &MachineStatus::Deployed);
        assert_eq!(diff.fields(), vec!["name", "model", "serial"]);
    }

    #[test]
    fn test_new_name_equal_to_current_is_not_a_change() {
        let desired = DesiredBlockDevice {
            new_name: Some("vdb".to_string()),
            ..desired()
        };
        let diff = block_device_diff(&desired, &actual(), &MachineStatus::Ready);
        assert!(diff.is_empty());
    }

    #[test]
    fn test_unset_block_size_is_not_diffed() {
        let device = BlockDevice {
            block_size: 4096,
            ..actual()
        };
        let desired = DesiredBlockDevice {
            block_size: None,
            ..desired()
        };
        assert!(block_device_diff(&desired, &device, &MachineStatus::Ready).is_empty());
    }

    #[test]
    fn test_missing_tags_only_adds() {
        let declared = vec!["b".to_string(), "c".to_string()];
        assert_eq!(missing_tags(&declared, &actual()), vec!["c"]);
    }
}
