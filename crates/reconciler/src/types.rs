//! Core types for the reconciler.

use bdsync_core::{
    BlockDevice, BlockDeviceUpdate, CreateBlockDevice, CreatePartition, FormatPartition, Machine,
    MountPartition,
};
use serde::{Serialize, Serializer};
use serde_json::Map;

/// One step of a partition's sub-lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "step", content = "payload", rename_all = "snake_case")]
pub enum PartitionStep {
    Create(CreatePartition),
    Format(FormatPartition),
    Mount(MountPartition),
    AddTag(String),
}

/// Remote mutations the reconciler can issue.
///
/// Device-scoped actions target the device located or created earlier in
/// the same run. Partitions are referenced by declaration index because
/// their ids only exist once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ReconcileAction {
    /// Create the block device.
    CreateBlockDevice { payload: CreateBlockDevice },
    /// Send the changed fields of the block device.
    UpdateBlockDevice { diff: BlockDeviceUpdate },
    /// Add a tag missing from the block device.
    AddDeviceTag { tag: String },
    /// Assign the block device as the machine's boot disk.
    SetBootDevice,
    /// Drive one partition step.
    Partition { index: usize, step: PartitionStep },
    /// Delete the block device and, through the service, its partitions.
    DeleteBlockDevice,
}

impl ReconcileAction {
    /// Whether the action belongs to a partition sub-lifecycle.
    pub const fn is_partition_step(&self) -> bool {
        matches!(self, Self::Partition { .. })
    }

    /// Get a description of the action.
    pub fn description(&self) -> String {
        match self {
            Self::CreateBlockDevice { payload } => {
                format!(
                    "create block device {} (size {}, block size {})",
                    payload.name, payload.size, payload.block_size
                )
            }
            Self::UpdateBlockDevice { diff } => {
                format!("update block device fields [{}]", diff.fields().join(", "))
            }
            Self::AddDeviceTag { tag } => format!("tag block device with '{tag}'"),
            Self::SetBootDevice => "set block device as boot disk".to_string(),
            Self::Partition { index, step } => match step {
                PartitionStep::Create(payload) => match payload.size {
                    Some(size) => format!("create partition #{index} (size {size})"),
                    None => format!("create partition #{index} (rest of device)"),
                },
                PartitionStep::Format(payload) => {
                    format!("format partition #{index} as {}", payload.fstype)
                }
                PartitionStep::Mount(payload) => {
                    format!("mount partition #{index} at {}", payload.mount_point)
                }
                PartitionStep::AddTag(tag) => format!("tag partition #{index} with '{tag}'"),
            },
            Self::DeleteBlockDevice => "delete block device".to_string(),
        }
    }
}

/// Before/after snapshots of one run. Absent snapshots serialize as `{}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChangeDiff {
    #[serde(serialize_with = "record_or_empty")]
    pub before: Option<BlockDevice>,
    #[serde(serialize_with = "record_or_empty")]
    pub after: Option<BlockDevice>,
}

/// Result of one convergence run, as handed back to the invocation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcileOutcome {
    /// Whether the remote resource changed.
    pub changed: bool,
    /// Current snapshot, or `{}` after a delete or a no-op delete.
    #[serde(serialize_with = "record_or_empty")]
    pub record: Option<BlockDevice>,
    pub diff: ChangeDiff,
    /// Actions that were taken, in order.
    #[serde(rename = "actions")]
    pub actions_taken: Vec<ReconcileAction>,
}

impl ReconcileOutcome {
    /// A brand-new device: always changed, nothing before.
    pub fn created(after: BlockDevice, actions_taken: Vec<ReconcileAction>) -> Self {
        Self {
            changed: true,
            record: Some(after.clone()),
            diff: ChangeDiff {
                before: None,
                after: Some(after),
            },
            actions_taken,
        }
    }

    /// An existing device: changed only if the snapshots differ.
    pub fn updated(
        before: BlockDevice,
        after: BlockDevice,
        actions_taken: Vec<ReconcileAction>,
    ) -> Self {
        let changed = before != after;
        Self {
            changed,
            record: Some(after.clone()),
            diff: ChangeDiff {
                before: Some(before),
                after: Some(after),
            },
            actions_taken,
        }
    }

    /// The device was deleted.
    pub fn deleted(before: BlockDevice, actions_taken: Vec<ReconcileAction>) -> Self {
        Self {
            changed: true,
            record: None,
            diff: ChangeDiff {
                before: Some(before),
                after: None,
            },
            actions_taken,
        }
    }

    /// Deleting a device that does not exist.
    pub fn already_absent() -> Self {
        Self {
            changed: false,
            record: None,
            diff: ChangeDiff::default(),
            actions_taken: Vec::new(),
        }
    }
}

/// What a run would do, computed with read-only calls.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
    pub machine: Machine,
    #[serde(serialize_with = "record_or_empty")]
    pub current: Option<BlockDevice>,
    pub actions: Vec<ReconcileAction>,
}

impl Plan {
    /// True when no mutating call would be issued.
    pub fn is_noop(&self) -> bool {
        self.actions.is_empty()
    }

    /// Human-readable action lines.
    pub fn descriptions(&self) -> Vec<String> {
        self.actions.iter().map(ReconcileAction::description).collect()
    }
}

#[allow(clippy::ref_option)]
fn record_or_empty<S: Serializer>(
    record: &Option<BlockDevice>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match record {
        Some(device) => device.serialize(serializer),
        None => Map::new().serialize(serializer),
    }
}
