//! Reconciler implementation.
//!
//! One run walks `resolve machine -> locate device -> create | update |
//! delete`, issuing remote calls strictly in sequence. The first failing
//! call aborts the run; steps already applied are not undone.

use std::sync::Arc;

use bdsync_core::{
    BlockDevice, BlockDeviceId, DesiredBlockDevice, DesiredState, Error, Machine, MachineId,
    MachineStatus, RemoteClient, Result,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::diff::{block_device_diff, missing_tags};
use crate::normalize::block_device_payload;
use crate::partition::{PartitionDriver, partition_actions};
use crate::types::{Plan, ReconcileAction, ReconcileOutcome};

/// Configuration for the reconciler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Send a declared partition `bootable` flag on partition create.
    ///
    /// Off by default: the create payload then carries only the size.
    #[serde(default)]
    pub forward_partition_bootable: bool,
}

/// Convergence executor for one block device per run.
pub struct Reconciler {
    /// Remote service client.
    client: Arc<dyn RemoteClient>,
    /// Configuration.
    config: ReconcilerConfig,
}

impl Reconciler {
    /// Create a new reconciler.
    pub fn new(client: Arc<dyn RemoteClient>, config: ReconcilerConfig) -> Self {
        Self { client, config }
    }

    /// Create a reconciler with default configuration.
    pub fn with_defaults(client: Arc<dyn RemoteClient>) -> Self {
        Self::new(client, ReconcilerConfig::default())
    }

    /// Get the configuration.
    pub const fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Converge the remote block device towards `desired`.
    ///
    /// # Errors
    ///
    /// - [`Error::MachineNotFound`] when the owning machine does not exist.
    /// - Any remote failure, unchanged. Earlier steps of the run stay applied.
    pub async fn reconcile(&self, desired: &DesiredState) -> Result<ReconcileOutcome> {
        info!(
            machine = desired.machine_fqdn(),
            device = desired.name(),
            "Starting reconciliation"
        );

        let machine = self.resolve_machine(desired.machine_fqdn()).await?;
        let existing = self.client.find_block_device(&machine.id, desired.name()).await?;

        let outcome = match (desired, existing) {
            (DesiredState::Present(device), None) => self.create(&machine, device).await?,
            (DesiredState::Present(device), Some(found)) => {
                self.update(&machine, device, found.id).await?
            }
            (DesiredState::Absent { .. }, Some(found)) => self.delete(&machine, found.id).await?,
            (DesiredState::Absent { .. }, None) => {
                info!(device = desired.name(), "Block device already absent");
                ReconcileOutcome::already_absent()
            }
        };

        info!(
            changed = outcome.changed,
            actions = outcome.actions_taken.len(),
            "Reconciliation complete"
        );
        Ok(outcome)
    }

    /// Compute the actions [`Self::reconcile`] would take, using only
    /// read calls.
    ///
    /// # Errors
    ///
    /// - [`Error::MachineNotFound`] when the owning machine does not exist.
    /// - Any failure of the read calls.
    pub async fn plan(&self, desired: &DesiredState) -> Result<Plan> {
        let machine = self.resolve_machine(desired.machine_fqdn()).await?;
        let existing = self.client.find_block_device(&machine.id, desired.name()).await?;

        let (current, actions) = match (desired, existing) {
            (DesiredState::Present(device), None) => (None, self.create_actions(device)),
            (DesiredState::Present(device), Some(found)) => {
                let current = self.client.get_block_device(&machine.id, found.id).await?;
                let actions = self.update_actions(device, &current, &machine.status);
                (Some(current), actions)
            }
            (DesiredState::Absent { .. }, Some(found)) => {
                let current = self.client.get_block_device(&machine.id, found.id).await?;
                (Some(current), vec![ReconcileAction::DeleteBlockDevice])
            }
            (DesiredState::Absent { .. }, None) => (None, Vec::new()),
        };

        debug!(actions = actions.len(), "Planned actions");
        Ok(Plan {
            machine,
            current,
            actions,
        })
    }

    async fn resolve_machine(&self, fqdn: &str) -> Result<Machine> {
        let machine = self
            .client
            .find_machine(fqdn)
            .await?
            .ok_or_else(|| Error::machine_not_found(fqdn))?;
        debug!(machine = %machine.id, status = %machine.status, "Machine resolved");
        Ok(machine)
    }

    /// Actions for a device that does not exist yet.
    fn create_actions(&self, desired: &DesiredBlockDevice) -> Vec<ReconcileAction> {
        let mut actions = vec![ReconcileAction::CreateBlockDevice {
            payload: block_device_payload(desired),
        }];

        actions.extend(partition_actions(
            &desired.partitions,
            self.config.forward_partition_bootable,
        ));

        actions.extend(
            desired
                .tags
                .iter()
                .map(|tag| ReconcileAction::AddDeviceTag { tag: tag.clone() }),
        );

        if desired.is_boot_device {
            actions.push(ReconcileAction::SetBootDevice);
        }

        actions
    }

    /// Actions for an existing device.
    ///
    /// The boot disk assignment is not diffed: it is issued every run the
    /// declaration asks for it.
    fn update_actions(
        &self,
        desired: &DesiredBlockDevice,
        current: &BlockDevice,
        status: &MachineStatus,
    ) -> Vec<ReconcileAction> {
        if !desired.partitions.is_empty() {
            debug!(
                partitions = desired.partitions.len(),
                "Partitions are only created together with a new block device; ignoring"
            );
        }

        let diff = block_device_diff(desired, current, status);
        debug!(fields = ?diff.fields(), status = %status, "Computed block device diff");

        let mut actions = Vec::new();
        if !diff.is_empty() {
            actions.push(ReconcileAction::UpdateBlockDevice { diff });
        }

        actions.extend(
            missing_tags(&desired.tags, current)
                .into_iter()
                .map(|tag| ReconcileAction::AddDeviceTag {
                    tag: tag.to_string(),
                }),
        );

        if desired.is_boot_device {
            actions.push(ReconcileAction::SetBootDevice);
        }

        actions
    }

    async fn create(
        &self,
        machine: &Machine,
        desired: &DesiredBlockDevice,
    ) -> Result<ReconcileOutcome> {
        let actions = self.create_actions(desired);
        info!(
            device = %desired.name,
            partitions = desired.partitions.len(),
            actions = actions.len(),
            "Block device absent, creating"
        );

        let (device, taken) = self.apply_actions(&machine.id, None, actions).await?;
        let device = device.ok_or_else(|| {
            Error::remote_failed("create_block_device", "no block device id was returned")
        })?;

        let after = self.client.get_block_device(&machine.id, device).await?;
        Ok(ReconcileOutcome::created(after, taken))
    }

    async fn update(
        &self,
        machine: &Machine,
        desired: &DesiredBlockDevice,
        device: BlockDeviceId,
    ) -> Result<ReconcileOutcome> {
        let before = self.client.get_block_device(&machine.id, device).await?;
        let actions = self.update_actions(desired, &before, &machine.status);
        info!(
            device = %before.name,
            id = %device,
            actions = actions.len(),
            "Block device present, updating"
        );

        let (_, taken) = self.apply_actions(&machine.id, Some(device), actions).await?;

        let after = self.client.get_block_device(&machine.id, device).await?;
        Ok(ReconcileOutcome::updated(before, after, taken))
    }

    async fn delete(&self, machine: &Machine, device: BlockDeviceId) -> Result<ReconcileOutcome> {
        let before = self.client.get_block_device(&machine.id, device).await?;
        info!(device = %before.name, id = %device, "Deleting block device");

        let (_, taken) = self
            .apply_actions(
                &machine.id,
                Some(device),
                vec![ReconcileAction::DeleteBlockDevice],
            )
            .await?;

        Ok(ReconcileOutcome::deleted(before, taken))
    }

    /// Apply actions in order, stopping at the first failure.
    async fn apply_actions(
        &self,
        machine: &MachineId,
        device: Option<BlockDeviceId>,
        actions: Vec<ReconcileAction>,
    ) -> Result<(Option<BlockDeviceId>, Vec<ReconcileAction>)> {
        let mut applier = Applier {
            client: self.client.as_ref(),
            machine,
            device,
            partitions: None,
        };
        let mut taken = Vec::with_capacity(actions.len());

        for action in actions {
            debug!(action = %action.description(), "Applying action");

            if let Err(e) = applier.apply(&action).await {
                warn!(
                    action = %action.description(),
                    applied = taken.len(),
                    error = %e,
                    "Action failed, aborting run without rollback"
                );
                return Err(e);
            }
            taken.push(action);
        }

        Ok((applier.device, taken))
    }
}

/// Per-run application state: the targeted device and, once partitions are
/// being created, their driver.
struct Applier<'a> {
    client: &'a dyn RemoteClient,
    machine: &'a MachineId,
    device: Option<BlockDeviceId>,
    partitions: Option<PartitionDriver<'a>>,
}

impl Applier<'_> {
    async fn apply(&mut self, action: &ReconcileAction) -> Result<()> {
        match action {
            ReconcileAction::CreateBlockDevice { payload } => {
                let created = self.client.create_block_device(self.machine, payload).await?;
                info!(device = %created.name, id = %created.id, "Block device created");
                self.device = Some(created.id);
            }
            ReconcileAction::UpdateBlockDevice { diff } => {
                let device = self.target("update_block_device")?;
                self.client
                    .update_block_device(self.machine, device, diff)
                    .await?;
                info!(id = %device, fields = ?diff.fields(), "Block device updated");
            }
            ReconcileAction::AddDeviceTag { tag } => {
                let device = self.target("add_device_tag")?;
                self.client.add_device_tag(self.machine, device, tag).await?;
                info!(id = %device, tag = %tag, "Block device tagged");
            }
            ReconcileAction::SetBootDevice => {
                let device = self.target("set_boot_device")?;
                self.client.set_boot_device(self.machine, device).await?;
                info!(id = %device, "Boot disk assigned");
            }
            ReconcileAction::Partition { index, step } => {
                let device = self.target("create_partition")?;
                let client = self.client;
                let machine = self.machine;
                self.partitions
                    .get_or_insert_with(|| PartitionDriver::new(client, machine, device))
                    .apply(*index, step)
                    .await?;
            }
            ReconcileAction::DeleteBlockDevice => {
                let device = self.target("delete_block_device")?;
                self.client.delete_block_device(self.machine, device).await?;
                info!(id = %device, "Block device deleted");
                self.device = None;
            }
        }
        Ok(())
    }

    fn target(&self, operation: &str) -> Result<BlockDeviceId> {
        self.device.ok_or_else(|| {
            Error::remote_failed(operation, "no block device has been located or created")
        })
    }
}
