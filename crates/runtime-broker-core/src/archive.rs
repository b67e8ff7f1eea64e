// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Write-once summaries of removed instances.
//!
//! [`archive_operations`] folds an instance's operation history:
//!
//! 1. Operations are sorted oldest first; the first must be a provisioning.
//! 2. Creation facts (plan, start and end, region of the marketplace) come
//!    from that first provisioning.
//! 3. Final facts (accounts, shoot, runtime ID, region) come from the last
//!    operation.
//! 4. The first deprovisioning of any kind and the first real
//!    (non-temporary) one are recorded separately, since an instance may be
//!    suspended and resumed several times before it is removed.
//!
//! [`ArchiveWorker`] runs the fold for every soft-deleted instance that has
//! no summary yet.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, warn};

use crate::error::StoreError;
use crate::model::{Instance, InstanceArchived, Operation, OperationType};
use crate::plans::plan_name_or_empty;
use crate::store::Storage;

/// Users whose ID contains this are internal.
const INTERNAL_USER_DOMAIN: &str = "@sap.com";

/// Malformed operation history.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArchiveError {
    /// Fewer than a provisioning and a deprovisioning.
    #[error("cannot create archived instance - not enough operations")]
    NotEnoughOperations,

    /// The oldest operation is not a provisioning.
    #[error("first operation must be Provision, but was {0}")]
    FirstNotProvision(OperationType),
}

/// Fold an operation history into a summary.
pub fn archive_operations(operations: &[Operation]) -> Result<InstanceArchived, ArchiveError> {
    if operations.len() < 2 {
        return Err(ArchiveError::NotEnoughOperations);
    }

    let mut sorted: Vec<&Operation> = operations.iter().collect();
    sorted.sort_by_key(|op| op.created_at);

    let (Some(provisioning), Some(last)) = (sorted.first(), sorted.last()) else {
        return Err(ArchiveError::NotEnoughOperations);
    };
    if provisioning.operation_type != OperationType::Provision {
        return Err(ArchiveError::FirstNotProvision(provisioning.operation_type));
    }

    let deprovisionings = sorted
        .iter()
        .filter(|op| op.operation_type == OperationType::Deprovision);
    let first = deprovisionings.clone().next();
    let first_real = deprovisionings.clone().find(|op| !op.temporary);

    let parameters = &provisioning.provisioning_parameters;
    Ok(InstanceArchived {
        instance_id: provisioning.instance_id.clone(),
        global_account_id: last.global_account_id.clone(),
        subaccount_id: last.instance_details.sub_account_id.clone(),
        subscription_global_account_id: String::new(),
        plan_id: parameters.plan_id.clone(),
        plan_name: plan_name_or_empty(&parameters.plan_id).to_string(),
        subaccount_region: parameters.platform_region.clone(),
        region: last.region.clone(),
        provider: String::new(),
        last_runtime_id: last.instance_details.runtime_id.clone(),
        internal_user: parameters.ers_context.user_id.contains(INTERNAL_USER_DOMAIN),
        shoot_name: last.instance_details.shoot_name.clone(),
        provisioning_started_at: provisioning.created_at,
        provisioning_finished_at: provisioning.updated_at,
        provisioning_state: provisioning.state,
        first_deprovisioning_started_at: first.map(|op| op.created_at),
        first_deprovisioning_finished_at: first.map(|op| op.updated_at),
        real_deprovisioning_started_at: first_real.map(|op| op.created_at),
        real_deprovisioning_finished_at: first_real.map(|op| op.updated_at),
        last_deprovisioning_finished_at: last.updated_at,
    })
}

/// Fold a history and add the facts only the instance record holds.
pub fn archive_instance(
    instance: &Instance,
    operations: &[Operation],
) -> Result<InstanceArchived, ArchiveError> {
    let mut archived = archive_operations(operations)?;
    archived.provider = instance.provider.to_string();
    archived.subscription_global_account_id = instance.subscription_global_account_id.clone();
    Ok(archived)
}

/// Configuration for the archive worker.
#[derive(Debug, Clone)]
pub struct ArchiveWorkerConfig {
    /// Pause between sweeps.
    pub poll_interval: Duration,
    /// Instances archived per sweep.
    pub batch_size: usize,
}

impl Default for ArchiveWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(300),
            batch_size: 50,
        }
    }
}

impl ArchiveWorkerConfig {
    /// Load configuration from environment variables.
    ///
    /// - `RUNTIME_BROKER_ARCHIVE_POLL_INTERVAL_SECS` (default: 300)
    /// - `RUNTIME_BROKER_ARCHIVE_BATCH_SIZE` (default: 50)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let poll_interval = std::env::var("RUNTIME_BROKER_ARCHIVE_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.poll_interval);

        let batch_size = std::env::var("RUNTIME_BROKER_ARCHIVE_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|size| *size > 0)
            .unwrap_or(defaults.batch_size);

        Self {
            poll_interval,
            batch_size,
        }
    }
}

/// Background worker archiving soft-deleted instances.
pub struct ArchiveWorker {
    storage: Storage,
    config: ArchiveWorkerConfig,
    shutdown: Arc<Notify>,
    // malformed histories, retried only after a restart
    skipped: Mutex<HashSet<String>>,
}

impl ArchiveWorker {
    /// Create a worker.
    pub fn new(storage: Storage, config: ArchiveWorkerConfig) -> Self {
        Self {
            storage,
            config,
            shutdown: Arc::new(Notify::new()),
            skipped: Mutex::new(HashSet::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Sweep periodically until shutdown is signalled.
    pub async fn run(&self) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            batch_size = self.config.batch_size,
            "Archive worker started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Archive worker received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    match self.sweep().await {
                        Ok(0) => debug!("Nothing to archive"),
                        Ok(archived) => info!(archived, "Archived deleted instances"),
                        Err(e) => error!(error = %e, "Archive sweep failed"),
                    }
                }
            }
        }

        info!("Archive worker stopped");
    }

    /// Archive one batch; returns how many summaries were written.
    pub async fn sweep(&self) -> Result<usize, StoreError> {
        let mut skipped = self.skipped.lock().await;
        let candidates = self
            .storage
            .instances
            .list_deleted_not_archived(self.config.batch_size + skipped.len())
            .await?;

        let batch: Vec<&Instance> = candidates
            .iter()
            .filter(|i| !skipped.contains(&i.instance_id))
            .take(self.config.batch_size)
            .collect();

        let mut archived = 0;
        for instance in batch {
            let operations = self
                .storage
                .operations
                .list_operations_by_instance_id(&instance.instance_id)
                .await?;

            let summary = match archive_instance(instance, &operations) {
                Ok(summary) => summary,
                Err(e) => {
                    warn!(instance_id = %instance.instance_id, error = %e, "Skipping malformed operation history");
                    skipped.insert(instance.instance_id.clone());
                    continue;
                }
            };

            match self.storage.instances_archived.insert(&summary).await {
                Ok(()) => archived += 1,
                Err(e) if e.is_conflict() => {
                    debug!(instance_id = %instance.instance_id, "Instance already archived");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(archived)
    }
}
