// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Suspension and unsuspension driven by the context's `active` flag.
//!
//! A suspension is a temporary deprovisioning; an unsuspension is a new
//! provisioning that keeps the previous shoot coordinates. The handler looks
//! only at the transition of the flag, so repeating a request is harmless.

use std::sync::Arc;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{BrokerError, store_failure};
use crate::model::{ErsContext, Instance, Operation, OperationState};
use crate::queue::Queue;
use crate::store::Storage;

/// Whether the runtime currently exists, judged by its latest operations.
///
/// An instance is inactive once a deprovisioning newer than the latest
/// provisioning was created.
pub fn is_currently_active(
    provisioning: Option<&Operation>,
    deprovisioning: Option<&Operation>,
) -> bool {
    match (provisioning, deprovisioning) {
        (_, None) => true,
        (None, Some(_)) => false,
        (Some(prov), Some(deprov)) => deprov.created_at < prov.created_at,
    }
}

/// Creates suspension and unsuspension operations.
#[derive(Clone)]
pub struct SuspensionHandler {
    storage: Storage,
    provisioning_queue: Arc<dyn Queue>,
    deprovisioning_queue: Arc<dyn Queue>,
}

impl SuspensionHandler {
    /// Create a handler.
    pub fn new(
        storage: Storage,
        provisioning_queue: Arc<dyn Queue>,
        deprovisioning_queue: Arc<dyn Queue>,
    ) -> Self {
        Self {
            storage,
            provisioning_queue,
            deprovisioning_queue,
        }
    }

    /// React to the `active` flag of `incoming`.
    ///
    /// Returns `true` when a suspension or unsuspension operation was created
    /// and queued.
    #[instrument(skip_all, fields(instance_id = %instance.instance_id))]
    pub async fn handle(
        &self,
        instance: &Instance,
        incoming: &ErsContext,
    ) -> Result<bool, BrokerError> {
        let Some(requested) = incoming.active else {
            return Ok(false);
        };

        let operations = &self.storage.operations;
        let provisioning = operations
            .get_provisioning_operation_by_instance_id(&instance.instance_id)
            .await
            .map_err(store_failure("unable to get provisioning operation"))?;
        let deprovisioning = operations
            .get_deprovisioning_operation_by_instance_id(&instance.instance_id)
            .await
            .map_err(store_failure("unable to get deprovisioning operation"))?;
        let active = is_currently_active(provisioning.as_ref(), deprovisioning.as_ref());

        if requested {
            self.unsuspend(instance, active, deprovisioning.as_ref()).await
        } else {
            self.suspend(instance, active, deprovisioning.as_ref()).await
        }
    }

    async fn suspend(
        &self,
        instance: &Instance,
        active: bool,
        deprovisioning: Option<&Operation>,
    ) -> Result<bool, BrokerError> {
        if let Some(op) = deprovisioning
            && !op.temporary
        {
            info!(operation_id = %op.id, "Instance is being deprovisioned, suspension skipped");
            return Ok(false);
        }

        if !active && let Some(op) = deprovisioning {
            match op.state {
                OperationState::Failed => {
                    warn!(operation_id = %op.id, "Previous suspension failed, retriggering");
                }
                state => {
                    info!(operation_id = %op.id, state = %state, "Instance already suspended");
                    return Ok(false);
                }
            }
        }

        let operation = Operation::suspension(Uuid::new_v4().to_string(), instance);
        self.store_and_queue(&operation, self.deprovisioning_queue.as_ref())
            .await?;
        info!(operation_id = %operation.id, "Suspension operation created");
        Ok(true)
    }

    async fn unsuspend(
        &self,
        instance: &Instance,
        active: bool,
        deprovisioning: Option<&Operation>,
    ) -> Result<bool, BrokerError> {
        if active {
            return Ok(false);
        }
        if instance.is_expired() {
            info!("Instance expired, unsuspension skipped");
            return Ok(false);
        }
        if let Some(op) = deprovisioning
            && !op.temporary
        {
            info!(operation_id = %op.id, "Instance is being deprovisioned, unsuspension skipped");
            return Ok(false);
        }

        let operation = Operation::unsuspension(Uuid::new_v4().to_string(), instance);
        self.store_and_queue(&operation, self.provisioning_queue.as_ref())
            .await?;
        info!(operation_id = %operation.id, "Unsuspension operation created");
        Ok(true)
    }

    async fn store_and_queue(
        &self,
        operation: &Operation,
        queue: &dyn Queue,
    ) -> Result<(), BrokerError> {
        self.storage
            .operations
            .insert_operation(operation)
            .await
            .map_err(store_failure("unable to create operation"))?;
        self.storage
            .instances
            .update_last_operation(&operation.instance_id, &operation.id)
            .await
            .map_err(store_failure("unable to update instance"))?;
        queue.add(&operation.id);
        Ok(())
    }
}

impl std::fmt::Debug for SuspensionHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuspensionHandler").finish_non_exhaustive()
    }
}
