// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Real (non-temporary) deprovisioning.

use tracing::{info, instrument};
use uuid::Uuid;

use super::{DeprovisionResponse, Orchestrator};
use crate::error::{BrokerError, Result, store_failure};
use crate::model::Operation;

impl Orchestrator {
    /// Start removing an instance.
    ///
    /// An already running real deprovisioning is returned instead of a new
    /// one; a failed one is retriggered.
    #[instrument(skip(self))]
    pub async fn deprovision(
        &self,
        instance_id: &str,
        async_allowed: bool,
    ) -> Result<DeprovisionResponse> {
        let instance = self
            .load_instance(instance_id)
            .await?
            .filter(|i| i.deleted_at.is_none())
            .ok_or_else(|| BrokerError::Gone {
                instance_id: instance_id.to_string(),
            })?;
        if !async_allowed {
            return Err(BrokerError::AsyncRequired);
        }

        let existing = self
            .storage
            .operations
            .get_deprovisioning_operation_by_instance_id(instance_id)
            .await
            .map_err(store_failure("unable to get deprovisioning operation"))?;
        if let Some(op) = existing.filter(|op| !op.temporary && op.state.is_active()) {
            info!(operation_id = %op.id, "Deprovisioning already in progress");
            return Ok(DeprovisionResponse { operation_id: op.id });
        }

        let operation = Operation::deprovisioning(Uuid::new_v4().to_string(), &instance);
        self.storage
            .operations
            .insert_operation(&operation)
            .await
            .map_err(store_failure("unable to create deprovisioning operation"))?;
        self.storage
            .instances
            .update_last_operation(instance_id, &operation.id)
            .await
            .map_err(store_failure("unable to update instance"))?;

        info!(operation_id = %operation.id, "Adding operation to deprovisioning queue");
        self.deprovisioning_queue.add(&operation.id);

        Ok(DeprovisionResponse {
            operation_id: operation.id,
        })
    }
}
