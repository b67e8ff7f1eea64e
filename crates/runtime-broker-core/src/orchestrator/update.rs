// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Update decisions: guards, context reconciliation, parameter changes.
//!
//! Context reconciliation runs first. When it suspends or resumes the
//! instance, requested parameter changes are ignored for this call, so one
//! asynchronous operation never mixes both kinds of change.

use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::{Orchestrator, UpdateRequest, UpdateResponse};
use crate::error::{BrokerError, Result, StoreError, store_failure};
use crate::labels::LabelPropagationError;
use crate::model::{ErsContext, Instance, Operation, OperationState, OperationType, UpdatingParameters};
use crate::plans::{Plan, plan_name_or_empty};
use crate::suspension::is_currently_active;

/// Failure of one update attempt.
enum Attempt {
    /// The instance row changed underneath; the attempt may be repeated.
    Conflict(StoreError),
    /// Final answer.
    Failed(BrokerError),
}

impl From<BrokerError> for Attempt {
    fn from(err: BrokerError) -> Self {
        Self::Failed(err)
    }
}

/// Instance after context reconciliation.
struct Reconciled {
    instance: Instance,
    suspension_changed: bool,
    label_error: Option<LabelPropagationError>,
}

impl Orchestrator {
    /// Apply a context and parameter update to an instance.
    ///
    /// The whole decision is repeated once when the instance row changed
    /// concurrently. A suspension or resume queued by the first attempt
    /// still suppresses parameter processing in the second.
    #[instrument(skip(self, request), fields(plan_id = request.plan_id.as_deref().unwrap_or_default()))]
    pub async fn update(&self, instance_id: &str, request: UpdateRequest) -> Result<UpdateResponse> {
        let mut suspension_changed = false;
        match self.try_update(instance_id, &request, &mut suspension_changed).await {
            Ok(response) => Ok(response),
            Err(Attempt::Failed(e)) => Err(e),
            Err(Attempt::Conflict(e)) => {
                warn!(error = %e, suspension_changed, "Update conflict, retrying");
                match self.try_update(instance_id, &request, &mut suspension_changed).await {
                    Ok(response) => Ok(response),
                    Err(Attempt::Failed(e)) => Err(e),
                    Err(Attempt::Conflict(e)) => Err(store_failure("unable to process the update")(e)),
                }
            }
        }
    }

    async fn try_update(
        &self,
        instance_id: &str,
        request: &UpdateRequest,
        suspension_changed: &mut bool,
    ) -> std::result::Result<UpdateResponse, Attempt> {
        let mut instance = self.load_instance(instance_id).await?.ok_or_else(|| {
            BrokerError::InstanceNotFound {
                instance_id: instance_id.to_string(),
            }
        })?;
        info!(
            service_plan_id = %instance.service_plan_id,
            global_account_id = %instance.global_account_id,
            active = ?request.context.active,
            "Updating instance"
        );

        if instance.is_expired()
            && !(self.config.allow_update_expired_instance_with_context
                && !request.context.global_account_id.is_empty())
        {
            info!("Rejecting update of an expired instance");
            return Err(BrokerError::validation("cannot update an expired instance").into());
        }

        let operations = &self.storage.operations;
        let provisioning = operations
            .get_provisioning_operation_by_instance_id(instance_id)
            .await
            .map_err(store_failure("unable to process the update"))?
            .ok_or_else(|| {
                error!("Instance has no provisioning operation");
                BrokerError::internal("unable to process the update")
            })?;
        if provisioning.state == OperationState::Failed {
            warn!(operation_id = %provisioning.id, "Rejecting update of a failed instance");
            return Err(BrokerError::unprocessable(
                "Unable to process an update of a failed instance",
            )
            .into());
        }

        let deprovisioning = operations
            .get_deprovisioning_operation_by_instance_id(instance_id)
            .await
            .map_err(store_failure("unable to process the update"))?;
        if let Some(op) = deprovisioning.as_ref().filter(|op| !op.temporary) {
            warn!(operation_id = %op.id, "Instance has started deprovisioning, rejecting update");
            return Err(BrokerError::unprocessable(
                "Unable to process an update of a deprovisioned instance",
            )
            .into());
        }

        if !self.config.landscape_url.is_empty() {
            instance.dashboard_url = format!(
                "{}/?kubeconfigID={}",
                self.config.landscape_url, instance_id
            );
        }

        if !self.config.update_processing_enabled {
            return Ok(UpdateResponse::sync(dashboard_url(&instance, &provisioning)));
        }

        let previous = instance.clone();
        let reconciled = self
            .reconcile_context(
                instance,
                &request.context,
                &provisioning,
                deprovisioning.as_ref(),
                suspension_changed,
            )
            .await?;

        let mut response = if !reconciled.suspension_changed && !reconciled.instance.is_expired() {
            self.process_update_parameters(&previous, reconciled.instance, request, &provisioning)
                .await?
        } else {
            UpdateResponse::sync(dashboard_url(&reconciled.instance, &provisioning))
        };
        response.label_error = reconciled.label_error;
        Ok(response)
    }

    async fn reconcile_context(
        &self,
        mut instance: Instance,
        incoming: &ErsContext,
        provisioning: &Operation,
        deprovisioning: Option<&Operation>,
        suspension_changed: &mut bool,
    ) -> std::result::Result<Reconciled, Attempt> {
        let last = self
            .storage
            .operations
            .get_last_operation(&instance.instance_id)
            .await
            .map_err(store_failure("failed to process ERS context"))?;

        // update contexts may be partial; the provisioning context is the base
        let mut context = provisioning.provisioning_parameters.ers_context.clone();
        context.sm_operator_credentials = instance.parameters.ers_context.sm_operator_credentials.clone();
        context.active = Some(is_currently_active(Some(provisioning), deprovisioning));
        if let Some(last) = &last {
            context = context.inherit_missing(&last.provisioning_parameters.ers_context);
        }
        instance.parameters.ers_context = context.merge_update(incoming);

        // set before the instance write so a conflicting write keeps it
        *suspension_changed |= self.suspension.handle(&instance, incoming).await?;
        if incoming.active.is_some() {
            instance.parameters.ers_context.active = incoming.active;
        }

        let mut moved = false;
        if self.config.subaccount_movement_enabled
            && !incoming.global_account_id.is_empty()
            && incoming.global_account_id != instance.global_account_id
        {
            info!(
                "Subaccount {} moved from Global Account {} to {}.",
                incoming.sub_account_id, instance.global_account_id, incoming.global_account_id
            );
            if instance.subscription_global_account_id.is_empty() {
                instance.subscription_global_account_id = instance.global_account_id.clone();
            }
            instance.global_account_id = incoming.global_account_id.clone();
            moved = true;
        }

        let instance = match self.storage.instances.update(&instance).await {
            Ok(updated) => updated,
            Err(e) if e.is_conflict() => return Err(Attempt::Conflict(e)),
            Err(e) => return Err(store_failure("unable to process the update")(e).into()),
        };

        let mut label_error = None;
        if moved && self.config.update_custom_resources_labels_on_account_move {
            if let Some(labels) = &self.labels {
                info!("Updating labels on related custom resources");
                if let Err(e) = labels
                    .update_labels(&instance.runtime_id, &instance.global_account_id)
                    .await
                {
                    error!(error = %e, "Unable to update global account label on custom resources");
                    label_error = Some(e);
                }
            } else {
                warn!("No label updater configured, labels left unchanged");
            }
        }

        Ok(Reconciled {
            instance,
            suspension_changed: *suspension_changed,
            label_error,
        })
    }

    async fn process_update_parameters(
        &self,
        previous: &Instance,
        instance: Instance,
        request: &UpdateRequest,
        provisioning: &Operation,
    ) -> std::result::Result<UpdateResponse, Attempt> {
        let target_plan_id = request
            .plan_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .unwrap_or(&instance.service_plan_id)
            .to_string();
        let plan_change = target_plan_id != instance.service_plan_id;

        if request.parameters.is_none() && !plan_change && !request.context.requires_update_operation() {
            debug!("Parameters not provided, skipping processing update parameters");
            return Ok(UpdateResponse::sync(dashboard_url(&instance, provisioning)));
        }
        if !request.async_allowed {
            return Err(BrokerError::AsyncRequired.into());
        }

        let mut params = request.parameters.clone().unwrap_or_default();
        let target_plan = Plan::from_id(&target_plan_id).ok_or_else(|| {
            BrokerError::validation(format!("plan ID {:?} is not recognized", target_plan_id))
        })?;
        if target_plan == Plan::Trial {
            params.machine_type = None;
            params.auto_scaler.auto_scaler_min = None;
            params.auto_scaler.auto_scaler_max = None;
        }

        let current = &instance.parameters.parameters;
        self.validator.validate_update(
            target_plan,
            &instance.parameters.ers_context,
            current.region.as_deref().unwrap_or_default(),
            current,
            &params,
        )?;

        if plan_change {
            let allowed = Plan::from_id(&instance.service_plan_id)
                .is_some_and(|from| self.config.plan_upgrades.allows(from, target_plan));
            if !allowed {
                let message = format!(
                    "plan upgrade from {} (planID: {}) to {} (planID: {}) is not allowed",
                    plan_name_or_empty(&instance.service_plan_id),
                    instance.service_plan_id,
                    target_plan.name(),
                    target_plan_id
                );
                info!(reason = %message, "Plan change rejected");
                return Err(BrokerError::validation(message).into());
            }
            info!(from = %instance.service_plan_id, to = %target_plan_id, "Plan change accepted");
        }

        let mut instance = instance;
        if apply_parameters(&mut instance, &params, plan_change.then_some(target_plan)) {
            let new_plan = plan_change.then_some(target_plan);
            instance = self
                .update_instance_with_retry(instance, |i| {
                    apply_parameters(i, &params, new_plan);
                })
                .await?;
        }

        if let Some(response) = self.empty_update_response(previous, &instance).await {
            return Ok(response);
        }

        let mut operation = Operation::update(Uuid::new_v4().to_string(), &instance, params);
        if plan_change {
            operation.updated_plan_id = Some(target_plan_id.clone());
            operation.provisioning_parameters.plan_id = target_plan_id;
        }

        self.storage
            .operations
            .insert_operation(&operation)
            .await
            .map_err(store_failure("unable to create update operation"))?;
        self.storage
            .instances
            .update_last_operation(&instance.instance_id, &operation.id)
            .await
            .map_err(store_failure("unable to update instance"))?;
        info!(operation_id = %operation.id, "Adding update operation to the processing queue");
        self.update_queue.add(&operation.id);

        Ok(UpdateResponse::with_operation(
            operation.id,
            dashboard_url(&instance, provisioning),
        ))
    }

    /// Answer without a new operation when nothing changed and the previous
    /// change did not fail.
    async fn empty_update_response(
        &self,
        previous: &Instance,
        current: &Instance,
    ) -> Option<UpdateResponse> {
        if !self.config.sync_empty_update_response_enabled {
            return None;
        }
        if !previous.parameters.is_equal(&current.parameters)
            || previous.service_plan_id != current.service_plan_id
            || previous.global_account_id != current.global_account_id
        {
            info!("Instance changed, update operation required");
            return None;
        }

        let last = match self
            .storage
            .operations
            .get_last_operation_with_all_states(&current.instance_id)
            .await
        {
            Ok(last) => last,
            Err(e) => {
                error!(error = %e, "Unable to get last operation, update operation required");
                return None;
            }
        };
        if let Some(last) = last.as_ref().filter(|op| op.state == OperationState::Failed) {
            info!(operation_id = %last.id, "Last operation failed, update operation required");
            return None;
        }

        info!("Parameters did not change, skipping creation of an operation");
        match last {
            Some(op) if op.operation_type == OperationType::Update && op.state != OperationState::Succeeded => {
                Some(UpdateResponse::with_operation(op.id, current.dashboard_url.clone()))
            }
            _ => Some(UpdateResponse::sync(current.dashboard_url.clone())),
        }
    }
}

/// Copy the requested changes into the stored parameters; returns whether
/// anything was copied.
fn apply_parameters(instance: &mut Instance, params: &UpdatingParameters, new_plan: Option<Plan>) -> bool {
    let mut changed = Vec::new();

    if let Some(plan) = new_plan {
        instance.parameters.plan_id = plan.id().to_string();
        instance.service_plan_id = plan.id().to_string();
        instance.service_plan_name = plan.name().to_string();
        changed.push("Plan");
    }

    let target = &mut instance.parameters.parameters;
    if let Some(oidc) = params.oidc.as_ref().filter(|o| !o.is_empty()) {
        target.oidc = Some(oidc.clone());
        changed.push("OIDC");
    }
    if !params.administrators.is_empty() {
        target.administrators = params.administrators.clone();
        changed.push("Runtime Administrators");
    }
    if params.auto_scaler.apply_to(&mut target.auto_scaler) {
        changed.push("Auto Scaler parameters");
    }
    if let Some(machine_type) = params.machine_type.as_ref().filter(|m| !m.is_empty()) {
        target.machine_type = Some(machine_type.clone());
        changed.push("Machine type");
    }
    if let Some(pools) = &params.additional_worker_node_pools {
        let plan = Plan::from_id(&instance.service_plan_id);
        if plan.is_some_and(|p| p.supports_additional_worker_node_pools()) {
            target.additional_worker_node_pools = Some(pools.clone());
            changed.push("Additional Worker Node Pools");
        }
    }
    if let Some(name) = params.name.as_ref().filter(|n| !n.is_empty()) {
        target.name = name.clone();
        changed.push("Cluster Name");
    }

    if !changed.is_empty() {
        debug!(changed = %changed.join(", "), "Instance parameters updated");
    }
    !changed.is_empty()
}

fn dashboard_url(instance: &Instance, provisioning: &Operation) -> String {
    if instance.dashboard_url.is_empty() {
        provisioning.dashboard_url.clone()
    } else {
        instance.dashboard_url.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        AdditionalWorkerNodePool, AutoScalerParameters, CloudProvider, InstanceDetails,
        OidcConfig, ProvisioningParameters,
    };
    use chrono::Utc;

    fn instance(plan: Plan) -> Instance {
        Instance {
            instance_id: "inst".into(),
            runtime_id: "rt".into(),
            global_account_id: "ga".into(),
            subscription_global_account_id: String::new(),
            sub_account_id: "sa".into(),
            service_id: "svc".into(),
            service_name: "kymaruntime".into(),
            service_plan_id: plan.id().into(),
            service_plan_name: plan.name().into(),
            dashboard_url: String::new(),
            parameters: ProvisioningParameters {
                plan_id: plan.id().into(),
                ..Default::default()
            },
            provider_region: "eu-central-1".into(),
            provider: CloudProvider::Aws,
            instance_details: InstanceDetails::default(),
            last_operation_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            expired_at: None,
            deleted_at: None,
            version: 0,
        }
    }

    #[test]
    fn test_apply_parameters_ignores_empty_values() {
        let mut inst = instance(Plan::Aws);
        let params = UpdatingParameters {
            name: Some(String::new()),
            machine_type: Some(String::new()),
            oidc: Some(OidcConfig::default()),
            ..Default::default()
        };
        assert!(!apply_parameters(&mut inst, &params, None));
        assert_eq!(inst.parameters.parameters.machine_type, None);
    }

    #[test]
    fn test_apply_parameters_copies_changes() {
        let mut inst = instance(Plan::Aws);
        let pool = AdditionalWorkerNodePool {
            name: "worker-1".into(),
            machine_type: "m6i.large".into(),
            ha_zones: true,
            auto_scaler_min: 3,
            auto_scaler_max: 5,
        };
        let params = UpdatingParameters {
            name: Some("renamed".into()),
            auto_scaler: AutoScalerParameters {
                auto_scaler_max: Some(10),
                ..Default::default()
            },
            administrators: vec!["admin@example.com".into()],
            additional_worker_node_pools: Some(vec![pool.clone()]),
            ..Default::default()
        };

        assert!(apply_parameters(&mut inst, &params, Some(Plan::Azure)));
        let dto = &inst.parameters.parameters;
        assert_eq!(dto.name, "renamed");
        assert_eq!(dto.auto_scaler.auto_scaler_max, Some(10));
        assert_eq!(dto.administrators, vec!["admin@example.com".to_string()]);
        assert_eq!(dto.additional_worker_node_pools, Some(vec![pool]));
        assert_eq!(inst.service_plan_id, Plan::Azure.id());
        assert_eq!(inst.service_plan_name, "azure");
        assert_eq!(inst.parameters.plan_id, Plan::Azure.id());
    }

    #[test]
    fn test_pools_dropped_for_plans_without_support() {
        let mut inst = instance(Plan::Trial);
        let params = UpdatingParameters {
            additional_worker_node_pools: Some(Vec::new()),
            ..Default::default()
        };
        assert!(!apply_parameters(&mut inst, &params, None));
        assert_eq!(inst.parameters.parameters.additional_worker_node_pools, None);
    }
}
