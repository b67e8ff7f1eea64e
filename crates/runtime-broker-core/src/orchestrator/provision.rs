// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Provisioning decisions.

use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{CONVERGED_CLOUD_BLOCKED, Orchestrator, ProvisionRequest, ProvisionResponse};
use crate::error::{BrokerError, Result, StoreError, store_failure};
use crate::model::{
    ErsContext, Instance, Operation, OperationState, ProvisioningParameters,
};
use crate::plans::{KYMA_SERVICE_ID, KYMA_SERVICE_NAME, Plan};

/// Prefix of generated shoot names.
const SHOOT_NAME_PREFIX: &str = "c-";
/// Random characters after the prefix.
const SHOOT_NAME_RANDOM_LENGTH: usize = 7;

fn generate_shoot_name() -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("{}{}", SHOOT_NAME_PREFIX, &random[..SHOOT_NAME_RANDOM_LENGTH])
}

fn shoot_domain(shoot_name: &str, base_domain: &str) -> String {
    let suffix = base_domain.trim_matches('.');
    if suffix.is_empty() {
        shoot_name.to_string()
    } else {
        format!("{}.{}", shoot_name, suffix)
    }
}

/// Check the identifiers every provisioning context must carry.
fn validate_context(context: &ErsContext) -> std::result::Result<ErsContext, BrokerError> {
    if context.global_account_id.is_empty() {
        return Err(BrokerError::validation(
            "global accountID parameter cannot be empty",
        ));
    }
    if context.sub_account_id.is_empty() {
        return Err(BrokerError::validation("subAccountID parameter cannot be empty"));
    }
    if context.user_id.is_empty() {
        return Err(BrokerError::validation("UserID parameter cannot be empty"));
    }
    let mut context = context.clone();
    context.user_id = context.user_id.to_lowercase();
    Ok(context)
}

impl Orchestrator {
    /// Create an instance, or return the operation of an identical earlier
    /// request.
    ///
    /// A repeated request with equal parameters yields the existing
    /// operation and dashboard URL; differing parameters are a conflict.
    #[instrument(skip(self, request), fields(plan_id = %request.plan_id))]
    pub async fn provision(
        &self,
        instance_id: &str,
        request: ProvisionRequest,
    ) -> Result<ProvisionResponse> {
        let platform_region = request
            .platform_region
            .filter(|r| !r.is_empty())
            .ok_or_else(|| BrokerError::internal("No region specified in request."))?;
        let platform_provider = request
            .platform_provider
            .ok_or_else(|| BrokerError::internal("No provider specified in request."))?;
        if !request.async_allowed {
            return Err(BrokerError::AsyncRequired);
        }

        if request.service_id != KYMA_SERVICE_ID {
            return Err(BrokerError::validation("service_id not recognized"));
        }
        let plan = Plan::from_id(&request.plan_id)
            .filter(|p| self.config.enabled_plans.contains(p))
            .ok_or_else(|| {
                BrokerError::validation(format!(
                    "plan ID {:?} is not recognized",
                    request.plan_id
                ))
            })?;
        let context = validate_context(&request.context)?;

        if self.config.disable_sap_converged_cloud && plan == Plan::SapConvergedCloud {
            return Err(BrokerError::validation(CONVERGED_CLOUD_BLOCKED));
        }

        let parameters = self
            .validator
            .validate_provisioning(plan, &context, &request.parameters)?;
        let parameters = ProvisioningParameters {
            plan_id: request.plan_id,
            service_id: request.service_id,
            ers_context: context,
            parameters,
            platform_region,
            platform_provider,
        };

        let existing = self
            .storage
            .operations
            .get_provisioning_operation_by_instance_id(instance_id)
            .await
            .map_err(store_failure("cannot get existing operation from storage"))?;
        if let Some(existing) = existing {
            return existing_operation_response(existing, &parameters);
        }

        self.config
            .quota
            .check(
                &self.storage,
                &parameters.plan_id,
                &parameters.ers_context.global_account_id,
            )
            .await?;

        info!(
            global_account_id = %parameters.ers_context.global_account_id,
            sub_account_id = %parameters.ers_context.sub_account_id,
            platform_region = %parameters.platform_region,
            region = parameters.parameters.region.as_deref().unwrap_or_default(),
            "Starting provisioning"
        );
        self.create_instance(instance_id, plan, parameters).await
    }

    async fn create_instance(
        &self,
        instance_id: &str,
        plan: Plan,
        parameters: ProvisioningParameters,
    ) -> Result<ProvisionResponse> {
        let dashboard_url = self.dashboard_url(plan, instance_id);

        let mut operation =
            Operation::provisioning(Uuid::new_v4().to_string(), instance_id, parameters);
        if plan == Plan::OwnCluster {
            let dto = &operation.provisioning_parameters.parameters;
            operation.instance_details.shoot_name = dto.shoot_name.clone().unwrap_or_default();
            operation.instance_details.shoot_domain = dto.shoot_domain.clone().unwrap_or_default();
        } else {
            let shoot_name = generate_shoot_name();
            operation.instance_details.shoot_domain =
                shoot_domain(&shoot_name, &self.config.shoot_domain);
            operation.instance_details.shoot_name = shoot_name;
        }
        operation.dashboard_url = dashboard_url.clone();
        operation.region = operation
            .provisioning_parameters
            .parameters
            .region
            .clone()
            .unwrap_or_default();
        info!(
            operation_id = %operation.id,
            shoot_domain = %operation.instance_details.shoot_domain,
            "Runtime shoot assigned"
        );

        self.storage
            .operations
            .insert_operation(&operation)
            .await
            .map_err(store_failure("cannot save operation"))?;

        let params = &operation.provisioning_parameters;
        let now = Utc::now();
        let instance = Instance {
            instance_id: instance_id.to_string(),
            runtime_id: String::new(),
            global_account_id: params.ers_context.global_account_id.clone(),
            subscription_global_account_id: String::new(),
            sub_account_id: params.ers_context.sub_account_id.clone(),
            service_id: params.service_id.clone(),
            service_name: KYMA_SERVICE_NAME.to_string(),
            service_plan_id: params.plan_id.clone(),
            service_plan_name: plan.name().to_string(),
            dashboard_url: dashboard_url.clone(),
            parameters: params.clone(),
            provider_region: operation.region.clone(),
            provider: plan.provider(params.platform_provider),
            instance_details: operation.instance_details.clone(),
            last_operation_id: Some(operation.id.clone()),
            created_at: now,
            updated_at: now,
            expired_at: None,
            deleted_at: None,
            version: 0,
        };

        match self.storage.instances.insert(&instance).await {
            Ok(()) => {}
            Err(e) if e.is_conflict() => return self.resolve_race(operation, e).await,
            Err(e) => return Err(store_failure("cannot save instance")(e)),
        }

        info!(operation_id = %operation.id, "Adding operation to provisioning queue");
        self.provisioning_queue.add(&operation.id);

        Ok(ProvisionResponse {
            operation_id: operation.id,
            dashboard_url,
        })
    }

    /// A concurrent request inserted the instance first. Our operation was
    /// never queued; cancel it and answer against the winner's operation.
    async fn resolve_race(
        &self,
        mut operation: Operation,
        cause: StoreError,
    ) -> Result<ProvisionResponse> {
        warn!(operation_id = %operation.id, error = %cause, "Lost provisioning race, cancelling own operation");

        operation.state = OperationState::Canceled;
        operation.description = "Superseded by a concurrent provisioning request".to_string();
        // a pending leftover would shadow the winner as latest provisioning
        self.storage
            .operations
            .update_operation(&operation)
            .await
            .map_err(store_failure("cannot save instance"))?;

        let winner = self
            .load_instance(&operation.instance_id)
            .await?
            .and_then(|instance| instance.last_operation_id);
        let Some(winner_id) = winner else {
            return Err(BrokerError::internal("cannot save instance"));
        };
        let winner = self
            .storage
            .operations
            .get_operation_by_id(&winner_id)
            .await
            .map_err(store_failure("cannot get existing operation from storage"))?
            .ok_or_else(|| BrokerError::internal("cannot save instance"))?;

        existing_operation_response(winner, &operation.provisioning_parameters)
    }
}

fn existing_operation_response(
    existing: Operation,
    requested: &ProvisioningParameters,
) -> Result<ProvisionResponse> {
    if !existing.provisioning_parameters.is_equal(requested) {
        warn!(operation_id = %existing.id, "Provisioning parameters differ from the existing operation");
        return Err(BrokerError::conflict(format!(
            "provisioning operation with InstanceID {} already exist",
            existing.instance_id
        )));
    }
    info!(operation_id = %existing.id, "Provisioning operation already exists");
    Ok(ProvisionResponse {
        operation_id: existing.id,
        dashboard_url: existing.dashboard_url,
    })
}
