// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance lifecycle decisions behind the broker-protocol endpoints.
//!
//! [`Orchestrator`] turns already-parsed broker requests into durable
//! operations:
//!
//! | Entry point | Outcome |
//! |---|---|
//! | [`Orchestrator::provision`] | provisioning operation, instance row, provisioning queue |
//! | [`Orchestrator::update`] | context reconciliation, then an update operation on the update queue |
//! | [`Orchestrator::deprovision`] | deprovisioning operation on the deprovisioning queue |
//! | [`Orchestrator::last_operation`] | broker-protocol state of a stored operation |
//!
//! Every operation row is written before the instance points at it, and
//! both before the ID is queued. A crash in between leaves a stored
//! operation that a later sweep can pick up.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use runtime_broker_core::orchestrator::Orchestrator;
//! use runtime_broker_core::queue::ChannelQueue;
//! use runtime_broker_core::store::Storage;
//!
//! let (provisioning, _rx1) = ChannelQueue::new("provisioning");
//! let (deprovisioning, _rx2) = ChannelQueue::new("deprovisioning");
//! let (updating, _rx3) = ChannelQueue::new("update");
//!
//! let orchestrator = Orchestrator::builder()
//!     .storage(Storage::memory())
//!     .provisioning_queue(Arc::new(provisioning))
//!     .deprovisioning_queue(Arc::new(deprovisioning))
//!     .update_queue(Arc::new(updating))
//!     .build()?;
//! ```

mod deprovision;
mod last_operation;
mod provision;
mod update;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::error::{BrokerError, store_failure};
use crate::labels::{LabelPropagationError, LabelUpdater};
use crate::model::{CloudProvider, ErsContext, Instance, ProvisioningParametersDto, UpdatingParameters};
use crate::plans::{Plan, PlanUpgrades};
use crate::queue::Queue;
use crate::retry::RetryPolicy;
use crate::store::Storage;
use crate::suspension::SuspensionHandler;
use crate::validator::{ParameterValidator, QuotaPolicy};

pub use self::last_operation::LastOperationState;

/// Message returned when the converged cloud plan is switched off.
pub const CONVERGED_CLOUD_BLOCKED: &str = "This offer is currently not available.";

/// Policy switches of the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Plans accepted by provisioning.
    pub enabled_plans: HashSet<Plan>,
    /// Base DNS domain of generated shoots.
    pub shoot_domain: String,
    /// Dashboard landscape URL.
    pub landscape_url: String,
    /// Accept context updates of expired instances.
    pub allow_update_expired_instance_with_context: bool,
    /// Follow global account changes of the context.
    pub subaccount_movement_enabled: bool,
    /// Relabel dependent resources after an account move.
    pub update_custom_resources_labels_on_account_move: bool,
    /// Reconcile the context and parameters on update.
    pub update_processing_enabled: bool,
    /// Answer updates that change nothing without a new operation.
    pub sync_empty_update_response_enabled: bool,
    /// Reject provisioning of the converged cloud plan.
    pub disable_sap_converged_cloud: bool,
    /// Plan changes an update may perform.
    pub plan_upgrades: PlanUpgrades,
    /// Trial and free plan limits.
    pub quota: QuotaPolicy,
    /// Retry of instance writes racing the executor.
    pub update_retry: RetryPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            enabled_plans: Plan::ALL.into_iter().collect(),
            shoot_domain: String::new(),
            landscape_url: String::new(),
            allow_update_expired_instance_with_context: false,
            subaccount_movement_enabled: false,
            update_custom_resources_labels_on_account_move: false,
            update_processing_enabled: true,
            sync_empty_update_response_enabled: false,
            disable_sap_converged_cloud: false,
            plan_upgrades: PlanUpgrades::default(),
            quota: QuotaPolicy::default(),
            update_retry: RetryPolicy::default(),
        }
    }
}

/// A provisioning request as parsed by the transport layer.
#[derive(Debug, Clone, Default)]
pub struct ProvisionRequest {
    /// Service offering.
    pub service_id: String,
    /// Requested plan.
    pub plan_id: String,
    /// Caller context.
    pub context: ErsContext,
    /// Cloud parameters.
    pub parameters: ProvisioningParametersDto,
    /// Marketplace region the request came through.
    pub platform_region: Option<String>,
    /// Marketplace provider the request came through.
    pub platform_provider: Option<CloudProvider>,
    /// Whether the client accepts an asynchronous answer.
    pub async_allowed: bool,
}

/// An update request as parsed by the transport layer.
#[derive(Debug, Clone, Default)]
pub struct UpdateRequest {
    /// Service offering.
    pub service_id: String,
    /// Target plan; empty or absent keeps the current one.
    pub plan_id: Option<String>,
    /// Caller context.
    pub context: ErsContext,
    /// Requested parameter changes.
    pub parameters: Option<UpdatingParameters>,
    /// Whether the client accepts an asynchronous answer.
    pub async_allowed: bool,
}

/// Answer to a provisioning request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionResponse {
    /// Async token of the provisioning operation.
    pub operation_id: String,
    /// Dashboard URL of the instance.
    pub dashboard_url: String,
}

/// Answer to an update request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateResponse {
    /// Whether an operation is running for the update.
    pub is_async: bool,
    /// Async token, set when `is_async`.
    pub operation_id: Option<String>,
    /// Dashboard URL of the instance.
    pub dashboard_url: String,
    /// Labels that could not be moved to the new global account.
    pub label_error: Option<LabelPropagationError>,
}

impl UpdateResponse {
    fn sync(dashboard_url: String) -> Self {
        Self {
            is_async: false,
            operation_id: None,
            dashboard_url,
            label_error: None,
        }
    }

    fn with_operation(operation_id: String, dashboard_url: String) -> Self {
        Self {
            is_async: true,
            operation_id: Some(operation_id),
            dashboard_url,
            label_error: None,
        }
    }
}

/// Answer to a deprovisioning request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeprovisionResponse {
    /// Async token of the deprovisioning operation.
    pub operation_id: String,
}

/// Answer to a last-operation poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastOperationResponse {
    /// Broker-protocol state.
    pub state: LastOperationState,
    /// Description recorded by the executor.
    pub description: String,
}

/// Missing collaborator when building an [`Orchestrator`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("orchestrator requires a {0}")]
pub struct BuildError(&'static str);

/// Provision, update, deprovision and last-operation decisions.
pub struct Orchestrator {
    storage: Storage,
    validator: ParameterValidator,
    config: OrchestratorConfig,
    suspension: SuspensionHandler,
    provisioning_queue: Arc<dyn Queue>,
    deprovisioning_queue: Arc<dyn Queue>,
    update_queue: Arc<dyn Queue>,
    labels: Option<Arc<dyn LabelUpdater>>,
}

impl Orchestrator {
    /// Start building an orchestrator.
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    /// Policy switches in use.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    fn dashboard_url(&self, plan: Plan, instance_id: &str) -> String {
        if plan == Plan::OwnCluster {
            self.config.landscape_url.clone()
        } else {
            format!("{}/?kubeconfigID={}", self.config.landscape_url, instance_id)
        }
    }

    async fn load_instance(&self, instance_id: &str) -> Result<Option<Instance>, BrokerError> {
        self.storage
            .instances
            .get_by_id(instance_id)
            .await
            .map_err(store_failure("unable to get instance"))
    }

    /// Write `instance` after applying `mutate`, re-reading and re-applying
    /// on version conflicts until the retry policy gives up.
    async fn update_instance_with_retry<F>(
        &self,
        mut instance: Instance,
        mutate: F,
    ) -> Result<Instance, BrokerError>
    where
        F: Fn(&mut Instance),
    {
        let mut attempt = self.config.update_retry.start();
        loop {
            mutate(&mut instance);
            match self.storage.instances.update(&instance).await {
                Ok(updated) => return Ok(updated),
                Err(e) if e.is_conflict() && attempt.wait().await => {
                    warn!(error = %e, "Instance changed concurrently, retrying update");
                    instance = self
                        .load_instance(&instance.instance_id)
                        .await?
                        .ok_or_else(|| BrokerError::InstanceNotFound {
                            instance_id: instance.instance_id.clone(),
                        })?;
                }
                Err(e) => return Err(store_failure("unable to update instance")(e)),
            }
        }
    }
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("storage", &self.storage)
            .field("labels", &self.labels.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for an [`Orchestrator`].
#[derive(Default)]
pub struct OrchestratorBuilder {
    storage: Option<Storage>,
    validator: ParameterValidator,
    config: OrchestratorConfig,
    provisioning_queue: Option<Arc<dyn Queue>>,
    deprovisioning_queue: Option<Arc<dyn Queue>>,
    update_queue: Option<Arc<dyn Queue>>,
    labels: Option<Arc<dyn LabelUpdater>>,
}

impl OrchestratorBuilder {
    /// Set the store (required).
    pub fn storage(mut self, storage: Storage) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Set the parameter validator.
    ///
    /// Default: empty region tables and the default networking rules.
    pub fn validator(mut self, validator: ParameterValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Set the policy switches.
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the provisioning queue (required).
    pub fn provisioning_queue(mut self, queue: Arc<dyn Queue>) -> Self {
        self.provisioning_queue = Some(queue);
        self
    }

    /// Set the deprovisioning queue (required).
    pub fn deprovisioning_queue(mut self, queue: Arc<dyn Queue>) -> Self {
        self.deprovisioning_queue = Some(queue);
        self
    }

    /// Set the update queue (required).
    pub fn update_queue(mut self, queue: Arc<dyn Queue>) -> Self {
        self.update_queue = Some(queue);
        self
    }

    /// Set the label updater used after account moves.
    pub fn label_updater(mut self, labels: Arc<dyn LabelUpdater>) -> Self {
        self.labels = Some(labels);
        self
    }

    /// Build the orchestrator.
    pub fn build(self) -> Result<Orchestrator, BuildError> {
        let storage = self.storage.ok_or(BuildError("storage"))?;
        let provisioning_queue = self
            .provisioning_queue
            .ok_or(BuildError("provisioning queue"))?;
        let deprovisioning_queue = self
            .deprovisioning_queue
            .ok_or(BuildError("deprovisioning queue"))?;
        let update_queue = self.update_queue.ok_or(BuildError("update queue"))?;

        let suspension = SuspensionHandler::new(
            storage.clone(),
            provisioning_queue.clone(),
            deprovisioning_queue.clone(),
        );

        Ok(Orchestrator {
            storage,
            validator: self.validator,
            config: self.config,
            suspension,
            provisioning_queue,
            deprovisioning_queue,
            update_queue,
            labels: self.labels,
        })
    }
}
