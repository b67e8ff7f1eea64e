// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for orchestrator integration tests.
//!
//! Provides TestContext wiring an orchestrator to in-memory storage, channel
//! queues and a recording label updater.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc::UnboundedReceiver;

use runtime_broker_core::error::StoreError;
use runtime_broker_core::labels::{LabelPropagationError, LabelUpdater};
use runtime_broker_core::model::{
    CloudProvider, ErsContext, Instance, Operation, OperationState, ProvisioningParametersDto,
};
use runtime_broker_core::orchestrator::{
    Orchestrator, OrchestratorConfig, ProvisionRequest, UpdateRequest,
};
use runtime_broker_core::plans::{KYMA_SERVICE_ID, Plan};
use runtime_broker_core::queue::ChannelQueue;
use runtime_broker_core::store::{Instances, Operations, Storage};

/// Label updater recording its calls; optionally failing every call.
#[derive(Default)]
pub struct RecordingLabels {
    pub calls: Mutex<Vec<(String, String)>>,
    pub failure: Option<LabelPropagationError>,
}

#[async_trait]
impl LabelUpdater for RecordingLabels {
    async fn update_labels(
        &self,
        runtime_id: &str,
        global_account_id: &str,
    ) -> Result<(), LabelPropagationError> {
        self.calls
            .lock()
            .unwrap()
            .push((runtime_id.to_string(), global_account_id.to_string()));
        match &self.failure {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

/// Instance store that can be armed to fail updates with a version
/// conflict; everything else goes to `inner`.
pub struct ConflictingInstances {
    pub inner: Arc<dyn Instances>,
    /// Updates passed through before conflicts start.
    pub skip: AtomicUsize,
    /// Conflicting updates still to report.
    pub conflicts: AtomicUsize,
    pub updates: AtomicUsize,
}

impl ConflictingInstances {
    /// Wrap the instances of `storage`; nothing conflicts until [`Self::arm`].
    pub fn wrap(storage: &Storage) -> (Storage, Arc<Self>) {
        let instances = Arc::new(Self {
            inner: storage.instances.clone(),
            skip: AtomicUsize::new(0),
            conflicts: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
        });
        let wrapped = Storage {
            instances: instances.clone(),
            ..storage.clone()
        };
        (wrapped, instances)
    }

    /// Let `skip` updates through, then fail the next `conflicts`.
    pub fn arm(&self, skip: usize, conflicts: usize) {
        self.skip.store(skip, Ordering::SeqCst);
        self.conflicts.store(conflicts, Ordering::SeqCst);
        self.updates.store(0, Ordering::SeqCst);
    }

    /// Update calls since the last [`Self::arm`], conflicting ones included.
    pub fn update_calls(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl Instances for ConflictingInstances {
    async fn insert(&self, instance: &Instance) -> Result<(), StoreError> {
        self.inner.insert(instance).await
    }

    async fn update(&self, instance: &Instance) -> Result<Instance, StoreError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        if !take_one(&self.skip) && take_one(&self.conflicts) {
            return Err(StoreError::Conflict {
                kind: "instance",
                id: instance.instance_id.clone(),
                reason: "version changed".to_string(),
            });
        }
        self.inner.update(instance).await
    }

    async fn get_by_id(&self, instance_id: &str) -> Result<Option<Instance>, StoreError> {
        self.inner.get_by_id(instance_id).await
    }

    async fn update_last_operation(
        &self,
        instance_id: &str,
        operation_id: &str,
    ) -> Result<(), StoreError> {
        self.inner.update_last_operation(instance_id, operation_id).await
    }

    async fn get_number_of_instances_for_global_account_id(
        &self,
        global_account_id: &str,
        plan_id: &str,
    ) -> Result<usize, StoreError> {
        self.inner
            .get_number_of_instances_for_global_account_id(global_account_id, plan_id)
            .await
    }

    async fn mark_deleted(&self, instance_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.inner.mark_deleted(instance_id, at).await
    }

    async fn list_deleted_not_archived(&self, limit: usize) -> Result<Vec<Instance>, StoreError> {
        self.inner.list_deleted_not_archived(limit).await
    }
}

/// Operation store that never reports a provisioning operation and rejects
/// every operation update, as seen by the loser of a provisioning race whose
/// cleanup write fails.
pub struct RaceLosingOperations {
    pub inner: Arc<dyn Operations>,
}

#[async_trait]
impl Operations for RaceLosingOperations {
    async fn insert_operation(&self, operation: &Operation) -> Result<(), StoreError> {
        self.inner.insert_operation(operation).await
    }

    async fn get_operation_by_id(
        &self,
        operation_id: &str,
    ) -> Result<Option<Operation>, StoreError> {
        self.inner.get_operation_by_id(operation_id).await
    }

    async fn update_operation(&self, operation: &Operation) -> Result<Operation, StoreError> {
        Err(StoreError::Database {
            operation: "update_operation".to_string(),
            details: format!("connection lost while writing {}", operation.id),
        })
    }

    async fn get_provisioning_operation_by_instance_id(
        &self,
        _instance_id: &str,
    ) -> Result<Option<Operation>, StoreError> {
        Ok(None)
    }

    async fn get_deprovisioning_operation_by_instance_id(
        &self,
        instance_id: &str,
    ) -> Result<Option<Operation>, StoreError> {
        self.inner
            .get_deprovisioning_operation_by_instance_id(instance_id)
            .await
    }

    async fn get_last_operation(&self, instance_id: &str) -> Result<Option<Operation>, StoreError> {
        self.inner.get_last_operation(instance_id).await
    }

    async fn get_last_operation_with_all_states(
        &self,
        instance_id: &str,
    ) -> Result<Option<Operation>, StoreError> {
        self.inner.get_last_operation_with_all_states(instance_id).await
    }

    async fn list_operations_by_instance_id(
        &self,
        instance_id: &str,
    ) -> Result<Vec<Operation>, StoreError> {
        self.inner.list_operations_by_instance_id(instance_id).await
    }
}

/// Orchestrator plus everything it writes to.
pub struct TestContext {
    pub orchestrator: Orchestrator,
    pub storage: Storage,
    pub provisioning: UnboundedReceiver<String>,
    pub deprovisioning: UnboundedReceiver<String>,
    pub updates: UnboundedReceiver<String>,
    pub labels: Arc<RecordingLabels>,
}

impl TestContext {
    /// Context with the default configuration.
    pub fn new() -> Self {
        Self::with_config(OrchestratorConfig::default())
    }

    /// Context with a custom configuration.
    pub fn with_config(config: OrchestratorConfig) -> Self {
        Self::build(config, RecordingLabels::default())
    }

    /// Context with a custom configuration and label updater.
    pub fn build(config: OrchestratorConfig, labels: RecordingLabels) -> Self {
        Self::with_storage(Storage::memory(), config, labels)
    }

    /// Context over an existing store.
    pub fn with_storage(
        storage: Storage,
        config: OrchestratorConfig,
        labels: RecordingLabels,
    ) -> Self {
        let (provisioning_queue, provisioning) = ChannelQueue::new("provisioning");
        let (deprovisioning_queue, deprovisioning) = ChannelQueue::new("deprovisioning");
        let (update_queue, updates) = ChannelQueue::new("update");
        let labels = Arc::new(labels);

        let orchestrator = Orchestrator::builder()
            .storage(storage.clone())
            .config(config)
            .provisioning_queue(Arc::new(provisioning_queue))
            .deprovisioning_queue(Arc::new(deprovisioning_queue))
            .update_queue(Arc::new(update_queue))
            .label_updater(labels.clone())
            .build()
            .expect("all collaborators set");

        Self {
            orchestrator,
            storage,
            provisioning,
            deprovisioning,
            updates,
            labels,
        }
    }

    /// Fetch a stored operation that must exist.
    pub async fn operation(&self, operation_id: &str) -> Operation {
        self.storage
            .operations
            .get_operation_by_id(operation_id)
            .await
            .unwrap()
            .expect("operation stored")
    }

    /// Set the state of a stored operation, as the executor would.
    pub async fn finish(&self, operation_id: &str, state: OperationState) -> Operation {
        let mut op = self.operation(operation_id).await;
        op.state = state;
        self.storage.operations.update_operation(&op).await.unwrap()
    }

    /// Provision `instance_id` with [`provision_request`] and mark the
    /// operation succeeded.
    pub async fn provisioned(&mut self, instance_id: &str) -> String {
        let response = self
            .orchestrator
            .provision(instance_id, provision_request())
            .await
            .unwrap();
        assert_eq!(
            self.provisioning.try_recv().ok().as_deref(),
            Some(response.operation_id.as_str())
        );
        self.finish(&response.operation_id, OperationState::Succeeded)
            .await;
        response.operation_id
    }

    /// Soft-delete an instance.
    pub async fn mark_deleted(&self, instance_id: &str) -> Result<(), StoreError> {
        self.storage
            .instances
            .mark_deleted(instance_id, chrono::Utc::now())
            .await
    }
}

/// Context of a regular customer account.
pub fn context() -> ErsContext {
    ErsContext {
        tenant_id: "tenant-1".into(),
        global_account_id: "ga-1".into(),
        sub_account_id: "sa-1".into(),
        user_id: "john.smith@example.com".into(),
        license_type: Some("CUSTOMER".into()),
        ..Default::default()
    }
}

/// A valid AWS provisioning request.
pub fn provision_request() -> ProvisionRequest {
    ProvisionRequest {
        service_id: KYMA_SERVICE_ID.to_string(),
        plan_id: Plan::Aws.id().to_string(),
        context: context(),
        parameters: ProvisioningParametersDto {
            name: "my-cluster".into(),
            region: Some("eu-central-1".into()),
            ..Default::default()
        },
        platform_region: Some("cf-eu10".into()),
        platform_provider: Some(CloudProvider::Aws),
        async_allowed: true,
    }
}

/// A valid trial provisioning request.
pub fn trial_request(global_account_id: &str) -> ProvisionRequest {
    let mut request = provision_request();
    request.plan_id = Plan::Trial.id().to_string();
    request.parameters.region = None;
    request.context.global_account_id = global_account_id.to_string();
    request
}

/// An update request carrying only `context`.
pub fn context_update(context: ErsContext) -> UpdateRequest {
    UpdateRequest {
        service_id: KYMA_SERVICE_ID.to_string(),
        context,
        async_allowed: true,
        ..Default::default()
    }
}
